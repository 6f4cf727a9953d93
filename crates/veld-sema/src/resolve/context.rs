//! Frozen lexical context.
//!
//! A scratch fragment resolves against the scopes surrounding its anchor
//! position; ordinary declarations resolve against their enclosing
//! containers. Both cases use a `LexicalContext`: an ordered tower of
//! scope entries, outermost first, computed by a read-only walk of the
//! arena — computing a context never mutates the anchored code.

use crate::arena::{DeclArena, DeclId};
use crate::ast::decl::{Anchor, DeclKind};
use crate::ast::expr::{Stmt, ThisBinding};
use crate::foundation::Name;

/// One scope level of a lexical context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEntry {
    /// Top-level members of a file container.
    FileMembers { file_decl: DeclId },
    /// Instance scope of a class: members plus an implicit `this`.
    Class { class: DeclId },
    /// A function scope: parameters plus extension/context receivers.
    Function { function: DeclId },
    /// Local declarations visible at the anchor position.
    Locals { declarations: Vec<DeclId> },
}

/// Ordered tower of scopes, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexicalContext {
    pub entries: Vec<ContextEntry>,
}

/// Context of a declaration's own body: the scopes of its parents.
pub fn enclosing_context(arena: &DeclArena, decl: DeclId) -> LexicalContext {
    let mut entries = Vec::new();
    collect_parent_scopes(arena, arena.node(decl).parent, &mut entries);
    entries.reverse();
    LexicalContext { entries }
}

/// Frozen context of a scratch fragment: the scopes surrounding its
/// anchor, including locals declared before the anchored position.
pub fn anchored_context(arena: &DeclArena, anchor: &Anchor) -> LexicalContext {
    let mut entries = Vec::new();

    // Innermost first: locals preceding the anchor statement.
    let host = arena.node(anchor.declaration);
    let slots = host.slots();
    if let Some(block) = slots.body.as_block() {
        let upto = anchor.statements_before.min(block.statements.len());
        let declarations: Vec<DeclId> = block.statements[..upto]
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Declare(id) => Some(*id),
                _ => None,
            })
            .collect();
        if !declarations.is_empty() {
            entries.push(ContextEntry::Locals { declarations });
        }
    }
    drop(slots);

    collect_parent_scopes(arena, Some(anchor.declaration), &mut entries);
    entries.reverse();
    LexicalContext { entries }
}

fn collect_parent_scopes(arena: &DeclArena, from: Option<DeclId>, entries: &mut Vec<ContextEntry>) {
    let mut current = from;
    while let Some(id) = current {
        let node = arena.node(id);
        match &node.kind {
            DeclKind::Function(_) | DeclKind::Constructor { .. } | DeclKind::Accessor { .. } => {
                entries.push(ContextEntry::Function { function: id });
            }
            DeclKind::Class { .. } => entries.push(ContextEntry::Class { class: id }),
            DeclKind::File { .. } | DeclKind::Script { .. } => {
                entries.push(ContextEntry::FileMembers { file_decl: id });
            }
            _ => {}
        }
        current = node.parent;
    }
}

impl LexicalContext {
    /// Look a name up, innermost scope first.
    pub fn lookup(&self, arena: &DeclArena, name: &Name) -> Option<DeclId> {
        for entry in self.entries.iter().rev() {
            let found = match entry {
                ContextEntry::Locals { declarations } => declarations
                    .iter()
                    .rev()
                    .copied()
                    .find(|&d| &arena.node(d).name == name),
                ContextEntry::Function { function } => match &arena.node(*function).kind {
                    DeclKind::Function(shape) => shape
                        .params
                        .iter()
                        .copied()
                        .find(|&p| &arena.node(p).name == name),
                    DeclKind::Constructor { params } => {
                        params.iter().copied().find(|&p| &arena.node(p).name == name)
                    }
                    _ => None,
                },
                ContextEntry::Class { class } => member_named(arena, *class, name),
                ContextEntry::FileMembers { file_decl } => member_named(arena, *file_decl, name),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Resolve a `this` reference, innermost receiver first.
    ///
    /// An unlabeled `this` binds to the innermost class or extension
    /// receiver; a labeled `this@x` binds to the class, extension
    /// receiver, or context receiver carrying that label.
    pub fn resolve_this(&self, arena: &DeclArena, label: Option<&Name>) -> ThisBinding {
        for entry in self.entries.iter().rev() {
            match entry {
                ContextEntry::Class { class } => {
                    let matches = match label {
                        None => true,
                        Some(label) => &arena.node(*class).name == label,
                    };
                    if matches {
                        return ThisBinding::Class(*class);
                    }
                }
                ContextEntry::Function { function } => {
                    if let DeclKind::Function(shape) = &arena.node(*function).kind {
                        match label {
                            None => {
                                if shape.extension_label.is_some() {
                                    return ThisBinding::Extension(*function);
                                }
                            }
                            Some(label) => {
                                if shape.extension_label.as_ref() == Some(label) {
                                    return ThisBinding::Extension(*function);
                                }
                                for (index, receiver) in shape.context_receivers.iter().enumerate()
                                {
                                    if receiver.label.as_ref() == Some(label) {
                                        return ThisBinding::Context {
                                            function: *function,
                                            index: index as u32,
                                        };
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        ThisBinding::Unbound
    }

    /// Resolve a `super` reference: the superclass of the innermost class.
    pub fn resolve_super(&self, arena: &DeclArena) -> Option<DeclId> {
        self.entries.iter().rev().find_map(|entry| match entry {
            ContextEntry::Class { class } => match &arena.node(*class).kind {
                DeclKind::Class { superclass, .. } => *superclass,
                _ => None,
            },
            _ => None,
        })
    }

    /// The innermost enclosing class, if any.
    pub fn innermost_class(&self) -> Option<DeclId> {
        self.entries.iter().rev().find_map(|entry| match entry {
            ContextEntry::Class { class } => Some(*class),
            _ => None,
        })
    }
}

fn member_named(arena: &DeclArena, container: DeclId, name: &Name) -> Option<DeclId> {
    arena
        .node(container)
        .kind
        .members()
        .iter()
        .copied()
        .find(|&m| &arena.node(m).name == name)
}
