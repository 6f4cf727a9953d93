//! Handle-addressed storage for the declaration tree.
//!
//! All declaration nodes live in one arena and are addressed by stable
//! [`DeclId`] handles; files are synchronization scopes addressed by
//! [`FileId`]. The arena is built single-threaded by the upstream
//! tree-builder collaborator (`&mut self` methods), then shared immutably
//! across resolution threads — per-node mutability is confined to the
//! lock-guarded slots inside [`DeclNode`].
//!
//! The building API creates nodes pre-populated at the lowest phase, with
//! pristine source templates and `Lazy` placeholders in the mutable slots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::decl::{
    Anchor, DeclKind, DeclNode, DeclOrigin, DeclSource, FunctionShape, PropertyShape, Slots,
};
use crate::ast::expr::{BodySlot, DelegatedCallSlot, ExprSlot, TypeSlot};
use crate::foundation::{Name, Span};

/// Stable handle of a declaration node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclId(u32);

impl DeclId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable handle of a file-level synchronization scope.
///
/// Doubles as the global ordering key for multi-file lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(u32);

impl FileId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Well-known declarations the resolver recognizes by identity.
#[derive(Debug, Default)]
pub struct WellKnown {
    /// The contract DSL entry point; a leading `contract { ... }` call
    /// whose callee resolves here is a true contract statement.
    pub contract_fn: Option<DeclId>,
    /// The ambient ordered-context accessor; references to it classify as
    /// the dedicated singleton capture kind.
    pub ambient_context: Option<DeclId>,
}

#[derive(Debug)]
struct FileEntry {
    decl: DeclId,
    path: String,
}

/// The declaration arena.
#[derive(Debug, Default)]
pub struct DeclArena {
    nodes: Vec<DeclNode>,
    files: Vec<FileEntry>,
    pub well_known: WellKnown,
}

impl DeclArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node. Panics on a dangling handle — handles are never
    /// removed, so a dangling handle is a caller bug.
    pub fn node(&self, id: DeclId) -> &DeclNode {
        &self.nodes[id.index()]
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// The declaration node representing a file container.
    pub fn file_decl(&self, file: FileId) -> DeclId {
        self.files[file.index()].decl
    }

    pub fn file_path(&self, file: FileId) -> &str {
        &self.files[file.index()].path
    }

    // --- building API (upstream tree-builder collaborator) ---

    /// Register a file and its container node.
    pub fn add_file(&mut self, path: impl Into<String>) -> FileId {
        let path = path.into();
        let file = FileId(self.files.len() as u32);
        let id = self.push_node(
            Name::new(path.clone()),
            Span::zero(file.0 as u16),
            file,
            None,
            DeclOrigin::Source,
            DeclKind::File { members: vec![] },
            DeclSource::default(),
        );
        self.files.push(FileEntry { decl: id, path });
        file
    }

    /// Low-level node creation: wires the parent link and, when the owner
    /// is a container, appends the new node to its member list.
    pub fn add_decl(
        &mut self,
        owner: DeclId,
        name: Name,
        span: Span,
        origin: DeclOrigin,
        kind: DeclKind,
        source: DeclSource,
    ) -> DeclId {
        let file = self.node(owner).file;
        let id = self.push_node(name, span, file, Some(owner), origin, kind, source);
        match &mut self.nodes[owner.index()].kind {
            DeclKind::File { members }
            | DeclKind::Script { members }
            | DeclKind::Class { members, .. } => members.push(id),
            _ => {}
        }
        id
    }

    pub fn add_class(&mut self, owner: DeclId, name: impl Into<Name>, span: Span) -> DeclId {
        self.add_decl(
            owner,
            name.into(),
            span,
            DeclOrigin::Source,
            DeclKind::Class {
                members: vec![],
                superclass: None,
            },
            DeclSource::default(),
        )
    }

    pub fn set_superclass(&mut self, class: DeclId, superclass: DeclId) {
        match &mut self.nodes[class.index()].kind {
            DeclKind::Class {
                superclass: slot, ..
            } => *slot = Some(superclass),
            other => panic!("set_superclass on non-class kind {other:?}"),
        }
    }

    pub fn add_function(
        &mut self,
        owner: DeclId,
        name: impl Into<Name>,
        span: Span,
        shape: FunctionShape,
        source: DeclSource,
    ) -> DeclId {
        self.add_decl(
            owner,
            name.into(),
            span,
            DeclOrigin::Source,
            DeclKind::Function(shape),
            source,
        )
    }

    pub fn add_constructor(
        &mut self,
        owner: DeclId,
        span: Span,
        source: DeclSource,
    ) -> DeclId {
        self.add_decl(
            owner,
            Name::special("init"),
            span,
            DeclOrigin::Source,
            DeclKind::Constructor { params: vec![] },
            source,
        )
    }

    /// Add a value parameter to a function or constructor.
    pub fn add_parameter(
        &mut self,
        function: DeclId,
        name: impl Into<Name>,
        span: Span,
        source: DeclSource,
    ) -> DeclId {
        let id = self.add_decl(
            function,
            name.into(),
            span,
            DeclOrigin::Source,
            DeclKind::Parameter { function },
            source,
        );
        match &mut self.nodes[function.index()].kind {
            DeclKind::Function(shape) => shape.params.push(id),
            DeclKind::Constructor { params } => params.push(id),
            other => panic!("add_parameter on non-function kind {other:?}"),
        }
        id
    }

    pub fn add_property(
        &mut self,
        owner: DeclId,
        name: impl Into<Name>,
        span: Span,
        shape: PropertyShape,
        source: DeclSource,
    ) -> DeclId {
        self.add_decl(
            owner,
            name.into(),
            span,
            DeclOrigin::Source,
            DeclKind::Property(shape),
            source,
        )
    }

    /// Add a getter or setter and wire it into the owning property.
    pub fn add_accessor(
        &mut self,
        property: DeclId,
        is_setter: bool,
        span: Span,
        source: DeclSource,
    ) -> DeclId {
        let name = if is_setter {
            Name::special("set")
        } else {
            Name::special("get")
        };
        let id = self.add_decl(
            property,
            name,
            span,
            DeclOrigin::Source,
            DeclKind::Accessor { property, is_setter },
            source,
        );
        match &mut self.nodes[property.index()].kind {
            DeclKind::Property(shape) => {
                if is_setter {
                    shape.setter = Some(id);
                } else {
                    shape.getter = Some(id);
                }
            }
            other => panic!("add_accessor on non-property kind {other:?}"),
        }
        id
    }

    /// Add an explicit backing field and wire it into the owning property.
    pub fn add_backing_field(&mut self, property: DeclId, span: Span, source: DeclSource) -> DeclId {
        let id = self.add_decl(
            property,
            Name::special("field"),
            span,
            DeclOrigin::Source,
            DeclKind::BackingField { property },
            source,
        );
        match &mut self.nodes[property.index()].kind {
            DeclKind::Property(shape) => shape.backing_field = Some(id),
            other => panic!("add_backing_field on non-property kind {other:?}"),
        }
        id
    }

    /// Add a local variable owned by an enclosing body (referenced through
    /// `Stmt::Declare`, not a container member list).
    pub fn add_variable(
        &mut self,
        owner: DeclId,
        name: impl Into<Name>,
        span: Span,
        origin: DeclOrigin,
        source: DeclSource,
    ) -> DeclId {
        self.add_decl(
            owner,
            name.into(),
            span,
            origin,
            DeclKind::Variable { is_local: true },
            source,
        )
    }

    pub fn add_initializer_block(&mut self, owner: DeclId, span: Span, source: DeclSource) -> DeclId {
        self.add_decl(
            owner,
            Name::special("init-block"),
            span,
            DeclOrigin::Source,
            DeclKind::InitializerBlock,
            source,
        )
    }

    pub fn add_type_alias(&mut self, owner: DeclId, name: impl Into<Name>, span: Span) -> DeclId {
        self.add_decl(
            owner,
            name.into(),
            span,
            DeclOrigin::Source,
            DeclKind::TypeAlias,
            DeclSource::default(),
        )
    }

    /// Add a scratch fragment anchored at a position in resolved code.
    pub fn add_fragment(
        &mut self,
        file: FileId,
        span: Span,
        anchor: Option<Anchor>,
        source: DeclSource,
    ) -> DeclId {
        let owner = self.file_decl(file);
        self.add_decl(
            owner,
            Name::special("fragment"),
            span,
            DeclOrigin::Source,
            DeclKind::Fragment { anchor },
            source,
        )
    }

    /// Replace a node's pristine sources after creation and re-seed its
    /// slot placeholders. The tree builder needs this for bodies that
    /// declare local nodes: the locals must exist before the body that
    /// references their handles can be attached.
    pub fn set_source(&mut self, decl: DeclId, source: DeclSource) {
        let node = &mut self.nodes[decl.index()];
        let slots = initial_slots(&node.kind, &source);
        node.source = source;
        *node.slots_mut() = slots;
    }

    fn push_node(
        &mut self,
        name: Name,
        span: Span,
        file: FileId,
        parent: Option<DeclId>,
        origin: DeclOrigin,
        kind: DeclKind,
        source: DeclSource,
    ) -> DeclId {
        let id = DeclId(self.nodes.len() as u32);
        let slots = initial_slots(&kind, &source);
        self.nodes
            .push(DeclNode::new(id, name, span, file, parent, origin, kind, source, slots));
        id
    }

    // --- rendering for error attachments ---

    /// Human-readable dump of a declaration subtree, used as the
    /// attachment on internal errors.
    pub fn render(&self, id: DeclId) -> String {
        let mut out = String::new();
        self.render_into(id, 0, &mut out);
        out
    }

    fn render_into(&self, id: DeclId, depth: usize, out: &mut String) {
        use std::fmt::Write;

        let node = self.node(id);
        let slots = node.slots();
        let indent = "  ".repeat(depth);
        let _ = writeln!(
            out,
            "{indent}{kind} '{name}' {id} phase={phase:?} body={body} init={init}",
            kind = kind_label(&node.kind),
            name = node.name,
            phase = node.phase(),
            body = slot_label(&slots.body),
            init = expr_slot_label(&slots.initializer),
        );
        drop(slots);

        for &member in node.kind.members() {
            self.render_into(member, depth + 1, out);
        }
        if let DeclKind::Property(shape) = &node.kind {
            for sub in [shape.getter, shape.setter, shape.backing_field].into_iter().flatten() {
                self.render_into(sub, depth + 1, out);
            }
        }
    }
}

fn kind_label(kind: &DeclKind) -> &'static str {
    match kind {
        DeclKind::File { .. } => "file",
        DeclKind::Script { .. } => "script",
        DeclKind::Class { .. } => "class",
        DeclKind::Function(_) => "function",
        DeclKind::Constructor { .. } => "constructor",
        DeclKind::Property(_) => "property",
        DeclKind::Accessor { is_setter: true, .. } => "setter",
        DeclKind::Accessor { .. } => "getter",
        DeclKind::BackingField { .. } => "backing-field",
        DeclKind::Variable { .. } => "variable",
        DeclKind::Parameter { .. } => "parameter",
        DeclKind::InitializerBlock => "init-block",
        DeclKind::TypeAlias => "type-alias",
        DeclKind::Fragment { .. } => "fragment",
    }
}

fn slot_label(slot: &BodySlot) -> &'static str {
    match slot {
        BodySlot::Absent => "absent",
        BodySlot::Lazy => "lazy",
        BodySlot::Block(b) if b.is_fully_resolved() => "resolved",
        BodySlot::Block(_) => "partial",
    }
}

fn expr_slot_label(slot: &ExprSlot) -> &'static str {
    match slot {
        ExprSlot::Absent => "absent",
        ExprSlot::Lazy => "lazy",
        ExprSlot::Expr(e) if e.ty.is_some() => "resolved",
        ExprSlot::Expr(_) => "partial",
    }
}

/// Compute a node's initial slot state from its pristine sources: every
/// slot with a source template starts at the `Lazy` placeholder.
fn initial_slots(kind: &DeclKind, source: &DeclSource) -> Slots {
    let mut slots = Slots {
        return_type: TypeSlot::Unresolved {
            annotation: source.declared_type.clone(),
        },
        ..Slots::default()
    };

    if source.body.is_some() {
        slots.body = BodySlot::Lazy;
    }
    if source.initializer.is_some() {
        slots.initializer = ExprSlot::Lazy;
    }
    if source.default_value.is_some() {
        slots.default_value = ExprSlot::Lazy;
    }
    if source.delegate_expression.is_some() {
        slots.delegate_expression = ExprSlot::Lazy;
    }
    if source.delegate_provider.is_some() {
        slots.delegate_provider = ExprSlot::Lazy;
    }
    if let Some(call) = &source.delegated_constructor {
        slots.delegated_constructor = DelegatedCallSlot::Lazy {
            is_this: call.is_this,
        };
    }

    debug_assert!(
        source.delegated_constructor.is_none() || matches!(kind, DeclKind::Constructor { .. }),
        "delegated constructor source on non-constructor"
    );

    slots
}
