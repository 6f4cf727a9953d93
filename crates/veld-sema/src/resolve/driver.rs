//! The target resolver / resolution driver.
//!
//! `resolve_to_phase` walks a resolution target — one declaration, or a
//! designation through its enclosing containers — and brings it to the
//! requested phase. Per node, the driver decides between:
//!
//! - a custom unlocked path (class containers, which need their members
//!   resolved before the control-flow graph sub-step; scratch fragments,
//!   which need a frozen lexical context attached first);
//! - a locked, snapshot-guarded path driving the phase transformation;
//! - a bare phase advance for kinds with nothing to resolve at the phase
//!   (type aliases, files) and for nodes the authoritative completeness
//!   check already proves resolved.
//!
//! Transformations may recursively re-enter the driver for prerequisite
//! declarations; the re-entrant file lock and the thread-local cycle
//! guard keep that safe. Every error and cancellation path runs snapshot
//! rollback before it leaves, so a node is never left half-mutated and a
//! phase is never advanced for work that did not complete.

use std::cell::RefCell;

use tracing::debug;

use crate::arena::{DeclArena, DeclId};
use crate::ast::decl::{Anchor, CfgNode, ControlFlowGraph, DeclKind};
use crate::ast::expr::Stmt;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::foundation::Name;
use crate::resolve::capture::{self, CaptureManifest, WrapperIdentity};
use crate::resolve::context::{anchored_context, enclosing_context};
use crate::resolve::error::{CancellationToken, ResolveError, ResolveResult};
use crate::resolve::keepers::{is_certainly_resolved, snapshot_for};
use crate::resolve::lock::LockProvider;
use crate::resolve::phase::{advance, InProgressGuard, Phase};
use crate::resolve::snapshot::{Guard, SlotKind, SnapshotBuilder};
use crate::resolve::target::ResolveTarget;
use crate::resolve::transform::{infer_implicit_type, resolve_declared_type, BodyTransformer};

/// Drives one resolution request against the shared declaration tree.
pub struct ResolutionDriver<'a> {
    arena: &'a DeclArena,
    locks: &'a LockProvider,
    cancel: CancellationToken,
    diagnostics: RefCell<DiagnosticSink>,
}

impl<'a> ResolutionDriver<'a> {
    pub fn new(arena: &'a DeclArena, locks: &'a LockProvider, cancel: CancellationToken) -> Self {
        Self {
            arena,
            locks,
            cancel,
            diagnostics: RefCell::new(DiagnosticSink::new()),
        }
    }

    pub fn arena(&self) -> &'a DeclArena {
        self.arena
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    /// Diagnostics collected so far, handing ownership to the caller.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut()).into_vec()
    }

    /// Resolve a target to `phase`, positioning designation containers at
    /// the preceding phase first.
    pub fn resolve_to_phase(&self, target: &ResolveTarget, phase: Phase) -> ResolveResult<()> {
        if let Some(previous) = phase.previous() {
            for &container in target.path() {
                self.ensure_at_least(container, previous)?;
            }
        }
        self.ensure_at_least(target.target(), phase)
    }

    /// Bring `decl` to at least `phase`. Returns immediately when the
    /// node is already there — this is the entry point dependents use.
    pub fn ensure_at_least(&self, decl: DeclId, phase: Phase) -> ResolveResult<()> {
        loop {
            let current = self.arena.node(decl).phase();
            if current >= phase {
                return Ok(());
            }
            let next = current.next().expect("final phase has no successor");
            self.resolve_single_phase(decl, next)?;
        }
    }

    /// One phase step for one declaration.
    fn resolve_single_phase(&self, decl: DeclId, phase: Phase) -> ResolveResult<()> {
        if self.arena.node(decl).phase() >= phase {
            return Ok(());
        }
        self.cancel.check()?;
        let _guard = InProgressGuard::enter(decl, phase)?;
        debug!(decl = %decl, phase = ?phase, "resolving");

        match phase {
            Phase::Raw => unreachable!("Raw is the initial phase"),
            Phase::Types => self.resolve_shallow_phase(decl, phase, resolve_declared_type),
            Phase::ImplicitTypes => self.resolve_shallow_phase(decl, phase, infer_implicit_type),
            Phase::Bodies => self.resolve_bodies_phase(decl),
        }
    }

    /// `Types` / `ImplicitTypes`: a single slot, a small snapshot, no
    /// custom paths.
    fn resolve_shallow_phase(
        &self,
        decl: DeclId,
        phase: Phase,
        transform: fn(&Self, DeclId) -> ResolveResult<()>,
    ) -> ResolveResult<()> {
        let node = self.arena.node(decl);
        self.locks.with_file_lock(node.file, &self.cancel, || {
            if node.phase() >= phase {
                return Ok(());
            }
            let mut builder = SnapshotBuilder::new(self.arena);
            builder.add(decl, SlotKind::ReturnType, Guard::None);
            let record = builder.finish();

            match transform(self, decl) {
                Ok(()) => {
                    advance(self.arena, decl, phase)?;
                    self.update_nested_phases(decl, phase);
                    Ok(())
                }
                Err(error) => {
                    record.restore(self.arena);
                    Err(error)
                }
            }
        })
    }

    fn resolve_bodies_phase(&self, decl: DeclId) -> ResolveResult<()> {
        let node = self.arena.node(decl);
        match &node.kind {
            DeclKind::Class { .. } => self.resolve_class_bodies(decl),
            DeclKind::Fragment { anchor } => self.resolve_fragment_bodies(decl, *anchor),
            // Accessors and parameters resolve through their owners.
            DeclKind::Accessor { property, .. } => {
                self.resolve_via_owner(decl, *property, Phase::Bodies)
            }
            DeclKind::Parameter { function } => {
                self.resolve_via_owner(decl, *function, Phase::Bodies)
            }
            // Nothing to resolve at this phase.
            DeclKind::File { .. } | DeclKind::TypeAlias => {
                self.advance_under_lock(decl, Phase::Bodies)
            }
            _ => {
                if is_certainly_resolved(self.arena, decl) {
                    // Required for correctness, not speed: re-running the
                    // transformation would double-resolve captured
                    // contract statements.
                    return self.advance_under_lock(decl, Phase::Bodies);
                }
                self.locked_body_resolve(decl)
            }
        }
    }

    /// Class containers: members first, then the additive graph sub-step.
    fn resolve_class_bodies(&self, class: DeclId) -> ResolveResult<()> {
        self.cancel.check()?;

        let node = self.arena.node(class);
        let members = node.kind.members().to_vec();
        for member in members {
            let resolvable = matches!(
                self.arena.node(member).kind,
                DeclKind::Function(_)
                    | DeclKind::Constructor { .. }
                    | DeclKind::Property(_)
                    | DeclKind::Variable { .. }
                    | DeclKind::InitializerBlock
            );
            if !resolvable {
                continue;
            }
            self.cancel.check()?;
            let previous = Phase::Bodies.previous().expect("Bodies has a predecessor");
            self.ensure_at_least(member, previous)?;
            self.ensure_at_least(member, Phase::Bodies)?;
        }

        // The graph sub-step is purely additive: no snapshot machinery,
        // only the empty-slot assertion.
        self.locks.with_file_lock(node.file, &self.cancel, || {
            self.cancel.check()?;
            if node.phase() >= Phase::Bodies {
                return Ok(());
            }

            let graph = build_class_graph(self.arena, class);
            {
                let mut slots = node.slots_mut();
                if slots.control_flow_graph.is_some() {
                    return Err(ResolveError::GraphAlreadyAttached {
                        decl: class,
                        dump: self.arena.render(class),
                    });
                }
                slots.control_flow_graph = Some(graph);
            }
            advance(self.arena, class, Phase::Bodies)?;
            Ok(())
        })
    }

    /// Scratch fragments: frozen context first, then the ordinary locked
    /// transformation with the capture analysis folded in.
    fn resolve_fragment_bodies(&self, fragment: DeclId, anchor: Option<Anchor>) -> ResolveResult<()> {
        let node = self.arena.node(fragment);
        let Some(anchor) = anchor else {
            return Err(ResolveError::MissingFragmentContext {
                decl: fragment,
                dump: self.arena.render(fragment),
            });
        };

        // The surrounding code is brought up to date once; afterwards the
        // context computation is a read-only lookup against it.
        self.ensure_at_least(anchor.declaration, Phase::Bodies)?;
        let context = anchored_context(self.arena, &anchor);

        self.locks.with_file_lock(node.file, &self.cancel, || {
            self.cancel.check()?;
            if node.phase() >= Phase::Bodies {
                return Ok(());
            }

            node.slots_mut().fragment_context = Some(context.clone());

            let mut record = snapshot_for(self.arena, fragment);
            let result = BodyTransformer::new(self, context.clone()).resolve_fragment(fragment);
            match result {
                Ok(()) => {
                    let captures = capture::analyze(self.arena, fragment);
                    let has_mutated_captures =
                        captures.values().any(|symbol| symbol.value.is_mutated);
                    node.slots_mut().capture_manifest = Some(CaptureManifest {
                        captures,
                        wrapper: WrapperIdentity {
                            class_name: Name::new(format!("Fragment${}", fragment.index())),
                            method_name: Name::new("evaluate"),
                        },
                        has_mutated_captures,
                    });

                    record.run_post_actions(self.arena);
                    advance(self.arena, fragment, Phase::Bodies)?;
                    self.update_nested_phases(fragment, Phase::Bodies);
                    Ok(())
                }
                Err(error) => {
                    record.restore(self.arena);
                    Err(error)
                }
            }
        })
    }

    /// The ordinary path: lock, snapshot, transform, advance — or roll
    /// back and propagate.
    fn locked_body_resolve(&self, decl: DeclId) -> ResolveResult<()> {
        let node = self.arena.node(decl);
        self.locks.with_file_lock(node.file, &self.cancel, || {
            // A dependent blocked on this lock observes the advanced
            // phase here and backs off.
            if node.phase() >= Phase::Bodies {
                return Ok(());
            }

            let mut record = snapshot_for(self.arena, decl);
            let context = enclosing_context(self.arena, decl);
            let result = self.run_body_transform(decl, context);

            match result {
                Ok(()) => {
                    record.run_post_actions(self.arena);
                    advance(self.arena, decl, Phase::Bodies)?;
                    self.update_nested_phases(decl, Phase::Bodies);
                    Ok(())
                }
                Err(error) => {
                    record.restore(self.arena);
                    Err(error)
                }
            }
        })
    }

    fn run_body_transform(
        &self,
        decl: DeclId,
        context: crate::resolve::context::LexicalContext,
    ) -> ResolveResult<()> {
        let mut transformer = BodyTransformer::new(self, context);
        match &self.arena.node(decl).kind {
            DeclKind::Function(_) => transformer.resolve_function(decl),
            DeclKind::Constructor { .. } => transformer.resolve_constructor(decl),
            DeclKind::Property(_) => transformer.resolve_property(decl),
            DeclKind::Variable { .. } | DeclKind::BackingField { .. } => {
                transformer.resolve_variable(decl)
            }
            DeclKind::InitializerBlock => transformer.resolve_initializer_block(decl),
            // Script members resolve individually; the script node itself
            // carries no lazy body state.
            DeclKind::Script { .. } => Ok(()),
            _ => Err(ResolveError::UnexpectedDeclaration {
                decl,
                dump: self.arena.render(decl),
            }),
        }
    }

    /// Resolve a sub-declaration through its owner, then advance it
    /// directly if the owner's pass left it behind (owner was already
    /// resolved on an earlier request).
    fn resolve_via_owner(&self, decl: DeclId, owner: DeclId, phase: Phase) -> ResolveResult<()> {
        self.ensure_at_least(owner, phase)?;
        if self.arena.node(decl).phase() < phase {
            self.advance_under_lock(decl, phase)?;
        }
        Ok(())
    }

    /// Phase advance with no transformation and no snapshot.
    fn advance_under_lock(&self, decl: DeclId, phase: Phase) -> ResolveResult<()> {
        let node = self.arena.node(decl);
        self.locks.with_file_lock(node.file, &self.cancel, || {
            if node.phase() < phase {
                advance(self.arena, decl, phase)?;
            }
            Ok(())
        })
    }

    /// After a successful advance, nested sub-declarations move with
    /// their owner: parameters, accessors, backing fields, and the local
    /// declarations the freshly resolved body introduced.
    fn update_nested_phases(&self, decl: DeclId, phase: Phase) {
        let node = self.arena.node(decl);
        match &node.kind {
            DeclKind::Function(shape) => {
                for &param in &shape.params {
                    self.bump_phase(param, phase);
                }
            }
            DeclKind::Constructor { params } => {
                for &param in params {
                    self.bump_phase(param, phase);
                }
            }
            DeclKind::Property(shape) => {
                for sub in [shape.getter, shape.setter, shape.backing_field]
                    .into_iter()
                    .flatten()
                {
                    self.bump_phase(sub, phase);
                    self.update_nested_phases(sub, phase);
                }
            }
            _ => {}
        }

        let locals: Vec<DeclId> = match node.slots().body.as_block() {
            Some(block) => block
                .statements
                .iter()
                .filter_map(|stmt| match stmt {
                    Stmt::Declare(id) => Some(*id),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        };
        for local in locals {
            self.bump_phase(local, phase);
            self.update_nested_phases(local, phase);
        }
    }

    fn bump_phase(&self, decl: DeclId, phase: Phase) {
        let node = self.arena.node(decl);
        if node.phase() < phase {
            node.store_phase(phase);
        }
    }

    /// Post-resolution validation: every slot a resolved declaration of
    /// this kind must have filled is concrete and fully resolved.
    pub fn validate_resolved(&self, decl: DeclId) -> Result<(), String> {
        let node = self.arena.node(decl);
        if node.phase() < Phase::Bodies {
            return Err(format!("{} is not fully resolved:\n{}", decl, self.arena.render(decl)));
        }

        let slots = node.slots();
        let complain = |what: &str| {
            Err(format!(
                "{what} of {decl} is not resolved:\n{dump}",
                dump = self.arena.render(decl)
            ))
        };

        match &node.kind {
            DeclKind::Function(_) | DeclKind::Accessor { .. } | DeclKind::InitializerBlock => {
                if node.source.body.is_some() && !slots.body.is_fully_resolved() {
                    return complain("body");
                }
            }
            DeclKind::Constructor { .. } => {
                if node.source.body.is_some() && !slots.body.is_fully_resolved() {
                    return complain("body");
                }
                if node.source.delegated_constructor.is_some()
                    && !slots.delegated_constructor.is_fully_resolved()
                {
                    return complain("delegated constructor call");
                }
            }
            DeclKind::Property(_) | DeclKind::Variable { .. } | DeclKind::BackingField { .. } => {
                if node.source.initializer.is_some() && !slots.initializer.is_fully_resolved() {
                    return complain("initializer");
                }
            }
            DeclKind::Parameter { .. } => {
                if node.source.default_value.is_some() && !slots.default_value.is_fully_resolved()
                {
                    return complain("default value");
                }
            }
            _ => {}
        }
        drop(slots);

        // Nested declarations must have been advanced with their owner.
        match &node.kind {
            DeclKind::Function(shape) => {
                for &param in &shape.params {
                    self.validate_resolved(param)?;
                }
            }
            DeclKind::Constructor { params } => {
                for &param in params {
                    self.validate_resolved(param)?;
                }
            }
            DeclKind::Property(shape) => {
                for sub in [shape.getter, shape.setter, shape.backing_field]
                    .into_iter()
                    .flatten()
                {
                    self.validate_resolved(sub)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Build a class's control-flow graph from its resolved property
/// initializers and initializer blocks, in declaration order.
pub(crate) fn build_class_graph(arena: &DeclArena, class: DeclId) -> ControlFlowGraph {
    let mut nodes = Vec::new();
    for &member in arena.node(class).kind.members() {
        let node = arena.node(member);
        match &node.kind {
            DeclKind::Property(_) => {
                let slots = node.slots();
                if slots.initializer.as_expr().is_some() {
                    nodes.push(CfgNode {
                        decl: member,
                        statement_count: 1,
                    });
                }
            }
            DeclKind::InitializerBlock => {
                let slots = node.slots();
                let statement_count = slots
                    .body
                    .as_block()
                    .map(|block| block.statements.len())
                    .unwrap_or(0);
                nodes.push(CfgNode {
                    decl: member,
                    statement_count,
                });
            }
            _ => {}
        }
    }
    ControlFlowGraph { nodes }
}
