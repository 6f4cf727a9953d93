//! Declaration nodes of the Veld program tree.
//!
//! A declaration node has two halves:
//!
//! - **Immutable structure**, fixed when the upstream tree builder creates
//!   the node: kind, name, span, owning file, parent, member handles, and
//!   the pristine (unresolved) source templates.
//! - **Mutable resolution state**: a monotonic phase counter and the typed
//!   slots body resolution writes (`Slots`), guarded by a per-node RwLock.
//!
//! Only the thread holding the node's file lock may write slots; readers
//! of already phase-advanced slots take the node lock briefly and need no
//! file lock (the release-ordered phase store is the visibility barrier).
//!
//! Containers exclusively own their direct member lists; accessor and
//! backing-field links back to the owning property are non-owning handles.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::arena::{DeclId, FileId};
use crate::ast::expr::{Block, BodySlot, DelegatedCall, DelegatedCallSlot, Expr, ExprSlot, TypeSlot};
use crate::foundation::{Name, Span};
use crate::resolve::capture::CaptureManifest;
use crate::resolve::context::LexicalContext;
use crate::resolve::phase::Phase;

/// Where a declaration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclOrigin {
    /// Ordinary source code.
    Source,
    /// Synthetic variable injected by the debugger into a fragment's
    /// surrounding scope (e.g. a marked-object label).
    DebuggerSynthetic,
}

/// Context receiver declared on a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextReceiver {
    /// Label the receiver is addressed by (`this@label`); receivers
    /// without a label cannot be captured by fragments.
    pub label: Option<Name>,
}

/// Structural shape of a function-like declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionShape {
    pub params: Vec<DeclId>,
    /// Extension receiver label; `None` when the function is not an
    /// extension.
    pub extension_label: Option<Name>,
    pub context_receivers: Vec<ContextReceiver>,
    pub is_local: bool,
}

/// Structural shape of a property declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyShape {
    pub getter: Option<DeclId>,
    pub setter: Option<DeclId>,
    pub backing_field: Option<DeclId>,
    pub has_delegate: bool,
    pub is_local: bool,
}

/// Anchor of a scratch fragment: a position inside already-resolved code
/// from which the frozen lexical context is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// Declaration whose body surrounds the fragment's position.
    pub declaration: DeclId,
    /// Leading statements of that body preceding the position; locals they
    /// declare are visible to the fragment.
    pub statements_before: usize,
}

/// Closed set of declaration kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    /// A source file as a container.
    File { members: Vec<DeclId> },
    /// A script: file-level statements with declarations.
    Script { members: Vec<DeclId> },
    Class {
        members: Vec<DeclId>,
        superclass: Option<DeclId>,
    },
    Function(FunctionShape),
    Constructor { params: Vec<DeclId> },
    Property(PropertyShape),
    Accessor { property: DeclId, is_setter: bool },
    BackingField { property: DeclId },
    Variable { is_local: bool },
    Parameter { function: DeclId },
    InitializerBlock,
    TypeAlias,
    Fragment { anchor: Option<Anchor> },
}

impl DeclKind {
    /// Direct members of a container kind.
    pub fn members(&self) -> &[DeclId] {
        match self {
            DeclKind::File { members }
            | DeclKind::Script { members }
            | DeclKind::Class { members, .. } => members,
            _ => &[],
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self,
            DeclKind::File { .. } | DeclKind::Script { .. } | DeclKind::Class { .. }
        )
    }
}

/// Resolution progress of a property's body parts.
///
/// Authoritative sub-state marker: the resolver updates it as it resolves
/// the initializer, getter, and setter, and the snapshot descriptors skip
/// parts this marker proves done. Strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PropertyBodyState {
    #[default]
    NothingResolved,
    InitializerResolved,
    InitializerAndGetterResolved,
    EverythingResolved,
}

/// Control-flow graph of a class container.
///
/// Derived artifact built once all relevant members are resolved and
/// attached additively; a second attachment is a fatal internal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    pub nodes: Vec<CfgNode>,
}

/// One member's contribution to a container graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgNode {
    pub decl: DeclId,
    pub statement_count: usize,
}

/// Pristine source templates handed over by the parser collaborator.
///
/// Immutable; rollback may reset a mutable slot to its placeholder, and
/// re-resolution then recomputes from these.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclSource {
    /// Explicit type annotation, if written.
    pub declared_type: Option<Name>,
    pub body: Option<Block>,
    pub initializer: Option<Expr>,
    pub default_value: Option<Expr>,
    pub delegate_expression: Option<Expr>,
    pub delegate_provider: Option<Expr>,
    pub delegated_constructor: Option<DelegatedCall>,
}

/// Mutable resolution state of a declaration.
///
/// One flat struct for all kinds; kinds use the fields that apply to them
/// and leave the rest at their defaults. Slot identity for the snapshot
/// engine is `(DeclId, SlotKind)`.
#[derive(Debug, Default)]
pub struct Slots {
    pub return_type: TypeSlot,
    pub body: BodySlot,
    pub initializer: ExprSlot,
    pub default_value: ExprSlot,
    pub delegate_expression: ExprSlot,
    pub delegate_provider: ExprSlot,
    pub delegated_constructor: DelegatedCallSlot,
    pub control_flow_graph: Option<ControlFlowGraph>,
    pub body_state: PropertyBodyState,
    /// Frozen lexical context attached to a fragment before its body
    /// resolves.
    pub fragment_context: Option<LexicalContext>,
    /// Capture manifest attached to a fragment after its body resolves.
    pub capture_manifest: Option<CaptureManifest>,
}

/// A declaration node in the shared program tree.
#[derive(Debug)]
pub struct DeclNode {
    pub id: DeclId,
    pub name: Name,
    pub span: Span,
    pub file: FileId,
    pub parent: Option<DeclId>,
    pub origin: DeclOrigin,
    pub kind: DeclKind,
    pub source: DeclSource,
    phase: AtomicU8,
    slots: RwLock<Slots>,
}

impl DeclNode {
    pub(crate) fn new(
        id: DeclId,
        name: Name,
        span: Span,
        file: FileId,
        parent: Option<DeclId>,
        origin: DeclOrigin,
        kind: DeclKind,
        source: DeclSource,
        slots: Slots,
    ) -> Self {
        Self {
            id,
            name,
            span,
            file,
            parent,
            origin,
            kind,
            source,
            phase: AtomicU8::new(Phase::Raw as u8),
            slots: RwLock::new(slots),
        }
    }

    /// Current resolution phase (acquire load: pairs with the release
    /// store in [`DeclNode::store_phase`], so slot writes for a reached
    /// phase are visible to any reader observing it).
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Release-store a new phase value. Monotonicity is enforced by the
    /// phase state machine, not here.
    pub(crate) fn store_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Read access to the mutable slots.
    pub fn slots(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read()
    }

    /// Write access to the mutable slots. Callers must hold the node's
    /// file lock.
    pub(crate) fn slots_mut(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_body_state_ordering() {
        assert!(PropertyBodyState::NothingResolved < PropertyBodyState::InitializerResolved);
        assert!(
            PropertyBodyState::InitializerAndGetterResolved < PropertyBodyState::EverythingResolved
        );
    }

    #[test]
    fn test_kind_members() {
        let kind = DeclKind::Class {
            members: vec![DeclId::from_raw(1), DeclId::from_raw(2)],
            superclass: None,
        };
        assert_eq!(kind.members().len(), 2);
        assert!(kind.is_container());
        assert!(!DeclKind::TypeAlias.is_container());
    }
}
