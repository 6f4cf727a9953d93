//! The field snapshot engine.
//!
//! A guarded resolution step captures the current values of exactly the
//! slots its transformation may touch (including slots of sub-entities),
//! runs the transformation, and either discards the record (success) or
//! replays the captured values in reverse registration order (rollback on
//! error or cancellation). Restore always runs to completion; partial
//! restoration is not an outcome.
//!
//! Capture deep-clones slot values, so a recorded value cannot be
//! corrupted by later in-place mutation. The placeholder guard is
//! therefore enforced on the restore side only: a recorded `Lazy`
//! placeholder never overwrites a concrete, fully resolved value.
//!
//! Post-processing actions are explicit values, registered while the
//! snapshot is built and executed only on the successful path, in
//! registration order. They exist for fix-ups that depend on the final
//! shape of a freshly computed value (contract-block re-threading).

use crate::arena::{DeclArena, DeclId};
use crate::ast::decl::PropertyBodyState;
use crate::ast::expr::{BodySlot, ContractBlock, DelegatedCallSlot, ExprSlot, Stmt, TypeSlot};

/// Identity of a snapshottable slot on a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    ReturnType,
    Body,
    Initializer,
    DefaultValue,
    DelegateExpression,
    DelegateProvider,
    DelegatedConstructor,
    BodyState,
}

/// Restore policy of a registered slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Restore unconditionally.
    None,
    /// The slot's value space contains a placeholder marker; restoring
    /// never overwrites a concrete, fully resolved value with it.
    Placeholder,
}

/// Captured value of one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Type(TypeSlot),
    Body(BodySlot),
    Expr(ExprSlot),
    DelegatedCall(DelegatedCallSlot),
    BodyState(PropertyBodyState),
}

impl SlotValue {
    fn is_placeholder(&self) -> bool {
        match self {
            SlotValue::Body(slot) => slot.is_placeholder(),
            SlotValue::Expr(slot) => slot.is_placeholder(),
            SlotValue::DelegatedCall(slot) => slot.is_placeholder(),
            SlotValue::Type(_) | SlotValue::BodyState(_) => false,
        }
    }

    fn is_fully_resolved(&self) -> bool {
        match self {
            SlotValue::Body(slot) => slot.is_fully_resolved(),
            SlotValue::Expr(slot) => slot.is_fully_resolved(),
            SlotValue::DelegatedCall(slot) => slot.is_fully_resolved(),
            SlotValue::Type(slot) => slot.is_resolved(),
            SlotValue::BodyState(_) => false,
        }
    }
}

/// Deferred fix-up executed after a successful transformation.
#[derive(Debug, Clone)]
pub enum PostAction {
    /// The old body began with an already-resolved contract statement:
    /// re-thread it as the first statement of the freshly rebuilt body so
    /// the contract is not re-analyzed.
    RestoreContractBlock {
        function: DeclId,
        statement: ContractBlock,
    },
    /// The old body began with a contract-shaped call that was not a true
    /// contract: if the new body wrapped its first statement, unwrap it
    /// back to the inner call.
    UnwrapContractBlock { function: DeclId },
}

#[derive(Debug)]
struct SnapshotEntry {
    decl: DeclId,
    slot: SlotKind,
    guard: Guard,
    value: SlotValue,
}

/// Ordered record of captured slot values plus deferred post-processing.
///
/// Exclusively owned by the resolution step that created it; consumed by
/// either [`SnapshotRecord::restore`] or
/// [`SnapshotRecord::run_post_actions`].
#[derive(Debug, Default)]
pub struct SnapshotRecord {
    entries: Vec<SnapshotEntry>,
    post_actions: Vec<PostAction>,
}

impl SnapshotRecord {
    /// True when the step captured nothing — the node was already proven
    /// resolved and the transformation must be skipped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.post_actions.is_empty()
    }

    pub fn captured_slot_count(&self) -> usize {
        self.entries.len()
    }

    /// Write all captured values back, newest registration first.
    ///
    /// Runs to completion on every entry before returning.
    pub fn restore(&self, arena: &DeclArena) {
        for entry in self.entries.iter().rev() {
            if entry.guard == Guard::Placeholder
                && entry.value.is_placeholder()
                && read_slot(arena, entry.decl, entry.slot).is_fully_resolved()
            {
                // The slot was fully computed before the abort; a
                // placeholder must not clobber it.
                continue;
            }
            write_slot(arena, entry.decl, entry.slot, entry.value.clone());
        }
    }

    /// Execute the deferred fix-ups. Success path only.
    pub fn run_post_actions(&mut self, arena: &DeclArena) {
        for action in self.post_actions.drain(..) {
            match action {
                PostAction::RestoreContractBlock {
                    function,
                    statement,
                } => {
                    let node = arena.node(function);
                    let mut slots = node.slots_mut();
                    if let BodySlot::Block(block) = &mut slots.body {
                        if matches!(block.statements.first(), Some(Stmt::Contract(_))) {
                            block.statements[0] = Stmt::Contract(statement);
                        }
                    }
                }
                PostAction::UnwrapContractBlock { function } => {
                    let node = arena.node(function);
                    let mut slots = node.slots_mut();
                    if let BodySlot::Block(block) = &mut slots.body {
                        if let Some(Stmt::Contract(contract)) = block.statements.first() {
                            let call = contract.call.clone();
                            block.statements[0] = Stmt::Expr(call);
                        }
                    }
                }
            }
        }
    }
}

/// Builds a snapshot record by reading the current slot values.
pub struct SnapshotBuilder<'a> {
    arena: &'a DeclArena,
    record: SnapshotRecord,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(arena: &'a DeclArena) -> Self {
        Self {
            arena,
            record: SnapshotRecord::default(),
        }
    }

    pub fn arena(&self) -> &'a DeclArena {
        self.arena
    }

    /// Capture `slot` of `decl` now.
    pub fn add(&mut self, decl: DeclId, slot: SlotKind, guard: Guard) {
        let value = read_slot(self.arena, decl, slot);
        self.record.entries.push(SnapshotEntry {
            decl,
            slot,
            guard,
            value,
        });
    }

    /// Register a deferred post-processing action.
    pub fn post(&mut self, action: PostAction) {
        self.record.post_actions.push(action);
    }

    pub fn finish(self) -> SnapshotRecord {
        self.record
    }
}

fn read_slot(arena: &DeclArena, decl: DeclId, slot: SlotKind) -> SlotValue {
    let node = arena.node(decl);
    let slots = node.slots();
    match slot {
        SlotKind::ReturnType => SlotValue::Type(slots.return_type.clone()),
        SlotKind::Body => SlotValue::Body(slots.body.clone()),
        SlotKind::Initializer => SlotValue::Expr(slots.initializer.clone()),
        SlotKind::DefaultValue => SlotValue::Expr(slots.default_value.clone()),
        SlotKind::DelegateExpression => SlotValue::Expr(slots.delegate_expression.clone()),
        SlotKind::DelegateProvider => SlotValue::Expr(slots.delegate_provider.clone()),
        SlotKind::DelegatedConstructor => {
            SlotValue::DelegatedCall(slots.delegated_constructor.clone())
        }
        SlotKind::BodyState => SlotValue::BodyState(slots.body_state),
    }
}

fn write_slot(arena: &DeclArena, decl: DeclId, slot: SlotKind, value: SlotValue) {
    let node = arena.node(decl);
    let mut slots = node.slots_mut();
    match (slot, value) {
        (SlotKind::ReturnType, SlotValue::Type(v)) => slots.return_type = v,
        (SlotKind::Body, SlotValue::Body(v)) => slots.body = v,
        (SlotKind::Initializer, SlotValue::Expr(v)) => slots.initializer = v,
        (SlotKind::DefaultValue, SlotValue::Expr(v)) => slots.default_value = v,
        (SlotKind::DelegateExpression, SlotValue::Expr(v)) => slots.delegate_expression = v,
        (SlotKind::DelegateProvider, SlotValue::Expr(v)) => slots.delegate_provider = v,
        (SlotKind::DelegatedConstructor, SlotValue::DelegatedCall(v)) => {
            slots.delegated_constructor = v
        }
        (SlotKind::BodyState, SlotValue::BodyState(v)) => slots.body_state = v,
        (slot, value) => unreachable!("slot/value mismatch: {slot:?} vs {value:?}"),
    }
}
