//! Per-kind snapshot descriptors.
//!
//! Each declaration kind that owns body-resolution state has a descriptor
//! function listing exactly the slots its transformation may touch.
//! Descriptors compose by plain function call: the constructor descriptor
//! includes the function descriptor and adds one slot; the property
//! descriptor includes the variable slots and the descriptors of its
//! unresolved accessors and backing field.
//!
//! Descriptors consult the authoritative progress markers (phase counter,
//! property body-resolve sub-state) and record nothing for parts already
//! proven resolved — snapshotting a fully resolved node is a no-op.

use crate::arena::{DeclArena, DeclId};
use crate::ast::decl::{DeclKind, PropertyBodyState, PropertyShape};
use crate::ast::expr::{BodySlot, ExprKind, ExprSlot, Stmt, CONTRACT_CALL_NAME};
use crate::resolve::phase::Phase;
use crate::resolve::snapshot::{Guard, PostAction, SnapshotBuilder, SnapshotRecord, SlotKind};

/// Build the snapshot record for one declaration's body resolution.
///
/// Kinds with no body state at this phase produce an empty record.
pub fn snapshot_for(arena: &DeclArena, decl: DeclId) -> SnapshotRecord {
    let mut builder = SnapshotBuilder::new(arena);
    match &arena.node(decl).kind {
        DeclKind::Function(_) => function_keeper(&mut builder, decl),
        DeclKind::Constructor { .. } => constructor_keeper(&mut builder, decl),
        DeclKind::Property(_) => property_keeper(&mut builder, decl),
        DeclKind::Variable { .. } | DeclKind::BackingField { .. } => {
            variable_keeper(&mut builder, decl)
        }
        DeclKind::InitializerBlock => initializer_block_keeper(&mut builder, decl),
        DeclKind::Fragment { .. } => fragment_keeper(&mut builder, decl),
        DeclKind::Script { .. } => script_keeper(&mut builder, decl),
        _ => {}
    }
    builder.finish()
}

/// Authoritative completeness check.
///
/// Derived only from the phase counter and the property body-resolve
/// sub-state — never from the structural shape of a body. A node this
/// returns true for is skipped entirely: no snapshot, no transformation,
/// just the phase advance. Re-running the transformation on a complete
/// node would double-resolve captured contract statements.
pub fn is_certainly_resolved(arena: &DeclArena, decl: DeclId) -> bool {
    let node = arena.node(decl);
    if node.phase() >= Phase::Bodies {
        return true;
    }
    match &node.kind {
        DeclKind::Accessor { property, is_setter } => {
            let required = if *is_setter {
                PropertyBodyState::EverythingResolved
            } else {
                PropertyBodyState::InitializerAndGetterResolved
            };
            arena.node(*property).slots().body_state >= required
        }
        _ => false,
    }
}

fn function_keeper(builder: &mut SnapshotBuilder, func: DeclId) {
    if is_certainly_resolved(builder.arena(), func) {
        return;
    }

    builder.add(func, SlotKind::ReturnType, Guard::None);

    preserve_contract_block(builder, func);
    builder.add(func, SlotKind::Body, Guard::Placeholder);

    for &param in params_of(builder.arena(), func) {
        let has_default = !matches!(
            builder.arena().node(param).slots().default_value,
            ExprSlot::Absent
        );
        if has_default {
            builder.add(param, SlotKind::DefaultValue, Guard::Placeholder);
        }
    }
}

fn constructor_keeper(builder: &mut SnapshotBuilder, ctor: DeclId) {
    function_keeper(builder, ctor);
    builder.add(ctor, SlotKind::DelegatedConstructor, Guard::Placeholder);
}

fn variable_keeper(builder: &mut SnapshotBuilder, variable: DeclId) {
    builder.add(variable, SlotKind::ReturnType, Guard::None);
    builder.add(variable, SlotKind::Initializer, Guard::Placeholder);
}

fn property_keeper(builder: &mut SnapshotBuilder, prop: DeclId) {
    let shape = property_shape(builder.arena(), prop);
    let state = builder.arena().node(prop).slots().body_state;

    if state >= PropertyBodyState::EverythingResolved {
        return;
    }

    builder.add(prop, SlotKind::ReturnType, Guard::None);
    builder.add(prop, SlotKind::BodyState, Guard::None);

    if state < PropertyBodyState::InitializerResolved {
        builder.add(prop, SlotKind::Initializer, Guard::Placeholder);
        if let Some(backing_field) = shape.backing_field {
            variable_keeper(builder, backing_field);
        }
    }

    if state < PropertyBodyState::InitializerAndGetterResolved {
        if let Some(getter) = shape.getter {
            function_keeper(builder, getter);
        }
    }

    if state < PropertyBodyState::EverythingResolved {
        if let Some(setter) = shape.setter {
            function_keeper(builder, setter);
        }
        if shape.has_delegate {
            builder.add(prop, SlotKind::DelegateExpression, Guard::Placeholder);
            builder.add(prop, SlotKind::DelegateProvider, Guard::Placeholder);
        }
    }
}

fn initializer_block_keeper(builder: &mut SnapshotBuilder, block: DeclId) {
    builder.add(block, SlotKind::Body, Guard::Placeholder);
}

fn fragment_keeper(builder: &mut SnapshotBuilder, fragment: DeclId) {
    builder.add(fragment, SlotKind::ReturnType, Guard::None);
    builder.add(fragment, SlotKind::Body, Guard::Placeholder);
}

fn script_keeper(_builder: &mut SnapshotBuilder, _script: DeclId) {
    // Scripts carry no lazily resolved body state of their own; their
    // member declarations are resolved individually.
}

/// Contract-block preservation, registered before the transformation runs.
///
/// If the old body starts with an already-resolved contract statement,
/// re-thread it into the rebuilt body; if it starts with a contract-shaped
/// call that is not a true contract, unwrap whatever wrapper the rebuild
/// produced.
fn preserve_contract_block(builder: &mut SnapshotBuilder, func: DeclId) {
    let arena = builder.arena();
    let node = arena.node(func);
    let slots = node.slots();
    let BodySlot::Block(old_body) = &slots.body else {
        return;
    };
    let Some(first) = old_body.statements.first() else {
        return;
    };

    match first {
        Stmt::Contract(contract) if contract.is_resolved() => {
            let statement = contract.clone();
            drop(slots);
            builder.post(PostAction::RestoreContractBlock {
                function: func,
                statement,
            });
        }
        Stmt::Contract(_) => {}
        Stmt::Expr(expr) if is_contract_shaped_call(arena, expr) => {
            drop(slots);
            builder.post(PostAction::UnwrapContractBlock { function: func });
        }
        _ => {}
    }
}

/// A call whose callee is named `contract` but is not the well-known
/// contract function.
pub(crate) fn is_contract_shaped_call(arena: &DeclArena, expr: &crate::ast::expr::Expr) -> bool {
    let ExprKind::Call { callee, .. } = &expr.kind else {
        return false;
    };
    match &callee.kind {
        ExprKind::Name(name) => name.as_str() == CONTRACT_CALL_NAME,
        ExprKind::Ref(id) => {
            arena.node(*id).name.as_str() == CONTRACT_CALL_NAME
                && arena.well_known.contract_fn != Some(*id)
        }
        _ => false,
    }
}

fn params_of(arena: &DeclArena, func: DeclId) -> &[DeclId] {
    match &arena.node(func).kind {
        DeclKind::Function(shape) => &shape.params,
        DeclKind::Constructor { params } => params,
        DeclKind::Accessor { .. } => &[],
        other => unreachable!("params_of on {other:?}"),
    }
}

fn property_shape(arena: &DeclArena, prop: DeclId) -> PropertyShape {
    match &arena.node(prop).kind {
        DeclKind::Property(shape) => shape.clone(),
        other => unreachable!("property_shape on {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::DeclArena;
    use crate::ast::decl::{DeclSource, FunctionShape};
    use crate::ast::expr::{Block, ContractBlock, Expr, Literal};
    use crate::foundation::Span;

    fn span() -> Span {
        Span::zero(0)
    }

    fn plain_shape() -> FunctionShape {
        FunctionShape {
            params: vec![],
            extension_label: None,
            context_receivers: vec![],
            is_local: false,
        }
    }

    fn body_source() -> DeclSource {
        DeclSource {
            body: Some(Block::new(vec![], span())),
            ..DeclSource::default()
        }
    }

    #[test]
    fn test_function_keeper_records_body_and_defaults() {
        let mut arena = DeclArena::new();
        let file = arena.add_file("main.veld");
        let owner = arena.file_decl(file);
        let func = arena.add_function(owner, "compute", span(), plain_shape(), body_source());
        arena.add_parameter(
            func,
            "limit",
            span(),
            DeclSource {
                default_value: Some(Expr::literal(Literal::Int(8), span())),
                ..DeclSource::default()
            },
        );

        let record = snapshot_for(&arena, func);
        // Return type, body, one defaulted parameter.
        assert_eq!(record.captured_slot_count(), 3);
    }

    #[test]
    fn test_constructor_keeper_composes_function_keeper() {
        let mut arena = DeclArena::new();
        let file = arena.add_file("main.veld");
        let owner = arena.file_decl(file);
        let class = arena.add_class(owner, "Widget", span());
        let ctor = arena.add_constructor(class, span(), body_source());

        let record = snapshot_for(&arena, ctor);
        // Function slots plus the delegated constructor call.
        assert_eq!(record.captured_slot_count(), 3);
    }

    #[test]
    fn test_resolved_property_records_nothing() {
        let mut arena = DeclArena::new();
        let file = arena.add_file("main.veld");
        let owner = arena.file_decl(file);
        let prop = arena.add_property(
            owner,
            "count",
            span(),
            PropertyShape {
                getter: None,
                setter: None,
                backing_field: None,
                has_delegate: false,
                is_local: false,
            },
            DeclSource {
                initializer: Some(Expr::literal(Literal::Int(0), span())),
                ..DeclSource::default()
            },
        );
        arena.node(prop).slots_mut().body_state = PropertyBodyState::EverythingResolved;

        assert!(snapshot_for(&arena, prop).is_empty());
    }

    #[test]
    fn test_property_keeper_includes_unresolved_accessors() {
        let mut arena = DeclArena::new();
        let file = arena.add_file("main.veld");
        let owner = arena.file_decl(file);
        let prop = arena.add_property(
            owner,
            "count",
            span(),
            PropertyShape {
                getter: None,
                setter: None,
                backing_field: None,
                has_delegate: false,
                is_local: false,
            },
            DeclSource {
                initializer: Some(Expr::literal(Literal::Int(0), span())),
                ..DeclSource::default()
            },
        );
        arena.add_accessor(prop, false, span(), body_source());

        let record = snapshot_for(&arena, prop);
        // Property: return type, body state, initializer.
        // Getter: return type, body.
        assert_eq!(record.captured_slot_count(), 5);
    }

    #[test]
    fn test_contract_preservation_registers_post_action() {
        let mut arena = DeclArena::new();
        let file = arena.add_file("main.veld");
        let owner = arena.file_decl(file);
        let func = arena.add_function(owner, "guarded", span(), plain_shape(), body_source());

        let resolved_contract = ContractBlock {
            call: Expr::call(
                Expr::new(ExprKind::Ref(DeclId::from_raw(7)), span()),
                vec![],
                span(),
            ),
        };
        arena.node(func).slots_mut().body = BodySlot::Block(Block::new(
            vec![Stmt::Contract(resolved_contract)],
            span(),
        ));

        let record = snapshot_for(&arena, func);
        assert!(!record.is_empty());
    }
}
