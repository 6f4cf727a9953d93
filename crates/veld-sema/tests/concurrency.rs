//! Concurrent resolution against the shared declaration tree.

use std::sync::mpsc;
use std::time::Duration;

use veld_sema::arena::DeclArena;
use veld_sema::ast::decl::{DeclSource, FunctionShape, PropertyBodyState, PropertyShape};
use veld_sema::ast::expr::{Block, Expr, ExprKind, ExprSlot, Literal, Stmt, Type, TypeSlot};
use veld_sema::foundation::Span;
use veld_sema::resolve::{
    CancellationToken, LockProvider, Phase, ResolutionDriver, ResolverConfig,
};

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

fn plain_property() -> PropertyShape {
    PropertyShape {
        getter: None,
        setter: None,
        backing_field: None,
        has_delegate: false,
        is_local: false,
    }
}

fn body_of(literal: i64) -> DeclSource {
    DeclSource {
        body: Some(Block::new(
            vec![Stmt::Expr(Expr::literal(Literal::Int(literal), span()))],
            span(),
        )),
        ..DeclSource::default()
    }
}

fn fast_locks() -> LockProvider {
    LockProvider::new(ResolverConfig {
        lock_poll_interval: Duration::from_millis(5),
    })
}

#[test]
fn concurrent_requests_resolve_distinct_nodes_in_one_file() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let f = arena.add_function(owner, "f", span(), plain_shape(), body_of(1));
    let g = arena.add_function(owner, "g", span(), plain_shape(), body_of(2));

    let locks = fast_locks();
    std::thread::scope(|scope| {
        for &decl in &[f, g] {
            let arena = &arena;
            let locks = &locks;
            scope.spawn(move || {
                let driver = ResolutionDriver::new(arena, locks, CancellationToken::new());
                driver.ensure_at_least(decl, Phase::Bodies).unwrap();
            });
        }
    });

    for decl in [f, g] {
        assert_eq!(arena.node(decl).phase(), Phase::Bodies);
        let slots = arena.node(decl).slots();
        assert!(slots.body.is_fully_resolved());
        assert_eq!(slots.return_type, TypeSlot::Resolved(Type::Int));
    }
}

#[test]
fn concurrent_requests_on_one_class_attach_the_graph_once() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let class = arena.add_class(owner, "Widget", span());
    for (name, value) in [("first", 1), ("second", 2)] {
        arena.add_property(
            class,
            name,
            span(),
            plain_property(),
            DeclSource {
                initializer: Some(Expr::literal(Literal::Int(value), span())),
                ..DeclSource::default()
            },
        );
    }

    let locks = fast_locks();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let arena = &arena;
            let locks = &locks;
            scope.spawn(move || {
                let driver = ResolutionDriver::new(arena, locks, CancellationToken::new());
                driver.ensure_at_least(class, Phase::Bodies).unwrap();
            });
        }
    });

    assert_eq!(arena.node(class).phase(), Phase::Bodies);
    let slots = arena.node(class).slots();
    assert_eq!(slots.control_flow_graph.as_ref().unwrap().nodes.len(), 2);
}

#[test]
fn recursive_same_file_resolution_never_self_deadlocks() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let dependency = arena.add_property(
        owner,
        "base",
        span(),
        plain_property(),
        DeclSource {
            initializer: Some(Expr::literal(Literal::Int(10), span())),
            ..DeclSource::default()
        },
    );
    let dependent = arena.add_property(
        owner,
        "derived",
        span(),
        plain_property(),
        DeclSource {
            initializer: Some(Expr::name("base", span())),
            ..DeclSource::default()
        },
    );

    // Resolving `derived` pulls `base` from within the same file lock;
    // the re-entrant acquisition must proceed without blocking.
    let locks = fast_locks();
    let driver = ResolutionDriver::new(&arena, &locks, CancellationToken::new());
    driver.ensure_at_least(dependent, Phase::Bodies).unwrap();

    assert!(arena.node(dependency).phase() >= Phase::ImplicitTypes);
    assert_eq!(
        arena.node(dependent).slots().initializer.as_expr().unwrap().ty,
        Some(Type::Int)
    );
}

/// Scenario: cancellation observed mid-resolution of a property whose
/// backing field was already snapshotted leaves the property's phase and
/// every slot exactly as before the call.
#[test]
fn cancellation_mid_resolution_rolls_back_property_state() {
    let mut arena = DeclArena::new();
    let file1 = arena.add_file("main.veld");
    let owner1 = arena.file_decl(file1);
    let file2 = arena.add_file("remote.veld");
    let owner2 = arena.file_decl(file2);

    let remote_fn = arena.add_function(owner2, "fetch", span(), plain_shape(), body_of(7));

    let prop = arena.add_property(
        owner1,
        "cached",
        span(),
        plain_property(),
        DeclSource {
            initializer: Some(Expr::call(
                Expr::new(ExprKind::Ref(remote_fn), span()),
                vec![],
                span(),
            )),
            ..DeclSource::default()
        },
    );
    let backing_field = arena.add_backing_field(
        prop,
        span(),
        DeclSource {
            initializer: Some(Expr::literal(Literal::Int(0), span())),
            ..DeclSource::default()
        },
    );

    let locks = fast_locks();

    // Position the property just below body resolution.
    let setup_driver = ResolutionDriver::new(&arena, &locks, CancellationToken::new());
    setup_driver
        .ensure_at_least(prop, Phase::ImplicitTypes)
        .unwrap();
    let phase_before = arena.node(prop).phase();
    let return_type_before = arena.node(prop).slots().return_type.clone();

    let token = CancellationToken::new();
    let (acquired_tx, acquired_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let result = std::thread::scope(|scope| {
        // Holder thread: occupies the remote file's lock so the resolving
        // thread blocks inside its transformation.
        let holder_locks = &locks;
        scope.spawn(move || {
            holder_locks
                .with_file_lock(file2, &CancellationToken::new(), || {
                    acquired_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap();
        });

        acquired_rx.recv().unwrap();

        let resolver = scope.spawn(|| {
            let driver = ResolutionDriver::new(&arena, &locks, token.clone());
            driver.ensure_at_least(prop, Phase::Bodies)
        });

        // Give the resolver time to take its snapshot and block on the
        // remote file, then cancel it.
        std::thread::sleep(Duration::from_millis(150));
        token.cancel();
        let result = resolver.join().unwrap();
        release_tx.send(()).unwrap();
        result
    });

    let err = result.unwrap_err();
    assert!(err.is_cancelled());

    // Phase and slots are exactly as before the call.
    assert_eq!(arena.node(prop).phase(), phase_before);
    let slots = arena.node(prop).slots();
    assert!(matches!(slots.initializer, ExprSlot::Lazy));
    assert_eq!(slots.body_state, PropertyBodyState::NothingResolved);
    assert_eq!(slots.return_type, return_type_before);
    drop(slots);
    let backing_slots = arena.node(backing_field).slots();
    assert!(matches!(backing_slots.initializer, ExprSlot::Lazy));
}
