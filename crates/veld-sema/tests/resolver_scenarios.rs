//! End-to-end resolution scenarios against the public API.

use veld_sema::arena::DeclArena;
use veld_sema::ast::decl::{Anchor, DeclKind, DeclOrigin, DeclSource, FunctionShape, PropertyShape};
use veld_sema::ast::expr::{Block, Expr, ExprKind, ExprSlot, Literal, Stmt, Type};
use veld_sema::foundation::{Name, Span};
use veld_sema::resolve::capture::CaptureKind;
use veld_sema::resolve::{
    self, CancellationToken, LockProvider, Phase, ResolutionDriver, ResolveError, ResolveTarget,
    ResolverConfig,
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

fn init_source(expr: Expr) -> DeclSource {
    DeclSource {
        initializer: Some(expr),
        ..DeclSource::default()
    }
}

fn locks() -> LockProvider {
    LockProvider::new(ResolverConfig::default())
}

#[test]
fn scenario_a_class_with_dependent_properties() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let class = arena.add_class(owner, "Widget", span());
    let first = arena.add_property(
        class,
        "first",
        span(),
        plain_property(),
        init_source(Expr::literal(Literal::Int(1), span())),
    );
    let second = arena.add_property(
        class,
        "second",
        span(),
        plain_property(),
        init_source(Expr::name("first", span())),
    );

    let locks = locks();
    let target = ResolveTarget::single(class);
    let (result, diagnostics) = resolve::resolve(
        &arena,
        &locks,
        &target,
        Phase::Bodies,
        CancellationToken::new(),
    );
    result.unwrap();
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");

    // Both members are fully resolved; the second saw the first's type.
    assert_eq!(arena.node(first).phase(), Phase::Bodies);
    assert_eq!(arena.node(second).phase(), Phase::Bodies);
    let second_slots = arena.node(second).slots();
    match second_slots.initializer.as_expr() {
        Some(expr) => {
            assert_eq!(expr.kind, ExprKind::Ref(first));
            assert_eq!(expr.ty, Some(Type::Int));
        }
        None => panic!("second initializer not resolved"),
    }
    drop(second_slots);

    // The graph was attached exactly once, covering both initializers.
    let class_slots = arena.node(class).slots();
    let graph = class_slots.control_flow_graph.as_ref().expect("graph missing");
    assert_eq!(graph.nodes.len(), 2);
    drop(class_slots);

    // Idempotence: a second request performs no work and changes nothing.
    let (again, diagnostics) = resolve::resolve(
        &arena,
        &locks,
        &target,
        Phase::Bodies,
        CancellationToken::new(),
    );
    again.unwrap();
    assert!(diagnostics.is_empty());
    let class_slots = arena.node(class).slots();
    assert_eq!(class_slots.control_flow_graph.as_ref().unwrap().nodes.len(), 2);
}

#[test]
fn idempotent_resolution_skips_snapshot_and_transform() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let func = arena.add_function(
        owner,
        "compute",
        span(),
        plain_shape(),
        DeclSource {
            body: Some(Block::new(
                vec![Stmt::Expr(Expr::literal(Literal::Int(3), span()))],
                span(),
            )),
            ..DeclSource::default()
        },
    );

    let locks = locks();
    let driver = ResolutionDriver::new(&arena, &locks, CancellationToken::new());
    driver.ensure_at_least(func, Phase::Bodies).unwrap();
    assert_eq!(arena.node(func).phase(), Phase::Bodies);

    // A resolved node produces an empty snapshot: the second call will
    // not re-run the transformation.
    assert!(veld_sema::resolve::keepers::snapshot_for(&arena, func).is_empty());
    driver.ensure_at_least(func, Phase::Bodies).unwrap();

    let slots = arena.node(func).slots();
    assert!(slots.body.is_fully_resolved());
    assert_eq!(slots.return_type.as_type(), Some(&Type::Int));
}

#[test]
fn monotonic_phase_progression() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let variable = arena.add_property(
        owner,
        "value",
        span(),
        plain_property(),
        init_source(Expr::literal(Literal::Float(2.5), span())),
    );

    let locks = locks();
    let driver = ResolutionDriver::new(&arena, &locks, CancellationToken::new());

    assert_eq!(arena.node(variable).phase(), Phase::Raw);
    driver.ensure_at_least(variable, Phase::Types).unwrap();
    assert_eq!(arena.node(variable).phase(), Phase::Types);
    driver.ensure_at_least(variable, Phase::Types).unwrap();
    assert_eq!(arena.node(variable).phase(), Phase::Types);
    driver.ensure_at_least(variable, Phase::Bodies).unwrap();
    assert_eq!(arena.node(variable).phase(), Phase::Bodies);
    assert_eq!(
        arena.node(variable).slots().return_type.as_type(),
        Some(&Type::Float)
    );
}

#[test]
fn designation_positions_containers_before_target() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let class = arena.add_class(owner, "Widget", span());
    let method = arena.add_function(
        class,
        "refresh",
        span(),
        plain_shape(),
        DeclSource {
            body: Some(Block::new(vec![], span())),
            ..DeclSource::default()
        },
    );

    let locks = locks();
    let target = ResolveTarget::designation(vec![owner, class], method);
    let (result, _) = resolve::resolve(
        &arena,
        &locks,
        &target,
        Phase::Bodies,
        CancellationToken::new(),
    );
    result.unwrap();

    assert_eq!(arena.node(method).phase(), Phase::Bodies);
    // Containers were positioned at the preceding phase (at least).
    assert!(arena.node(class).phase() >= Phase::ImplicitTypes);
    assert!(arena.node(owner).phase() >= Phase::ImplicitTypes);
}

#[test]
fn nested_declarations_advance_with_their_owner() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let func = arena.add_function(
        owner,
        "clamp",
        span(),
        plain_shape(),
        DeclSource {
            body: Some(Block::new(vec![], span())),
            ..DeclSource::default()
        },
    );
    let param = arena.add_parameter(
        func,
        "limit",
        span(),
        DeclSource {
            default_value: Some(Expr::literal(Literal::Int(8), span())),
            ..DeclSource::default()
        },
    );

    let locks = locks();
    let driver = ResolutionDriver::new(&arena, &locks, CancellationToken::new());
    driver.ensure_at_least(func, Phase::Bodies).unwrap();

    assert_eq!(arena.node(param).phase(), Phase::Bodies);
    assert!(arena.node(param).slots().default_value.is_fully_resolved());
    driver.validate_resolved(func).unwrap();
}

#[test]
fn cyclic_same_phase_dependency_is_reported_and_rolled_back() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let a = arena.add_property(
        owner,
        "a",
        span(),
        plain_property(),
        init_source(Expr::name("b", span())),
    );
    let b = arena.add_property(
        owner,
        "b",
        span(),
        plain_property(),
        init_source(Expr::name("a", span())),
    );

    let locks = locks();
    let driver = ResolutionDriver::new(&arena, &locks, CancellationToken::new());
    let err = driver.ensure_at_least(a, Phase::ImplicitTypes).unwrap_err();
    match err {
        ResolveError::CyclicDependency { chain, .. } => {
            assert!(chain.contains(&a));
            assert!(chain.contains(&b));
        }
        other => panic!("unexpected error {other:?}"),
    }

    // Rollback: neither node advanced to the failed phase, and the slots
    // that participated in the snapshots are back to their initial state.
    assert!(arena.node(a).phase() < Phase::ImplicitTypes);
    assert!(matches!(arena.node(a).slots().initializer, ExprSlot::Lazy));
    assert!(matches!(arena.node(b).slots().initializer, ExprSlot::Lazy));
}

#[test]
fn fragment_without_anchor_is_a_contract_violation() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let fragment = arena.add_fragment(
        file,
        span(),
        None,
        DeclSource {
            body: Some(Block::new(vec![], span())),
            ..DeclSource::default()
        },
    );

    let locks = locks();
    let driver = ResolutionDriver::new(&arena, &locks, CancellationToken::new());
    let err = driver.ensure_at_least(fragment, Phase::Bodies).unwrap_err();
    assert!(!err.is_cancelled());
    match err {
        ResolveError::MissingFragmentContext { decl, dump } => {
            assert_eq!(decl, fragment);
            assert!(dump.contains("fragment"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn scenario_b_fragment_capture_manifest() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);

    let ambient = arena.add_property(
        owner,
        "ambientContext",
        span(),
        plain_property(),
        init_source(Expr::literal(Literal::Int(0), span())),
    );
    arena.well_known.ambient_context = Some(ambient);

    let class = arena.add_class(owner, "outer", span());
    let host = arena.add_function(class, "host", span(), plain_shape(), DeclSource::default());
    let local_x = arena.add_variable(
        host,
        "x",
        span(),
        DeclOrigin::Source,
        init_source(Expr::literal(Literal::Int(5), span())),
    );
    // Host body: `var x = 5`.
    arena.set_source(
        host,
        DeclSource {
            body: Some(Block::new(vec![Stmt::Declare(local_x)], span())),
            ..DeclSource::default()
        },
    );

    // Fragment body, in reference order:
    //   this@outer
    //   x = 1
    //   ambientContext
    let fragment = arena.add_fragment(
        file,
        span(),
        Some(Anchor {
            declaration: host,
            statements_before: 1,
        }),
        DeclSource {
            body: Some(Block::new(
                vec![
                    Stmt::Expr(Expr::this_labeled("outer", span())),
                    Stmt::Expr(Expr::assign(
                        Expr::name("x", span()),
                        Expr::literal(Literal::Int(1), span()),
                        span(),
                    )),
                    Stmt::Expr(Expr::name("ambientContext", span())),
                ],
                span(),
            )),
            ..DeclSource::default()
        },
    );

    let locks = locks();
    let (result, diagnostics) = resolve::resolve(
        &arena,
        &locks,
        &ResolveTarget::single(fragment),
        Phase::Bodies,
        CancellationToken::new(),
    );
    result.unwrap();
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");

    let slots = arena.node(fragment).slots();
    let manifest = slots.capture_manifest.as_ref().expect("manifest missing");

    let entries: Vec<_> = manifest.captures.iter().collect();
    assert_eq!(entries.len(), 3, "manifest: {manifest:?}");

    // 1. The enclosing instance, labeled through the class name.
    assert_eq!(*entries[0].0, class);
    assert_eq!(entries[0].1.value.kind, CaptureKind::ContainingClass);
    assert_eq!(entries[0].1.value.display_text(), "this@outer");
    assert!(!entries[0].1.value.is_mutated);

    // 2. The reassigned local, flagged as mutated.
    assert_eq!(*entries[1].0, local_x);
    assert_eq!(entries[1].1.value.kind, CaptureKind::Local);
    assert!(entries[1].1.value.is_mutated);
    assert_eq!(entries[1].1.ty, Type::Int);

    // 3. The ambient ordered-context accessor.
    assert_eq!(*entries[2].0, ambient);
    assert_eq!(entries[2].1.value.kind, CaptureKind::AmbientContext);

    assert!(manifest.has_mutated_captures);
    assert_eq!(
        manifest.wrapper.class_name,
        Name::new(format!("Fragment${}", fragment.index()))
    );
    assert_eq!(manifest.wrapper.method_name, Name::new("evaluate"));
}

#[test]
fn capture_classification_is_sticky_and_deterministic() {
    let build = |arena: &mut DeclArena| {
        let file = arena.add_file("main.veld");
        let owner = arena.file_decl(file);
        let host = arena.add_function(owner, "host", span(), plain_shape(), DeclSource::default());
        let local_x = arena.add_variable(
            host,
            "x",
            span(),
            DeclOrigin::Source,
            init_source(Expr::literal(Literal::Int(5), span())),
        );
        arena.set_source(
            host,
            DeclSource {
                body: Some(Block::new(vec![Stmt::Declare(local_x)], span())),
                ..DeclSource::default()
            },
        );
        // Read `x` first, write it later: the capture is still flagged
        // as mutated, and the classification never changes.
        arena.add_fragment(
            file,
            span(),
            Some(Anchor {
                declaration: host,
                statements_before: 1,
            }),
            DeclSource {
                body: Some(Block::new(
                    vec![
                        Stmt::Expr(Expr::name("x", span())),
                        Stmt::Expr(Expr::assign(
                            Expr::name("x", span()),
                            Expr::name("x", span()),
                            span(),
                        )),
                    ],
                    span(),
                )),
                ..DeclSource::default()
            },
        )
    };

    let run = |arena: &DeclArena, fragment| {
        let locks = locks();
        let (result, _) = resolve::resolve(
            arena,
            &locks,
            &ResolveTarget::single(fragment),
            Phase::Bodies,
            CancellationToken::new(),
        );
        result.unwrap();
        arena
            .node(fragment)
            .slots()
            .capture_manifest
            .clone()
            .expect("manifest missing")
    };

    let mut arena1 = DeclArena::new();
    let fragment1 = build(&mut arena1);
    let manifest1 = run(&arena1, fragment1);

    assert_eq!(manifest1.captures.len(), 1);
    let symbol = manifest1.captures.values().next().unwrap();
    assert_eq!(symbol.value.kind, CaptureKind::Local);
    assert!(symbol.value.is_mutated);

    // Fixed fragment + fixed anchor: byte-identical manifest.
    let mut arena2 = DeclArena::new();
    let fragment2 = build(&mut arena2);
    let manifest2 = run(&arena2, fragment2);
    assert_eq!(manifest1, manifest2);
}

#[test]
fn fragment_receiver_and_delegate_captures() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);

    let base = arena.add_class(owner, "Base", span());
    let derived = arena.add_class(owner, "Derived", span());
    arena.set_superclass(derived, base);

    // Extension host with a labeled context receiver and two locals: a
    // delegated property and a debugger-injected variable.
    let shape = FunctionShape {
        params: vec![],
        extension_label: Some(Name::new("receiver")),
        context_receivers: vec![veld_sema::ast::decl::ContextReceiver {
            label: Some(Name::new("logger")),
        }],
        is_local: false,
    };
    let host = arena.add_function(derived, "host", span(), shape, DeclSource::default());
    let delegated = arena.add_decl(
        host,
        Name::new("lazyValue"),
        span(),
        DeclOrigin::Source,
        DeclKind::Property(PropertyShape {
            getter: None,
            setter: None,
            backing_field: None,
            has_delegate: true,
            is_local: true,
        }),
        init_source(Expr::literal(Literal::Int(0), span())),
    );
    let marked = arena.add_variable(
        host,
        "marked",
        span(),
        DeclOrigin::DebuggerSynthetic,
        init_source(Expr::literal(Literal::Int(0), span())),
    );
    arena.set_source(
        host,
        DeclSource {
            body: Some(Block::new(
                vec![Stmt::Declare(delegated), Stmt::Declare(marked)],
                span(),
            )),
            ..DeclSource::default()
        },
    );

    let fragment = arena.add_fragment(
        file,
        span(),
        Some(Anchor {
            declaration: host,
            statements_before: 2,
        }),
        DeclSource {
            body: Some(Block::new(
                vec![
                    Stmt::Expr(Expr::this(span())),
                    Stmt::Expr(Expr::super_ref(span())),
                    Stmt::Expr(Expr::name("lazyValue", span())),
                    Stmt::Expr(Expr::name("marked", span())),
                ],
                span(),
            )),
            ..DeclSource::default()
        },
    );
    // Context receivers share their function's identity with the
    // extension receiver, and at most one descriptor exists per
    // declaration — so the context-receiver capture gets its own
    // fragment.
    let context_fragment = arena.add_fragment(
        file,
        span(),
        Some(Anchor {
            declaration: host,
            statements_before: 2,
        }),
        DeclSource {
            body: Some(Block::new(
                vec![Stmt::Expr(Expr::this_labeled("logger", span()))],
                span(),
            )),
            ..DeclSource::default()
        },
    );

    let locks = locks();
    for fragment in [fragment, context_fragment] {
        let (result, diagnostics) = resolve::resolve(
            &arena,
            &locks,
            &ResolveTarget::single(fragment),
            Phase::Bodies,
            CancellationToken::new(),
        );
        result.unwrap();
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
    }

    let slots = arena.node(fragment).slots();
    let manifest = slots.capture_manifest.as_ref().unwrap();
    let labels: Vec<String> = manifest
        .captures
        .values()
        .map(|symbol| symbol.value.display_text())
        .collect();
    assert_eq!(
        labels,
        vec![
            "this@receiver".to_string(),
            "super@Base".to_string(),
            "lazyValue$delegate".to_string(),
            "marked_DebugLabel".to_string(),
        ]
    );
    assert!(!manifest.has_mutated_captures);

    let kinds: Vec<CaptureKind> = manifest
        .captures
        .values()
        .map(|symbol| symbol.value.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            CaptureKind::ExtensionReceiver,
            CaptureKind::SuperClass,
            CaptureKind::LocalDelegate,
            CaptureKind::DebugLabel,
        ]
    );
    drop(slots);

    let slots = arena.node(context_fragment).slots();
    let manifest = slots.capture_manifest.as_ref().unwrap();
    let symbol = manifest.captures.values().next().unwrap();
    assert_eq!(symbol.value.kind, CaptureKind::ContextReceiver);
    assert_eq!(symbol.value.display_text(), "this@logger");
}

#[test]
fn unresolved_names_are_diagnostics_not_failures() {
    let mut arena = DeclArena::new();
    let file = arena.add_file("main.veld");
    let owner = arena.file_decl(file);
    let func = arena.add_function(
        owner,
        "broken",
        span(),
        plain_shape(),
        DeclSource {
            body: Some(Block::new(
                vec![Stmt::Expr(Expr::name("missing", span()))],
                span(),
            )),
            ..DeclSource::default()
        },
    );

    let locks = locks();
    let (result, diagnostics) = resolve::resolve(
        &arena,
        &locks,
        &ResolveTarget::single(func),
        Phase::Bodies,
        CancellationToken::new(),
    );
    // Resolution succeeds; the node is resolved *and* erroneous.
    result.unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(
        diagnostics[0].kind,
        veld_sema::DiagnosticKind::UnresolvedName
    );
    assert_eq!(arena.node(func).phase(), Phase::Bodies);
}
