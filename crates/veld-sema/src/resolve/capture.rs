//! Captured-value analysis for scratch fragments.
//!
//! Runs inside fragment body resolution, after references are bound.
//! Two passes:
//!
//! 1. collect every declaration the fragment introduces itself — those
//!    are never captures, no matter how often they are referenced;
//! 2. a single depth-first walk classifying every externally resolved
//!    reference, maintaining a stack of current assignment left-hand-side
//!    identities so a reference is a write exactly when its identity is
//!    on top of that stack.
//!
//! The result is insertion-ordered by first reference; that order later
//! becomes the wrapper's parameter list, so it must be deterministic.
//! A declaration is classified once — later references only make the
//! mutation flag sticky.

use indexmap::map::Entry;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use crate::arena::{DeclArena, DeclId};
use crate::ast::decl::{DeclKind, DeclOrigin};
use crate::ast::expr::{Block, Expr, ExprKind, Stmt, ThisBinding, Type};
use crate::foundation::Name;

/// Closed set of capture kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Local variable or value parameter.
    Local,
    /// Delegated local variable.
    LocalDelegate,
    /// Enclosing class instance.
    ContainingClass,
    /// Enclosing superclass instance (`super` access).
    SuperClass,
    /// Extension receiver of an enclosing function.
    ExtensionReceiver,
    /// Context receiver of an enclosing function.
    ContextReceiver,
    /// Named local function.
    LocalFunction,
    /// The well-known ambient ordered-context accessor.
    AmbientContext,
    /// Synthetic variable injected by the debugger.
    DebugLabel,
}

/// Classification of one externally-defined name a fragment references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedValue {
    pub kind: CaptureKind,
    pub name: Name,
    pub is_mutated: bool,
}

impl CapturedValue {
    fn new(kind: CaptureKind, name: Name, is_mutated: bool) -> Self {
        Self {
            kind,
            name,
            is_mutated,
        }
    }

    /// Human-readable label shown to the user (e.g. in a debugger's
    /// variables view).
    pub fn display_text(&self) -> String {
        match self.kind {
            CaptureKind::Local | CaptureKind::LocalFunction | CaptureKind::AmbientContext => {
                self.name.to_string()
            }
            CaptureKind::LocalDelegate => format!("{}$delegate", self.name),
            CaptureKind::ContainingClass => {
                if self.name.is_special() {
                    "this".to_string()
                } else {
                    format!("this@{}", self.name)
                }
            }
            CaptureKind::SuperClass => format!("super@{}", self.name),
            CaptureKind::ExtensionReceiver | CaptureKind::ContextReceiver => {
                format!("this@{}", self.name)
            }
            CaptureKind::DebugLabel => format!("{}_DebugLabel", self.name),
        }
    }
}

/// A captured value together with the referenced declaration's type.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSymbol {
    pub value: CapturedValue,
    pub ty: Type,
}

/// Name/class pair under which a fragment's evaluation method is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperIdentity {
    pub class_name: Name,
    pub method_name: Name,
}

/// Result of fragment resolution handed to the downstream consumer:
/// ordered captures, the synthetic wrapper identity, and a marker telling
/// codegen that written captures must be passed by mutable cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureManifest {
    pub captures: IndexMap<DeclId, CapturedSymbol>,
    pub wrapper: WrapperIdentity,
    pub has_mutated_captures: bool,
}

/// Analyze a fragment's resolved body.
///
/// Must run after the fragment's references are bound; an unresolved
/// (`Name`) reference is simply not a capture.
pub fn analyze(arena: &DeclArena, fragment: DeclId) -> IndexMap<DeclId, CapturedSymbol> {
    let body = arena
        .node(fragment)
        .slots()
        .body
        .as_block()
        .cloned()
        .unwrap_or_else(|| Block::new(vec![], arena.node(fragment).span));

    let mut collector = DeclarationCollector {
        arena,
        symbols: FxHashSet::default(),
    };
    collector.collect_block(&body);

    let mut visitor = CapturedValueVisitor {
        arena,
        self_symbols: collector.symbols,
        mappings: IndexMap::new(),
        assignment_lhs: Vec::new(),
    };
    visitor.visit_block(&body);
    visitor.mappings
}

/// Pass 1: the fragment's own declarations.
struct DeclarationCollector<'a> {
    arena: &'a DeclArena,
    symbols: FxHashSet<DeclId>,
}

impl DeclarationCollector<'_> {
    fn collect_block(&mut self, block: &Block) {
        for stmt in &block.statements {
            if let Stmt::Declare(id) = stmt {
                self.collect_decl(*id);
            }
        }
    }

    fn collect_decl(&mut self, id: DeclId) {
        self.symbols.insert(id);
        let node = self.arena.node(id);
        match &node.kind {
            DeclKind::Function(shape) => {
                for &param in &shape.params {
                    self.symbols.insert(param);
                }
                // Clone to release the slot lock before recursing.
                let body = node.slots().body.as_block().cloned();
                if let Some(body) = body {
                    self.collect_block(&body);
                }
            }
            DeclKind::Property(shape) => {
                for sub in [shape.getter, shape.setter, shape.backing_field]
                    .into_iter()
                    .flatten()
                {
                    self.symbols.insert(sub);
                }
            }
            DeclKind::Class { members, .. } => {
                for &member in members {
                    self.collect_decl(member);
                }
            }
            _ => {}
        }
    }
}

/// Pass 2: classify external references.
struct CapturedValueVisitor<'a> {
    arena: &'a DeclArena,
    self_symbols: FxHashSet<DeclId>,
    mappings: IndexMap<DeclId, CapturedSymbol>,
    assignment_lhs: Vec<DeclId>,
}

impl CapturedValueVisitor<'_> {
    fn visit_block(&mut self, block: &Block) {
        for stmt in &block.statements {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) => self.visit_expr(expr),
            Stmt::Contract(contract) => self.visit_expr(&contract.call),
            Stmt::Declare(id) => self.visit_declared(*id),
        }
    }

    /// A fragment-local declaration's own initializer and body can still
    /// reference external names.
    fn visit_declared(&mut self, id: DeclId) {
        let node = self.arena.node(id);
        let slots = node.slots();
        let initializer = slots.initializer.as_expr().cloned();
        let body = slots.body.as_block().cloned();
        drop(slots);

        if let Some(expr) = initializer {
            self.visit_expr(&expr);
        }
        if let Some(block) = body {
            self.visit_block(&block);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Assign { lhs, rhs } => {
                let target = match lhs.kind {
                    ExprKind::Ref(id) => Some(id),
                    _ => None,
                };
                if let Some(id) = target {
                    self.assignment_lhs.push(id);
                }
                self.visit_expr(lhs);
                self.visit_expr(rhs);
                if let Some(id) = target {
                    let popped = self.assignment_lhs.pop();
                    debug_assert_eq!(popped, Some(id), "unbalanced assignment stack");
                }
            }
            ExprKind::Call { callee, args } => {
                self.visit_expr(callee);
                for arg in args {
                    self.visit_expr(arg);
                }
            }
            ExprKind::Ref(id) => self.process_reference(*id),
            ExprKind::This(this_ref) => self.process_this(this_ref),
            ExprKind::Super(super_ref) => {
                if let Some(class) = super_ref.superclass {
                    self.process_super(class);
                }
            }
            ExprKind::Literal(_) | ExprKind::Name(_) => {}
        }
    }

    fn process_this(&mut self, this_ref: &crate::ast::expr::ThisRef) {
        match this_ref.binding {
            ThisBinding::Unbound => {}
            ThisBinding::Class(class) => {
                if self.self_symbols.contains(&class) {
                    return;
                }
                let name = self.arena.node(class).name.clone();
                self.record(
                    class,
                    CapturedValue::new(CaptureKind::ContainingClass, name, false),
                    Type::Class(class),
                    false,
                );
            }
            ThisBinding::Extension(function) => {
                if self.self_symbols.contains(&function) {
                    return;
                }
                let label = match &self.arena.node(function).kind {
                    DeclKind::Function(shape) => shape.extension_label.clone(),
                    _ => None,
                };
                if let Some(label) = label {
                    self.record(
                        function,
                        CapturedValue::new(CaptureKind::ExtensionReceiver, label, false),
                        Type::Unit,
                        false,
                    );
                }
            }
            ThisBinding::Context { function, index } => {
                if self.self_symbols.contains(&function) {
                    return;
                }
                let label = match &self.arena.node(function).kind {
                    DeclKind::Function(shape) => shape
                        .context_receivers
                        .get(index as usize)
                        .and_then(|receiver| receiver.label.clone()),
                    _ => None,
                };
                if let Some(label) = label {
                    self.record(
                        function,
                        CapturedValue::new(CaptureKind::ContextReceiver, label, false),
                        Type::Unit,
                        false,
                    );
                }
            }
        }
    }

    fn process_super(&mut self, class: DeclId) {
        if self.self_symbols.contains(&class) {
            return;
        }
        let name = self.arena.node(class).name.clone();
        self.record(
            class,
            CapturedValue::new(CaptureKind::SuperClass, name, false),
            Type::Class(class),
            false,
        );
    }

    fn process_reference(&mut self, id: DeclId) {
        if self.self_symbols.contains(&id) {
            return;
        }

        let node = self.arena.node(id);
        let mutated = self.assignment_lhs.last() == Some(&id);
        let ty = node
            .slots()
            .return_type
            .as_type()
            .cloned()
            .unwrap_or(Type::Error);

        match &node.kind {
            DeclKind::Parameter { .. } => {
                self.record(
                    id,
                    CapturedValue::new(CaptureKind::Local, node.name.clone(), mutated),
                    ty.clone(),
                    mutated,
                );
            }
            DeclKind::Variable { is_local: true } => {
                let kind = match node.origin {
                    DeclOrigin::DebuggerSynthetic => CaptureKind::DebugLabel,
                    DeclOrigin::Source => CaptureKind::Local,
                };
                self.record(
                    id,
                    CapturedValue::new(kind, node.name.clone(), mutated),
                    ty.clone(),
                    mutated,
                );
            }
            DeclKind::Property(shape) if shape.is_local => {
                let kind = if shape.has_delegate {
                    CaptureKind::LocalDelegate
                } else {
                    CaptureKind::Local
                };
                self.record(
                    id,
                    CapturedValue::new(kind, node.name.clone(), mutated),
                    ty.clone(),
                    mutated,
                );
            }
            DeclKind::Function(shape) if shape.is_local => {
                let arity = shape.params.len();
                self.record(
                    id,
                    CapturedValue::new(CaptureKind::LocalFunction, node.name.clone(), false),
                    Type::Function { arity },
                    false,
                );
            }
            // Module-level properties, variables, and functions are
            // reachable from the generated wrapper directly.
            _ => {}
        }

        // The ambient-context accessor is a dedicated capture kind
        // regardless of its resolved kind otherwise.
        if self.arena.well_known.ambient_context == Some(id) {
            let value = CapturedValue::new(CaptureKind::AmbientContext, node.name.clone(), false);
            match self.mappings.entry(id) {
                Entry::Occupied(mut occupied) => {
                    let mutated = occupied.get().value.is_mutated;
                    occupied.insert(CapturedSymbol {
                        value: CapturedValue {
                            is_mutated: mutated,
                            ..value
                        },
                        ty,
                    });
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(CapturedSymbol { value, ty });
                }
            }
        }
    }

    /// First classification wins; later references only make the
    /// mutation flag sticky.
    fn record(&mut self, id: DeclId, value: CapturedValue, ty: Type, mutated: bool) {
        match self.mappings.entry(id) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().value.is_mutated |= mutated;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CapturedSymbol { value, ty });
            }
        }
    }
}
