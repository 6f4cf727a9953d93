//! The phase-specific transformations.
//!
//! Body resolution clones a declaration's pristine source trees, binds
//! every reference it can against the scope tower, wraps leading
//! contract-shaped calls, assigns types, and writes the results into the
//! declaration's slots. Semantic failures (unresolved names, bad
//! assignment targets) become diagnostics in the sink — they never abort
//! resolution. Only dependency resolution (which may be cancelled or hit
//! a cycle) and caller-contract violations propagate as errors.
//!
//! The lighter `Types` and `ImplicitTypes` transformations resolve a
//! declaration's annotated or inferred type without touching bodies.
//!
//! Resolving a reference to a sibling declaration whose type is not yet
//! known re-enters the driver ([`ResolutionDriver::ensure_at_least`]); the
//! re-entrant file lock and the thread-local cycle guard make this safe.

use tracing::trace;

use crate::arena::{DeclArena, DeclId};
use crate::ast::decl::{DeclKind, PropertyBodyState};
use crate::ast::expr::{
    Block, BodySlot, ContractBlock, DelegatedCall, Expr, ExprKind, ExprSlot, Stmt, SuperRef,
    ThisBinding, ThisRef, Type, TypeSlot,
};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::foundation::Name;
use crate::resolve::context::{ContextEntry, LexicalContext};
use crate::resolve::driver::ResolutionDriver;
use crate::resolve::error::ResolveResult;
use crate::resolve::keepers::is_contract_shaped_call;
use crate::resolve::phase::Phase;

/// Body-resolution transformer for one declaration.
pub(crate) struct BodyTransformer<'d, 'a> {
    driver: &'d ResolutionDriver<'a>,
    context: LexicalContext,
    locals: Vec<Vec<DeclId>>,
}

impl<'d, 'a> BodyTransformer<'d, 'a> {
    pub(crate) fn new(driver: &'d ResolutionDriver<'a>, context: LexicalContext) -> Self {
        Self {
            driver,
            context,
            locals: Vec::new(),
        }
    }

    fn arena(&self) -> &'a DeclArena {
        self.driver.arena()
    }

    pub(crate) fn resolve_function(&mut self, func: DeclId) -> ResolveResult<()> {
        trace!(decl = %func, "resolving function body");
        self.context.entries.push(ContextEntry::Function { function: func });

        let arena = self.arena();
        let source_body = arena.node(func).source.body.clone();
        let mut body_ty = Type::Unit;
        if let Some(block) = source_body {
            let resolved = self.resolve_block(&block, true)?;
            body_ty = resolved.ty.clone().unwrap_or(Type::Unit);
            arena.node(func).slots_mut().body = BodySlot::Block(resolved);
        }

        for param in params_of(arena, func) {
            let source = arena.node(param).source.default_value.clone();
            if let Some(expr) = source {
                let resolved = self.resolve_expr(&expr)?;
                arena.node(param).slots_mut().default_value = ExprSlot::Expr(resolved);
            }
        }

        self.finish_return_type(func, body_ty);
        self.context.entries.pop();
        Ok(())
    }

    pub(crate) fn resolve_constructor(&mut self, ctor: DeclId) -> ResolveResult<()> {
        self.resolve_function(ctor)?;

        let arena = self.arena();
        let source = arena.node(ctor).source.delegated_constructor.clone();
        if let Some(call) = source {
            let mut args = Vec::with_capacity(call.args.len());
            for arg in &call.args {
                args.push(self.resolve_expr(arg)?);
            }
            let callee = self.resolve_delegation_target(ctor, call.is_this);
            arena.node(ctor).slots_mut().delegated_constructor =
                crate::ast::expr::DelegatedCallSlot::Call(DelegatedCall {
                    is_this: call.is_this,
                    callee,
                    args,
                    span: call.span,
                });
        }
        Ok(())
    }

    pub(crate) fn resolve_variable(&mut self, variable: DeclId) -> ResolveResult<()> {
        let arena = self.arena();
        let source = arena.node(variable).source.initializer.clone();
        let mut init_ty = None;
        if let Some(expr) = source {
            let resolved = self.resolve_expr(&expr)?;
            init_ty = resolved.ty.clone();
            arena.node(variable).slots_mut().initializer = ExprSlot::Expr(resolved);
        }
        self.finish_return_type(variable, init_ty.unwrap_or(Type::Unit));
        Ok(())
    }

    pub(crate) fn resolve_property(&mut self, prop: DeclId) -> ResolveResult<()> {
        let arena = self.arena();
        let shape = match &arena.node(prop).kind {
            DeclKind::Property(shape) => shape.clone(),
            other => unreachable!("resolve_property on {other:?}"),
        };
        let state = arena.node(prop).slots().body_state;

        if state < PropertyBodyState::InitializerResolved {
            let source = arena.node(prop).source.initializer.clone();
            let mut init_ty = None;
            if let Some(expr) = source {
                let resolved = self.resolve_expr(&expr)?;
                init_ty = resolved.ty.clone();
                arena.node(prop).slots_mut().initializer = ExprSlot::Expr(resolved);
            }
            self.finish_return_type(prop, init_ty.unwrap_or(Type::Unit));

            if let Some(backing_field) = shape.backing_field {
                self.resolve_variable(backing_field)?;
            }
            bump_body_state(arena, prop, PropertyBodyState::InitializerResolved);
        }

        if state < PropertyBodyState::InitializerAndGetterResolved {
            if let Some(getter) = shape.getter {
                self.resolve_function(getter)?;
            }
            bump_body_state(arena, prop, PropertyBodyState::InitializerAndGetterResolved);
        }

        if state < PropertyBodyState::EverythingResolved {
            if let Some(setter) = shape.setter {
                self.resolve_function(setter)?;
            }
            if shape.has_delegate {
                for (source, write) in [
                    (
                        arena.node(prop).source.delegate_expression.clone(),
                        DelegateSlot::Expression,
                    ),
                    (
                        arena.node(prop).source.delegate_provider.clone(),
                        DelegateSlot::Provider,
                    ),
                ] {
                    if let Some(expr) = source {
                        let resolved = self.resolve_expr(&expr)?;
                        let mut slots = arena.node(prop).slots_mut();
                        match write {
                            DelegateSlot::Expression => {
                                slots.delegate_expression = ExprSlot::Expr(resolved)
                            }
                            DelegateSlot::Provider => {
                                slots.delegate_provider = ExprSlot::Expr(resolved)
                            }
                        }
                    }
                }
            }
            bump_body_state(arena, prop, PropertyBodyState::EverythingResolved);
        }

        Ok(())
    }

    pub(crate) fn resolve_initializer_block(&mut self, block_decl: DeclId) -> ResolveResult<()> {
        let arena = self.arena();
        let source = arena.node(block_decl).source.body.clone();
        if let Some(block) = source {
            let resolved = self.resolve_block(&block, false)?;
            arena.node(block_decl).slots_mut().body = BodySlot::Block(resolved);
        }
        Ok(())
    }

    /// Fragment bodies resolve against the frozen context attached by the
    /// driver; the anchored code itself is never touched.
    pub(crate) fn resolve_fragment(&mut self, fragment: DeclId) -> ResolveResult<()> {
        let arena = self.arena();
        let source = arena.node(fragment).source.body.clone();
        let mut body_ty = Type::Unit;
        if let Some(block) = source {
            let resolved = self.resolve_block(&block, false)?;
            body_ty = resolved.ty.clone().unwrap_or(Type::Unit);
            arena.node(fragment).slots_mut().body = BodySlot::Block(resolved);
        }
        arena.node(fragment).slots_mut().return_type = TypeSlot::Resolved(body_ty);
        Ok(())
    }

    fn resolve_block(&mut self, block: &Block, is_function_body: bool) -> ResolveResult<Block> {
        self.locals.push(Vec::new());

        let mut statements = Vec::with_capacity(block.statements.len());
        let mut result = Ok(());
        for (index, stmt) in block.statements.iter().enumerate() {
            match self.resolve_stmt(stmt, index == 0 && is_function_body) {
                Ok(resolved) => statements.push(resolved),
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }

        self.locals.pop();
        result?;

        let ty = match statements.last() {
            Some(Stmt::Expr(expr)) => expr.ty.clone().unwrap_or(Type::Unit),
            _ => Type::Unit,
        };
        Ok(Block {
            statements,
            span: block.span,
            ty: Some(ty),
        })
    }

    fn resolve_stmt(&mut self, stmt: &Stmt, first_in_body: bool) -> ResolveResult<Stmt> {
        match stmt {
            Stmt::Declare(id) => {
                self.resolve_local_declaration(*id)?;
                self.locals
                    .last_mut()
                    .expect("local scope stack is empty")
                    .push(*id);
                Ok(Stmt::Declare(*id))
            }
            Stmt::Expr(expr) if first_in_body && is_contract_shaped_call(self.arena(), expr) => {
                let call = self.resolve_contract_call(expr)?;
                Ok(Stmt::Contract(ContractBlock { call }))
            }
            Stmt::Expr(expr) => Ok(Stmt::Expr(self.resolve_expr(expr)?)),
            Stmt::Contract(contract) => Ok(Stmt::Contract(ContractBlock {
                call: self.resolve_contract_call(&contract.call)?,
            })),
        }
    }

    fn resolve_local_declaration(&mut self, id: DeclId) -> ResolveResult<()> {
        let arena = self.arena();
        match &arena.node(id).kind {
            DeclKind::Variable { .. } | DeclKind::BackingField { .. } => {
                self.resolve_variable(id)
            }
            DeclKind::Property(_) => self.resolve_property(id),
            DeclKind::Function(_) => self.resolve_function(id),
            // Local classes resolve on demand like any other container.
            DeclKind::Class { .. } => Ok(()),
            other => unreachable!("local declaration of kind {other:?}"),
        }
    }

    /// Resolve a leading contract-shaped call. The callee binds to
    /// whatever `contract` is in scope, falling back to the well-known
    /// contract function; an unbound contract callee is not a user error
    /// (the statement is unwrapped again after resolution).
    fn resolve_contract_call(&mut self, expr: &Expr) -> ResolveResult<Expr> {
        let ExprKind::Call { callee, args } = &expr.kind else {
            return self.resolve_expr(expr);
        };

        let resolved_callee = match &callee.kind {
            ExprKind::Name(name) => match self
                .lookup(name)
                .or(self.arena().well_known.contract_fn)
            {
                Some(id) => Expr {
                    kind: ExprKind::Ref(id),
                    span: callee.span,
                    ty: Some(Type::Function { arity: args.len() }),
                },
                None => (**callee).clone(),
            },
            _ => self.resolve_expr(callee)?,
        };

        let mut resolved_args = Vec::with_capacity(args.len());
        for arg in args {
            resolved_args.push(self.resolve_expr(arg)?);
        }

        Ok(Expr {
            kind: ExprKind::Call {
                callee: Box::new(resolved_callee),
                args: resolved_args,
            },
            span: expr.span,
            ty: Some(Type::Unit),
        })
    }

    fn resolve_expr(&mut self, expr: &Expr) -> ResolveResult<Expr> {
        let span = expr.span;
        let resolved = match &expr.kind {
            ExprKind::Literal(literal) => Expr {
                kind: ExprKind::Literal(literal.clone()),
                span,
                ty: Some(literal.ty()),
            },
            ExprKind::Name(name) => match self.lookup(name) {
                Some(id) => {
                    let ty = self.type_of_dependency(id)?;
                    Expr {
                        kind: ExprKind::Ref(id),
                        span,
                        ty: Some(ty),
                    }
                }
                None => {
                    self.driver.report(Diagnostic::error(
                        DiagnosticKind::UnresolvedName,
                        span,
                        format!("unresolved name '{name}'"),
                    ));
                    Expr {
                        kind: ExprKind::Name(name.clone()),
                        span,
                        ty: Some(Type::Error),
                    }
                }
            },
            ExprKind::Ref(id) => {
                let ty = self.type_of_dependency(*id)?;
                Expr {
                    kind: ExprKind::Ref(*id),
                    span,
                    ty: Some(ty),
                }
            }
            ExprKind::This(this_ref) => {
                let binding = self
                    .context
                    .resolve_this(self.arena(), this_ref.label.as_ref());
                let ty = match &binding {
                    ThisBinding::Class(class) => Type::Class(*class),
                    ThisBinding::Extension(_) | ThisBinding::Context { .. } => Type::Unit,
                    ThisBinding::Unbound => {
                        self.driver.report(Diagnostic::error(
                            DiagnosticKind::NoReceiverInScope,
                            span,
                            match &this_ref.label {
                                Some(label) => format!("no receiver labeled '{label}' in scope"),
                                None => "no receiver in scope".to_string(),
                            },
                        ));
                        Type::Error
                    }
                };
                Expr {
                    kind: ExprKind::This(ThisRef {
                        label: this_ref.label.clone(),
                        binding,
                    }),
                    span,
                    ty: Some(ty),
                }
            }
            ExprKind::Super(_) => {
                let superclass = self.context.resolve_super(self.arena());
                let ty = match superclass {
                    Some(class) => Type::Class(class),
                    None => {
                        self.driver.report(Diagnostic::error(
                            DiagnosticKind::NoReceiverInScope,
                            span,
                            "no enclosing class with a superclass in scope",
                        ));
                        Type::Error
                    }
                };
                Expr {
                    kind: ExprKind::Super(SuperRef { superclass }),
                    span,
                    ty: Some(ty),
                }
            }
            ExprKind::Call { callee, args } => {
                let callee = self.resolve_expr(callee)?;
                let mut resolved_args = Vec::with_capacity(args.len());
                for arg in args {
                    resolved_args.push(self.resolve_expr(arg)?);
                }
                let ty = match &callee.kind {
                    ExprKind::Ref(id) => self.return_type_of(*id)?,
                    _ => Type::Error,
                };
                Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(callee),
                        args: resolved_args,
                    },
                    span,
                    ty: Some(ty),
                }
            }
            ExprKind::Assign { lhs, rhs } => {
                let lhs = self.resolve_expr(lhs)?;
                if !is_assignable(self.arena(), &lhs) {
                    self.driver.report(Diagnostic::error(
                        DiagnosticKind::InvalidAssignment,
                        span,
                        "left-hand side is not assignable",
                    ));
                }
                let rhs = self.resolve_expr(rhs)?;
                Expr {
                    kind: ExprKind::Assign {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span,
                    ty: Some(Type::Unit),
                }
            }
        };
        Ok(resolved)
    }

    fn lookup(&self, name: &Name) -> Option<DeclId> {
        let arena = self.arena();
        for scope in self.locals.iter().rev() {
            if let Some(&id) = scope
                .iter()
                .rev()
                .find(|&&id| &arena.node(id).name == name)
            {
                return Some(id);
            }
        }
        self.context.lookup(arena, name)
    }

    /// The type a reference to `id` has. Pulls the dependency to
    /// `ImplicitTypes` when its type is not yet known — this is the
    /// re-entrant edge of resolution.
    fn type_of_dependency(&self, id: DeclId) -> ResolveResult<Type> {
        let arena = self.arena();
        let node = arena.node(id);
        match &node.kind {
            DeclKind::Class { .. } => return Ok(Type::Class(id)),
            DeclKind::Function(shape) => {
                return Ok(Type::Function {
                    arity: shape.params.len(),
                })
            }
            DeclKind::Constructor { params } => {
                return Ok(Type::Function {
                    arity: params.len(),
                })
            }
            _ => {}
        }

        if let Some(ty) = node.slots().return_type.as_type() {
            return Ok(ty.clone());
        }
        self.driver.ensure_at_least(id, Phase::ImplicitTypes)?;
        Ok(node
            .slots()
            .return_type
            .as_type()
            .cloned()
            .unwrap_or(Type::Error))
    }

    /// The result type of calling `id`.
    fn return_type_of(&self, id: DeclId) -> ResolveResult<Type> {
        let arena = self.arena();
        let node = arena.node(id);
        match &node.kind {
            DeclKind::Constructor { .. } => {
                return Ok(node.parent.map(Type::Class).unwrap_or(Type::Error))
            }
            DeclKind::Class { .. } => return Ok(Type::Class(id)),
            _ => {}
        }
        if let Some(ty) = node.slots().return_type.as_type() {
            return Ok(ty.clone());
        }
        self.driver.ensure_at_least(id, Phase::ImplicitTypes)?;
        Ok(node
            .slots()
            .return_type
            .as_type()
            .cloned()
            .unwrap_or(Type::Unit))
    }

    fn resolve_delegation_target(&self, ctor: DeclId, is_this: bool) -> Option<DeclId> {
        let arena = self.arena();
        let class = arena.node(ctor).parent?;
        let target_class = if is_this {
            class
        } else {
            match &arena.node(class).kind {
                DeclKind::Class { superclass, .. } => (*superclass)?,
                _ => return None,
            }
        };
        arena
            .node(target_class)
            .kind
            .members()
            .iter()
            .copied()
            .find(|&m| m != ctor && matches!(arena.node(m).kind, DeclKind::Constructor { .. }))
    }

    /// Resolve the declared/return type slot if it is still open:
    /// annotation first, inferred type otherwise.
    fn finish_return_type(&self, decl: DeclId, inferred: Type) {
        let arena = self.arena();
        let annotation = match &arena.node(decl).slots().return_type {
            TypeSlot::Resolved(_) => return,
            TypeSlot::Unresolved { annotation } => annotation.clone(),
        };
        let ty = match annotation {
            Some(name) => self.resolve_type_name(&name, decl),
            None => inferred,
        };
        arena.node(decl).slots_mut().return_type = TypeSlot::Resolved(ty);
    }

    fn resolve_type_name(&self, name: &Name, decl: DeclId) -> Type {
        resolve_type_annotation(self.arena(), &self.context, name).unwrap_or_else(|| {
            self.driver.report(Diagnostic::error(
                DiagnosticKind::UnresolvedName,
                self.arena().node(decl).span,
                format!("unknown type '{name}'"),
            ));
            Type::Error
        })
    }
}

enum DelegateSlot {
    Expression,
    Provider,
}

fn is_assignable(arena: &DeclArena, lhs: &Expr) -> bool {
    match lhs.kind {
        ExprKind::Ref(id) => matches!(
            arena.node(id).kind,
            DeclKind::Variable { .. }
                | DeclKind::Parameter { .. }
                | DeclKind::Property(_)
                | DeclKind::BackingField { .. }
        ),
        // Unresolved targets already produced a diagnostic.
        ExprKind::Name(_) => true,
        _ => false,
    }
}

fn params_of(arena: &DeclArena, func: DeclId) -> Vec<DeclId> {
    match &arena.node(func).kind {
        DeclKind::Function(shape) => shape.params.clone(),
        DeclKind::Constructor { params } => params.clone(),
        DeclKind::Accessor { .. } => Vec::new(),
        other => unreachable!("params_of on {other:?}"),
    }
}

fn bump_body_state(arena: &DeclArena, prop: DeclId, state: PropertyBodyState) {
    let mut slots = arena.node(prop).slots_mut();
    if slots.body_state < state {
        slots.body_state = state;
    }
}

/// Map a type annotation to a semantic type: builtin names first, then
/// class declarations visible in the context.
fn resolve_type_annotation(
    arena: &DeclArena,
    context: &LexicalContext,
    name: &Name,
) -> Option<Type> {
    let builtin = match name.as_str() {
        "Unit" => Some(Type::Unit),
        "Bool" | "Boolean" => Some(Type::Boolean),
        "Int" => Some(Type::Int),
        "Float" => Some(Type::Float),
        "Str" | "String" => Some(Type::Str),
        _ => None,
    };
    if builtin.is_some() {
        return builtin;
    }
    match context.lookup(arena, name) {
        Some(id) if matches!(arena.node(id).kind, DeclKind::Class { .. }) => {
            Some(Type::Class(id))
        }
        _ => None,
    }
}

// --- lower-phase transformations ---

/// `Types` phase: resolve the explicit annotation, if any.
pub(crate) fn resolve_declared_type(
    driver: &ResolutionDriver<'_>,
    decl: DeclId,
) -> ResolveResult<()> {
    let arena = driver.arena();
    let annotation = match &arena.node(decl).slots().return_type {
        TypeSlot::Unresolved {
            annotation: Some(name),
        } => name.clone(),
        _ => return Ok(()),
    };

    let context = crate::resolve::context::enclosing_context(arena, decl);
    let ty = resolve_type_annotation(arena, &context, &annotation).unwrap_or_else(|| {
        driver.report(Diagnostic::error(
            DiagnosticKind::UnresolvedName,
            arena.node(decl).span,
            format!("unknown type '{annotation}'"),
        ));
        Type::Error
    });
    arena.node(decl).slots_mut().return_type = TypeSlot::Resolved(ty);
    Ok(())
}

/// `ImplicitTypes` phase: shallow inference for declarations without an
/// annotation, recursing into dependencies as needed.
pub(crate) fn infer_implicit_type(
    driver: &ResolutionDriver<'_>,
    decl: DeclId,
) -> ResolveResult<()> {
    let arena = driver.arena();
    if arena.node(decl).slots().return_type.is_resolved() {
        return Ok(());
    }

    let has_type_slot = matches!(
        arena.node(decl).kind,
        DeclKind::Function(_)
            | DeclKind::Constructor { .. }
            | DeclKind::Property(_)
            | DeclKind::Accessor { .. }
            | DeclKind::BackingField { .. }
            | DeclKind::Variable { .. }
            | DeclKind::Parameter { .. }
    );
    if !has_type_slot {
        return Ok(());
    }

    let context = crate::resolve::context::enclosing_context(arena, decl);
    let source = &arena.node(decl).source;
    let seed = source
        .initializer
        .clone()
        .or_else(|| source.default_value.clone())
        .or_else(|| {
            source.body.as_ref().and_then(|block| {
                block.statements.iter().rev().find_map(|stmt| match stmt {
                    Stmt::Expr(expr) => Some(expr.clone()),
                    _ => None,
                })
            })
        });

    let ty = match seed {
        Some(expr) => shallow_type(driver, &context, &expr)?,
        None => Type::Unit,
    };
    arena.node(decl).slots_mut().return_type = TypeSlot::Resolved(ty);
    Ok(())
}

/// Best-effort type of a pristine expression, without resolving it.
fn shallow_type(
    driver: &ResolutionDriver<'_>,
    context: &LexicalContext,
    expr: &Expr,
) -> ResolveResult<Type> {
    let arena = driver.arena();
    let ty = match &expr.kind {
        ExprKind::Literal(literal) => literal.ty(),
        ExprKind::Name(name) => match context.lookup(arena, name) {
            Some(id) => typed_dependency(driver, id)?,
            None => Type::Error,
        },
        ExprKind::Ref(id) => typed_dependency(driver, *id)?,
        ExprKind::This(this_ref) => {
            match context.resolve_this(arena, this_ref.label.as_ref()) {
                ThisBinding::Class(class) => Type::Class(class),
                _ => Type::Unit,
            }
        }
        ExprKind::Super(_) => context
            .resolve_super(arena)
            .map(Type::Class)
            .unwrap_or(Type::Error),
        ExprKind::Call { .. } | ExprKind::Assign { .. } => Type::Unit,
    };
    Ok(ty)
}

fn typed_dependency(driver: &ResolutionDriver<'_>, id: DeclId) -> ResolveResult<Type> {
    let arena = driver.arena();
    let node = arena.node(id);
    match &node.kind {
        DeclKind::Class { .. } => return Ok(Type::Class(id)),
        DeclKind::Function(shape) => {
            return Ok(Type::Function {
                arity: shape.params.len(),
            })
        }
        _ => {}
    }
    if let Some(ty) = node.slots().return_type.as_type() {
        return Ok(ty.clone());
    }
    driver.ensure_at_least(id, Phase::ImplicitTypes)?;
    Ok(node
        .slots()
        .return_type
        .as_type()
        .cloned()
        .unwrap_or(Type::Error))
}
