//! Expression and body trees for Veld declarations.
//!
//! The trees here are what body resolution mutates: the upstream parser
//! collaborator hands over *pristine* (unresolved) trees, and the resolver
//! produces resolved copies with references bound to declaration handles
//! and types filled in.
//!
//! # Placeholders
//!
//! Mutable slots use a distinguishable `Lazy` placeholder for "not yet
//! computed" ([`BodySlot::Lazy`], [`ExprSlot::Lazy`],
//! [`DelegatedCallSlot::Lazy`]). The snapshot engine special-cases these:
//! a rollback never overwrites a concrete, fully resolved value with a
//! placeholder.
//!
//! # Resolvedness
//!
//! An expression is *resolved* when its references are bound
//! ([`ExprKind::Ref`], a bound [`ThisRef`]) and *fully typed* when `ty` is
//! populated. Body resolution is the only pass that writes either.

use crate::arena::DeclId;
use crate::foundation::{Name, Span};

/// Callee name of the compiler-recognized contract DSL entry point.
///
/// A leading `contract { ... }` statement in a function body is wrapped
/// into a [`Stmt::Contract`] during body resolution; whether it is a *true*
/// contract depends on the callee resolving to the well-known contract
/// function.
pub const CONTRACT_CALL_NAME: &str = "contract";

/// Resolved semantic type.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Unit,
    Boolean,
    Int,
    Float,
    Str,
    /// Instance type of a class declaration.
    Class(DeclId),
    /// Function type; parameter types are not tracked at this level.
    Function { arity: usize },
    /// Produced when typing failed; carried so resolution can finish.
    Error,
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// The type a literal trivially has.
    pub fn ty(&self) -> Type {
        match self {
            Literal::Unit => Type::Unit,
            Literal::Bool(_) => Type::Boolean,
            Literal::Int(_) => Type::Int,
            Literal::Float(_) => Type::Float,
            Literal::Str(_) => Type::Str,
        }
    }
}

/// An expression with its (post-resolution) type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Populated by body resolution; `None` in pristine trees.
    pub ty: Option<Type>,
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// Unresolved name reference, as parsed.
    Name(Name),
    /// Reference resolved to a declaration.
    Ref(DeclId),
    /// `this` / `this@label` reference to an ambient receiver.
    This(ThisRef),
    /// `super` reference to the enclosing class's supertype.
    Super(SuperRef),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Assign {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// A `this` reference and its resolved binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ThisRef {
    /// Explicit label, if written (`this@outer`).
    pub label: Option<Name>,
    /// Filled in by body resolution.
    pub binding: ThisBinding,
}

/// What a `this` reference is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum ThisBinding {
    Unbound,
    /// Instance of an enclosing class.
    Class(DeclId),
    /// Extension receiver of an enclosing function.
    Extension(DeclId),
    /// Context receiver `index` of an enclosing function.
    Context { function: DeclId, index: u32 },
}

/// A `super` reference; `superclass` is filled in by body resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperRef {
    pub superclass: Option<DeclId>,
}

/// A statement inside a block body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// Introduces a declaration local to the enclosing body.
    ///
    /// The declaration node (local variable, local function, local class)
    /// lives in the arena; the statement is a non-owning handle.
    Declare(DeclId),
    /// A leading contract statement wrapping the underlying call.
    Contract(ContractBlock),
}

/// Wrapper marking a statement as contract-shaped.
///
/// The wrapped call is a *true* contract only if its callee resolved to
/// the well-known contract function; see [`ContractBlock::is_resolved`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContractBlock {
    pub call: Expr,
}

impl ContractBlock {
    /// Whether the wrapped call's callee has been resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.call.kind,
            ExprKind::Call { ref callee, .. } if matches!(callee.kind, ExprKind::Ref(_))
        )
    }
}

/// A block body: statements plus the block's resulting type.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
    /// Populated by body resolution; `None` while any statement is untyped.
    pub ty: Option<Type>,
}

impl Block {
    pub fn new(statements: Vec<Stmt>, span: Span) -> Self {
        Self {
            statements,
            span,
            ty: None,
        }
    }

    /// A block is fully resolved once its type is known.
    pub fn is_fully_resolved(&self) -> bool {
        self.ty.is_some()
    }
}

/// Body slot of a function, accessor, or initializer block.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BodySlot {
    /// The declaration has no body (e.g. an abstract function).
    #[default]
    Absent,
    /// Placeholder: the body has not been computed yet.
    Lazy,
    Block(Block),
}

impl BodySlot {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, BodySlot::Lazy)
    }

    /// Concrete and fully typed.
    pub fn is_fully_resolved(&self) -> bool {
        matches!(self, BodySlot::Block(block) if block.is_fully_resolved())
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            BodySlot::Block(block) => Some(block),
            _ => None,
        }
    }
}

/// Expression slot (initializers, parameter default values, delegate
/// expressions).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExprSlot {
    #[default]
    Absent,
    /// Placeholder: the expression has not been computed yet.
    Lazy,
    Expr(Expr),
}

impl ExprSlot {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, ExprSlot::Lazy)
    }

    pub fn is_fully_resolved(&self) -> bool {
        matches!(self, ExprSlot::Expr(expr) if expr.ty.is_some())
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            ExprSlot::Expr(expr) => Some(expr),
            _ => None,
        }
    }
}

/// Delegated constructor call slot of a constructor.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DelegatedCallSlot {
    #[default]
    Absent,
    /// Placeholder retaining only the `this`/`super` flavor.
    Lazy { is_this: bool },
    Call(DelegatedCall),
}

impl DelegatedCallSlot {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, DelegatedCallSlot::Lazy { .. })
    }

    pub fn is_fully_resolved(&self) -> bool {
        matches!(self, DelegatedCallSlot::Call(call) if call.callee.is_some())
    }
}

/// A resolved (or in-flight) delegated constructor call.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegatedCall {
    pub is_this: bool,
    /// Target constructor; `None` until resolved.
    pub callee: Option<DeclId>,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// Declared/return type slot.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSlot {
    /// Not yet resolved; holds the explicit annotation if the source had
    /// one, `None` when the type must be inferred.
    Unresolved { annotation: Option<Name> },
    Resolved(Type),
}

impl Default for TypeSlot {
    fn default() -> Self {
        TypeSlot::Unresolved { annotation: None }
    }
}

impl TypeSlot {
    pub fn is_resolved(&self) -> bool {
        matches!(self, TypeSlot::Resolved(_))
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self {
            TypeSlot::Resolved(ty) => Some(ty),
            _ => None,
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
        }
    }

    pub fn literal(literal: Literal, span: Span) -> Self {
        Self::new(ExprKind::Literal(literal), span)
    }

    /// Unresolved name reference.
    pub fn name(name: impl Into<Name>, span: Span) -> Self {
        Self::new(ExprKind::Name(name.into()), span)
    }

    /// Unlabeled `this`.
    pub fn this(span: Span) -> Self {
        Self::new(
            ExprKind::This(ThisRef {
                label: None,
                binding: ThisBinding::Unbound,
            }),
            span,
        )
    }

    /// Labeled `this@label`.
    pub fn this_labeled(label: impl Into<Name>, span: Span) -> Self {
        Self::new(
            ExprKind::This(ThisRef {
                label: Some(label.into()),
                binding: ThisBinding::Unbound,
            }),
            span,
        )
    }

    /// `super` reference.
    pub fn super_ref(span: Span) -> Self {
        Self::new(ExprKind::Super(SuperRef { superclass: None }), span)
    }

    pub fn call(callee: Expr, args: Vec<Expr>, span: Span) -> Self {
        Self::new(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            span,
        )
    }

    pub fn assign(lhs: Expr, rhs: Expr, span: Span) -> Self {
        Self::new(
            ExprKind::Assign {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        )
    }
}
