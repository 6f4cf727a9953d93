//! Declaration and expression trees.
//!
//! `decl` holds the arena-resident declaration nodes (immutable structure
//! plus lock-guarded mutable slots); `expr` holds the expression and body
//! trees those slots contain.

pub mod decl;
pub mod expr;

pub use decl::{
    Anchor, CfgNode, ContextReceiver, ControlFlowGraph, DeclKind, DeclNode, DeclOrigin,
    DeclSource, FunctionShape, PropertyBodyState, PropertyShape, Slots,
};
pub use expr::{
    Block, BodySlot, ContractBlock, DelegatedCall, DelegatedCallSlot, Expr, ExprKind, ExprSlot,
    Literal, Stmt, SuperRef, ThisBinding, ThisRef, Type, TypeSlot, CONTRACT_CALL_NAME,
};
