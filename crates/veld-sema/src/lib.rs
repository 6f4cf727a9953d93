//! # Veld semantic front end
//!
//! The lazy, phase-ordered declaration resolver of the Veld compiler:
//! takes a tree of not-yet-analyzed declarations and brings a requested
//! subset of them up to a target resolution phase on demand, under
//! per-file re-entrant locks, with snapshot-guarded reversible mutation.
//! Scratch fragments (snippets evaluated against a frozen lexical
//! context, e.g. debugger expressions) additionally get captured-value
//! analysis.
//!
//! ## Architecture
//!
//! ```text
//! foundation  - names, spans, source map
//! ast         - declaration nodes, expression/body trees
//! arena       - handle-addressed node storage + tree building API
//! diagnostics - semantic error sink
//! resolve     - phases, locks, snapshots, driver, capture analysis
//! ```
//!
//! Parsing, codegen, build orchestration, persistence, and CLI surfaces
//! are external collaborators: upstream hands over a declaration tree
//! pre-populated at the lowest phase (with `Lazy` placeholders for
//! unresolved slots), downstream receives the same nodes mutated in
//! place plus a diagnostics list — and, for fragments, the ordered
//! capture manifest.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use veld_sema::arena::DeclArena;
//! use veld_sema::resolve::{self, CancellationToken, LockProvider, Phase, ResolveTarget};
//!
//! let locks = LockProvider::new(Default::default());
//! let target = ResolveTarget::single(decl);
//! let (result, diagnostics) =
//!     resolve::resolve(&arena, &locks, &target, Phase::Bodies, CancellationToken::new());
//! ```

pub mod arena;
pub mod ast;
pub mod diagnostics;
pub mod foundation;
pub mod resolve;

pub use arena::{DeclArena, DeclId, FileId};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity};
pub use resolve::{
    CancellationToken, LockProvider, Phase, ResolutionDriver, ResolveError, ResolveResult,
    ResolveTarget, ResolverConfig,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
