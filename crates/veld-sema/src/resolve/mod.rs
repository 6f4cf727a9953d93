//! Lazy, phase-ordered declaration resolution.
//!
//! This module brings a requested subset of the declaration tree up to a
//! target [`phase::Phase`] on demand, leaving the rest of the program
//! untouched:
//!
//! ```text
//! caller ── ResolveTarget ──▶ driver ──▶ lock ──▶ snapshot ──▶ transform
//!                               ▲                                  │
//!                               └── recursive prerequisite ◀───────┘
//!                                        resolution
//! ```
//!
//! - `phase` — monotonic per-node phase counters and cycle detection
//! - `lock` — re-entrant per-file mutation locks
//! - `snapshot` / `keepers` — reversible slot mutation
//! - `target` — single-declaration and designation targets
//! - `driver` — the resolution driver itself
//! - `context` — frozen lexical contexts for scratch fragments
//! - `transform` — the phase transformations (crate-internal)
//! - `capture` — captured-value analysis for scratch fragments
//! - `error` — internal-error channel, cancellation, configuration

pub mod capture;
pub mod context;
pub mod driver;
pub mod error;
pub mod keepers;
pub mod lock;
pub mod phase;
pub mod snapshot;
pub mod target;
pub(crate) mod transform;

pub use capture::{CaptureKind, CaptureManifest, CapturedSymbol, CapturedValue, WrapperIdentity};
pub use context::{ContextEntry, LexicalContext};
pub use driver::ResolutionDriver;
pub use error::{CancellationToken, ResolveError, ResolveResult, ResolverConfig};
pub use lock::LockProvider;
pub use phase::Phase;
pub use target::ResolveTarget;

use crate::arena::DeclArena;
use crate::diagnostics::Diagnostic;

/// One-shot resolution request: drive `target` to `phase` and hand back
/// the collected semantic diagnostics alongside the outcome.
pub fn resolve(
    arena: &DeclArena,
    locks: &LockProvider,
    target: &ResolveTarget,
    phase: Phase,
    cancel: CancellationToken,
) -> (ResolveResult<()>, Vec<Diagnostic>) {
    let driver = ResolutionDriver::new(arena, locks, cancel);
    let result = driver.resolve_to_phase(target, phase);
    (result, driver.take_diagnostics())
}
