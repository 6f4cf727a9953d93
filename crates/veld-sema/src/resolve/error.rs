//! The structured internal-error channel, cooperative cancellation, and
//! resolver configuration.
//!
//! Programming-contract violations (phase regression, double graph
//! attachment, a fragment without an anchor, same-phase cycles) are fatal
//! for the resolution request: they carry the offending node's identity
//! and a rendered subtree dump, and they propagate through snapshot
//! rollback and lock release on the way out. Cancellation unwinds along
//! the same path but is a distinguished variant so callers do not report
//! it as a bug.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::arena::DeclId;
use crate::resolve::phase::Phase;

/// Result type for resolution operations.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Errors on the internal channel of the resolver.
///
/// These are not user-facing semantic diagnostics — those go through
/// [`crate::diagnostics::DiagnosticSink`] and do not abort resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The surrounding process requested cancellation. Not a bug; the
    /// affected nodes were rolled back to their pre-transformation state.
    #[error("resolution cancelled")]
    Cancelled,

    /// A phase advance targeted a phase at or below the current one.
    /// Phase regression indicates a resolver bug.
    #[error("phase regression on {decl}: {current:?} -> {requested:?}\n{dump}")]
    PhaseRegression {
        decl: DeclId,
        current: Phase,
        requested: Phase,
        dump: String,
    },

    /// A control-flow graph was attached to a container that already has
    /// one. The container was resolved twice.
    #[error("control-flow graph already attached to {decl}\n{dump}")]
    GraphAlreadyAttached { decl: DeclId, dump: String },

    /// A scratch fragment reached body resolution without an anchoring
    /// context. Caller contract violation.
    #[error("scratch fragment {decl} has no anchoring context\n{dump}")]
    MissingFragmentContext { decl: DeclId, dump: String },

    /// Two or more declarations require each other at the same phase.
    /// Detected, never allowed to loop or deadlock.
    #[error("cyclic dependency at phase {phase:?}: {chain:?}")]
    CyclicDependency { phase: Phase, chain: Vec<DeclId> },

    /// A declaration kind the driver has no path for reached the
    /// locked-resolution dispatch.
    #[error("unexpected declaration {decl} in body resolution\n{dump}")]
    UnexpectedDeclaration { decl: DeclId, dump: String },
}

impl ResolveError {
    /// Distinguishes cooperative cancellation from genuine failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolveError::Cancelled)
    }
}

/// Cooperative cancellation flag shared with the surrounding process.
///
/// Checked at coarse boundaries (before a container's member loop, before
/// graph attachment, between member resolutions) and while waiting on a
/// contended file lock.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Propagate cancellation as an error.
    pub fn check(&self) -> ResolveResult<()> {
        if self.is_cancelled() {
            Err(ResolveError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How often a thread blocked on a contended file lock re-checks
    /// cancellation.
    pub lock_poll_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval: Duration::from_millis(50),
        }
    }
}
