//! The per-declaration phase state machine.
//!
//! Phases form a fixed, strictly linear sequence; a declaration's phase
//! counter is non-decreasing over its lifetime and may only be advanced
//! by the resolver owning the current transition, under the node's file
//! lock. Queries use acquire loads and pair with the release store of the
//! advance, so observing a phase guarantees visibility of every slot
//! write that phase performed.
//!
//! Same-phase cyclic dependencies are detected through a thread-local
//! in-progress stack keyed by declaration identity and reported as a
//! structured error — never a deadlock, never a silent loop.

use std::cell::RefCell;

use rustc_hash::FxHashSet;

use crate::arena::{DeclArena, DeclId};
use crate::resolve::error::{ResolveError, ResolveResult};

/// Resolution phases, lowest to highest.
///
/// `Bodies` is the final phase: bodies, initializers, and default values
/// are resolved and container graphs are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// As handed over by the tree builder.
    Raw = 0,
    /// Declared types resolved.
    Types = 1,
    /// Inferred declaration types computed.
    ImplicitTypes = 2,
    /// Bodies resolved; fully resolved.
    Bodies = 3,
}

impl Phase {
    pub const FINAL: Phase = Phase::Bodies;

    pub(crate) fn from_u8(raw: u8) -> Phase {
        match raw {
            0 => Phase::Raw,
            1 => Phase::Types,
            2 => Phase::ImplicitTypes,
            3 => Phase::Bodies,
            other => unreachable!("invalid phase value {other}"),
        }
    }

    /// The immediately preceding phase; `None` for `Raw`.
    pub fn previous(self) -> Option<Phase> {
        match self {
            Phase::Raw => None,
            Phase::Types => Some(Phase::Raw),
            Phase::ImplicitTypes => Some(Phase::Types),
            Phase::Bodies => Some(Phase::ImplicitTypes),
        }
    }

    /// The immediately following phase; `None` for the final phase.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Raw => Some(Phase::Types),
            Phase::Types => Some(Phase::ImplicitTypes),
            Phase::ImplicitTypes => Some(Phase::Bodies),
            Phase::Bodies => None,
        }
    }
}

/// Advance a node to a strictly greater phase.
///
/// Caller must hold the node's file lock. Requesting a phase at or below
/// the current one is a programming-contract violation and fails the
/// resolution request.
pub fn advance(arena: &DeclArena, decl: DeclId, requested: Phase) -> ResolveResult<()> {
    let node = arena.node(decl);
    let current = node.phase();
    if requested <= current {
        return Err(ResolveError::PhaseRegression {
            decl,
            current,
            requested,
            dump: arena.render(decl),
        });
    }
    node.store_phase(requested);
    Ok(())
}

thread_local! {
    static IN_PROGRESS: RefCell<InProgress> = RefCell::new(InProgress::default());
}

#[derive(Default)]
struct InProgress {
    stack: Vec<DeclId>,
    set: FxHashSet<DeclId>,
}

/// RAII entry in the thread-local in-progress set.
///
/// Held for the duration of one node's single-phase resolution; a nested
/// attempt to resolve the same node at the same time on the same thread
/// is a same-phase cycle.
#[derive(Debug)]
pub(crate) struct InProgressGuard {
    decl: DeclId,
}

impl InProgressGuard {
    /// Enter `decl`, or report the cycle chain from its first occurrence.
    pub(crate) fn enter(decl: DeclId, phase: Phase) -> ResolveResult<InProgressGuard> {
        IN_PROGRESS.with(|state| {
            let mut state = state.borrow_mut();
            if state.set.contains(&decl) {
                let first = state.stack.iter().position(|&d| d == decl).unwrap_or(0);
                let mut chain: Vec<DeclId> = state.stack[first..].to_vec();
                chain.push(decl);
                return Err(ResolveError::CyclicDependency { phase, chain });
            }
            state.stack.push(decl);
            state.set.insert(decl);
            Ok(InProgressGuard { decl })
        })
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        IN_PROGRESS.with(|state| {
            let mut state = state.borrow_mut();
            state.set.remove(&self.decl);
            debug_assert_eq!(state.stack.last(), Some(&self.decl), "unbalanced in-progress stack");
            state.stack.pop();
        });
    }
}
