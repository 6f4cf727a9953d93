//! Exclusive, re-entrant mutation rights over file scopes.
//!
//! Locking is file-granular: coarser than per-node (bounded lock count),
//! finer than global (independent files resolve in parallel). The mutex
//! is re-entrant, so a transformation that recursively resolves a sibling
//! or prerequisite declaration in the same file never self-deadlocks.
//!
//! A thread blocked on a contended lock re-checks cooperative
//! cancellation on the configured poll interval, so a cancelled request
//! does not sleep on a lock indefinitely. Multi-file entry points acquire
//! in `FileId` order — the stable global ordering key — to avoid
//! cross-file deadlock between two requests that need each other's files.

use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use rustc_hash::FxHashMap;

use crate::arena::FileId;
use crate::resolve::error::{CancellationToken, ResolveResult, ResolverConfig};

/// Grants exclusive, re-entrant-safe access to file scopes.
#[derive(Debug, Default)]
pub struct LockProvider {
    config: ResolverConfig,
    locks: RwLock<FxHashMap<FileId, Arc<ReentrantMutex<()>>>>,
}

impl LockProvider {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            locks: RwLock::new(FxHashMap::default()),
        }
    }

    /// Run `body` while holding exclusive mutation rights on `file`.
    ///
    /// Re-entrant: if the current thread already holds this file's lock,
    /// `body` runs immediately without blocking. The lock is released on
    /// every exit path, including error returns and panics.
    pub fn with_file_lock<R>(
        &self,
        file: FileId,
        cancel: &CancellationToken,
        body: impl FnOnce() -> ResolveResult<R>,
    ) -> ResolveResult<R> {
        let mutex = self.mutex_for(file);
        loop {
            if let Some(guard) = mutex.try_lock_for(self.config.lock_poll_interval) {
                let result = body();
                drop(guard);
                return result;
            }
            tracing::trace!(file = %file, "waiting for file lock");
            cancel.check()?;
        }
    }

    /// Run `body` while holding every listed file's lock, acquired in
    /// `FileId` order regardless of input order.
    pub fn with_file_locks<R>(
        &self,
        files: &[FileId],
        cancel: &CancellationToken,
        body: impl FnOnce() -> ResolveResult<R>,
    ) -> ResolveResult<R> {
        let mut sorted: Vec<FileId> = files.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut body = Some(body);
        let mut call = move || (body.take().expect("lock body invoked twice"))();
        self.lock_in_order(&sorted, cancel, &mut call)
    }

    fn lock_in_order<R>(
        &self,
        files: &[FileId],
        cancel: &CancellationToken,
        body: &mut dyn FnMut() -> ResolveResult<R>,
    ) -> ResolveResult<R> {
        match files.split_first() {
            None => body(),
            Some((&first, rest)) => {
                self.with_file_lock(first, cancel, || self.lock_in_order(rest, cancel, body))
            }
        }
    }

    fn mutex_for(&self, file: FileId) -> Arc<ReentrantMutex<()>> {
        if let Some(mutex) = self.locks.read().get(&file) {
            return Arc::clone(mutex);
        }
        let mut locks = self.locks.write();
        Arc::clone(
            locks
                .entry(file)
                .or_insert_with(|| Arc::new(ReentrantMutex::new(()))),
        )
    }
}
