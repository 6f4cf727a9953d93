//! Resolution targets.
//!
//! A request either names a single declaration or a *designation*: an
//! explicit path from a root container down to a nested declaration, used
//! when resolving a member requires positioning contextual state at each
//! enclosing level first. Targets are constructed per request and
//! discarded when it completes.

use crate::arena::DeclId;

/// What a resolution request asks to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTarget {
    /// One declaration.
    Single(DeclId),
    /// A nested declaration reached through its enclosing containers,
    /// outermost first. The path never includes the target itself.
    Designation { path: Vec<DeclId>, target: DeclId },
}

impl ResolveTarget {
    pub fn single(decl: DeclId) -> Self {
        ResolveTarget::Single(decl)
    }

    pub fn designation(path: Vec<DeclId>, target: DeclId) -> Self {
        debug_assert!(!path.contains(&target), "designation path contains its target");
        ResolveTarget::Designation { path, target }
    }

    /// The declaration the request wants resolved.
    pub fn target(&self) -> DeclId {
        match self {
            ResolveTarget::Single(decl) => *decl,
            ResolveTarget::Designation { target, .. } => *target,
        }
    }

    /// Enclosing containers to position first, outermost first.
    pub fn path(&self) -> &[DeclId] {
        match self {
            ResolveTarget::Single(_) => &[],
            ResolveTarget::Designation { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_accessors() {
        let single = ResolveTarget::single(DeclId::from_raw(3));
        assert_eq!(single.target(), DeclId::from_raw(3));
        assert!(single.path().is_empty());

        let nested = ResolveTarget::designation(
            vec![DeclId::from_raw(0), DeclId::from_raw(1)],
            DeclId::from_raw(2),
        );
        assert_eq!(nested.target(), DeclId::from_raw(2));
        assert_eq!(nested.path().len(), 2);
    }
}
