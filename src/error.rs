use crate::value::Tag;
use thiserror::Error;

/// Failures surfaced by canonicalization.
///
/// The invariant-violation variants (`RootAlreadyCanonical`,
/// `AlreadyPartitioning`, `UnresolvedKnown`) indicate a bug rather than
/// bad input: admission either completes or commits nothing.
#[derive(Debug, Error)]
pub enum CanonError {
    /// `enable` was called for a tag that has already been consulted,
    /// which would make earlier admissions inconsistent.
    #[error("handlers were already consulted for {0:?}")]
    HandlerAfterUse(Tag),

    /// Partitioning was asked to start from a value already in the
    /// known set.
    #[error("root is already canonical")]
    RootAlreadyCanonical,

    /// A handler hook re-entered the canon mid-admission.
    #[error("already partitioning")]
    AlreadyPartitioning,

    /// An input finished admission without a canonical representative.
    #[error("could not resolve known value")]
    UnresolvedKnown,

    /// A two-step handler's instance sits inside a cyclic component;
    /// only allocate-then-repair handlers can participate in cycles.
    #[error("{0:?} participates in a cycle but its handler cannot allocate ahead of repair")]
    CyclicTwoStep(Tag),

    /// A user deconstruct/reconstruct/repair hook failed.
    #[error("handler hook failed: {message}")]
    Hook {
        /// What the hook reported.
        message: String,
    },
}

impl CanonError {
    /// Wraps a hook failure message.
    pub fn hook(message: impl Into<String>) -> Self {
        CanonError::Hook { message: message.into() }
    }
}
