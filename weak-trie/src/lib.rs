#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! Path-addressed storage keyed by sequences of values.
//!
//! A [`WeakTrie`] maps *paths*, sequences of [`Key`]s, to lazily
//! created payloads. Keys are either reference-like (opaque identity,
//! held weakly so the referent can be reclaimed once otherwise
//! unreachable) or primitive-like (compared by value, held strongly).
//! Unshared suffixes are flattened into tails and promoted to real
//! nodes only when a divergent path crosses them.
//!
//! ```
//! use std::rc::Rc;
//! use weak_trie::{Key, Prim, WeakTrie};
//!
//! let mut counts = WeakTrie::new(true, |_: &[Key]| 0u32);
//! let user = Rc::new("user");
//!
//! *counts.lookup_slice(&[Key::obj(user.clone()), Key::Prim(Prim::str("visits"))]) += 1;
//! *counts.lookup_slice(&[Key::obj(user.clone()), Key::Prim(Prim::str("visits"))]) += 1;
//!
//! assert_eq!(
//!     *counts.lookup_slice(&[Key::obj(user), Key::Prim(Prim::str("visits"))]),
//!     2,
//! );
//! ```
//!
//! The companion [`TupleInterner`] uses a trie to build [`Tuple`]s:
//! immutable sequences which are pointer-identical exactly when their
//! elements are element-wise identical.
//!
//! # Reclamation
//!
//! There are no finalization callbacks to purge entries the instant a
//! weak key dies. Instead, every hit on an object edge is guarded by an
//! upgrade-and-compare (so address reuse can never alias a dead key),
//! and [`Gc::gc`] sweeps dead edges together with the entire subtrie
//! below them. Containers built on tries forward their sweep the same
//! way a layered cache forwards its garbage collection.

mod key;
mod trie;
mod tuple;

pub use key::{Key, ObjKey, Prim};
pub use trie::WeakTrie;
pub use tuple::{Tuple, TupleInterner};

/// A container which may hold weakly-keyed entries of varying liveness.
pub trait Gc {
    /// Removes entries whose weak keys have died, returning the
    /// container's own status afterwards so owners can prune it.
    fn gc(&mut self) -> Liveness;
}

/// Describes whether a container or entry survives a sweep.
#[derive(Debug, Eq, PartialEq)]
pub enum Liveness {
    /// The value is still reachable and must be retained.
    Live,
    /// The value can never be matched again and should be dropped.
    Dead,
}
