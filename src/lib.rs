#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! Deep-structural canonicalization of object graphs.
//!
//! A [`Canon`] admits arbitrary object graphs, cycles and shared
//! substructure included, and returns frozen canonical
//! representatives: any two deeply equal inputs collapse to the same
//! reference, so equality checks downstream become pointer
//! comparisons.
//!
//! ```
//! use canon::{Canon, Obj, Value};
//!
//! let mut canon = Canon::new();
//!
//! // two rings built separately...
//! let ring = || {
//!     let node = Obj::map(vec![("value", Value::Int(1)), ("tail", Value::Null)]);
//!     node.set_entry("tail", Value::Obj(node.clone()));
//!     Value::Obj(node)
//! };
//!
//! // ...admit to the same frozen representative
//! let a = canon.admit(&ring()).unwrap();
//! let b = canon.admit(&ring()).unwrap();
//! assert!(a.same(&b));
//! ```
//!
//! # How admission works
//!
//! The input graph is partitioned into strongly connected components,
//! leaves first. Each component member is linearized into a *trace*
//! (class tokens, canonical children, numeric back-references for
//! in-component edges) and the trace is interned through a weak trie:
//! a hit reuses the existing representative, a miss materializes a
//! fresh one. Cycle-capable classes allocate an empty shell eagerly
//! and are repaired once every child is canonical; immutable classes
//! reconstruct directly. Nothing is frozen or remembered until every
//! repair has succeeded.
//!
//! # Classes
//!
//! Class identity is an interned [`Tag`]. Sequences, plain mappings,
//! and dates are handled out of the box; other classes are opaque
//! (admitted unchanged, compared by identity) until a [`Handler`] is
//! enabled for their tag. Enabling is refused once a tag has been
//! consulted, because a late handler would contradict earlier
//! admissions.

mod canon;
mod component;
mod error;
pub mod equality;
mod handlers;
mod value;

pub use crate::{
    canon::Canon,
    equality::{equal, Checker},
    error::CanonError,
    handlers::{extras, Handler, Handlers},
    value::{Body, Obj, OpaqueBody, Tag, Value},
};
pub use weak_trie::{Gc, Liveness};
