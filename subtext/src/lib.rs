#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! Immutable, DAG-shaped contextual values with scoped activation.
//!
//! A [`Subtext`] is a typed slot: a default value plus optional merge
//! and guard semantics. A [`Supertext`] is an immutable node holding a
//! frozen list of parent supertexts and local slot bindings. Reading a
//! slot on a supertext always yields the same value, so reads are
//! cached.
//!
//! ```
//! use subtext::{Subtext, Supertext};
//!
//! let user = Subtext::new(String::from("nobody"));
//!
//! let cx = Supertext::empty().branch().with(&user, String::from("alice")).done();
//! cx.run(|| {
//!     assert_eq!(*user.read(), "alice");
//! });
//! assert_eq!(*user.read(), "nobody", "activation ended with the scope");
//! ```
//!
//! # Merging
//!
//! [`Supertext::merge`] combines several parents into one node,
//! deduplicating them rightmost-wins and interning the result so the
//! same parent sequence always yields the same node. When more than one
//! parent provides a slot, a read gathers the non-missing values,
//! deduplicates them rightmost-wins, and folds them through the slot's
//! merge function (rightmost value wins by default).
//!
//! ```
//! use subtext::{Subtext, Supertext};
//!
//! let tags = Subtext::builder(String::new())
//!     .merge(|older: &String, newer: &String| format!("{}.{}", older, newer))
//!     .finish();
//!
//! let left = Supertext::empty().branch().with(&tags, String::from("qwer")).done();
//! let right = Supertext::empty().branch().with(&tags, String::from("zxcv")).done();
//!
//! let both = Supertext::merge(&[left, right]);
//! assert_eq!(*both.read(&tags), "qwer.zxcv");
//! ```
//!
//! # The ambient slot
//!
//! The current supertext lives on an explicit cooperative stack in a
//! thread-local. [`Supertext::run`] pushes a node for the duration of a
//! closure (restoring on every exit, panics included), and
//! [`Supertext::bind`] wraps a callback so that invoking it later runs
//! under the merge of the captured and the then-current supertexts.
//! A cooperative scheduler integrates by moving [`Snapshot`]s across
//! its scheduling boundaries; a host async-context primitive could back
//! the same two operations instead.

mod slot;

pub use slot::{Subtext, SubtextBuilder};

use std::{
    any::Any,
    cell::RefCell,
    fmt::{Debug, Formatter, Result as FmtResult},
    hash::{Hash, Hasher},
    mem::replace,
    rc::{Rc, Weak},
};
use weak_trie::{Gc, Key, WeakTrie};

thread_local! {
    static EMPTY: Supertext = Supertext {
        inner: Rc::new(SuperInner {
            parents: Vec::new().into_boxed_slice(),
            slots: Vec::new(),
            cache: RefCell::new(Vec::new()),
        }),
    };

    /// The cooperative stack backing `Supertext::current`.
    static STACK: RefCell<Vec<Supertext>> = RefCell::new(Vec::new());

    /// Interns merge nodes by their deduplicated parent sequence.
    static MERGE_TRIE: RefCell<WeakTrie<Option<Weak<SuperInner>>>> =
        RefCell::new(WeakTrie::new(true, |_: &[Key]| None));
}

/// An immutable contextual node: a frozen list of parent supertexts
/// plus local slot bindings.
///
/// Supertexts compare and hash by node identity. Reads are
/// referentially transparent; see the crate docs.
#[derive(Clone)]
pub struct Supertext {
    inner: Rc<SuperInner>,
}

struct SuperInner {
    parents: Box<[Supertext]>,
    slots: Vec<(u32, Rc<dyn Any>)>,
    /// Cached reads, including the missing outcome (`None`).
    cache: RefCell<Vec<(u32, Option<Rc<dyn Any>>)>>,
}

impl Supertext {
    /// The root supertext: no parents, no bindings.
    pub fn empty() -> Self {
        EMPTY.with(Clone::clone)
    }

    /// The supertext active for the running code.
    pub fn current() -> Self {
        STACK.with(|stack| stack.borrow().last().cloned()).unwrap_or_else(Supertext::empty)
    }

    /// Starts a child of this node. The child has a single-parent list
    /// `[self]` and is never interned.
    pub fn branch(&self) -> Branch {
        Branch { parent: self.clone(), slots: Vec::new() }
    }

    /// Combines `parents` into one node, deduplicating rightmost-wins
    /// and interning the result: the same deduplicated parent sequence
    /// always yields the same node.
    ///
    /// Merging nothing yields the empty supertext; merging a single
    /// (deduplicated) parent yields that parent.
    pub fn merge(parents: &[Supertext]) -> Self {
        let mut deduped: Vec<Supertext> = Vec::new();
        for parent in parents.iter().rev() {
            if !deduped.iter().any(|seen| seen == parent) {
                deduped.push(parent.clone());
            }
        }
        deduped.reverse();

        match deduped.len() {
            0 => return Supertext::empty(),
            1 => return deduped.pop().expect("deduped has exactly one entry"),
            _ => {}
        }

        let path: Vec<Key> = deduped
            .iter()
            .map(|parent| {
                let erased: Rc<dyn Any> = parent.inner.clone();
                Key::from_any(erased)
            })
            .collect();
        MERGE_TRIE.with(|trie| {
            let mut trie = trie.borrow_mut();
            let interned = trie.lookup_slice(&path);
            if let Some(inner) = interned.as_ref().and_then(Weak::upgrade) {
                return Supertext { inner };
            }
            tracing::trace!(parents = deduped.len(), "interning merge node");
            let inner = Rc::new(SuperInner {
                parents: deduped.into_boxed_slice(),
                slots: Vec::new(),
                cache: RefCell::new(Vec::new()),
            });
            *interned = Some(Rc::downgrade(&inner));
            Supertext { inner }
        })
    }

    /// Reads `subtext` on this node, falling back to the slot default
    /// when no ancestor binds it.
    pub fn read<T: 'static>(&self, subtext: &Subtext<T>) -> Rc<T> {
        match self.lookup(subtext) {
            Some(value) => match value.downcast() {
                Ok(typed) => typed,
                Err(_) => panic!("slot stores its own value type"),
            },
            None => subtext.default_value(),
        }
    }

    /// Computes (and caches) the bound value for a slot, `None` when
    /// missing everywhere.
    fn lookup<T: 'static>(&self, subtext: &Subtext<T>) -> Option<Rc<dyn Any>> {
        {
            let cache = self.inner.cache.borrow();
            if let Some((_, cached)) = cache.iter().find(|(id, _)| *id == subtext.id()) {
                return cached.clone();
            }
        }

        let computed = match self.inner.slots.iter().find(|(id, _)| *id == subtext.id()) {
            Some((_, local)) => Some(local.clone()),
            None => {
                let mut gathered: Vec<Rc<dyn Any>> = Vec::new();
                for parent in self.inner.parents.iter() {
                    if let Some(value) = parent.lookup(subtext) {
                        gathered.push(value);
                    }
                }
                // deduplicate by value identity, rightmost occurrence wins
                let mut deduped: Vec<Rc<dyn Any>> = Vec::new();
                for value in gathered.into_iter().rev() {
                    if !deduped.iter().any(|seen| Rc::ptr_eq(seen, &value)) {
                        deduped.push(value);
                    }
                }
                deduped.reverse();

                let mut folded: Option<Rc<dyn Any>> = None;
                for value in deduped {
                    folded = Some(match folded {
                        None => value,
                        Some(older) => subtext.fold(older, value),
                    });
                }
                folded
            }
        };

        self.inner.cache.borrow_mut().push((subtext.id(), computed.clone()));
        computed
    }

    /// Calls `op` with this supertext current, restoring the previous
    /// one on every exit, panics included.
    pub fn run<R>(&self, op: impl FnOnce() -> R) -> R {
        let _pop_when_done_please = STACK.with(|stack| {
            stack.borrow_mut().push(self.clone());
            scopeguard::guard((), |()| {
                STACK.with(|stack| {
                    stack.borrow_mut().pop();
                });
            })
        });

        op()
    }

    /// Wraps `op` so each invocation runs under the merge of this
    /// supertext and the one current at the call.
    pub fn bind<R>(&self, op: impl Fn() -> R) -> impl Fn() -> R {
        let captured = self.clone();
        move || Supertext::merge(&[captured.clone(), Supertext::current()]).run(&op)
    }

    /// Wraps `op` so each invocation runs under this supertext alone,
    /// ignoring whatever is current at the call.
    pub fn bind_only<R>(&self, op: impl Fn() -> R) -> impl Fn() -> R {
        let captured = self.clone();
        move || captured.run(&op)
    }
}

impl PartialEq for Supertext {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Supertext {}

impl Hash for Supertext {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        (Rc::as_ptr(&self.inner) as usize).hash(hasher)
    }
}

impl Debug for Supertext {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Supertext")
            .field("parents", &self.inner.parents.len())
            .field("slots", &self.inner.slots.len())
            .finish()
    }
}

/// A pending child supertext; see [`Supertext::branch`].
#[must_use = "a branch does nothing until `done`"]
pub struct Branch {
    parent: Supertext,
    slots: Vec<(u32, Rc<dyn Any>)>,
}

impl Branch {
    /// Binds `value` (after guard normalization) for `subtext` in the
    /// child, replacing any binding made earlier on this branch.
    pub fn with<T: 'static>(mut self, subtext: &Subtext<T>, value: T) -> Self {
        let guarded: Rc<dyn Any> = Rc::new(subtext.apply_guard(value));
        match self.slots.iter_mut().find(|(id, _)| *id == subtext.id()) {
            Some((_, existing)) => *existing = guarded,
            None => self.slots.push((subtext.id(), guarded)),
        }
        self
    }

    /// Seals the child node.
    pub fn done(self) -> Supertext {
        Supertext {
            inner: Rc::new(SuperInner {
                parents: vec![self.parent].into_boxed_slice(),
                slots: self.slots,
                cache: RefCell::new(Vec::new()),
            }),
        }
    }
}

/// A point-in-time capture of the ambient stack, for carrying the
/// current supertext across cooperative scheduling boundaries.
///
/// ```
/// use subtext::{Snapshot, Subtext, Supertext};
///
/// let slot = Subtext::new(0u8);
/// let mut captured = None;
///
/// Supertext::empty().branch().with(&slot, 7).done().run(|| {
///     captured = Some(Snapshot::capture());
/// });
///
/// assert_eq!(*slot.read(), 0);
/// captured.unwrap().enter(|| {
///     assert_eq!(*slot.read(), 7, "the snapshot reinstated the context");
/// });
/// ```
#[derive(Clone)]
pub struct Snapshot {
    stack: Vec<Supertext>,
}

impl Snapshot {
    /// Captures the ambient stack as it is right now.
    pub fn capture() -> Self {
        Self { stack: STACK.with(|stack| stack.borrow().clone()) }
    }

    /// Calls `op` with the captured stack reinstated, restoring the
    /// interrupted one afterwards.
    pub fn enter<R>(&self, op: impl FnOnce() -> R) -> R {
        let _restore_when_done_please = STACK.with(|stack| {
            let interrupted = replace(&mut *stack.borrow_mut(), self.stack.clone());
            scopeguard::guard(interrupted, |interrupted| {
                STACK.with(|stack| {
                    *stack.borrow_mut() = interrupted;
                });
            })
        });

        op()
    }
}

impl Debug for Snapshot {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_list().entries(self.stack.iter()).finish()
    }
}

/// Sweeps this thread's merge interner, dropping entries for merge
/// nodes and parents which have been reclaimed.
pub fn sweep_merge_interner() {
    MERGE_TRIE.with(|trie| {
        trie.borrow_mut().gc();
    });
}
