//! The admission pipeline: partition, scan, intern, materialize,
//! repair, commit.

use crate::{
    component::{partition, Partition},
    error::CanonError,
    handlers::{Handlers, Shape},
    value::{Obj, Value, WeakObj},
};
use hash_hasher::{HashedMap, HashedSet};
use weak_trie::{Gc, Key, Liveness, Prim, WeakTrie};

/// A deep-structural canonicalizer.
///
/// [`Canon::admit`] turns an object graph, cycles and shared
/// substructure included, into a frozen canonical representative:
/// deeply equal inputs collapse to the same reference. Callers must not
/// reuse input objects after admission.
///
/// ```
/// use canon::{Canon, Obj, Value};
///
/// let mut canon = Canon::new();
///
/// let a = canon.admit(&Value::Obj(Obj::map(vec![("n", Value::Int(1))]))).unwrap();
/// let b = canon.admit(&Value::Obj(Obj::map(vec![("n", Value::Int(1))]))).unwrap();
/// assert!(a.same(&b), "deeply equal inputs share one canonical form");
/// ```
pub struct Canon {
    handlers: Handlers,
    /// Traces to canonical representatives, held weakly on both sides.
    pool: WeakTrie<Option<WeakObj>>,
    /// The admitted set: frozen, never mutated again.
    known: HashedMap<usize, WeakObj>,
    partitioning: bool,
}

impl Default for Canon {
    fn default() -> Self {
        Canon::new()
    }
}

impl Canon {
    /// A canon with the built-in handlers and an empty known set.
    pub fn new() -> Self {
        Canon {
            handlers: Handlers::default(),
            pool: WeakTrie::new(true, |_: &[Key]| None),
            known: HashedMap::default(),
            partitioning: false,
        }
    }

    /// The handler registry, for enabling user classes.
    pub fn handlers_mut(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    /// Whether `value` passes through [`Canon::admit`] as itself:
    /// primitives always, objects once admitted.
    pub fn is_canonical(&self, value: &Value) -> bool {
        match value {
            Value::Obj(obj) => self.known_contains(obj),
            _ => true,
        }
    }

    fn known_contains(&self, obj: &Obj) -> bool {
        self.known.get(&obj.addr()).and_then(WeakObj::upgrade).map_or(false, |kept| kept.same(obj))
    }

    /// Admits `value`, returning its canonical representative.
    ///
    /// Primitives, already-canonical objects, and objects of unhandled
    /// tags pass through unchanged. Everything else is deconstructed,
    /// pooled by trace, and returned as a frozen member of the known
    /// set. A failing handler hook aborts the admission with nothing
    /// committed.
    pub fn admit(&mut self, value: &Value) -> Result<Value, CanonError> {
        let root = match value {
            Value::Obj(obj) => obj,
            _ => return Ok(value.clone()),
        };
        if self.known_contains(root) {
            return Ok(value.clone());
        }
        if !self.handlers.is_handled(root.tag()) {
            return Ok(value.clone());
        }
        if self.partitioning {
            return Err(CanonError::AlreadyPartitioning);
        }

        self.partitioning = true;
        let admitted = self.admit_root(root);
        self.partitioning = false;
        admitted
    }

    fn admit_root(&mut self, root: &Obj) -> Result<Value, CanonError> {
        let mut parts = partition(root, &mut self.handlers, &self.known)?;
        tracing::debug!(components = parts.components.len(), "partitioned input");

        let mut fresh: Vec<Obj> = Vec::new();
        let mut repairs: Vec<usize> = Vec::new();

        for index in 0..parts.components.len() {
            let members = parts.components[index].members.clone();
            for &addr in &members {
                if parts.info(addr).known.is_some() {
                    continue;
                }
                let trace = scan(&parts, index, addr);
                let interned = self.pool.lookup_slice(&trace);
                if let Some(existing) = interned.as_ref().and_then(WeakObj::upgrade) {
                    tracing::trace!(?existing, "pool hit");
                    parts.info_mut(addr).known = Some(existing);
                    continue;
                }

                let obj = parts.info(addr).obj.clone();
                match self.handlers.shape(obj.tag()).ok_or(CanonError::UnresolvedKnown)? {
                    Shape::ThreeStep => {
                        // allocate eagerly so cyclic back-references
                        // inside the component have an identity
                        let shell = self.handlers.allocate(&obj)?;
                        *interned = Some(shell.weak());
                        parts.info_mut(addr).known = Some(shell.clone());
                        fresh.push(shell);
                        repairs.push(addr);
                    }
                    Shape::TwoStep => {
                        let cyclic = members.len() > 1
                            || parts.info(addr).children.iter().any(|child| match child {
                                Value::Obj(child) => parts.in_component(child.addr(), index),
                                _ => false,
                            });
                        if cyclic {
                            return Err(CanonError::CyclicTwoStep(obj.tag()));
                        }
                        let children = canonical_children(&parts, addr)?;
                        let rebuilt = self.handlers.reconstruct(obj.tag(), &children)?;
                        *interned = Some(rebuilt.weak());
                        parts.info_mut(addr).known = Some(rebuilt.clone());
                        fresh.push(rebuilt);
                    }
                }
            }
        }

        // repair once every member has a canonical identity
        let mut repaired: HashedSet<usize> = HashedSet::default();
        for addr in repairs {
            let known = parts.info(addr).known.clone().ok_or(CanonError::UnresolvedKnown)?;
            if !repaired.insert(known.addr()) {
                // several inputs mapped to one canonical reference
                continue;
            }
            let children = canonical_children(&parts, addr)?;
            self.handlers.repair(known.tag(), &known, &children)?;
        }

        // the single commit point: freeze and admit only after every
        // repair succeeded
        for obj in &fresh {
            obj.freeze();
            self.known.insert(obj.addr(), obj.weak());
        }

        let admitted = parts.info(root.addr()).known.clone().ok_or(CanonError::UnresolvedKnown)?;
        tracing::debug!(fresh = fresh.len(), admitted = ?admitted, "admission committed");
        Ok(Value::Obj(admitted))
    }
}

impl Gc for Canon {
    fn gc(&mut self) -> Liveness {
        self.known.retain(|_, weak| weak.upgrade().is_some());
        self.pool.gc();
        Liveness::Live
    }
}

impl std::fmt::Debug for Canon {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Canon").field("known", &self.known.len()).finish()
    }
}

/// Builds the canonical trace of one component starting from `start`.
///
/// The trace is flat: a class token per member, primitives and
/// out-of-component canonical children by value or identity, and
/// in-component children as back-references to the position where they
/// were first seen. The back-reference is its own key variant, so it
/// can never collide with an ordinary child value.
fn scan(parts: &Partition, component: usize, start: usize) -> Vec<Key> {
    let mut trace = Vec::new();
    let mut seen: HashedMap<usize, usize> = HashedMap::default();
    scan_member(parts, component, start, &mut trace, &mut seen);
    trace
}

fn scan_member(
    parts: &Partition,
    component: usize,
    addr: usize,
    trace: &mut Vec<Key>,
    seen: &mut HashedMap<usize, usize>,
) {
    if let Some(&first) = seen.get(&addr) {
        trace.push(Key::Prim(Prim::Index(first)));
        return;
    }
    seen.insert(addr, trace.len());

    let info = parts.info(addr);
    trace.push(Key::Prim(Prim::Token(info.obj.tag().token())));
    for child in &info.children {
        match child {
            Value::Obj(child) if parts.in_component(child.addr(), component) => {
                scan_member(parts, component, child.addr(), trace, seen);
            }
            Value::Obj(child) => match parts.try_info(child.addr()) {
                Some(mapped) => {
                    let known =
                        mapped.known.as_ref().expect("child components resolve before their parents");
                    trace.push(known.key());
                }
                // opaque or previously canonical: identity carries it
                None => trace.push(child.key()),
            },
            primitive => trace.push(primitive.to_key()),
        }
    }
}

/// Maps an input's cached children onto their canonical counterparts.
fn canonical_children(parts: &Partition, addr: usize) -> Result<Vec<Value>, CanonError> {
    parts
        .info(addr)
        .children
        .iter()
        .map(|child| match child {
            Value::Obj(obj) => match parts.try_info(obj.addr()) {
                Some(mapped) => {
                    mapped.known.clone().map(Value::Obj).ok_or(CanonError::UnresolvedKnown)
                }
                None => Ok(child.clone()),
            },
            primitive => Ok(primitive.clone()),
        })
        .collect()
}
