//! The per-tag registry of structural hooks.
//!
//! A handler teaches the canon how to take instances of one class
//! apart and put canonical ones back together. Immutable-on-
//! construction classes use the two-step shape (deconstruct +
//! reconstruct); classes that may participate in cycles must use the
//! three-step shape (deconstruct + allocate + repair) so a cyclic
//! back-reference has an identity to point at before its children
//! exist.
//!
//! Enabling a handler is a one-way door: once a tag has been consulted
//! during any admission, [`Handlers::enable`] refuses it, because a
//! late handler would make earlier admissions inconsistent.

use crate::{
    error::CanonError,
    value::{Body, Obj, Tag, Value},
};
use hashbrown::{HashMap, HashSet};
use std::rc::Rc;
use weak_trie::{Key, Prim, WeakTrie};

type Deconstruct = Box<dyn Fn(&Obj, &mut SortedKeysCache) -> Vec<Value>>;
type Reconstruct = Box<dyn Fn(&[Value]) -> Result<Obj, CanonError>>;
type Allocate = Box<dyn Fn(&Obj) -> Obj>;
type Repair = Box<dyn Fn(&Obj, &[Value]) -> Result<(), CanonError>>;

/// Which materialization path a handler takes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Shape {
    /// Deconstruct and reconstruct; never valid inside a cycle.
    TwoStep,
    /// Deconstruct, allocate an empty shell eagerly, repair later.
    ThreeStep,
}

/// The hooks registered for one tag. Built with [`Handler::two_step`]
/// or [`Handler::three_step`].
pub struct Handler {
    kind: HandlerKind,
}

enum HandlerKind {
    TwoStep { deconstruct: Deconstruct, reconstruct: Reconstruct },
    ThreeStep { deconstruct: Deconstruct, allocate: Allocate, repair: Repair },
}

impl Handler {
    /// Hooks for a class whose instances are immutable on construction
    /// and therefore cannot sit inside a cycle.
    pub fn two_step(
        deconstruct: impl Fn(&Obj) -> Vec<Value> + 'static,
        reconstruct: impl Fn(&[Value]) -> Result<Obj, CanonError> + 'static,
    ) -> Handler {
        Handler {
            kind: HandlerKind::TwoStep {
                deconstruct: Box::new(move |obj, _| deconstruct(obj)),
                reconstruct: Box::new(reconstruct),
            },
        }
    }

    /// Hooks for a class whose instances may participate in cycles:
    /// `allocate` produces an empty shell eagerly and `repair` fills it
    /// once every child is canonical.
    pub fn three_step(
        deconstruct: impl Fn(&Obj) -> Vec<Value> + 'static,
        allocate: impl Fn(&Obj) -> Obj + 'static,
        repair: impl Fn(&Obj, &[Value]) -> Result<(), CanonError> + 'static,
    ) -> Handler {
        Handler {
            kind: HandlerKind::ThreeStep {
                deconstruct: Box::new(move |obj, _| deconstruct(obj)),
                allocate: Box::new(allocate),
                repair: Box::new(repair),
            },
        }
    }

    fn raw_three_step(deconstruct: Deconstruct, allocate: Allocate, repair: Repair) -> Handler {
        Handler { kind: HandlerKind::ThreeStep { deconstruct, allocate, repair } }
    }
}

/// The registry consulted during every admission. Constructed with the
/// built-in sequence, plain-mapping, and date handlers installed.
pub struct Handlers {
    entries: HashMap<Tag, Handler>,
    consulted: HashSet<Tag>,
    sorted_keys: SortedKeysCache,
}

impl Default for Handlers {
    fn default() -> Self {
        let mut handlers =
            Handlers { entries: HashMap::new(), consulted: HashSet::new(), sorted_keys: SortedKeysCache::new() };

        handlers.entries.insert(
            Tag::SEQ,
            Handler::three_step(
                |obj| match &*obj.body() {
                    Body::Seq(items) => items.clone(),
                    _ => Vec::new(),
                },
                |_| Obj::seq(Vec::new()),
                |known, children| {
                    *known.body_mut() = Body::Seq(children.to_vec());
                    Ok(())
                },
            ),
        );

        handlers.entries.insert(
            Tag::MAP,
            Handler::raw_three_step(
                Box::new(deconstruct_mapping),
                Box::new(|_| Obj::map(Vec::<(Rc<str>, Value)>::new())),
                Box::new(|known, children| {
                    let pairs = children.len() / 2;
                    let mut entries = Vec::with_capacity(pairs);
                    for index in 0..pairs {
                        let key = match &children[index] {
                            Value::Str(key) => key.clone(),
                            other => {
                                return Err(CanonError::hook(format!(
                                    "mapping key must be a string, got {:?}",
                                    other
                                )))
                            }
                        };
                        entries.push((key, children[pairs + index].clone()));
                    }
                    *known.body_mut() = Body::Map(entries);
                    Ok(())
                }),
            ),
        );

        handlers.entries.insert(
            Tag::DATE,
            Handler::two_step(
                |obj| match &*obj.body() {
                    Body::Date(millis) => vec![Value::Int(*millis)],
                    _ => Vec::new(),
                },
                |children| match children {
                    [Value::Int(millis)] => Ok(Obj::date(*millis)),
                    _ => Err(CanonError::hook("date reconstruction expects one integer")),
                },
            ),
        );

        handlers
    }
}

impl Handlers {
    /// Registers `handler` for `tag`.
    ///
    /// Fails with [`CanonError::HandlerAfterUse`] once the tag has ever
    /// been consulted, whether or not a handler was registered then.
    pub fn enable(&mut self, tag: Tag, handler: Handler) -> Result<(), CanonError> {
        if self.consulted.contains(&tag) {
            return Err(CanonError::HandlerAfterUse(tag));
        }
        self.entries.insert(tag, handler);
        Ok(())
    }

    /// Whether instances of `tag` are handled at all; consults (and
    /// therefore permanently freezes) the tag.
    pub(crate) fn is_handled(&mut self, tag: Tag) -> bool {
        self.consulted.insert(tag);
        self.entries.contains_key(&tag)
    }

    pub(crate) fn shape(&mut self, tag: Tag) -> Option<Shape> {
        self.consulted.insert(tag);
        self.entries.get(&tag).map(|handler| match &handler.kind {
            HandlerKind::TwoStep { .. } => Shape::TwoStep,
            HandlerKind::ThreeStep { .. } => Shape::ThreeStep,
        })
    }

    pub(crate) fn deconstruct(&mut self, obj: &Obj) -> Option<Vec<Value>> {
        self.consulted.insert(obj.tag());
        let handler = self.entries.get(&obj.tag())?;
        let deconstruct = match &handler.kind {
            HandlerKind::TwoStep { deconstruct, .. } => deconstruct,
            HandlerKind::ThreeStep { deconstruct, .. } => deconstruct,
        };
        Some(deconstruct(obj, &mut self.sorted_keys))
    }

    pub(crate) fn reconstruct(&self, tag: Tag, children: &[Value]) -> Result<Obj, CanonError> {
        match self.entries.get(&tag).map(|handler| &handler.kind) {
            Some(HandlerKind::TwoStep { reconstruct, .. }) => reconstruct(children),
            _ => Err(CanonError::UnresolvedKnown),
        }
    }

    pub(crate) fn allocate(&self, obj: &Obj) -> Result<Obj, CanonError> {
        match self.entries.get(&obj.tag()).map(|handler| &handler.kind) {
            Some(HandlerKind::ThreeStep { allocate, .. }) => Ok(allocate(obj)),
            _ => Err(CanonError::UnresolvedKnown),
        }
    }

    pub(crate) fn repair(
        &self,
        tag: Tag,
        known: &Obj,
        children: &[Value],
    ) -> Result<(), CanonError> {
        match self.entries.get(&tag).map(|handler| &handler.kind) {
            Some(HandlerKind::ThreeStep { repair, .. }) => repair(known, children),
            _ => Err(CanonError::UnresolvedKnown),
        }
    }
}

/// Children of a plain mapping: the sorted defined keys followed by
/// their values in the same order. Keys bound to undefined are treated
/// as absent, matching deep equality.
fn deconstruct_mapping(obj: &Obj, sorted_keys: &mut SortedKeysCache) -> Vec<Value> {
    let body = obj.body();
    let entries = match &*body {
        Body::Map(entries) => entries,
        _ => return Vec::new(),
    };

    let keys: Vec<Rc<str>> = entries
        .iter()
        .filter(|(_, value)| !matches!(value, Value::Missing | Value::Undefined))
        .map(|(key, _)| key.clone())
        .collect();
    let sorted = sorted_keys.sort(&keys);

    let mut children: Vec<Value> = Vec::with_capacity(sorted.len() * 2);
    children.extend(sorted.iter().map(|key| Value::Str(key.clone())));
    for key in sorted.iter() {
        let value = entries
            .iter()
            .find(|(theirs, _)| theirs == key)
            .map(|(_, value)| value.clone())
            .expect("sorted keys came from these entries");
        children.push(value);
    }
    children
}

/// Interns the result of sorting key lists, so repeated sorts of the
/// same list reuse one shared array.
pub(crate) struct SortedKeysCache {
    trie: WeakTrie<Option<Rc<[Rc<str>]>>>,
}

impl SortedKeysCache {
    fn new() -> Self {
        // string keys are primitive-like; nothing to hold weakly
        Self { trie: WeakTrie::new(false, |_: &[Key]| None) }
    }

    pub(crate) fn sort(&mut self, keys: &[Rc<str>]) -> Rc<[Rc<str>]> {
        let path: Vec<Key> = keys.iter().map(|key| Key::Prim(Prim::Str(key.clone()))).collect();
        let interned = self.trie.lookup_slice(&path);
        if let Some(sorted) = interned.as_ref() {
            return sorted.clone();
        }
        let mut sorted: Vec<Rc<str>> = keys.to_vec();
        sorted.sort();
        let sorted: Rc<[Rc<str>]> = sorted.into();
        *interned = Some(sorted.clone());
        sorted
    }
}

/// Ready-made handlers for the built-in bodies that are opaque by
/// default.
///
/// All of these are immutable on construction, so they take the
/// two-step path and their instances may not participate in cycles.
/// No handlers are offered for sets, ordered maps, or functions:
/// membership-based equality has no canonical linearization without an
/// ordering over arbitrary members, and censored functions must keep
/// comparing by identity. Those classes stay opaque unless the caller
/// supplies semantics of their own.
pub mod extras {
    use super::{Handler, Handlers};
    use crate::{
        error::CanonError,
        value::{Body, Obj, Value},
    };

    /// Collapses byte buffers by content.
    pub fn bytes() -> Handler {
        Handler::two_step(
            |obj| match &*obj.body() {
                Body::Bytes(data) => data.iter().map(|byte| Value::Int(i64::from(*byte))).collect(),
                _ => Vec::new(),
            },
            |children| {
                let mut data = Vec::with_capacity(children.len());
                for child in children {
                    match child {
                        Value::Int(byte) if (0..=255).contains(byte) => data.push(*byte as u8),
                        other => {
                            return Err(CanonError::hook(format!(
                                "buffer child must be a byte, got {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Obj::bytes(data))
            },
        )
    }

    /// Collapses error-like values by name and message.
    pub fn error() -> Handler {
        Handler::two_step(
            |obj| match &*obj.body() {
                Body::Error { name, message } => {
                    vec![Value::Str(name.clone()), Value::Str(message.clone())]
                }
                _ => Vec::new(),
            },
            |children| match children {
                [Value::Str(name), Value::Str(message)] => {
                    Ok(Obj::error(name.clone(), message.clone()))
                }
                _ => Err(CanonError::hook("error reconstruction expects a name and a message")),
            },
        )
    }

    /// Collapses regex-like values by their string form.
    pub fn regex() -> Handler {
        Handler::two_step(
            |obj| match &*obj.body() {
                Body::Regex { source, flags } => {
                    vec![Value::Str(source.clone()), Value::Str(flags.clone())]
                }
                _ => Vec::new(),
            },
            |children| match children {
                [Value::Str(source), Value::Str(flags)] => {
                    Ok(Obj::regex(source.clone(), flags.clone()))
                }
                _ => Err(CanonError::hook("regex reconstruction expects a source and flags")),
            },
        )
    }

    /// Collapses boxed numbers by value; every NaN box is one box.
    pub fn num_box() -> Handler {
        Handler::two_step(
            |obj| match &*obj.body() {
                Body::NumBox(value) => vec![Value::Float(*value)],
                _ => Vec::new(),
            },
            |children| match children {
                [Value::Float(value)] => Ok(Obj::num_box(*value)),
                _ => Err(CanonError::hook("number reconstruction expects one float")),
            },
        )
    }

    /// Collapses boxed booleans by value.
    pub fn bool_box() -> Handler {
        Handler::two_step(
            |obj| match &*obj.body() {
                Body::BoolBox(value) => vec![Value::Bool(*value)],
                _ => Vec::new(),
            },
            |children| match children {
                [Value::Bool(value)] => Ok(Obj::bool_box(*value)),
                _ => Err(CanonError::hook("boolean reconstruction expects one boolean")),
            },
        )
    }

    /// Collapses boxed strings by value.
    pub fn str_box() -> Handler {
        Handler::two_step(
            |obj| match &*obj.body() {
                Body::StrBox(value) => vec![Value::Str(value.clone())],
                _ => Vec::new(),
            },
            |children| match children {
                [Value::Str(value)] => Ok(Obj::str_box(value.clone())),
                _ => Err(CanonError::hook("string reconstruction expects one string")),
            },
        )
    }

    /// Enables every extra handler on a registry none of whose tags
    /// have been consulted yet.
    pub fn enable_all(handlers: &mut Handlers) -> Result<(), CanonError> {
        use crate::value::Tag;

        handlers.enable(Tag::BYTES, bytes())?;
        handlers.enable(Tag::ERROR, error())?;
        handlers.enable(Tag::REGEX, regex())?;
        handlers.enable(Tag::NUM_BOX, num_box())?;
        handlers.enable(Tag::BOOL_BOX, bool_box())?;
        handlers.enable(Tag::STR_BOX, str_box())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_fails_after_consultation() {
        let mut handlers = Handlers::default();
        let ring = Tag::custom("ring");

        assert!(!handlers.is_handled(ring), "nothing registered yet");
        let denied = handlers.enable(
            ring,
            Handler::two_step(|_| Vec::new(), |_| Ok(Obj::date(0))),
        );
        assert!(matches!(denied, Err(CanonError::HandlerAfterUse(_))));
    }

    #[test]
    fn enable_succeeds_before_consultation() {
        let mut handlers = Handlers::default();
        let fresh = Tag::custom("fresh-handler-tag");
        handlers
            .enable(fresh, Handler::two_step(|_| Vec::new(), |_| Ok(Obj::date(0))))
            .expect("tag was never consulted");
        assert!(handlers.is_handled(fresh));
    }

    #[test]
    fn mapping_children_sort_and_skip_undefined() {
        let mut handlers = Handlers::default();
        let obj = Obj::map(vec![
            ("zeta", Value::Int(26)),
            ("alpha", Value::Int(1)),
            ("ghost", Value::Undefined),
        ]);

        let children = handlers.deconstruct(&obj).expect("mappings are built in");
        assert_eq!(children.len(), 4, "two defined keys, two values");
        assert!(children[0].same(&Value::str("alpha")));
        assert!(children[1].same(&Value::str("zeta")));
        assert!(children[2].same(&Value::Int(1)));
        assert!(children[3].same(&Value::Int(26)));
    }

    #[test]
    fn sorted_key_lists_are_shared() {
        let mut cache = SortedKeysCache::new();
        let keys: Vec<Rc<str>> = vec!["b".into(), "a".into()];

        let first = cache.sort(&keys);
        let second = cache.sort(&keys);
        assert!(Rc::ptr_eq(&first, &second), "repeated sorts reuse the interned array");
        assert_eq!(&*first[0], "a");
    }
}
