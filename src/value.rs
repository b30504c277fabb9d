//! The value universe canonicalization operates on.
//!
//! Rust has no runtime prototype identity, so class identity is an
//! explicit [`Tag`]: an interned discriminator carried by every
//! [`Obj`]. Built-in tags cover the structural kinds the equality
//! dispatch understands; user types carry custom tags and an
//! [`OpaqueBody`].

use downcast_rs::{impl_downcast, Downcast};
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::{
    any::Any,
    cell::{Cell, Ref, RefCell, RefMut},
    fmt::{Debug, Formatter, Result as FmtResult},
    rc::{Rc, Weak},
};
use weak_trie::{Key, Prim};

/// An interned class identity.
///
/// Tags are process-global: the same name always interns to the same
/// tag, so two canons agree about class identity.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag(u32);

const BUILTIN_TAG_NAMES: [&str; 12] = [
    "sequence",
    "mapping",
    "date",
    "bytes",
    "error",
    "number",
    "boolean",
    "string",
    "regex",
    "set",
    "ordered-map",
    "function",
];

struct TagRegistry {
    indices: HashMap<String, u32>,
    names: Vec<String>,
}

static CUSTOM_TAGS: Lazy<Mutex<TagRegistry>> =
    Lazy::new(|| Mutex::new(TagRegistry { indices: HashMap::new(), names: Vec::new() }));

impl Tag {
    /// Sequences of values, holes included.
    pub const SEQ: Tag = Tag(0);
    /// Plain string-keyed mappings.
    pub const MAP: Tag = Tag(1);
    /// Instants in milliseconds.
    pub const DATE: Tag = Tag(2);
    /// Byte buffers.
    pub const BYTES: Tag = Tag(3);
    /// Error-like values with a name and a message.
    pub const ERROR: Tag = Tag(4);
    /// Boxed numbers.
    pub const NUM_BOX: Tag = Tag(5);
    /// Boxed booleans.
    pub const BOOL_BOX: Tag = Tag(6);
    /// Boxed strings.
    pub const STR_BOX: Tag = Tag(7);
    /// Regex-like values compared by string form.
    pub const REGEX: Tag = Tag(8);
    /// Insertion-ordered sets.
    pub const SET: Tag = Tag(9);
    /// Insertion-ordered maps with arbitrary keys.
    pub const ORD_MAP: Tag = Tag(10);
    /// Function-like values compared by identity or source text.
    pub const FUNC: Tag = Tag(11);

    /// Interns a user-defined class identity by name. The same name
    /// always yields the same tag.
    pub fn custom(name: &str) -> Tag {
        let mut registry = CUSTOM_TAGS.lock();
        if let Some(&index) = registry.indices.get(name) {
            return Tag(index);
        }
        let index = BUILTIN_TAG_NAMES.len() as u32 + registry.names.len() as u32;
        registry.indices.insert(name.to_string(), index);
        registry.names.push(name.to_string());
        Tag(index)
    }

    /// The interned index, usable as a primitive trace token.
    pub fn token(self) -> u32 {
        self.0
    }

    fn name(self) -> String {
        let index = self.0 as usize;
        if index < BUILTIN_TAG_NAMES.len() {
            BUILTIN_TAG_NAMES[index].to_string()
        } else {
            let registry = CUSTOM_TAGS.lock();
            registry
                .names
                .get(index - BUILTIN_TAG_NAMES.len())
                .cloned()
                .unwrap_or_else(|| format!("tag-{}", index))
        }
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_fmt(format_args!("Tag({})", self.name()))
    }
}

/// Any value an object graph may contain: a primitive or a shared
/// reference to an [`Obj`].
///
/// [`Value::Missing`] is the absence sentinel (an array hole, an
/// absent mapping entry) and is distinct from a defined
/// [`Value::Undefined`].
#[derive(Clone, Debug)]
pub enum Value {
    /// The absence of an entry.
    Missing,
    /// A defined not-a-value.
    Undefined,
    /// An explicit null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// An immutable string.
    Str(Rc<str>),
    /// A reference to a tagged object.
    Obj(Obj),
}

impl Value {
    /// Builds a string value.
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// Whether this value passes through canonicalization unchanged.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Obj(_))
    }

    /// Identity comparison: reference equality for objects, value
    /// equality for primitives (NaN is self-identical).
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Missing, Value::Missing)
            | (Value::Undefined, Value::Undefined)
            | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a.same(b),
            _ => false,
        }
    }

    /// The trie key standing for this value on a trace.
    pub(crate) fn to_key(&self) -> Key {
        match self {
            Value::Missing => Key::Prim(Prim::Missing),
            Value::Undefined => Key::Prim(Prim::Undefined),
            Value::Null => Key::Prim(Prim::Null),
            Value::Bool(b) => Key::Prim(Prim::Bool(*b)),
            Value::Int(i) => Key::Prim(Prim::Int(*i)),
            Value::Float(f) => Key::Prim(Prim::float(*f)),
            Value::Str(s) => Key::Prim(Prim::Str(s.clone())),
            Value::Obj(o) => o.key(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<Obj> for Value {
    fn from(o: Obj) -> Self {
        Value::Obj(o)
    }
}

/// A shared, reference-identity handle to a tagged object.
///
/// Objects are mutable while being built; freezing makes every later
/// mutation panic. Canonical representatives are frozen before they
/// are handed out.
#[derive(Clone)]
pub struct Obj {
    cell: Rc<ObjCell>,
}

struct ObjCell {
    tag: Tag,
    body: RefCell<Body>,
    frozen: Cell<bool>,
}

impl Obj {
    /// An object with an explicit tag; the usual way to build instances
    /// of user-defined classes.
    pub fn new(tag: Tag, body: Body) -> Obj {
        Obj { cell: Rc::new(ObjCell { tag, body: RefCell::new(body), frozen: Cell::new(false) }) }
    }

    /// A sequence of `items`; holes are [`Value::Missing`] entries.
    pub fn seq(items: Vec<Value>) -> Obj {
        Obj::new(Tag::SEQ, Body::Seq(items))
    }

    /// A plain mapping with the given entries in insertion order.
    pub fn map<K: Into<Rc<str>>>(entries: Vec<(K, Value)>) -> Obj {
        let obj = Obj::new(Tag::MAP, Body::Map(Vec::new()));
        for (key, value) in entries {
            obj.set_entry(key, value);
        }
        obj
    }

    /// An instant, in milliseconds.
    pub fn date(millis: i64) -> Obj {
        Obj::new(Tag::DATE, Body::Date(millis))
    }

    /// A byte buffer.
    pub fn bytes(data: Vec<u8>) -> Obj {
        Obj::new(Tag::BYTES, Body::Bytes(data))
    }

    /// An error-like value.
    pub fn error(name: impl Into<Rc<str>>, message: impl Into<Rc<str>>) -> Obj {
        Obj::new(Tag::ERROR, Body::Error { name: name.into(), message: message.into() })
    }

    /// A boxed number.
    pub fn num_box(value: f64) -> Obj {
        Obj::new(Tag::NUM_BOX, Body::NumBox(value))
    }

    /// A boxed boolean.
    pub fn bool_box(value: bool) -> Obj {
        Obj::new(Tag::BOOL_BOX, Body::BoolBox(value))
    }

    /// A boxed string.
    pub fn str_box(value: impl Into<Rc<str>>) -> Obj {
        Obj::new(Tag::STR_BOX, Body::StrBox(value.into()))
    }

    /// A regex-like value compared by its string form.
    pub fn regex(source: impl Into<Rc<str>>, flags: impl Into<Rc<str>>) -> Obj {
        Obj::new(Tag::REGEX, Body::Regex { source: source.into(), flags: flags.into() })
    }

    /// An insertion-ordered set; members identical per [`Value::same`]
    /// are stored once.
    pub fn set(members: Vec<Value>) -> Obj {
        let mut unique: Vec<Value> = Vec::new();
        for member in members {
            if !unique.iter().any(|seen| seen.same(&member)) {
                unique.push(member);
            }
        }
        Obj::new(Tag::SET, Body::Set(unique))
    }

    /// An insertion-ordered map with arbitrary keys; a repeated key
    /// keeps its original position and takes the last value.
    pub fn ord_map(entries: Vec<(Value, Value)>) -> Obj {
        let mut unique: Vec<(Value, Value)> = Vec::new();
        for (key, value) in entries {
            match unique.iter_mut().find(|(seen, _)| seen.same(&key)) {
                Some((_, existing)) => *existing = value,
                None => unique.push((key, value)),
            }
        }
        Obj::new(Tag::ORD_MAP, Body::OrdMap(unique))
    }

    /// A function-like value; `None` marks source text as censored.
    pub fn func(source: Option<&str>) -> Obj {
        Obj::new(Tag::FUNC, Body::Func { source: source.map(Rc::from) })
    }

    /// A user-defined body under a custom tag.
    pub fn opaque(tag: Tag, body: Rc<dyn OpaqueBody>) -> Obj {
        Obj::new(tag, Body::Opaque(body))
    }

    /// The object's class identity.
    pub fn tag(&self) -> Tag {
        self.cell.tag
    }

    /// The allocation address backing reference identity.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as usize
    }

    /// Reference equality.
    pub fn same(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Whether the object has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.cell.frozen.get()
    }

    /// Borrows the body for reading.
    pub fn body(&self) -> Ref<'_, Body> {
        self.cell.body.borrow()
    }

    /// Borrows the body for mutation.
    ///
    /// # Panics
    ///
    /// Panics if the object is frozen: members of a canon's known set
    /// are structurally immutable.
    pub fn body_mut(&self) -> RefMut<'_, Body> {
        if self.cell.frozen.get() {
            panic!("mutation of a frozen {:?}", self.cell.tag);
        }
        self.cell.body.borrow_mut()
    }

    /// Reads a mapping entry, [`Value::Missing`] when absent.
    pub fn entry(&self, key: &str) -> Value {
        match &*self.body() {
            Body::Map(entries) => entries
                .iter()
                .find(|(k, _)| &**k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Missing),
            _ => Value::Missing,
        }
    }

    /// Writes a mapping entry, replacing in place when the key exists.
    pub fn set_entry(&self, key: impl Into<Rc<str>>, value: Value) {
        let key = key.into();
        match &mut *self.body_mut() {
            Body::Map(entries) => match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => *existing = value,
                None => entries.push((key, value)),
            },
            other => panic!("set_entry on a {:?} body", TagOf(other)),
        }
    }

    /// Reads a sequence element, [`Value::Missing`] when out of range.
    pub fn index(&self, index: usize) -> Value {
        match &*self.body() {
            Body::Seq(items) => items.get(index).cloned().unwrap_or(Value::Missing),
            _ => Value::Missing,
        }
    }

    /// Writes a sequence element, growing the sequence with holes as
    /// needed.
    pub fn seq_set(&self, index: usize, value: Value) {
        match &mut *self.body_mut() {
            Body::Seq(items) => {
                if items.len() <= index {
                    items.resize(index + 1, Value::Missing);
                }
                items[index] = value;
            }
            other => panic!("seq_set on a {:?} body", TagOf(other)),
        }
    }

    pub(crate) fn freeze(&self) {
        self.cell.frozen.set(true);
    }

    pub(crate) fn key(&self) -> Key {
        let erased: Rc<dyn Any> = self.cell.clone();
        Key::from_any(erased)
    }

    pub(crate) fn weak(&self) -> WeakObj {
        WeakObj { inner: Rc::downgrade(&self.cell) }
    }
}

impl Debug for Obj {
    // never recurse into the body: object graphs may be cyclic
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_fmt(format_args!("Obj({}@{:x})", self.cell.tag.name(), self.addr()))
    }
}

/// A non-owning object handle, verified by upgrade before use.
pub(crate) struct WeakObj {
    inner: Weak<ObjCell>,
}

impl WeakObj {
    pub(crate) fn upgrade(&self) -> Option<Obj> {
        self.inner.upgrade().map(|cell| Obj { cell })
    }
}

/// The runtime type-tag of an object: the concrete kind of data it
/// holds, driving structural equality and the built-in handlers.
#[derive(Debug)]
pub enum Body {
    /// Elements in order; holes are [`Value::Missing`].
    Seq(Vec<Value>),
    /// String-keyed entries in insertion order.
    Map(Vec<(Rc<str>, Value)>),
    /// Milliseconds.
    Date(i64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// An error-like name and message.
    Error {
        /// The error's class name.
        name: Rc<str>,
        /// The human-readable message.
        message: Rc<str>,
    },
    /// A boxed number.
    NumBox(f64),
    /// A boxed boolean.
    BoolBox(bool),
    /// A boxed string.
    StrBox(Rc<str>),
    /// A regex-like pattern and flags.
    Regex {
        /// The pattern source.
        source: Rc<str>,
        /// The flag characters.
        flags: Rc<str>,
    },
    /// Unique members in insertion order.
    Set(Vec<Value>),
    /// Key-value entries in insertion order.
    OrdMap(Vec<(Value, Value)>),
    /// A function-like value; `None` source is censored.
    Func {
        /// The stringified source, when visible.
        source: Option<Rc<str>>,
    },
    /// A user-defined body compared through its adapter.
    Opaque(Rc<dyn OpaqueBody>),
}

/// Shorthand for error messages about unexpected bodies.
struct TagOf<'a>(&'a Body);

impl Debug for TagOf<'_> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let name = match self.0 {
            Body::Seq(_) => "sequence",
            Body::Map(_) => "mapping",
            Body::Date(_) => "date",
            Body::Bytes(_) => "bytes",
            Body::Error { .. } => "error",
            Body::NumBox(_) => "number",
            Body::BoolBox(_) => "boolean",
            Body::StrBox(_) => "string",
            Body::Regex { .. } => "regex",
            Body::Set(_) => "set",
            Body::OrdMap(_) => "ordered-map",
            Body::Func { .. } => "function",
            Body::Opaque(_) => "opaque",
        };
        f.write_str(name)
    }
}

/// The adapter a user-defined body supplies so deep equality can see
/// into it. Consulted from both sides; both must agree for two opaque
/// bodies to be equal.
pub trait OpaqueBody: Downcast + Debug {
    /// Structural comparison against another object of the same tag.
    /// The default recognizes nothing beyond reference identity (which
    /// is handled before this adapter is consulted).
    fn deep_equals(&self, _other: &Obj, _helper: &mut crate::equality::Checker) -> bool {
        false
    }
}

impl_downcast!(OpaqueBody);
