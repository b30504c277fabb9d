use std::{
    any::Any,
    fmt::{Debug, Formatter, Result as FmtResult},
    rc::Rc,
    sync::atomic::{AtomicU32, Ordering},
};

static NEXT_SLOT_ID: AtomicU32 = AtomicU32::new(0);

/// A typed slot identity with a default value and optional merge and
/// guard semantics.
///
/// A `Subtext` does not hold a value itself; values live in
/// [`Supertext`] nodes keyed by the subtext's identity. Cloning a
/// `Subtext` clones the identity, not a new slot.
///
/// [`Supertext`]: crate::Supertext
pub struct Subtext<T> {
    inner: Rc<SlotInner<T>>,
}

struct SlotInner<T> {
    id: u32,
    default: Rc<T>,
    merge: Option<Box<dyn Fn(&T, &T) -> T>>,
    guard: Option<Box<dyn Fn(T) -> T>>,
}

impl<T: 'static> Subtext<T> {
    /// Creates a slot with rightmost-wins merge semantics and no guard.
    pub fn new(default: T) -> Self {
        Self::builder(default).finish()
    }

    /// Starts building a slot with custom merge and/or guard behavior.
    pub fn builder(default: T) -> SubtextBuilder<T> {
        SubtextBuilder { default, merge: None, guard: None }
    }

    /// The value read wherever no supertext provides one.
    pub fn default_value(&self) -> Rc<T> {
        self.inner.default.clone()
    }

    /// Reads this slot on the current ambient supertext.
    pub fn read(&self) -> Rc<T> {
        crate::Supertext::current().read(self)
    }

    pub(crate) fn id(&self) -> u32 {
        self.inner.id
    }

    /// Applies the guard normalization to a value about to be bound.
    pub(crate) fn apply_guard(&self, value: T) -> T {
        match &self.inner.guard {
            Some(guard) => guard(value),
            None => value,
        }
    }

    /// Folds two gathered values, older first. Without a merge function
    /// the newer value wins.
    pub(crate) fn fold(&self, older: Rc<dyn Any>, newer: Rc<dyn Any>) -> Rc<dyn Any> {
        match &self.inner.merge {
            None => newer,
            Some(merge) => match (older.downcast::<T>(), newer.downcast::<T>()) {
                (Ok(older), Ok(newer)) => Rc::new(merge(&older, &newer)),
                _ => panic!("slot stores its own value type"),
            },
        }
    }
}

impl<T> Clone for Subtext<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Debug for Subtext<T> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Subtext")
            .field("id", &self.inner.id)
            .field("ty", &std::any::type_name::<T>())
            .finish()
    }
}

/// Configures a [`Subtext`] before it receives an identity.
pub struct SubtextBuilder<T> {
    default: T,
    merge: Option<Box<dyn Fn(&T, &T) -> T>>,
    guard: Option<Box<dyn Fn(T) -> T>>,
}

impl<T: 'static> SubtextBuilder<T> {
    /// Folds an older and a newer value into the one a read returns
    /// when several parents provide this slot.
    pub fn merge(mut self, merge: impl Fn(&T, &T) -> T + 'static) -> Self {
        self.merge = Some(Box::new(merge));
        self
    }

    /// Normalizes every value at the moment it is bound.
    pub fn guard(mut self, guard: impl Fn(T) -> T + 'static) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Allocates the slot identity.
    pub fn finish(self) -> Subtext<T> {
        Subtext {
            inner: Rc::new(SlotInner {
                id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
                default: Rc::new(self.default),
                merge: self.merge,
                guard: self.guard,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_distinct() {
        let a = Subtext::new(0u8);
        let b = Subtext::new(0u8);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id(), "cloning preserves identity");
    }

    #[test]
    fn guard_normalizes_bound_values() {
        let upper = Subtext::builder(String::new()).guard(|s: String| s.to_uppercase()).finish();
        assert_eq!(upper.apply_guard("qwer".to_string()), "QWER");
    }
}
