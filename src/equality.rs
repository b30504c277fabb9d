//! Pair-wise structural comparison with cycle tolerance.
//!
//! [`equal`] never fails and terminates on any cyclic input: a
//! [`Checker`] remembers the pair of objects it is currently comparing
//! and answers `true` provisionally on re-encounter. The provisional
//! answer stands unless some other part of the traversal contradicts
//! it with a definite `false`.

use crate::value::{Body, Obj, Value};
use hashbrown::HashSet;
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    /// Checkers are pooled and reused to avoid allocation churn across
    /// top-level comparisons.
    static CHECKERS: RefCell<Vec<Checker>> = RefCell::new(Vec::new());
}

/// Compares two values structurally.
///
/// ```
/// use canon::{equal, Obj, Value};
///
/// let a = Obj::map(vec![("n", Value::Int(1))]);
/// let b = Obj::map(vec![("n", Value::Int(1))]);
/// assert!(equal(&Value::Obj(a), &Value::Obj(b)));
/// ```
pub fn equal(a: &Value, b: &Value) -> bool {
    let mut checker = CHECKERS.with(|pool| pool.borrow_mut().pop()).unwrap_or_default();
    let result = checker.equals(a, b);
    checker.reset();
    CHECKERS.with(|pool| pool.borrow_mut().push(checker));
    result
}

/// One in-flight structural comparison. Handed to [`OpaqueBody`]
/// adapters so user types can recurse without losing cycle tolerance.
///
/// [`OpaqueBody`]: crate::OpaqueBody
#[derive(Default)]
pub struct Checker {
    /// Pairs currently being compared, by address.
    in_progress: HashSet<(usize, usize)>,
}

impl Checker {
    /// Compares two values within this traversal.
    pub fn equals(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Obj(a), Value::Obj(b)) => self.objects(a, b),
            _ => a.same(b),
        }
    }

    fn reset(&mut self) {
        self.in_progress.clear();
    }

    fn objects(&mut self, a: &Obj, b: &Obj) -> bool {
        if a.same(b) {
            return true;
        }
        if a.tag() != b.tag() {
            return false;
        }

        let pair = (a.addr(), b.addr());
        if !self.in_progress.insert(pair) {
            // already walking this pair further up the stack
            return true;
        }
        let result = self.bodies(a, b);
        self.in_progress.remove(&pair);
        result
    }

    fn bodies(&mut self, a: &Obj, b: &Obj) -> bool {
        let a_body = a.body();
        let b_body = b.body();
        match (&*a_body, &*b_body) {
            (Body::Seq(x), Body::Seq(y)) => {
                x.len() == y.len()
                    && x.iter().zip(y.iter()).all(|(xe, ye)| self.equals(xe, ye))
            }
            (Body::Map(x), Body::Map(y)) => self.mappings(x, y),
            (Body::Date(x), Body::Date(y)) => x == y,
            (Body::Bytes(x), Body::Bytes(y)) => x == y,
            (Body::Error { name: xn, message: xm }, Body::Error { name: yn, message: ym }) => {
                xn == yn && xm == ym
            }
            (Body::NumBox(x), Body::NumBox(y)) => (x.is_nan() && y.is_nan()) || x == y,
            (Body::BoolBox(x), Body::BoolBox(y)) => x == y,
            (Body::StrBox(x), Body::StrBox(y)) => x == y,
            (Body::Regex { source: xs, flags: xf }, Body::Regex { source: ys, flags: yf }) => {
                xs == ys && xf == yf
            }
            (Body::Set(x), Body::Set(y)) => {
                x.len() == y.len()
                    && x.iter().all(|member| y.iter().any(|other| member.same(other)))
            }
            (Body::OrdMap(x), Body::OrdMap(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(key, value)| {
                        y.iter()
                            .find(|(other, _)| key.same(other))
                            .map_or(false, |(_, theirs)| self.equals(value, theirs))
                    })
            }
            (Body::Func { source: xs }, Body::Func { source: ys }) => {
                // identity was handled above; equal visible source is
                // enough, censored source never is
                match (xs, ys) {
                    (Some(xs), Some(ys)) => xs == ys,
                    _ => false,
                }
            }
            (Body::Opaque(xo), Body::Opaque(yo)) => {
                // consult the adapter on both sides
                xo.deep_equals(b, self) && yo.deep_equals(a, self)
            }
            _ => false,
        }
    }

    /// Plain mappings compare on their defined entries: a key bound to
    /// undefined is the same as an absent key.
    fn mappings(&mut self, x: &[(Rc<str>, Value)], y: &[(Rc<str>, Value)]) -> bool {
        fn defined(entries: &[(Rc<str>, Value)]) -> impl Iterator<Item = &(Rc<str>, Value)> {
            entries
                .iter()
                .filter(|(_, value)| !matches!(value, Value::Missing | Value::Undefined))
        }

        if defined(x).count() != defined(y).count() {
            return false;
        }
        // split borrows of self: collect the pairs to compare first
        let mut pairs = Vec::new();
        for (key, value) in defined(x) {
            match y.iter().find(|(theirs, _)| theirs == key) {
                Some((_, theirs)) if !matches!(theirs, Value::Missing | Value::Undefined) => {
                    pairs.push((value, theirs));
                }
                _ => return false,
            }
        }
        pairs.into_iter().all(|(mine, theirs)| self.equals(mine, theirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Tag;

    #[test]
    fn reflexive_and_symmetric() {
        let a = Value::Obj(Obj::seq(vec![Value::Int(1), Value::str("two")]));
        let b = Value::Obj(Obj::seq(vec![Value::Int(1), Value::str("two")]));
        assert!(equal(&a, &a));
        assert!(equal(&a, &b));
        assert!(equal(&b, &a));
    }

    #[test]
    fn different_tags_never_compare_equal() {
        let seq = Obj::seq(vec![Value::Int(0)]);
        let custom = Obj::new(Tag::custom("tuple-ish"), Body::Seq(vec![Value::Int(0)]));
        assert!(!equal(&Value::Obj(seq), &Value::Obj(custom)));
    }

    #[test]
    fn holes_are_not_undefined_in_sequences() {
        let with_hole = Obj::seq(vec![Value::Int(0), Value::Missing]);
        let with_undefined = Obj::seq(vec![Value::Int(0), Value::Undefined]);
        assert!(!equal(&Value::Obj(with_hole), &Value::Obj(with_undefined)));
    }

    #[test]
    fn undefined_entries_match_absent_keys_in_mappings() {
        let explicit = Obj::map(vec![("a", Value::Int(1)), ("b", Value::Undefined)]);
        let implicit = Obj::map(vec![("a", Value::Int(1))]);
        assert!(equal(&Value::Obj(explicit), &Value::Obj(implicit)));
    }

    #[test]
    fn nan_boxes_are_self_equal() {
        assert!(equal(&Value::Obj(Obj::num_box(f64::NAN)), &Value::Obj(Obj::num_box(f64::NAN))));
        assert!(!equal(&Value::Obj(Obj::num_box(0.0)), &Value::Obj(Obj::num_box(1.0))));
    }

    #[test]
    fn censored_functions_only_equal_by_identity() {
        let named = |src| Value::Obj(Obj::func(Some(src)));
        assert!(equal(&named("fn f() {}"), &named("fn f() {}")));
        assert!(!equal(&named("fn f() {}"), &named("fn g() {}")));

        let censored = Obj::func(None);
        assert!(equal(&Value::Obj(censored.clone()), &Value::Obj(censored.clone())));
        assert!(!equal(&Value::Obj(censored), &Value::Obj(Obj::func(None))));
    }

    #[test]
    fn cycles_terminate() {
        let a = Obj::map(vec![("self", Value::Null)]);
        a.set_entry("self", Value::Obj(a.clone()));
        let b = Obj::map(vec![("self", Value::Null)]);
        b.set_entry("self", Value::Obj(b.clone()));

        assert!(equal(&Value::Obj(a.clone()), &Value::Obj(b)));
        let different = Obj::map(vec![("self", Value::Int(9))]);
        assert!(!equal(&Value::Obj(a), &Value::Obj(different)));
    }

    #[test]
    fn errors_compare_by_name_and_message() {
        let a = Obj::error("TypeError", "nope");
        let b = Obj::error("TypeError", "nope");
        let c = Obj::error("RangeError", "nope");
        assert!(equal(&Value::Obj(a.clone()), &Value::Obj(b)));
        assert!(!equal(&Value::Obj(a), &Value::Obj(c)));
    }
}
