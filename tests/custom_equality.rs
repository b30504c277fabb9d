//! Deep equality over user-defined bodies via the adapter.

use canon::{equal, Body, Checker, Obj, OpaqueBody, Tag, Value};
use std::rc::Rc;

#[derive(Debug)]
struct Point {
    x: i64,
    y: i64,
}

impl OpaqueBody for Point {
    fn deep_equals(&self, other: &Obj, _helper: &mut Checker) -> bool {
        match &*other.body() {
            Body::Opaque(body) => body
                .downcast_ref::<Point>()
                .map_or(false, |point| point.x == self.x && point.y == self.y),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Grudge;

impl OpaqueBody for Grudge {
    // one-sided agreement is not enough: both sides must consent
    fn deep_equals(&self, _other: &Obj, _helper: &mut Checker) -> bool {
        false
    }
}

fn point(x: i64, y: i64) -> Value {
    Value::Obj(Obj::opaque(Tag::custom("point"), Rc::new(Point { x, y })))
}

#[test]
fn adapters_make_opaque_bodies_comparable() {
    assert!(equal(&point(1, 2), &point(1, 2)));
    assert!(!equal(&point(1, 2), &point(2, 1)));
}

#[test]
fn identity_still_wins_without_an_adapter_match() {
    let lone = Value::Obj(Obj::opaque(Tag::custom("grudge"), Rc::new(Grudge)));
    assert!(equal(&lone, &lone.clone()), "reference identity short-circuits the adapter");

    let other = Value::Obj(Obj::opaque(Tag::custom("grudge"), Rc::new(Grudge)));
    assert!(!equal(&lone, &other));
}

#[test]
fn adapters_are_consulted_symmetrically() {
    let agreeable = point(0, 0);
    let stubborn = Value::Obj(Obj::opaque(Tag::custom("point"), Rc::new(Grudge)));
    assert!(!equal(&agreeable, &stubborn));
    assert!(!equal(&stubborn, &agreeable));
}
