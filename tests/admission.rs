//! Handler registration and the admission contract.

use canon::{equal, extras, Body, Canon, CanonError, Handler, Obj, Tag, Value};

/// Registers the two-step handler collapsing byte buffers by content.
fn enable_buffers(canon: &mut Canon) {
    canon
        .handlers_mut()
        .enable(Tag::BYTES, extras::bytes())
        .expect("bytes were never consulted by this canon");
}

#[test]
fn byte_buffers_collapse_through_a_two_step_handler() {
    let mut canon = Canon::new();
    enable_buffers(&mut canon);

    let first = canon.admit(&Value::Obj(Obj::bytes(vec![1, 2, 3]))).unwrap();
    let second = canon.admit(&Value::Obj(Obj::bytes(vec![1, 2, 3]))).unwrap();
    let different = canon.admit(&Value::Obj(Obj::bytes(vec![9]))).unwrap();

    assert!(first.same(&second), "same bytes, same canonical buffer");
    assert!(!first.same(&different));
}

#[test]
fn reconstruction_observes_canonical_children() {
    let mut canon = Canon::new();
    enable_buffers(&mut canon);

    // a mapping holding a buffer: the buffer's component resolves
    // first, so the mapping is repaired with the canonical buffer
    let admit_wrapper = |canon: &mut Canon| {
        canon
            .admit(&Value::Obj(Obj::map(vec![("blob", Value::Obj(Obj::bytes(vec![4, 5])))])))
            .unwrap()
    };
    let first = admit_wrapper(&mut canon);
    let second = admit_wrapper(&mut canon);

    assert!(first.same(&second));
    match (first, second) {
        (Value::Obj(a), Value::Obj(b)) => match (a.entry("blob"), b.entry("blob")) {
            (Value::Obj(mine), Value::Obj(theirs)) => assert!(mine.same(&theirs)),
            _ => panic!("blob entries survive admission"),
        },
        _ => panic!("admitted objects"),
    }
}

#[test]
fn two_step_handlers_refuse_cycles() {
    let mut canon = Canon::new();
    let knot = Tag::custom("knot");

    canon
        .handlers_mut()
        .enable(
            knot,
            Handler::two_step(
                |obj| match &*obj.body() {
                    Body::Seq(items) => items.clone(),
                    _ => Vec::new(),
                },
                |_| Ok(Obj::seq(Vec::new())),
            ),
        )
        .unwrap();

    let looped = Obj::new(knot, Body::Seq(vec![Value::Null]));
    looped.seq_set(0, Value::Obj(looped.clone()));

    match canon.admit(&Value::Obj(looped)) {
        Err(CanonError::CyclicTwoStep(tag)) => assert_eq!(tag, knot),
        other => panic!("expected CyclicTwoStep, got {:?}", other),
    }
}

#[test]
fn failing_hooks_commit_nothing() {
    let mut canon = Canon::new();
    let doomed = Tag::custom("doomed");

    canon
        .handlers_mut()
        .enable(
            doomed,
            Handler::two_step(|_| Vec::new(), |_| Err(CanonError::hook("always fails"))),
        )
        .unwrap();

    let inner = Obj::new(doomed, Body::Seq(Vec::new()));
    let wrapper = Obj::map(vec![("inner", Value::Obj(inner))]);

    match canon.admit(&Value::Obj(wrapper.clone())) {
        Err(CanonError::Hook { .. }) => {}
        other => panic!("expected a hook failure, got {:?}", other),
    }

    // the mapping component never froze or entered the known set
    let readmitted = canon
        .admit(&Value::Obj(Obj::map(vec![("n", Value::Int(1))])))
        .expect("the canon still works after an aborted admission");
    assert!(canon.is_canonical(&readmitted));
}

#[test]
fn enable_after_admission_fails() {
    let mut canon = Canon::new();

    // admitting a mapping containing a date consults both tags
    canon
        .admit(&Value::Obj(Obj::map(vec![("when", Value::Obj(Obj::date(1000)))])))
        .unwrap();

    let denied = canon.handlers_mut().enable(
        Tag::DATE,
        Handler::two_step(|_| Vec::new(), |_| Ok(Obj::date(0))),
    );
    assert!(matches!(denied, Err(CanonError::HandlerAfterUse(_))));
}

#[test]
fn deep_equality_implies_identical_admission() {
    let mut canon = Canon::new();

    let shapes = [
        Value::Obj(Obj::seq(vec![Value::Int(1), Value::str("two"), Value::Null])),
        Value::Obj(Obj::map(vec![("a", Value::Int(1)), ("b", Value::Bool(true))])),
        Value::Obj(Obj::date(1234)),
    ];
    for shape in &shapes {
        let again = match shape {
            Value::Obj(obj) => match &*obj.body() {
                Body::Seq(items) => Value::Obj(Obj::seq(items.clone())),
                Body::Map(entries) => Value::Obj(Obj::map(entries.clone())),
                Body::Date(millis) => Value::Obj(Obj::date(*millis)),
                _ => unreachable!("only structural shapes above"),
            },
            _ => unreachable!("only objects above"),
        };
        assert!(equal(shape, &again));

        let first = canon.admit(shape).unwrap();
        let second = canon.admit(&again).unwrap();
        assert!(first.same(&second));
        assert!(equal(&first, shape));
    }
}

#[test]
fn admitted_objects_are_frozen() {
    let mut canon = Canon::new();
    let admitted = canon.admit(&Value::Obj(Obj::seq(vec![Value::Int(1)]))).unwrap();
    match admitted {
        Value::Obj(obj) => assert!(obj.is_frozen()),
        _ => panic!("admitted an object"),
    }
}
