//! The opt-in handlers for bodies that are opaque by default.

use canon::{equal, extras, Canon, Obj, Value};

fn canon_with_extras() -> Canon {
    let mut canon = Canon::new();
    extras::enable_all(canon.handlers_mut()).expect("fresh canon, nothing consulted");
    canon
}

#[test]
fn scalar_boxes_collapse_by_value() {
    let mut canon = canon_with_extras();

    let admit = |canon: &mut Canon, obj: Obj| canon.admit(&Value::Obj(obj)).unwrap();

    assert!(admit(&mut canon, Obj::num_box(2.5)).same(&admit(&mut canon, Obj::num_box(2.5))));
    assert!(admit(&mut canon, Obj::num_box(f64::NAN))
        .same(&admit(&mut canon, Obj::num_box(f64::NAN))));
    assert!(!admit(&mut canon, Obj::num_box(1.0)).same(&admit(&mut canon, Obj::num_box(2.0))));

    assert!(admit(&mut canon, Obj::bool_box(true)).same(&admit(&mut canon, Obj::bool_box(true))));
    assert!(admit(&mut canon, Obj::str_box("hi")).same(&admit(&mut canon, Obj::str_box("hi"))));
}

#[test]
fn errors_and_regexes_collapse_by_string_form() {
    let mut canon = canon_with_extras();

    let type_error = canon.admit(&Value::Obj(Obj::error("TypeError", "nope"))).unwrap();
    assert!(type_error.same(&canon.admit(&Value::Obj(Obj::error("TypeError", "nope"))).unwrap()));
    assert!(!type_error.same(&canon.admit(&Value::Obj(Obj::error("RangeError", "nope"))).unwrap()));

    let pattern = canon.admit(&Value::Obj(Obj::regex("a+b", "i"))).unwrap();
    assert!(pattern.same(&canon.admit(&Value::Obj(Obj::regex("a+b", "i"))).unwrap()));
    assert!(!pattern.same(&canon.admit(&Value::Obj(Obj::regex("a+b", "g"))).unwrap()));
}

#[test]
fn extras_nest_inside_structural_values() {
    let mut canon = canon_with_extras();

    let wrapped = |canon: &mut Canon| {
        canon
            .admit(&Value::Obj(Obj::map(vec![
                ("err", Value::Obj(Obj::error("E", "m"))),
                ("blob", Value::Obj(Obj::bytes(vec![7, 7]))),
            ])))
            .unwrap()
    };
    let first = wrapped(&mut canon);
    let second = wrapped(&mut canon);
    assert!(first.same(&second));
    assert!(equal(&first, &second));
}

#[test]
fn ordered_containers_stay_opaque() {
    let mut canon = canon_with_extras();

    // no handler is offered for sets: membership equality has no
    // canonical linearization, so identity carries them through
    let set = Obj::set(vec![Value::Int(1), Value::Int(2)]);
    let admitted = canon.admit(&Value::Obj(set.clone())).unwrap();
    match admitted {
        Value::Obj(out) => assert!(out.same(&set)),
        _ => panic!("object in, object out"),
    }

    let twin = canon.admit(&Value::Obj(Obj::set(vec![Value::Int(1), Value::Int(2)]))).unwrap();
    match twin {
        Value::Obj(out) => assert!(!out.same(&set), "separate sets keep separate identities"),
        _ => panic!("object in, object out"),
    }
}

#[test]
fn cyclic_sequences_take_the_three_step_path() {
    let mut canon = canon_with_extras();

    let looped = || {
        let seq = Obj::seq(vec![Value::Int(0), Value::Null]);
        seq.seq_set(1, Value::Obj(seq.clone()));
        Value::Obj(seq)
    };

    let first = canon.admit(&looped()).unwrap();
    let second = canon.admit(&looped()).unwrap();
    assert!(first.same(&second));

    match &first {
        Value::Obj(obj) => {
            assert!(obj.is_frozen());
            match obj.index(1) {
                Value::Obj(tail) => assert!(tail.same(obj), "the loop survives admission"),
                other => panic!("expected a self reference, got {:?}", other),
            }
        }
        _ => panic!("admitted an object"),
    }
}
