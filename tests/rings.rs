//! Admission of cyclic graphs: rings and mutual references.

use canon::{equal, Canon, Obj, Value};

fn node(value: i64) -> Obj {
    Obj::map(vec![("value", Value::Int(value)), ("tail", Value::Null)])
}

/// Builds the five-node ring 1 → 2 → 3 → 4 → 5 → 1 and returns the
/// entry points in order.
fn ring() -> Vec<Obj> {
    let nodes: Vec<Obj> = (1..=5).map(node).collect();
    for index in 0..5 {
        nodes[index].set_entry("tail", Value::Obj(nodes[(index + 1) % 5].clone()));
    }
    nodes
}

#[test]
fn canonical_rings() {
    let mut canon = Canon::new();

    let first: Vec<Value> =
        ring().into_iter().map(|entry| canon.admit(&Value::Obj(entry)).unwrap()).collect();

    // five distinct frozen nodes...
    for (i, a) in first.iter().enumerate() {
        for b in &first[i + 1..] {
            assert!(!a.same(b), "each rotation is its own canonical node");
        }
    }

    // ...forming one canonical ring
    for (i, admitted) in first.iter().enumerate() {
        let entry = match admitted {
            Value::Obj(obj) => obj,
            _ => panic!("admitted an object"),
        };
        assert!(entry.is_frozen());
        assert!(entry.entry("tail").same(&first[(i + 1) % 5]), "tails link the canonical nodes");
    }

    // a second, structurally identical ring lands on the same nodes
    let second: Vec<Value> =
        ring().into_iter().map(|entry| canon.admit(&Value::Obj(entry)).unwrap()).collect();
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(a.same(b));
    }
}

#[test]
fn walking_the_ring_is_walking_the_canonical_ring() {
    let mut canon = Canon::new();
    let entries = ring();
    let list = entries[0].clone();

    let admitted_list = canon.admit(&Value::Obj(list.clone())).unwrap();

    // five hops around a five-ring is the starting entry again
    let mut around = Value::Obj(list);
    for _ in 0..5 {
        around = match around {
            Value::Obj(obj) => obj.entry("tail"),
            other => panic!("ring nodes are objects, got {:?}", other),
        };
    }
    let admitted_around = canon.admit(&around).unwrap();
    assert!(admitted_list.same(&admitted_around));
}

#[test]
fn symmetric_cross_references_collapse() {
    let mut canon = Canon::new();

    let couple = || {
        let a = Obj::map(Vec::<(&str, Value)>::new());
        let b = Obj::map(Vec::<(&str, Value)>::new());
        a.set_entry("other", Value::Obj(b.clone()));
        a.set_entry("self", Value::Obj(a.clone()));
        b.set_entry("other", Value::Obj(a.clone()));
        b.set_entry("self", Value::Obj(b.clone()));
        (a, b)
    };

    let (a, b) = couple();
    let admitted_a = canon.admit(&Value::Obj(a.clone())).unwrap();
    let admitted_b = canon.admit(&Value::Obj(b.clone())).unwrap();
    assert!(admitted_a.same(&admitted_b), "perfectly symmetric nodes share one representative");
    assert!(equal(&admitted_a, &Value::Obj(a)));

    // breaking the symmetry separates them again
    let (a, b) = couple();
    a.set_entry("b", Value::Obj(b.clone()));
    b.set_entry("a", Value::Obj(a.clone()));
    let admitted_a = canon.admit(&Value::Obj(a)).unwrap();
    let admitted_b = canon.admit(&Value::Obj(b)).unwrap();
    assert!(!admitted_a.same(&admitted_b));
}

#[test]
fn a_two_ring_of_equal_nodes_becomes_a_self_loop() {
    let mut canon = Canon::new();

    let a = node(1);
    let b = node(1);
    a.set_entry("tail", Value::Obj(b.clone()));
    b.set_entry("tail", Value::Obj(a.clone()));

    let admitted = match canon.admit(&Value::Obj(a.clone())).unwrap() {
        Value::Obj(obj) => obj,
        _ => panic!("admitted an object"),
    };
    match admitted.entry("tail") {
        Value::Obj(tail) => assert!(tail.same(&admitted), "indistinguishable members collapse"),
        other => panic!("expected an object tail, got {:?}", other),
    }
    assert!(equal(&Value::Obj(admitted), &Value::Obj(a)));
}
