//! Strongly-connected-component discovery over an input graph.
//!
//! One pass, two stacks: `root_stack` holds candidates for the root of
//! the component currently being built (popped whenever a back edge
//! proves a candidate shares a component with an earlier node), and
//! `comp_stack` holds the nodes that may still belong to it. When the
//! walk unwinds to the node on top of `root_stack`, the suffix of
//! `comp_stack` from that node onward is the finished component.
//! Components therefore complete leaves-first, which is the order
//! admission wants them in.

use crate::{
    error::CanonError,
    handlers::Handlers,
    value::{Obj, Value, WeakObj},
};
use hash_hasher::HashedMap;

/// Everything admission learns about one input graph.
pub(crate) struct Partition {
    infos: HashedMap<usize, Info>,
    pub(crate) components: Vec<Component>,
}

/// Per-input metadata computed during one admission.
pub(crate) struct Info {
    pub(crate) obj: Obj,
    pub(crate) order: u32,
    /// Deconstruction children, computed once and cached.
    pub(crate) children: Vec<Value>,
    pub(crate) component: Option<usize>,
    /// The canonical representative, once established.
    pub(crate) known: Option<Obj>,
}

/// A strongly connected component with an ordered member snapshot.
pub(crate) struct Component {
    pub(crate) members: Vec<usize>,
}

impl Partition {
    pub(crate) fn info(&self, addr: usize) -> &Info {
        self.infos.get(&addr).expect("address was mapped during partitioning")
    }

    pub(crate) fn info_mut(&mut self, addr: usize) -> &mut Info {
        self.infos.get_mut(&addr).expect("address was mapped during partitioning")
    }

    pub(crate) fn try_info(&self, addr: usize) -> Option<&Info> {
        self.infos.get(&addr)
    }

    pub(crate) fn in_component(&self, addr: usize, component: usize) -> bool {
        self.infos.get(&addr).map_or(false, |info| info.component == Some(component))
    }
}

/// Walks the graph under `root`, deconstructing handled inputs and
/// grouping them into components. Canonical and opaque inputs
/// terminate the walk without being mapped.
pub(crate) fn partition(
    root: &Obj,
    handlers: &mut Handlers,
    known: &HashedMap<usize, WeakObj>,
) -> Result<Partition, CanonError> {
    let mut builder = Builder {
        partition: Partition { infos: HashedMap::default(), components: Vec::new() },
        next_order: 0,
        root_stack: Vec::new(),
        comp_stack: Vec::new(),
        handlers,
        known,
    };
    if builder.is_canonical(root) {
        return Err(CanonError::RootAlreadyCanonical);
    }
    builder.explore(root);
    Ok(builder.partition)
}

struct Builder<'a> {
    partition: Partition,
    next_order: u32,
    root_stack: Vec<usize>,
    comp_stack: Vec<usize>,
    handlers: &'a mut Handlers,
    known: &'a HashedMap<usize, WeakObj>,
}

impl Builder<'_> {
    fn is_canonical(&self, obj: &Obj) -> bool {
        self.known.get(&obj.addr()).and_then(WeakObj::upgrade).map_or(false, |kept| kept.same(obj))
    }

    fn explore(&mut self, obj: &Obj) {
        let addr = obj.addr();
        if let Some(info) = self.partition.infos.get(&addr) {
            if info.component.is_none() {
                // back edge into the current spine: every root candidate
                // seen after this node collapses into its component
                let order = info.order;
                while let Some(&candidate) = self.root_stack.last() {
                    if self.partition.infos[&candidate].order > order {
                        self.root_stack.pop();
                    } else {
                        break;
                    }
                }
            }
            return;
        }

        if self.is_canonical(obj) || !self.handlers.is_handled(obj.tag()) {
            return;
        }

        let children = self.handlers.deconstruct(obj).expect("tag was just ruled handled");
        let order = self.next_order;
        self.next_order += 1;
        self.partition.infos.insert(
            addr,
            Info { obj: obj.clone(), order, children: children.clone(), component: None, known: None },
        );
        self.root_stack.push(addr);
        self.comp_stack.push(addr);

        for child in &children {
            if let Value::Obj(child) = child {
                self.explore(child);
            }
        }

        if self.root_stack.last() == Some(&addr) {
            self.root_stack.pop();
            let position = self
                .comp_stack
                .iter()
                .rposition(|candidate| *candidate == addr)
                .expect("completed node is on the component stack");
            let members = self.comp_stack.split_off(position);
            let index = self.partition.components.len();
            for member in &members {
                self.partition.infos.get_mut(member).expect("member was mapped").component =
                    Some(index);
            }
            self.partition.components.push(Component { members });
        }
    }
}
