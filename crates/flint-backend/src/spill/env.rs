use std::collections::{HashMap, HashSet};

use flint_common::ir::{BlockId, DomTree, EntityId, Graph, NodeId, Op};
use flint_common::regs::ClassId;
use log::{debug, info};

use crate::{nodes, value_req};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum ReloadAt {
    /// Reload directly before this instruction.
    Use(NodeId),
    /// Reload on the control-flow edge into `BlockId` from its
    /// predecessor at the given index.
    Edge(BlockId, usize),
}

/// Accumulates the spiller's decisions and materializes them in one
/// pass: one stack slot per spill equivalence class (phi spills merge
/// classes transitively through their arguments), a spill after each
/// definition, a reload in front of each requested use, and dominance
/// based rerouting of the rewired uses. Reloads that end up unused are
/// culled.
pub struct SpillEnv {
    class: ClassId,
    reloads: Vec<(NodeId, ReloadAt)>,
    seen: HashSet<(NodeId, ReloadAt)>,
    phis: Vec<NodeId>,
    phi_set: HashSet<NodeId>,
}

impl SpillEnv {
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            reloads: Vec::new(),
            seen: HashSet::new(),
            phis: Vec::new(),
            phi_set: HashSet::new(),
        }
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Request that `value` be back in a register before `user`.
    pub fn add_reload(&mut self, value: NodeId, user: NodeId) {
        self.push(value, ReloadAt::Use(user));
    }

    /// Request that `value` be back in a register on the edge into
    /// `block` from its `pred_index`-th predecessor.
    pub fn add_reload_on_edge(&mut self, value: NodeId, block: BlockId, pred_index: usize) {
        self.push(value, ReloadAt::Edge(block, pred_index));
    }

    /// Mark a phi as spilled: its arguments will share its stack slot.
    pub fn spill_phi(&mut self, phi: NodeId) {
        if self.phi_set.insert(phi) {
            self.phis.push(phi);
        }
    }

    fn push(&mut self, value: NodeId, at: ReloadAt) {
        if self.seen.insert((value, at)) {
            self.reloads.push((value, at));
        }
    }

    pub fn materialize(self, graph: &mut Graph) {
        let SpillEnv {
            reloads,
            phis,
            mut phi_set,
            ..
        } = self;

        if reloads.is_empty() && phis.is_empty() {
            return;
        }

        info!(
            "materializing {} reloads and {} phi spills",
            reloads.len(),
            phis.len()
        );

        let dom = DomTree::compute(graph);

        // Gather every value that needs a slot and merge phi classes.
        let mut order: Vec<NodeId> = Vec::new();
        let mut set: HashSet<NodeId> = HashSet::new();
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();

        for (value, _) in reloads.iter() {
            if set.insert(*value) {
                order.push(*value);
            }
        }

        let mut work = phis;
        while let Some(phi) = work.pop() {
            if set.insert(phi) {
                order.push(phi);
            }

            for arg in graph.ins(phi).to_vec() {
                if graph.op(arg) == Op::Unknown {
                    continue;
                }

                union(&mut parent, phi, arg);
                if set.insert(arg) {
                    order.push(arg);
                }
                if graph.is_phi(arg) && phi_set.insert(arg) {
                    work.push(arg);
                }
            }
        }

        // One frame entity per equivalence class, sized for its widest
        // member.
        let mut groups: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for value in order.iter() {
            let root = find(&mut parent, *value);
            groups.entry(root).or_default().push(*value);
        }

        let mut entities: HashMap<NodeId, EntityId> = HashMap::new();
        for value in order.iter() {
            let root = find(&mut parent, *value);
            if !entities.contains_key(&root) {
                let size = groups[&root]
                    .iter()
                    .map(|member| graph.mode(*member).bytes())
                    .max()
                    .unwrap();
                entities.insert(root, graph.frame.add_entity(size, size));
            }
        }

        // Spill each value after its definition. Spilled phis store
        // through their arguments instead.
        let mut spills: HashMap<NodeId, NodeId> = HashMap::new();
        for value in order.iter() {
            if phi_set.contains(value) {
                continue;
            }

            let root = find(&mut parent, *value);
            let spill = nodes::spill(graph, *value, entities[&root]);
            debug!("inserted {} spilling {}", spill, value);
            spills.insert(*value, spill);
        }

        let mut root_spills: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (value, spill) in spills.iter() {
            let root = find(&mut parent, *value);
            root_spills.entry(root).or_default().push(*spill);
        }

        let mut created = Vec::with_capacity(reloads.len());
        for (value, at) in reloads.iter() {
            let root = find(&mut parent, *value);
            let entity = entities[&root];
            let class = value_req(graph, *value)
                .unwrap_or_else(|| panic!("reloaded value {} has no requirement", value))
                .class;
            let mode = graph.mode(*value);
            let mem = match root_spills.get(&root).map(Vec::as_slice) {
                Some([spill]) => Some(*spill),
                _ => None,
            };

            let reload = match at {
                ReloadAt::Use(user) => {
                    let block = graph.block_of(*user);
                    let reload = nodes::reload(graph, block, mem, class, mode, entity);
                    graph.sched.move_before(*user, reload);

                    for (index, input) in graph.ins(*user).to_vec().into_iter().enumerate() {
                        if input == *value {
                            graph.set_input(*user, index, reload);
                        }
                    }
                    reload
                }

                ReloadAt::Edge(block, pred_index) => {
                    let phi_uses: Vec<NodeId> = graph
                        .block_nodes(*block)
                        .filter(|n| graph.is_phi(*n) && graph.input(*n, *pred_index) == *value)
                        .collect();

                    if !phi_uses.is_empty() {
                        // Feed the phi argument: reload at the end of
                        // the predecessor, before its terminator.
                        let pred = graph.preds(*block)[*pred_index];
                        let reload = nodes::reload(graph, pred, mem, class, mode, entity);
                        place_before_terminator(graph, reload);

                        for phi in phi_uses {
                            graph.set_input(phi, *pred_index, reload);
                        }
                        reload
                    } else {
                        // Re-establish the value at the block head and
                        // reroute everything at or below it.
                        let reload = nodes::reload(graph, *block, mem, class, mode, entity);
                        place_at_head(graph, *block, reload);
                        reroute_below(graph, &dom, *value, reload, *block);
                        reload
                    }
                }
            };

            debug!("inserted {} reloading {}", reload, value);

            // Keep same-block spills ahead of the reload in the
            // schedule even without a memory input.
            for spill in root_spills.get(&root).into_iter().flatten() {
                if graph.block_of(*spill) == graph.block_of(reload)
                    && !graph.ins(reload).contains(spill)
                {
                    graph.add_dep(reload, *spill);
                }
            }

            created.push(reload);
        }

        // A later reload can steal all rewired uses of an earlier one.
        for reload in created {
            if graph.users(reload).is_empty() && graph.dep_users(reload).is_empty() {
                debug!("culling dead {}", reload);
                graph.remove(reload);
            }
        }
    }
}

fn place_before_terminator(graph: &mut Graph, node: NodeId) {
    if let Some(prev) = graph.sched.prev(node) {
        if crate::is_terminator(graph, prev) {
            graph.sched.move_before(prev, node);
        }
    }
}

fn place_at_head(graph: &mut Graph, block: BlockId, node: NodeId) {
    let anchor = graph
        .sched
        .iter(block)
        .find(|n| !graph.is_phi(*n) && *n != node);
    if let Some(anchor) = anchor {
        graph.sched.move_before(anchor, node);
    }
}

/// Redirect every use of `value` at or dominated by `block` to `new`.
/// Spills keep reading the original definition.
fn reroute_below(graph: &mut Graph, dom: &DomTree, value: NodeId, new: NodeId, block: BlockId) {
    for at in graph.users(value).to_vec() {
        if at.user == new || graph.op(at.user) == Op::Spill {
            continue;
        }

        let rewire = if graph.is_phi(at.user) {
            let edge = graph.preds(graph.block_of(at.user))[at.index];
            edge == block || dom.strictly_dominates(block, edge)
        } else {
            let user_block = graph.block_of(at.user);
            user_block == block || dom.strictly_dominates(block, user_block)
        };

        if rewire {
            graph.set_input(at.user, at.index, new);
        }
    }
}

fn find(parent: &mut HashMap<NodeId, NodeId>, value: NodeId) -> NodeId {
    let up = match parent.get(&value) {
        Some(up) => *up,
        None => return value,
    };

    let root = find(parent, up);
    parent.insert(value, root);
    root
}

fn union(parent: &mut HashMap<NodeId, NodeId>, a: NodeId, b: NodeId) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent.insert(rb, ra);
    }
}
