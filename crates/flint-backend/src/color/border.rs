use std::collections::HashSet;

use flint_common::ir::{BlockId, Graph, Mode, NodeId};
use flint_common::regs::ClassId;

use crate::live::Liveness;
use crate::{in_class, used_values};

/// One def or last-use event of the block's border list. Synthetic
/// defs (`is_real == false`) stand for values live at the block entry,
/// whose registers were fixed while coloring a dominator.
#[derive(Clone, Copy, Debug)]
pub struct Border {
    pub value: NodeId,
    pub is_def: bool,
    pub is_real: bool,
}

/// The time-ordered def/last-use events of a block. Walking dominator
/// preorder and these events front to back visits the interference
/// graph in a perfect elimination order.
pub fn borders(graph: &Graph, class: ClassId, live: &Liveness, block: BlockId) -> Vec<Border> {
    let mut events = Vec::new();
    let mut live_now: HashSet<NodeId> = live
        .live_out(block)
        .filter(|value| in_class(graph, class, *value))
        .collect();

    for node in graph.sched.nodes(block).into_iter().rev() {
        // Tuple carriers define through their projections, which are
        // scheduled nodes of their own.
        if graph.mode(node) != Mode::Tuple && in_class(graph, class, node) {
            events.push(Border {
                value: node,
                is_def: true,
                is_real: true,
            });
            live_now.remove(&node);
        }

        // Phi arguments are used on the incoming edges, not here.
        if !graph.is_phi(node) {
            for value in used_values(graph, class, node) {
                if live_now.insert(value) {
                    events.push(Border {
                        value,
                        is_def: false,
                        is_real: true,
                    });
                }
            }
        }
    }

    // What is still live here is live-in; its colors come from the
    // dominators.
    let mut incoming: Vec<NodeId> = live_now.into_iter().collect();
    incoming.sort();
    for value in incoming {
        events.push(Border {
            value,
            is_def: true,
            is_real: false,
        });
    }

    events.reverse();
    events
}
