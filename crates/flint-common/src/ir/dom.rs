use super::{BlockId, Graph};

/// Blocks in reverse postorder of a depth-first walk over control-flow
/// successors, starting at the entry block. Unreachable blocks are not
/// listed.
pub fn reverse_postorder(graph: &Graph) -> Vec<BlockId> {
    let mut seen = vec![false; graph.block_count()];
    let mut order = Vec::with_capacity(graph.block_count());
    let mut stack = vec![(graph.entry(), 0)];
    seen[graph.entry().index()] = true;

    while let Some((block, at)) = stack.pop() {
        let succs = graph.succs(block);
        match succs.get(at) {
            Some(succ) => {
                stack.push((block, at + 1));
                if !seen[succ.index()] {
                    seen[succ.index()] = true;
                    stack.push((*succ, 0));
                }
            }
            None => order.push(block),
        }
    }

    order.reverse();
    order
}

/// The dominator tree, computed with the iterative reverse-postorder
/// intersection scheme.
#[derive(Debug)]
pub struct DomTree {
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    preorder: Vec<BlockId>,
}

impl DomTree {
    pub fn compute(graph: &Graph) -> Self {
        let count = graph.block_count();
        let entry = graph.entry();
        let rpo = reverse_postorder(graph);

        let mut number = vec![usize::MAX; count];
        for (i, block) in rpo.iter().enumerate() {
            number[block.index()] = i;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; count];
        idom[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;

            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;

                for pred in graph.preds(*block) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }

                    new_idom = Some(match new_idom {
                        Some(so_far) => intersect(*pred, so_far, &idom, &number),
                        None => *pred,
                    });
                }

                let new_idom = new_idom.expect("reachable block without processed predecessor");
                if idom[block.index()] != Some(new_idom) {
                    idom[block.index()] = Some(new_idom);
                    changed = true;
                }
            }
        }

        idom[entry.index()] = None;

        let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); count];
        for block in rpo.iter() {
            if let Some(parent) = idom[block.index()] {
                children[parent.index()].push(*block);
            }
        }

        let mut preorder = Vec::with_capacity(rpo.len());
        let mut stack = vec![entry];
        while let Some(block) = stack.pop() {
            preorder.push(block);
            stack.extend(children[block.index()].iter().rev());
        }

        Self {
            idom,
            children,
            preorder,
        }
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.index()]
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.index()]
    }

    /// Dominator-tree preorder over the reachable blocks.
    pub fn preorder(&self) -> &[BlockId] {
        &self.preorder
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut at = b;
        loop {
            if at == a {
                return true;
            }
            match self.idom[at.index()] {
                Some(up) => at = up,
                None => return false,
            }
        }
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

fn intersect(
    a: BlockId,
    b: BlockId,
    idom: &[Option<BlockId>],
    number: &[usize],
) -> BlockId {
    let (mut a, mut b) = (a, b);
    while a != b {
        while number[a.index()] > number[b.index()] {
            a = idom[a.index()].unwrap();
        }
        while number[b.index()] > number[a.index()] {
            b = idom[b.index()].unwrap();
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    // entry -> then/elze -> join
    fn diamond() -> (Graph, [BlockId; 4]) {
        let mut graph = Graph::new();
        let entry = graph.entry();
        let then = graph.add_block();
        let elze = graph.add_block();
        let join = graph.add_block();

        graph.set_preds(then, vec![entry]);
        graph.set_preds(elze, vec![entry]);
        graph.set_preds(join, vec![then, elze]);

        (graph, [entry, then, elze, join])
    }

    #[test]
    fn diamond_idoms() {
        let (graph, [entry, then, elze, join]) = diamond();
        let dom = DomTree::compute(&graph);

        assert_eq!(dom.idom(entry), None);
        assert_eq!(dom.idom(then), Some(entry));
        assert_eq!(dom.idom(elze), Some(entry));
        assert_eq!(dom.idom(join), Some(entry));

        assert!(dom.dominates(entry, join));
        assert!(!dom.strictly_dominates(then, join));
        assert!(dom.strictly_dominates(entry, then));
    }

    #[test]
    fn preorder_visits_parents_first() {
        let (graph, [entry, ..]) = diamond();
        let dom = DomTree::compute(&graph);

        let order = dom.preorder();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], entry);

        for block in order.iter().skip(1) {
            let parent = dom.idom(*block).unwrap();
            let at = |b: BlockId| order.iter().position(|x| *x == b).unwrap();
            assert!(at(parent) < at(*block));
        }
    }

    #[test]
    fn loop_back_edge() {
        let mut graph = Graph::new();
        let entry = graph.entry();
        let head = graph.add_block();
        let body = graph.add_block();
        let exit = graph.add_block();

        graph.set_preds(head, vec![entry, body]);
        graph.set_preds(body, vec![head]);
        graph.set_preds(exit, vec![head]);

        let dom = DomTree::compute(&graph);
        assert_eq!(dom.idom(head), Some(entry));
        assert_eq!(dom.idom(body), Some(head));
        assert_eq!(dom.idom(exit), Some(head));

        let rpo = reverse_postorder(&graph);
        assert_eq!(rpo[0], entry);
        assert_eq!(rpo[1], head);
    }
}
