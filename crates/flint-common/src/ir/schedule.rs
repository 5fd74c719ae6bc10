use std::collections::HashMap;

use super::{BlockId, NodeId};

/// The per-block instruction order, kept as a doubly-linked list in a
/// side table keyed by node id. A node has no links until it is
/// scheduled.
#[derive(Clone, Debug, Default)]
pub struct Schedule {
    links: HashMap<NodeId, Links>,
    ends: HashMap<BlockId, Ends>,
}

#[derive(Clone, Copy, Debug)]
struct Links {
    prev: Option<NodeId>,
    next: Option<NodeId>,
    block: BlockId,
}

#[derive(Clone, Copy, Debug)]
struct Ends {
    head: NodeId,
    tail: NodeId,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scheduled(&self, node: NodeId) -> bool {
        self.links.contains_key(&node)
    }

    pub fn block_of(&self, node: NodeId) -> BlockId {
        self.links.get(&node).expect("node is not scheduled").block
    }

    pub fn first(&self, block: BlockId) -> Option<NodeId> {
        self.ends.get(&block).map(|e| e.head)
    }

    pub fn last(&self, block: BlockId) -> Option<NodeId> {
        self.ends.get(&block).map(|e| e.tail)
    }

    pub fn next(&self, node: NodeId) -> Option<NodeId> {
        self.links.get(&node).and_then(|l| l.next)
    }

    pub fn prev(&self, node: NodeId) -> Option<NodeId> {
        self.links.get(&node).and_then(|l| l.prev)
    }

    pub fn append(&mut self, block: BlockId, node: NodeId) {
        assert!(!self.is_scheduled(node), "{} is already scheduled", node);

        match self.ends.get_mut(&block) {
            Some(ends) => {
                let tail = ends.tail;
                self.links.get_mut(&tail).unwrap().next = Some(node);
                self.links.insert(
                    node,
                    Links {
                        prev: Some(tail),
                        next: None,
                        block,
                    },
                );
                ends.tail = node;
            }
            None => {
                self.links.insert(
                    node,
                    Links {
                        prev: None,
                        next: None,
                        block,
                    },
                );
                self.ends.insert(block, Ends {
                    head: node,
                    tail: node,
                });
            }
        }
    }

    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) {
        assert!(!self.is_scheduled(node), "{} is already scheduled", node);

        let at = *self.links.get(&anchor).expect("anchor is not scheduled");
        self.links.insert(
            node,
            Links {
                prev: at.prev,
                next: Some(anchor),
                block: at.block,
            },
        );
        self.links.get_mut(&anchor).unwrap().prev = Some(node);

        match at.prev {
            Some(prev) => self.links.get_mut(&prev).unwrap().next = Some(node),
            None => self.ends.get_mut(&at.block).unwrap().head = node,
        }
    }

    pub fn insert_after(&mut self, anchor: NodeId, node: NodeId) {
        assert!(!self.is_scheduled(node), "{} is already scheduled", node);

        let at = *self.links.get(&anchor).expect("anchor is not scheduled");
        self.links.insert(
            node,
            Links {
                prev: Some(anchor),
                next: at.next,
                block: at.block,
            },
        );
        self.links.get_mut(&anchor).unwrap().next = Some(node);

        match at.next {
            Some(next) => self.links.get_mut(&next).unwrap().prev = Some(node),
            None => self.ends.get_mut(&at.block).unwrap().tail = node,
        }
    }

    /// Reposition `node` (scheduled or not) directly before `anchor`.
    pub fn move_before(&mut self, anchor: NodeId, node: NodeId) {
        if self.is_scheduled(node) {
            self.remove(node);
        }
        self.insert_before(anchor, node);
    }

    /// Reposition `node` (scheduled or not) directly after `anchor`.
    pub fn move_after(&mut self, anchor: NodeId, node: NodeId) {
        if self.is_scheduled(node) {
            self.remove(node);
        }
        self.insert_after(anchor, node);
    }

    pub fn remove(&mut self, node: NodeId) {
        let at = self.links.remove(&node).expect("node is not scheduled");

        match at.prev {
            Some(prev) => self.links.get_mut(&prev).unwrap().next = at.next,
            None => match at.next {
                Some(next) => self.ends.get_mut(&at.block).unwrap().head = next,
                None => {
                    self.ends.remove(&at.block);
                    return;
                }
            },
        }

        match at.next {
            Some(next) => self.links.get_mut(&next).unwrap().prev = at.prev,
            None => self.ends.get_mut(&at.block).unwrap().tail = at.prev.unwrap(),
        }
    }

    /// Drop every node of the given block from the schedule.
    pub fn clear_block(&mut self, block: BlockId) {
        let mut at = self.ends.remove(&block).map(|e| e.head);
        while let Some(node) = at {
            at = self.links.remove(&node).unwrap().next;
        }
    }

    pub fn iter(&self, block: BlockId) -> Iter<'_> {
        Iter {
            sched: self,
            at: self.first(block),
        }
    }

    pub fn nodes(&self, block: BlockId) -> Vec<NodeId> {
        self.iter(block).collect()
    }
}

pub struct Iter<'a> {
    sched: &'a Schedule,
    at: Option<NodeId>,
}

impl Iterator for Iter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let at = self.at?;
        self.at = self.sched.next(at);
        Some(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n).map(NodeId).collect()
    }

    #[test]
    fn append_and_iterate() {
        let block = BlockId(0);
        let n = ids(3);
        let mut sched = Schedule::new();

        for id in n.iter() {
            sched.append(block, *id);
        }

        assert_eq!(sched.nodes(block), n);
        assert_eq!(sched.first(block), Some(n[0]));
        assert_eq!(sched.last(block), Some(n[2]));
    }

    #[test]
    fn insert_before_head_and_after_tail() {
        let block = BlockId(0);
        let n = ids(4);
        let mut sched = Schedule::new();

        sched.append(block, n[1]);
        sched.insert_before(n[1], n[0]);
        sched.insert_after(n[1], n[2]);
        sched.insert_after(n[2], n[3]);

        assert_eq!(sched.nodes(block), n);
    }

    #[test]
    fn remove_relinks() {
        let block = BlockId(0);
        let n = ids(3);
        let mut sched = Schedule::new();

        for id in n.iter() {
            sched.append(block, *id);
        }

        sched.remove(n[1]);
        assert_eq!(sched.nodes(block), vec![n[0], n[2]]);
        assert!(!sched.is_scheduled(n[1]));

        sched.remove(n[0]);
        sched.remove(n[2]);
        assert_eq!(sched.first(block), None);
    }
}
