use super::{Block, BlockId, FrameLayout, Mode, Node, NodeId, NodeInfo, Op, Schedule};
use crate::opspec::{Opcode, Target};

/// A data use: `user` reads the value at input position `index`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Use {
    pub user: NodeId,
    pub index: usize,
}

/// The in-memory graph: dense node and block tables, exact out-edge
/// lists, the schedule side-table and the frame layout.
///
/// Newly created data and memory nodes are appended to their block's
/// schedule in creation order; that is the preliminary order the
/// spiller walks before the list scheduler rebuilds it.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    infos: Vec<NodeInfo>,
    users: Vec<Vec<Use>>,
    dep_users: Vec<Vec<NodeId>>,
    removed: Vec<bool>,
    blocks: Vec<Block>,
    pub sched: Schedule,
    pub frame: FrameLayout,
    frame_ptr: Option<NodeId>,
}

impl Graph {
    /// An empty graph with its entry block already created.
    pub fn new() -> Self {
        let mut graph = Self::default();
        graph.add_block();
        graph
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn frame_ptr(&self) -> Option<NodeId> {
        self.frame_ptr
    }

    pub fn set_frame_ptr(&mut self, node: NodeId) {
        self.frame_ptr = Some(node);
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(Block::default());
        BlockId(self.blocks.len() - 1)
    }

    /// Set the control-flow predecessors of `block`. The position of a
    /// predecessor is the edge index phi inputs refer to.
    pub fn set_preds(&mut self, block: BlockId, preds: Vec<BlockId>) {
        assert!(self.blocks[block.0].preds.is_empty());

        for pred in preds.iter() {
            self.blocks[pred.0].succs.push(block);
        }

        self.blocks[block.0].preds = preds;
    }

    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        &self.blocks[block.0].preds
    }

    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        &self.blocks[block.0].succs
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// All live nodes of a block, in creation order.
    pub fn block_nodes(&self, block: BlockId) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks[block.0]
            .nodes
            .iter()
            .copied()
            .filter(|id| !self.removed[id.0])
    }

    pub fn add(&mut self, block: BlockId, op: Op, mode: Mode, ins: &[NodeId]) -> NodeId {
        self.add_with_info(block, op, mode, ins, NodeInfo::default())
    }

    pub fn add_with_info(
        &mut self,
        block: BlockId,
        op: Op,
        mode: Mode,
        ins: &[NodeId],
        info: NodeInfo,
    ) -> NodeId {
        assert!(block.0 < self.blocks.len());

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            op,
            mode,
            ins: ins.to_vec(),
            deps: Vec::new(),
            block,
        });
        self.infos.push(info);
        self.users.push(Vec::new());
        self.dep_users.push(Vec::new());
        self.removed.push(false);
        self.blocks[block.0].nodes.push(id);

        for (index, value) in ins.iter().enumerate() {
            self.users[value.0].push(Use { user: id, index });
        }

        if op.in_schedule() {
            self.sched.append(block, id);
        }

        id
    }

    /// Create a target instruction, attaching the register requirements
    /// from the operation table.
    pub fn add_machine(
        &mut self,
        block: BlockId,
        target: &Target,
        op: Opcode,
        mode: Mode,
        ins: &[NodeId],
    ) -> NodeId {
        let spec = target.op(op);
        assert_eq!(spec.ins.len(), ins.len(), "{} arity mismatch", spec.name);

        let info = NodeInfo::new(spec.ins.clone(), spec.outs.clone());
        self.add_with_info(block, Op::Machine(op), mode, ins, info)
    }

    /// Create the projection extracting output `index` of a tuple node.
    /// The projection carries a copy of the tuple's output requirement.
    pub fn add_proj(&mut self, tuple: NodeId, index: usize, mode: Mode) -> NodeId {
        assert_eq!(self.mode(tuple), Mode::Tuple);

        let req = self.infos[tuple.0].outs.get(index).cloned().flatten();
        let info = NodeInfo::new(vec![None], vec![req]);
        self.add_with_info(self.block_of(tuple), Op::Proj(index), mode, &[tuple], info)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        assert!(!self.removed[id.0], "{} was removed", id);
        &self.nodes[id.0]
    }

    pub fn op(&self, id: NodeId) -> Op {
        self.node(id).op
    }

    pub fn mode(&self, id: NodeId) -> Mode {
        self.node(id).mode
    }

    pub fn block_of(&self, id: NodeId) -> BlockId {
        self.node(id).block
    }

    pub fn ins(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).ins
    }

    pub fn input(&self, id: NodeId, index: usize) -> NodeId {
        self.node(id).ins[index]
    }

    pub fn deps(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).deps
    }

    pub fn users(&self, id: NodeId) -> &[Use] {
        &self.users[id.0]
    }

    pub fn dep_users(&self, id: NodeId) -> &[NodeId] {
        &self.dep_users[id.0]
    }

    pub fn info(&self, id: NodeId) -> &NodeInfo {
        &self.infos[id.0]
    }

    pub fn info_mut(&mut self, id: NodeId) -> &mut NodeInfo {
        &mut self.infos[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len())
            .map(NodeId)
            .filter(|id| !self.removed[id.0])
    }

    /// Redirect input `index` of `node` to `value`, keeping the
    /// out-edge lists exact.
    pub fn set_input(&mut self, node: NodeId, index: usize, value: NodeId) {
        let old = self.nodes[node.0].ins[index];
        if old == value {
            return;
        }

        self.users[old.0].retain(|u| !(u.user == node && u.index == index));
        self.users[value.0].push(Use { user: node, index });
        self.nodes[node.0].ins[index] = value;
    }

    /// Add an ordering-only edge: `node` must come after `dep` in its
    /// block's schedule.
    pub fn add_dep(&mut self, node: NodeId, dep: NodeId) {
        if self.nodes[node.0].deps.contains(&dep) {
            return;
        }

        self.nodes[node.0].deps.push(dep);
        self.dep_users[dep.0].push(node);
    }

    pub fn is_phi(&self, id: NodeId) -> bool {
        self.op(id).is_phi()
    }

    pub fn is_proj(&self, id: NodeId) -> bool {
        self.op(id).is_proj()
    }

    /// The underlying value-producing node: a projection's tuple,
    /// otherwise the node itself.
    pub fn skip_proj(&self, id: NodeId) -> NodeId {
        match self.op(id) {
            Op::Proj(_) => self.input(id, 0),
            _ => id,
        }
    }

    /// The projections of a tuple node, sorted by projection index.
    pub fn projs(&self, tuple: NodeId) -> Vec<NodeId> {
        let mut projs: Vec<NodeId> = self
            .users(tuple)
            .iter()
            .map(|u| u.user)
            .filter(|id| !self.removed[id.0] && self.is_proj(*id))
            .collect();
        projs.sort_by_key(|id| match self.op(*id) {
            Op::Proj(index) => index,
            _ => unreachable!(),
        });
        projs.dedup();
        projs
    }

    /// Unlink a node from its block and schedule. The node must have no
    /// remaining users.
    pub fn remove(&mut self, id: NodeId) {
        assert!(self.users[id.0].is_empty(), "{} still has users", id);
        assert!(self.dep_users[id.0].is_empty(), "{} still has dependants", id);

        let ins = std::mem::take(&mut self.nodes[id.0].ins);
        for (index, value) in ins.into_iter().enumerate() {
            self.users[value.0].retain(|u| !(u.user == id && u.index == index));
        }

        let deps = std::mem::take(&mut self.nodes[id.0].deps);
        for dep in deps {
            self.dep_users[dep.0].retain(|n| *n != id);
        }

        if self.sched.is_scheduled(id) {
            self.sched.remove(id);
        }

        self.removed[id.0] = true;
    }

    pub fn is_removed(&self, id: NodeId) -> bool {
        self.removed[id.0]
    }
}
