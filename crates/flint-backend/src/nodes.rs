//! Constructors for the nodes the backend introduces into the graph.
//! Each attaches the register requirements its operands carry and
//! places the node in the schedule where the pipeline expects it.

use flint_common::ir::{BlockId, EntityId, Graph, Mode, NodeFlags, NodeId, NodeInfo, Op};
use flint_common::opspec::Target;
use flint_common::regs::{ClassId, RegReq, RegisterSet, ReqFlags};

use crate::value_req;

/// The schedule position after which a spill of `value` must go: the
/// last projection for tuple outputs, the last phi for phi values, the
/// defining node otherwise.
pub fn def_anchor(graph: &Graph, value: NodeId) -> NodeId {
    if graph.is_proj(value) {
        let tuple = graph.skip_proj(value);
        return *graph.projs(tuple).last().unwrap();
    }

    if graph.is_phi(value) {
        let block = graph.block_of(value);
        let mut last = value;
        for node in graph.sched.iter(block) {
            if !graph.is_phi(node) {
                break;
            }
            last = node;
        }
        return last;
    }

    value
}

/// Store `value` to its frame entity. Scheduled directly after the
/// definition.
pub fn spill(graph: &mut Graph, value: NodeId, entity: EntityId) -> NodeId {
    let req = value_req(graph, value)
        .unwrap_or_else(|| panic!("spilled value {} has no register requirement", value))
        .clone();
    let anchor = def_anchor(graph, value);
    let block = graph.block_of(value);

    let mut info = NodeInfo::new(vec![Some(RegReq::class(req.class))], vec![None]);
    info.entity = Some(entity);

    let spill = graph.add_with_info(block, Op::Spill, Mode::Memory, &[value], info);
    graph.sched.move_after(anchor, spill);
    spill
}

/// Load a spilled value back from its frame entity. The result is
/// rematerializable. The caller repositions the node; `mem` is the
/// producing spill when there is exactly one.
pub fn reload(
    graph: &mut Graph,
    block: BlockId,
    mem: Option<NodeId>,
    class: ClassId,
    mode: Mode,
    entity: EntityId,
) -> NodeId {
    let ins: Vec<NodeId> = mem.into_iter().collect();
    let in_reqs = ins.iter().map(|_| None).collect();

    let mut info = NodeInfo::new(in_reqs, vec![Some(RegReq::class(class))]);
    info.entity = Some(entity);
    info.flags |= NodeFlags::REMAT;

    graph.add_with_info(block, Op::Reload, mode, &ins, info)
}

/// A permutation of `values` onto fresh projections, scheduled before
/// `before`. Input and output requirements mirror each other, so the
/// node is requirement-bijective by construction.
pub fn perm(
    graph: &mut Graph,
    block: BlockId,
    values: &[NodeId],
    before: NodeId,
) -> (NodeId, Vec<NodeId>) {
    assert!(!values.is_empty());

    let reqs: Vec<Option<RegReq>> = values
        .iter()
        .map(|value| {
            let req = value_req(graph, *value)
                .unwrap_or_else(|| panic!("perm over {} without requirement", value));
            Some(RegReq::class(req.class))
        })
        .collect();

    let info = NodeInfo::new(reqs.clone(), reqs);
    let perm = graph.add_with_info(block, Op::Perm, Mode::Tuple, values, info);
    graph.sched.move_before(before, perm);

    let mut projs = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let proj = graph.add_proj(perm, index, graph.mode(*value));
        projs.push(proj);
    }
    for proj in projs.iter().rev() {
        graph.sched.move_after(perm, *proj);
    }

    (perm, projs)
}

/// A register-to-register copy. The result should share its source's
/// register when possible.
pub fn copy(graph: &mut Graph, block: BlockId, value: NodeId) -> NodeId {
    let req = value_req(graph, value)
        .unwrap_or_else(|| panic!("copy of {} without requirement", value))
        .clone();

    let info = NodeInfo::new(
        vec![Some(RegReq::class(req.class))],
        vec![Some(RegReq::same_as(req.class, 0))],
    );
    graph.add_with_info(block, Op::Copy, graph.mode(value), &[value], info)
}

/// Pin the liveness of `values` until this point.
pub fn keep(graph: &mut Graph, block: BlockId, values: &[NodeId]) -> NodeId {
    let reqs = values
        .iter()
        .map(|value| value_req(graph, *value).map(|req| RegReq::class(req.class)))
        .collect();

    let info = NodeInfo::new(reqs, vec![]);
    graph.add_with_info(block, Op::Keep, Mode::Control, values, info)
}

/// A copy that additionally keeps `keeps` alive until it executes.
pub fn copy_keep(graph: &mut Graph, block: BlockId, value: NodeId, keeps: &[NodeId]) -> NodeId {
    let req = value_req(graph, value)
        .unwrap_or_else(|| panic!("copy of {} without requirement", value))
        .clone();

    let mut ins = vec![value];
    ins.extend_from_slice(keeps);

    let mut in_reqs: Vec<Option<RegReq>> = vec![Some(RegReq::class(req.class))];
    in_reqs.extend(
        keeps
            .iter()
            .map(|keep| value_req(graph, *keep).map(|r| RegReq::class(r.class))),
    );

    let info = NodeInfo::new(in_reqs, vec![Some(RegReq::same_as(req.class, 0))]);
    graph.add_with_info(block, Op::CopyKeep, graph.mode(value), &ins, info)
}

/// Permute spilled values between frame entities without touching
/// registers. Entity bookkeeping is the emitter's concern.
pub fn mem_perm(graph: &mut Graph, block: BlockId, values: &[NodeId]) -> NodeId {
    let reqs: Vec<Option<RegReq>> = values.iter().map(|_| None).collect();
    let info = NodeInfo::new(reqs.clone(), reqs);
    graph.add_with_info(block, Op::MemPerm, Mode::Tuple, values, info)
}

/// Adjust the stack pointer by a fixed byte offset.
pub fn inc_sp(graph: &mut Graph, block: BlockId, target: &Target, sp: NodeId, offset: i32) -> NodeId {
    let (class, index) = target.stack_pointer;
    let pinned = RegisterSet::single(index);

    let mut out = RegReq::limited(class, pinned);
    out.flags = ReqFlags::PRODUCES_SP | ReqFlags::IGNORE;

    let info = NodeInfo::new(
        vec![Some(RegReq::limited(class, pinned))],
        vec![Some(out)],
    );
    graph.add_with_info(block, Op::IncSp(offset), Mode::Ptr, &[sp], info)
}

/// Subtract a dynamic size from the stack pointer (alloca).
pub fn sub_sp(graph: &mut Graph, block: BlockId, target: &Target, sp: NodeId, size: NodeId) -> NodeId {
    sp_arith(graph, block, target, Op::SubSp, sp, size)
}

/// Add a dynamic size back onto the stack pointer.
pub fn add_sp(graph: &mut Graph, block: BlockId, target: &Target, sp: NodeId, size: NodeId) -> NodeId {
    sp_arith(graph, block, target, Op::AddSp, sp, size)
}

fn sp_arith(
    graph: &mut Graph,
    block: BlockId,
    target: &Target,
    op: Op,
    sp: NodeId,
    size: NodeId,
) -> NodeId {
    let (class, index) = target.stack_pointer;
    let pinned = RegisterSet::single(index);

    let mut out = RegReq::limited(class, pinned);
    out.flags = ReqFlags::PRODUCES_SP | ReqFlags::IGNORE;

    let info = NodeInfo::new(
        vec![Some(RegReq::limited(class, pinned)), Some(RegReq::class(class))],
        vec![Some(out)],
    );
    graph.add_with_info(block, op, Mode::Ptr, &[sp, size], info)
}

/// A call through `callee`. The tuple carries the memory chain and one
/// result value; callers project what they need.
pub fn call(
    graph: &mut Graph,
    block: BlockId,
    class: ClassId,
    mem: NodeId,
    callee: NodeId,
    args: &[NodeId],
) -> NodeId {
    let mut ins = vec![mem, callee];
    ins.extend_from_slice(args);

    let mut in_reqs: Vec<Option<RegReq>> = vec![None, Some(RegReq::class(class))];
    in_reqs.extend(args.iter().map(|_| Some(RegReq::class(class))));

    let info = NodeInfo::new(in_reqs, vec![None, Some(RegReq::class(class))]);
    graph.add_with_info(block, Op::Call, Mode::Tuple, &ins, info)
}

/// Return from the function with `values`.
pub fn ret(graph: &mut Graph, block: BlockId, mem: NodeId, values: &[NodeId]) -> NodeId {
    let mut ins = vec![mem];
    ins.extend_from_slice(values);

    let mut in_reqs: Vec<Option<RegReq>> = vec![None];
    in_reqs.extend(
        values
            .iter()
            .map(|value| value_req(graph, *value).map(|req| RegReq::class(req.class))),
    );

    let info = NodeInfo::new(in_reqs, vec![]);
    graph.add_with_info(block, Op::Return, Mode::Control, &ins, info)
}

/// The address of a frame entity relative to the frame base.
pub fn frame_addr(
    graph: &mut Graph,
    block: BlockId,
    class: ClassId,
    frame: NodeId,
    entity: EntityId,
) -> NodeId {
    let mut info = NodeInfo::new(
        vec![Some(RegReq::class(class))],
        vec![Some(RegReq::class(class))],
    );
    info.entity = Some(entity);
    graph.add_with_info(block, Op::FrameAddr, Mode::Ptr, &[frame], info)
}

/// Pass values through unchanged while pinning everything behind it.
/// Output i carries the same requirement as input i.
pub fn barrier(graph: &mut Graph, block: BlockId, values: &[NodeId]) -> NodeId {
    let in_reqs: Vec<Option<RegReq>> = values
        .iter()
        .map(|value| value_req(graph, *value).map(|req| RegReq::class(req.class)))
        .collect();
    let out_reqs: Vec<Option<RegReq>> = in_reqs
        .iter()
        .enumerate()
        .map(|(index, req)| {
            req.as_ref()
                .map(|req| RegReq::same_as(req.class, index))
        })
        .collect();

    let info = NodeInfo::new(in_reqs, out_reqs);
    graph.add_with_info(block, Op::Barrier, Mode::Tuple, values, info)
}

/// The number of bytes a node moves the stack pointer by.
pub fn sp_bias(graph: &Graph, node: NodeId) -> i32 {
    match graph.op(node) {
        Op::IncSp(offset) => offset,
        _ => 0,
    }
}

/// Materialize the incoming parameter registers as projections.
pub fn reg_params(
    graph: &mut Graph,
    block: BlockId,
    class: ClassId,
    regs: &[usize],
) -> (NodeId, Vec<NodeId>) {
    let outs: Vec<Option<RegReq>> = regs
        .iter()
        .map(|reg| Some(RegReq::limited(class, RegisterSet::single(*reg))))
        .collect();

    let info = NodeInfo::new(vec![], outs);
    let params = graph.add_with_info(block, Op::RegParams, Mode::Tuple, &[], info);

    let mode = Mode::Int32;
    let projs = regs
        .iter()
        .enumerate()
        .map(|(index, _)| graph.add_proj(params, index, mode))
        .collect();

    (params, projs)
}
