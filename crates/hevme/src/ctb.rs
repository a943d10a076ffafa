//! L0 (finest layer) search: per-CTB candidate construction, fullpel and
//! subpel refinement, bi-prediction and merge evaluation, partition
//! selection, and output writeback.
//!
//! The CTB walks its sixteen 16x16 blocks, searches all 17 partitions of
//! each, then folds the results up the CU tree (16 -> 32 -> 64) deciding
//! split-vs-merge at every level.

use hevme_core::{
    CtbOutput, CuCost, FrameParams, MotionVector, MvRange, PartitionId, PartitionType, Plane,
    PredDir, PresetParams, PuEntry, SearchNode, CTB_SIZE, MAX_COST,
};
use hevme_kernels::{
    avg_pred, block_variance, lambda_q, sad, satd_mxn, stim_factor_q30,
    stim_injected_distortion, MvResolution, PredCtxt, RefBitsTable,
};
use tracing::trace;

use crate::arena::ScratchArena;
use crate::candidates::{push_candidate, spatial_candidates, CandidateDedup, LayerScale};
use crate::fullpel::{fullpel_search_16x16, part_type_bits, FullpelParams, FullpelResults, L0Ref};
use crate::global_mv::scale_global_mv;
use crate::layer::{LayerCtxt, MvBank};
use crate::merge::{build_merge_list, is_skip, MergeCand, MergeNeighbours};
use crate::partition::{active_part_mask, select_partitions, CtbState, ScoredPartition};
use crate::subpel::{subpel_refine, SubpelRef};

/// Blocks of 16 pixels per CTB side.
const BLOCKS_PER_CTB: usize = CTB_SIZE / 16;

/// STIM bias strength in Q4 when the noise-aware path is active.
const STIM_ALPHA_Q4: u32 = 4;

/// Parameters of the L0 stage, fixed per picture.
pub struct CtbParams {
    pub frame: FrameParams,
    pub preset: PresetParams,
    pub noise_aware: bool,
    pub frame_poc: i32,
}

/// Picture-level inputs to the CTB search.
pub struct CtbContext<'a> {
    pub src: &'a Plane,
    pub pic_w: usize,
    pub pic_h: usize,
    pub refs: &'a [L0Ref<'a>],
    /// Layer 1 of the same picture, already searched.
    pub parent: Option<&'a LayerCtxt>,
    pub parent_dims: Option<(usize, usize)>,
    /// Previous picture's L0 bank for colocated candidates.
    pub prev_bank: Option<&'a MvBank>,
    /// Global MV lobes per reference with their observation spans.
    pub global_mv: &'a [[MotionVector; 2]],
    pub global_mv_delta_poc: i32,
}

/// Best subpel result per partition and list of one 16x16 block.
struct SubpelOut {
    nodes: Vec<[Option<SearchNode>; 2]>,
}

/// Bi-prediction evaluation of one partition.
#[derive(Debug, Clone, Copy)]
struct BiEval {
    l0: SearchNode,
    l1: SearchNode,
    cost: u32,
}

/// Winning mode of one partition.
#[derive(Debug, Clone, Copy)]
enum PartWinner {
    Uni { node: SearchNode, list: usize },
    Bi(BiEval),
}

impl PartWinner {
    fn cost(&self) -> u32 {
        match self {
            PartWinner::Uni { node, .. } => node.total_cost,
            PartWinner::Bi(b) => b.cost,
        }
    }
}

/// Result of one 16x16 CU search.
struct Cu16Result {
    /// Pixel origin.
    x: usize,
    y: usize,
    ranked_types: Vec<ScoredPartition>,
    winners: Vec<Option<PartWinner>>,
    merge: Option<(MergeCand, u32, bool, u8)>,
    best_cost: u32,
    /// Best 2Nx2N node per list, used for upward CU-tree evaluation.
    best_full: [Option<SearchNode>; 2],
}

/// Search one CTB and write its output record.
///
/// Returns the terminal state, or the last state reached when the picture
/// has no usable blocks (fully outside the picture).
#[allow(clippy::too_many_arguments)]
pub fn search_ctb(
    ctb_x: usize,
    ctb_y: usize,
    ctx: &CtbContext<'_>,
    bank: &MvBank,
    prms: &CtbParams,
    arena: &mut ScratchArena,
    out: &mut CtbOutput,
) -> hevme_core::Result<CtbState> {
    let mut state = CtbState::Idle;
    out.ctb_x = ctb_x as u32;
    out.ctb_y = ctb_y as u32;
    out.pus.clear();
    out.cu_costs.clear();
    out.cu_rankings.clear();
    out.all_skip = true;

    let range = l0_mv_range(&prms.frame);
    let ref_bits = RefBitsTable::new(ctx.refs.len().max(1));

    // No references: every block degenerates to a zero-MV skip.
    if ctx.refs.is_empty() {
        for by in 0..BLOCKS_PER_CTB {
            for bx in 0..BLOCKS_PER_CTB {
                let x = ctb_x * CTB_SIZE + bx * 16;
                let y = ctb_y * CTB_SIZE + by * 16;
                if x >= ctx.pic_w || y >= ctx.pic_h {
                    continue;
                }
                out.pus.push(zero_skip_pu(x, y));
            }
        }
        state.advance(CtbState::CandidatesBuilt);
        state.advance(CtbState::FpelRefined);
        state.advance(CtbState::SubpelRefined);
        state.advance(CtbState::BiEvaluated);
        state.advance(CtbState::MergeEvaluated);
        state.advance(CtbState::PartitionSelected);
        state.advance(CtbState::WrittenBack);
        return Ok(state);
    }

    // Stage 1-6 run per 16x16 block; the state machine tracks the CTB as a
    // whole, stages strictly forward.
    let mut cu16: Vec<Option<Cu16Result>> = Vec::with_capacity(BLOCKS_PER_CTB * BLOCKS_PER_CTB);
    for by in 0..BLOCKS_PER_CTB {
        for bx in 0..BLOCKS_PER_CTB {
            let x = ctb_x * CTB_SIZE + bx * 16;
            let y = ctb_y * CTB_SIZE + by * 16;
            if x >= ctx.pic_w || y >= ctx.pic_h {
                cu16.push(None);
                continue;
            }
            let result = search_cu16(x, y, ctx, bank, prms, &range, &ref_bits, arena)?;
            cu16.push(Some(result));
        }
    }
    state.advance(CtbState::CandidatesBuilt);
    state.advance(CtbState::FpelRefined);
    state.advance(CtbState::SubpelRefined);
    state.advance(CtbState::BiEvaluated);
    state.advance(CtbState::MergeEvaluated);

    // CU-tree fold: decide 32x32 and 64x64 merges bottom-up.
    emit_ctb_pus(ctb_x, ctb_y, ctx, prms, &cu16, out);
    state.advance(CtbState::PartitionSelected);

    // Writeback: winning block MVs become the neighbour context of the
    // following CTBs.
    for (i, cu) in cu16.iter().enumerate() {
        let Some(cu) = cu else { continue };
        let bx = (ctb_x * CTB_SIZE + (i % BLOCKS_PER_CTB) * 16) / 16;
        let by = (ctb_y * CTB_SIZE + (i / BLOCKS_PER_CTB) * 16) / 16;
        for list in 0..2 {
            if let Some(node) = cu.best_full[list] {
                bank.insert(bx, by, node.ref_idx.max(0) as usize, node);
            }
        }
    }
    state.advance(CtbState::WrittenBack);
    trace!(ctb_x, ctb_y, pus = out.pus.len(), "ctb written back");
    Ok(state)
}

fn zero_skip_pu(x: usize, y: usize) -> PuEntry {
    PuEntry {
        x: x as u16,
        y: y as u16,
        w: 16,
        h: 16,
        mv_l0: (0, 0),
        mv_l1: (0, 0),
        ref_l0: -1,
        ref_l1: -1,
        pred_dir: PredDir::L0,
        merge_flag: true,
        merge_idx: 0,
    }
}

/// Fullpel MV range at layer 0 from the frame parameters.
fn l0_mv_range(frame: &FrameParams) -> MvRange {
    MvRange::symmetric(frame.mv_range_x, frame.mv_range_y)
}

/// Search one 16x16 block: candidates, fullpel, subpel, bi, merge, and
/// per-CU partition ranking.
#[allow(clippy::too_many_arguments)]
fn search_cu16(
    x: usize,
    y: usize,
    ctx: &CtbContext<'_>,
    bank: &MvBank,
    prms: &CtbParams,
    range: &MvRange,
    ref_bits: &RefBitsTable,
    arena: &mut ScratchArena,
) -> hevme_core::Result<Cu16Result> {
    let (bx, by) = (x / 16, y / 16);
    let preset = &prms.preset;

    // Clip the frame-level range so the block plus MV, the 3x3 refinement
    // grid, and the subpel interpolation taps all stay inside the padded
    // picture.
    let range = &block_window_range(ctx, x, y, 16).intersect(range);

    // --- Candidate construction ---
    let mut dedup = CandidateDedup::new(bx, by);
    let mut cands: Vec<SearchNode> = Vec::new();
    for r in ctx.refs {
        let ref_idx = r.ref_idx;
        // Projected parent-layer results.
        if let (Some(parent), Some((pw, ph))) = (ctx.parent, ctx.parent_dims) {
            let scale = LayerScale::between((ctx.pic_w, ctx.pic_h), (pw, ph));
            let pbx = (x * pw / ctx.pic_w / parent.bank.block_size()) as isize;
            let pby = (y * ph / ctx.pic_h / parent.bank.block_size()) as isize;
            let mut taken = 0usize;
            'outer: for (dy, dx) in [(0isize, 0isize), (0, 1), (1, 0), (1, 1)] {
                if let Some(set) = parent.bank.results(pbx + dx, pby + dy, ref_idx) {
                    for node in set.nodes() {
                        if taken >= preset.max_num_coloc_cands {
                            break 'outer;
                        }
                        let projected =
                            SearchNode { mv: scale.project(node.mv, range), ..*node };
                        push_candidate(&mut cands, &mut dedup, projected, range);
                        taken += 1;
                    }
                }
            }
        }
        // Spatial causal neighbours from the L0 bank.
        let spatial = spatial_candidates(bank, bx, by, 1, ref_idx);
        for node in [*spatial.left(), *spatial.top(), *spatial.top_left(), *spatial.top_right()]
        {
            // Bank MVs at L0 are quarter-pel; candidates here are fullpel.
            let mut fp = node;
            let (fx, fy) = node.mv.fullpel();
            fp.mv = MotionVector::new(fx, fy);
            push_candidate(&mut cands, &mut dedup, fp, range);
        }
        // Colocated temporal candidate.
        if let Some(prev) = ctx.prev_bank {
            if let Some(z) = prev.best(bx as isize, by as isize, ref_idx) {
                let mut fp = z;
                let (fx, fy) = z.mv.fullpel();
                fp.mv = MotionVector::new(fx, fy);
                push_candidate(&mut cands, &mut dedup, fp, range);
            }
        }
        // Global and zero.
        if preset.use_global_candidate {
            if let Some(lobes) = ctx.global_mv.get(ref_idx) {
                let delta = (prms.frame_poc - r.poc).abs();
                let lobe = if r.is_past { lobes[0] } else { lobes[1] };
                let gmv = scale_global_mv(lobe, ctx.global_mv_delta_poc, delta);
                push_candidate(
                    &mut cands,
                    &mut dedup,
                    SearchNode::candidate(gmv, ref_idx as i8),
                    range,
                );
            }
        }
        push_candidate(
            &mut cands,
            &mut dedup,
            SearchNode::candidate(MotionVector::ZERO, ref_idx as i8),
            range,
        );
    }

    // Activity hint for partition limiting: quadrant variance spread.
    let split_hint = quadrant_variance_spread(ctx.src, x, y);
    let part_mask = active_part_mask(preset, split_hint);

    // --- Fullpel refinement ---
    let pred_ctxts = build_pred_ctxts(bank, bx, by, prms, ref_bits);
    let fp_prms = FullpelParams {
        lambda: prms.frame.lambda,
        lambda_q_shift: prms.frame.lambda_q_shift,
        max_refine_centers: preset.max_num_fpel_refine_centers,
        results_per_part: preset.max_num_subpel_cands_per_part.max(1),
        part_mask,
        pred_ctxt: &pred_ctxts,
    };
    let fpel = fullpel_search_16x16(ctx.src, x as i32, y as i32, ctx.refs, &cands, range, &fp_prms);

    // --- Subpel refinement ---
    let qpel_range = MvRange {
        min_x: range.min_x.saturating_mul(4),
        max_x: range.max_x.saturating_mul(4),
        min_y: range.min_y.saturating_mul(4),
        max_y: range.max_y.saturating_mul(4),
    };
    let mut scratch = arena.take(16 * 16)?;
    let subpel = refine_subpel(
        x, y, ctx, &fpel, &part_mask, preset, &qpel_range, &mut scratch,
    );

    // --- Bi-prediction evaluation ---
    let bi = if prms.frame.bidir_enabled {
        eval_bipred(x, y, ctx, &subpel, &part_mask, prms, arena)?
    } else {
        vec![None; hevme_core::NUM_PARTITIONS]
    };

    // --- Merge evaluation ---
    let merge = eval_merge(x, y, ctx, bank, prms, arena)?;

    // --- Partition ranking for this CU ---
    let mut winners: Vec<Option<PartWinner>> = vec![None; hevme_core::NUM_PARTITIONS];
    for id in part_mask.ids() {
        let mut best: Option<PartWinner> = None;
        for list in 0..2 {
            if let Some(node) = subpel.nodes[id.index()][list] {
                if best.as_ref().map_or(true, |b| node.total_cost < b.cost()) {
                    best = Some(PartWinner::Uni { node, list });
                }
            }
        }
        if let Some(b) = bi[id.index()] {
            if best.as_ref().map_or(true, |w| b.cost < w.cost()) {
                best = Some(PartWinner::Bi(b));
            }
        }
        winners[id.index()] = best;
    }

    let mut scored: Vec<ScoredPartition> = Vec::new();
    for ty in PartitionType::ALL {
        let mut total = 0u32;
        let mut complete = true;
        for id in ty.part_ids() {
            match &winners[id.index()] {
                Some(w) => total = total.saturating_add(w.cost()),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            scored.push(ScoredPartition { part_type: ty, cost: total });
        }
    }
    let ranked = select_partitions(scored, 4);

    let mut best_cost = ranked.first().map(|s| s.cost).unwrap_or(MAX_COST);
    if let Some((_, cost, _, _)) = &merge {
        best_cost = best_cost.min(*cost);
    }

    let best_full = [
        subpel.nodes[PartitionId::Part2Nx2N.index()][0],
        subpel.nodes[PartitionId::Part2Nx2N.index()][1],
    ];

    arena.put(scratch);
    arena.reset();

    Ok(Cu16Result { x, y, ranked_types: ranked, winners, merge, best_cost, best_full })
}

/// Fullpel MV window keeping a `size`-wide read (plus refinement-grid and
/// interpolation slack of 4) inside the padded picture.
fn block_window_range(ctx: &CtbContext<'_>, x: usize, y: usize, size: usize) -> MvRange {
    let pad = ctx.src.pad() as i32;
    let slack = pad - 4;
    MvRange {
        min_x: (-slack - x as i32).clamp(i16::MIN as i32, 0) as i16,
        max_x: (ctx.pic_w as i32 + slack - size as i32 - x as i32).max(0) as i16,
        min_y: (-slack - y as i32).clamp(i16::MIN as i32, 0) as i16,
        max_y: (ctx.pic_h as i32 + slack - size as i32 - y as i32).max(0) as i16,
    }
}

/// Spread between the quadrant variances of a 16x16 block, the split hint
/// for partition limiting.
fn quadrant_variance_spread(src: &Plane, x: usize, y: usize) -> bool {
    let mut lo = u64::MAX;
    let mut hi = 0u64;
    for (qx, qy) in [(0usize, 0usize), (8, 0), (0, 8), (8, 8)] {
        let view = src.view((x + qx) as isize, (y + qy) as isize);
        let (_, var) = block_variance(view.data, src.stride(), 8, 8);
        lo = lo.min(var);
        hi = hi.max(var);
    }
    hi > 4 * lo.max(1)
}

/// Per-list prediction contexts anchored on the block's causal neighbours.
fn build_pred_ctxts(
    bank: &MvBank,
    bx: usize,
    by: usize,
    prms: &CtbParams,
    ref_bits: &RefBitsTable,
) -> [PredCtxt; 2] {
    let spatial = spatial_candidates(bank, bx, by, 1, 0);
    let make = |list: usize| PredCtxt {
        tl: *spatial.top_left(),
        t: *spatial.top(),
        tr: *spatial.top_right(),
        l: *spatial.left(),
        bl: SearchNode::unavailable(0),
        coloc: SearchNode::candidate(MotionVector::ZERO, 0),
        zero: SearchNode::candidate(MotionVector::ZERO, 0),
        pred_lx: list,
        lambda: prms.frame.lambda,
        lambda_q_shift: prms.frame.lambda_q_shift,
        // Bank MVs at L0 are stored in quarter-pel.
        pred_resolution: MvResolution::Qpel,
        ref_bits: ref_bits.clone(),
    };
    [make(0), make(1)]
}

/// Subpel-refine the best fullpel results per partition and list.
#[allow(clippy::too_many_arguments)]
fn refine_subpel(
    x: usize,
    y: usize,
    ctx: &CtbContext<'_>,
    fpel: &FullpelResults,
    part_mask: &hevme_core::PartMask,
    preset: &PresetParams,
    qpel_range: &MvRange,
    scratch: &mut Vec<u8>,
) -> SubpelOut {
    let mut out = SubpelOut { nodes: vec![[None; 2]; hevme_core::NUM_PARTITIONS] };
    for id in part_mask.ids() {
        let (gx, gy, gw, gh) = id.geometry(16);
        for list in 0..2 {
            let set = fpel.results(id, list);
            for node in set.nodes().iter().take(preset.max_num_subpel_cands_per_part) {
                let r = match ctx.refs.iter().find(|r| r.ref_idx as i8 == node.ref_idx) {
                    Some(r) => r,
                    None => continue,
                };
                let sub = SubpelRef { full: r.full, planes: r.subpel };
                let refined = subpel_refine(
                    r.src_for(ctx.src),
                    &sub,
                    (x + gx as usize) as i32,
                    (y + gy as usize) as i32,
                    gw as usize,
                    gh as usize,
                    node,
                    qpel_range,
                    preset.use_satd_subpel,
                    scratch,
                );
                let slot = &mut out.nodes[id.index()][list];
                if slot.map_or(true, |s| refined.total_cost < s.total_cost) {
                    *slot = Some(refined);
                }
            }
        }
    }
    out
}

/// Pair the best L0/L1 results per partition and score the averaged
/// prediction.
fn eval_bipred(
    x: usize,
    y: usize,
    ctx: &CtbContext<'_>,
    subpel: &SubpelOut,
    part_mask: &hevme_core::PartMask,
    prms: &CtbParams,
    arena: &mut ScratchArena,
) -> hevme_core::Result<Vec<Option<BiEval>>> {
    let mut out = vec![None; hevme_core::NUM_PARTITIONS];
    let mut p0 = arena.take(16 * 16)?;
    let mut p1 = arena.take(16 * 16)?;
    let mut avg = arena.take(16 * 16)?;

    for id in part_mask.ids() {
        let (Some(n0), Some(n1)) =
            (subpel.nodes[id.index()][0], subpel.nodes[id.index()][1])
        else {
            continue;
        };
        let (r0, r1) = match (
            ctx.refs.iter().find(|r| r.ref_idx as i8 == n0.ref_idx),
            ctx.refs.iter().find(|r| r.ref_idx as i8 == n1.ref_idx),
        ) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        let (gx, gy, gw, gh) = id.geometry(16);
        let (px, py) = ((x + gx as usize) as i32, (y + gy as usize) as i32);
        let (w, h) = (gw as usize, gh as usize);

        p0.clear();
        p0.resize(w * h, 0);
        p1.clear();
        p1.resize(w * h, 0);
        avg.clear();
        avg.resize(w * h, 0);
        SubpelRef { full: r0.full, planes: r0.subpel }.interp_into(px, py, n0.mv, w, h, &mut p0);
        SubpelRef { full: r1.full, planes: r1.subpel }.interp_into(px, py, n1.mv, w, h, &mut p1);
        avg_pred(&p0, w, &p1, w, &mut avg, w, w, h);

        let src_view = ctx.src.view(px as isize, py as isize);
        let dist = if prms.preset.use_satd_subpel {
            satd_mxn(src_view.data, ctx.src.stride(), &avg, w, w, h)
        } else {
            sad(src_view.data, ctx.src.stride(), &avg, w, w, h)
        };
        let bits = part_type_bits(id);
        let cost = dist
            + n0.mv_cost
            + n1.mv_cost
            + lambda_q(bits, prms.frame.lambda, prms.frame.lambda_q_shift);
        out[id.index()] = Some(BiEval { l0: n0, l1: n1, cost });
    }

    arena.put(p0);
    arena.put(p1);
    arena.put(avg);
    Ok(out)
}

/// Build and score the merge candidate list for one 16x16 block.
fn eval_merge(
    x: usize,
    y: usize,
    ctx: &CtbContext<'_>,
    bank: &MvBank,
    prms: &CtbParams,
    arena: &mut ScratchArena,
) -> hevme_core::Result<Option<(MergeCand, u32, bool, u8)>> {
    let (bx, by) = (x as isize / 16, y as isize / 16);

    // Spatial neighbour motion from the L0 bank, per HEVC position.
    let fetch = |dx: isize, dy: isize| -> Option<MergeCand> {
        for r in ctx.refs {
            if let Some(node) = bank.best(bx + dx, by + dy, r.ref_idx) {
                if node.is_avail {
                    return Some(MergeCand::uni(r.list, node.mv, r.idx_in_list));
                }
            }
        }
        None
    };
    let neighbours = MergeNeighbours {
        a1: fetch(-1, 0),
        b1: fetch(0, -1),
        b0: fetch(1, -1),
        a0: None,
        b2: fetch(-1, -1),
    };
    let coloc = ctx.prev_bank.and_then(|prev| {
        ctx.refs.iter().find_map(|r| {
            prev.best(bx, by, r.ref_idx)
                .filter(|n| n.is_avail)
                .map(|n| MergeCand::uni(r.list, n.mv, r.idx_in_list))
        })
    });

    let mut list = build_merge_list(
        &neighbours,
        coloc,
        prms.frame.bidir_enabled,
        prms.preset.max_merge_candidates,
    );
    if list.is_empty() {
        return Ok(None);
    }

    // Inherited MVs were found for neighbouring blocks; clip them to this
    // block's read window.
    let win = block_window_range(ctx, x, y, 16);
    let qwin = MvRange {
        min_x: win.min_x.saturating_mul(4),
        max_x: win.max_x.saturating_mul(4),
        min_y: win.min_y.saturating_mul(4),
        max_y: win.max_y.saturating_mul(4),
    };
    for cand in list.iter_mut() {
        cand.mv[0] = cand.mv[0].clamp(&qwin);
        cand.mv[1] = cand.mv[1].clamp(&qwin);
    }

    let mut pred = arena.take(16 * 16)?;
    let mut pred1 = arena.take(16 * 16)?;
    let mut best: Option<(MergeCand, u32, bool, u8)> = None;
    let src_view = ctx.src.view(x as isize, y as isize);

    for (idx, cand) in list.iter().enumerate() {
        let dist = match merge_distortion(
            x, y, ctx, cand, &mut pred, &mut pred1, &src_view, prms,
        ) {
            Some(d) => d,
            None => continue,
        };
        // Merge index rate: unary
        let cost = dist
            + lambda_q(idx as u32 + 1, prms.frame.lambda, prms.frame.lambda_q_shift);
        if best.as_ref().map_or(true, |(_, c, _, _)| cost < *c) {
            let skip = is_skip(dist, 16 * 16, prms.frame.qstep);
            best = Some((*cand, cost, skip, idx as u8));
        }
    }
    arena.put(pred);
    arena.put(pred1);
    Ok(best)
}

/// Distortion of one merge candidate's full-block prediction.
#[allow(clippy::too_many_arguments)]
fn merge_distortion(
    x: usize,
    y: usize,
    ctx: &CtbContext<'_>,
    cand: &MergeCand,
    pred: &mut Vec<u8>,
    pred1: &mut Vec<u8>,
    src_view: &hevme_core::PlaneView<'_>,
    prms: &CtbParams,
) -> Option<u32> {
    let find = |list: usize, idx_in_list: i8| {
        ctx.refs.iter().find(|r| r.list == list && r.idx_in_list == idx_in_list)
    };
    pred.clear();
    pred.resize(16 * 16, 0);

    let dist_of = |buf: &[u8]| {
        if prms.preset.use_satd_subpel {
            satd_mxn(src_view.data, ctx.src.stride(), buf, 16, 16, 16)
        } else {
            sad(src_view.data, ctx.src.stride(), buf, 16, 16, 16)
        }
    };

    match cand.dir {
        PredDir::L0 | PredDir::L1 => {
            let list = if cand.dir == PredDir::L0 { 0 } else { 1 };
            let r = find(list, cand.ref_idx[list])?;
            SubpelRef { full: r.full, planes: r.subpel }.interp_into(
                x as i32, y as i32, cand.mv[list], 16, 16, pred,
            );
            Some(dist_of(pred))
        }
        PredDir::Bi => {
            let r0 = find(0, cand.ref_idx[0])?;
            let r1 = find(1, cand.ref_idx[1])?;
            pred1.clear();
            pred1.resize(16 * 16, 0);
            SubpelRef { full: r0.full, planes: r0.subpel }.interp_into(
                x as i32, y as i32, cand.mv[0], 16, 16, pred,
            );
            SubpelRef { full: r1.full, planes: r1.subpel }.interp_into(
                x as i32, y as i32, cand.mv[1], 16, 16, pred1,
            );
            let mut avg = vec![0u8; 16 * 16];
            avg_pred(pred, 16, pred1, 16, &mut avg, 16, 16, 16);
            Some(dist_of(&avg))
        }
    }
}

/// Fold CU16 results up the tree, emitting PUs for the whole CTB.
fn emit_ctb_pus(
    ctb_x: usize,
    ctb_y: usize,
    ctx: &CtbContext<'_>,
    prms: &CtbParams,
    cu16: &[Option<Cu16Result>],
    out: &mut CtbOutput,
) {
    // Evaluate each 32x32 quadrant: split (sum of children) vs one 32x32
    // 2Nx2N PU at the best child MV.
    let mut cu32_merged: [Option<(SearchNode, usize, u32)>; 4] = [None; 4];
    let mut cu32_split_cost: [u32; 4] = [0; 4];
    let mut cu32_complete: [bool; 4] = [false; 4];

    for q in 0..4 {
        let (qx, qy) = (q % 2, q / 2);
        let children: Vec<&Cu16Result> = (0..4)
            .filter_map(|c| {
                let (cx, cy) = (c % 2, c / 2);
                cu16[(qy * 2 + cy) * BLOCKS_PER_CTB + qx * 2 + cx].as_ref()
            })
            .collect();
        if children.len() != 4 {
            continue;
        }
        cu32_complete[q] = true;
        cu32_split_cost[q] = children.iter().map(|c| c.best_cost).fold(0, u32::saturating_add);
        cu32_merged[q] = eval_merged_cu(
            ctb_x * CTB_SIZE + qx * 32,
            ctb_y * CTB_SIZE + qy * 32,
            32,
            ctx,
            prms,
            &children,
        );
    }

    // 64x64 merge requires all four quadrants.
    if cu32_complete.iter().all(|c| *c) {
        let children: Vec<&Cu16Result> = cu16.iter().flatten().collect();
        let (x64, y64) = (ctb_x * CTB_SIZE, ctb_y * CTB_SIZE);
        let split_total: u32 = (0..4)
            .map(|q| {
                cu32_merged[q]
                    .map(|(_, _, c)| c.min(cu32_split_cost[q]))
                    .unwrap_or(cu32_split_cost[q])
            })
            .fold(0, u32::saturating_add);
        let inter = eval_merged_cu(x64, y64, 64, ctx, prms, &children);
        let merge = merged_cu_zero_merge(x64, y64, 64, ctx, prms);
        let inter_cost = inter.map(|(_, _, c)| c).unwrap_or(MAX_COST);
        if let Some((mcost, skip)) = merge {
            if mcost <= inter_cost && mcost < split_total {
                push_merge_skip_pu(out, x64, y64, 64, mcost, skip);
                return;
            }
        }
        if let Some((node, list, cost)) = inter {
            if cost < split_total {
                push_cu_pu(out, x64, y64, 64, &node, list, cost, ctx);
                return;
            }
        }
    }

    for q in 0..4 {
        if !cu32_complete[q] {
            // Partial quadrant: emit each present 16x16 on its own.
            for c in 0..4 {
                let (cx, cy) = (c % 2, c / 2);
                let idx = ((q / 2) * 2 + cy) * BLOCKS_PER_CTB + (q % 2) * 2 + cx;
                if let Some(cu) = &cu16[idx] {
                    emit_cu16_pus(cu, out);
                }
            }
            continue;
        }
        let x32 = ctb_x * CTB_SIZE + (q % 2) * 32;
        let y32 = ctb_y * CTB_SIZE + (q / 2) * 32;
        if let Some((mcost, skip)) = merged_cu_zero_merge(x32, y32, 32, ctx, prms) {
            let inter_cost = cu32_merged[q].map(|(_, _, c)| c).unwrap_or(MAX_COST);
            if mcost <= inter_cost && mcost < cu32_split_cost[q] {
                push_merge_skip_pu(out, x32, y32, 32, mcost, skip);
                continue;
            }
        }
        match cu32_merged[q] {
            Some((node, list, cost)) if cost < cu32_split_cost[q] => {
                push_cu_pu(out, x32, y32, 32, &node, list, cost, ctx);
            }
            _ => {
                for c in 0..4 {
                    let (cx, cy) = (c % 2, c / 2);
                    let idx = ((q / 2) * 2 + cy) * BLOCKS_PER_CTB + (q % 2) * 2 + cx;
                    if let Some(cu) = &cu16[idx] {
                        emit_cu16_pus(cu, out);
                    }
                }
            }
        }
    }
}

/// Zero-MV merge cost of a merged CU: the full-size prediction at the
/// first reference with no motion, plus the merge-index bit. Returns the
/// cost and whether the residual quantises away (skip).
fn merged_cu_zero_merge(
    x: usize,
    y: usize,
    size: usize,
    ctx: &CtbContext<'_>,
    prms: &CtbParams,
) -> Option<(u32, bool)> {
    let r = ctx.refs.first()?;
    let src_plane = r.src_for(ctx.src);
    let src_view = src_plane.view(x as isize, y as isize);
    let ref_view = r.full.view(x as isize, y as isize);
    let dist = sad(
        src_view.data,
        src_plane.stride(),
        ref_view.data,
        r.full.stride(),
        size,
        size,
    );
    let cost = dist.saturating_add(lambda_q(1, prms.frame.lambda, prms.frame.lambda_q_shift));
    Some((cost, is_skip(dist, (size * size) as u32, prms.frame.qstep)))
}

fn push_merge_skip_pu(out: &mut CtbOutput, x: usize, y: usize, size: usize, cost: u32, skip: bool) {
    out.pus.push(PuEntry {
        x: x as u16,
        y: y as u16,
        w: size as u16,
        h: size as u16,
        mv_l0: (0, 0),
        mv_l1: (0, 0),
        ref_l0: 0,
        ref_l1: -1,
        pred_dir: PredDir::L0,
        merge_flag: true,
        merge_idx: 0,
    });
    out.cu_costs.push(CuCost { sad: cost, mv_cost: 0, total_cost: cost });
    if !skip {
        out.all_skip = false;
    }
}

/// Score a single 2Nx2N PU covering a merged CU, candidates drawn from the
/// children's winning MVs.
fn eval_merged_cu(
    x: usize,
    y: usize,
    size: usize,
    ctx: &CtbContext<'_>,
    prms: &CtbParams,
    children: &[&Cu16Result],
) -> Option<(SearchNode, usize, u32)> {
    let mut best: Option<(SearchNode, usize, u32)> = None;
    for child in children {
        for list in 0..2 {
            let Some(node) = child.best_full[list] else { continue };
            let Some(r) = ctx.refs.iter().find(|r| r.ref_idx as i8 == node.ref_idx) else {
                continue;
            };
            // The child's MV was bounded for a 16x16 window; re-clip for
            // the merged read.
            let win = block_window_range(ctx, x, y, size);
            let (fx, fy) = node.mv.fullpel();
            let (fx, fy) = (
                fx.clamp(win.min_x, win.max_x.max(win.min_x)),
                fy.clamp(win.min_y, win.max_y.max(win.min_y)),
            );
            let src_plane = r.src_for(ctx.src);
            let src_view = src_plane.view(x as isize, y as isize);
            let ref_view = r.full.view(x as isize + fx as isize, y as isize + fy as isize);
            let mut dist = sad(
                src_view.data,
                src_plane.stride(),
                ref_view.data,
                r.full.stride(),
                size,
                size,
            );
            if prms.noise_aware {
                let (_, var_src) = block_variance(src_view.data, src_plane.stride(), size, size);
                let (_, var_ref) = block_variance(ref_view.data, r.full.stride(), size, size);
                let stim = stim_factor_q30(var_src, var_ref);
                dist = stim_injected_distortion(dist, stim, STIM_ALPHA_Q4);
            }
            let cost = dist.saturating_add(node.mv_cost);
            if best.as_ref().map_or(true, |(_, _, c)| cost < *c) {
                let merged = SearchNode {
                    mv: MotionVector::from_fullpel(fx, fy),
                    sad: dist,
                    total_cost: cost,
                    ..node
                };
                best = Some((merged, list, cost));
            }
        }
    }
    best
}

fn push_cu_pu(
    out: &mut CtbOutput,
    x: usize,
    y: usize,
    size: usize,
    node: &SearchNode,
    list: usize,
    cost: u32,
    ctx: &CtbContext<'_>,
) {
    let idx_in_list = ctx
        .refs
        .iter()
        .find(|r| r.ref_idx as i8 == node.ref_idx)
        .map(|r| r.idx_in_list)
        .unwrap_or(0);
    let mut pu = PuEntry {
        x: x as u16,
        y: y as u16,
        w: size as u16,
        h: size as u16,
        mv_l0: (0, 0),
        mv_l1: (0, 0),
        ref_l0: -1,
        ref_l1: -1,
        pred_dir: if list == 0 { PredDir::L0 } else { PredDir::L1 },
        merge_flag: false,
        merge_idx: 0,
    };
    if list == 0 {
        pu.mv_l0 = (node.mv.x, node.mv.y);
        pu.ref_l0 = idx_in_list;
    } else {
        pu.mv_l1 = (node.mv.x, node.mv.y);
        pu.ref_l1 = idx_in_list;
    }
    out.pus.push(pu);
    out.cu_costs.push(CuCost { sad: node.sad, mv_cost: node.mv_cost, total_cost: cost });
    out.all_skip = false;
}

/// Emit the PUs of one 16x16 CU according to its winning mode.
fn emit_cu16_pus(cu: &Cu16Result, out: &mut CtbOutput) {
    out.cu_rankings.push(hevme_core::CuRanking {
        x: cu.x as u16,
        y: cu.y as u16,
        size: 16,
        ranked: cu.ranked_types.iter().map(|s| (s.part_type, s.cost)).collect(),
    });

    // Merge/skip wins when cheaper than every inter partition type.
    let inter_best = cu.ranked_types.first().map(|s| s.cost).unwrap_or(MAX_COST);
    if let Some((cand, cost, skip, idx)) = &cu.merge {
        if *cost <= inter_best {
            out.pus.push(PuEntry {
                x: cu.x as u16,
                y: cu.y as u16,
                w: 16,
                h: 16,
                mv_l0: (cand.mv[0].x, cand.mv[0].y),
                mv_l1: (cand.mv[1].x, cand.mv[1].y),
                ref_l0: cand.ref_idx[0],
                ref_l1: cand.ref_idx[1],
                pred_dir: cand.dir,
                merge_flag: true,
                merge_idx: *idx,
            });
            out.cu_costs.push(CuCost { sad: *cost, mv_cost: 0, total_cost: *cost });
            if !skip {
                out.all_skip = false;
            }
            return;
        }
    }

    let Some(winner_ty) = cu.ranked_types.first().map(|s| s.part_type) else {
        return;
    };
    for id in winner_ty.part_ids() {
        let Some(w) = &cu.winners[id.index()] else { continue };
        let (gx, gy, gw, gh) = id.geometry(16);
        let mut pu = PuEntry {
            x: (cu.x + gx as usize) as u16,
            y: (cu.y + gy as usize) as u16,
            w: gw as u16,
            h: gh as u16,
            mv_l0: (0, 0),
            mv_l1: (0, 0),
            ref_l0: -1,
            ref_l1: -1,
            pred_dir: PredDir::L0,
            merge_flag: false,
            merge_idx: 0,
        };
        match w {
            PartWinner::Uni { node, list } => {
                pu.pred_dir = if *list == 0 { PredDir::L0 } else { PredDir::L1 };
                if *list == 0 {
                    pu.mv_l0 = (node.mv.x, node.mv.y);
                    pu.ref_l0 = node.ref_idx;
                } else {
                    pu.mv_l1 = (node.mv.x, node.mv.y);
                    pu.ref_l1 = node.ref_idx;
                }
                out.cu_costs.push(CuCost {
                    sad: node.sad,
                    mv_cost: node.mv_cost,
                    total_cost: node.total_cost,
                });
            }
            PartWinner::Bi(b) => {
                pu.pred_dir = PredDir::Bi;
                pu.mv_l0 = (b.l0.mv.x, b.l0.mv.y);
                pu.ref_l0 = b.l0.ref_idx;
                pu.mv_l1 = (b.l1.mv.x, b.l1.mv.y);
                pu.ref_l1 = b.l1.ref_idx;
                out.cu_costs.push(CuCost {
                    sad: b.l0.sad,
                    mv_cost: b.l0.mv_cost + b.l1.mv_cost,
                    total_cost: b.cost,
                });
            }
        }
        out.pus.push(pu);
        out.all_skip = false;
    }
}
