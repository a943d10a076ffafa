//! Refinement search over the intermediate (non-encoded) pyramid layers.
//!
//! For each layer from coarsest-1 down to 1, every 8x8 block gathers
//! candidates from five classes - colocated (Z), spatial causal neighbours,
//! parent-layer projections, the global MV, and zero - deduplicates them,
//! and refines each survivor with an iterative grid search.

use hevme_core::{
    MotionVector, MvRange, PartitionId, Plane, ResultSet, SearchNode, MAX_COST,
};
use hevme_kernels::{
    mv_cost_explicit, sad_grid, GRID_ALL, GRID_DIAMOND, GRID_OFFSETS, MvResolution, PredCtxt,
    RefBitsTable, SKIPPED,
};
use hevme_core::RefineGrid;
use hevme_sync::DepMngr;

use crate::candidates::{push_candidate, spatial_candidates, CandidateDedup, LayerScale};
use crate::global_mv::scale_global_mv;
use crate::layer::{LayerCtxt, MvBank};

/// Parameters of one refinement-layer pass.
#[derive(Debug, Clone)]
pub struct RefineParams {
    pub lambda: u32,
    pub lambda_q_shift: u8,
    pub grid: RefineGrid,
    pub max_iters: u8,
    pub max_proj_cands: usize,
    pub use_global: bool,
    pub update_hist: bool,
    pub frame_poc: i32,
}

/// One reference picture at this layer.
pub struct RefineRef<'a> {
    pub ref_idx: usize,
    pub plane: &'a Plane,
    pub poc: i32,
    /// Previous picture's bank at this layer, for the Z candidate.
    pub prev_bank: Option<&'a MvBank>,
    /// Previous picture's global MV at this layer, with its POC span.
    pub global_mv: MotionVector,
    pub global_mv_delta_poc: i32,
}

fn grid_mask_and_step(grid: RefineGrid, step: i16) -> (u16, (i32, i32)) {
    match grid {
        RefineGrid::Square9 => (GRID_ALL, (step as i32, step as i32)),
        RefineGrid::Diamond5 => (GRID_DIAMOND, (step as i32, step as i32)),
        // Rectangular grid: wider horizontal reach, motion being mostly
        // horizontal at these layers.
        RefineGrid::Rect9 => (GRID_ALL, (2 * step as i32, step as i32)),
    }
}

/// Iteratively refine one candidate with full-block SADs on the grid.
#[allow(clippy::too_many_arguments)]
fn refine_one(
    src: &Plane,
    refp: &Plane,
    px: i32,
    py: i32,
    blk: usize,
    start_mv: MotionVector,
    ref_idx: i8,
    range: &MvRange,
    prms: &RefineParams,
    pred_ctxt: &PredCtxt,
) -> SearchNode {
    let src_view = src.view(px as isize, py as isize);
    let mut center_mv = start_mv.clamp(range);
    let mut center = SearchNode::init(ref_idx);
    let mut step: i16 = 2;
    let mut first = true;

    for _ in 0..prms.max_iters.max(1) {
        let (mask, gstep) = grid_mask_and_step(prms.grid, step);
        // Re-evaluate the centre only on the first iteration, and never
        // read grid points whose MV would leave the block's range.
        let mut mask = if first { mask } else { mask & !1 };
        for (i, (gx, gy)) in GRID_OFFSETS.iter().enumerate() {
            let mv = MotionVector::new(
                center_mv.x + (gx * gstep.0) as i16,
                center_mv.y + (gy * gstep.1) as i16,
            );
            if !range.contains(mv) {
                mask &= !(1 << i);
            }
        }
        let (ref_data, anchor) = refp.anchor(
            (px + center_mv.x as i32) as isize,
            (py + center_mv.y as i32) as isize,
        );
        let sads = sad_grid(
            src_view.data,
            src.stride(),
            ref_data,
            anchor,
            refp.stride(),
            blk,
            blk,
            gstep,
            mask,
        );

        let mut best = center;
        let mut best_mv = center_mv;
        for (i, &s) in sads.iter().enumerate() {
            if s == SKIPPED {
                continue;
            }
            let (gx, gy) = GRID_OFFSETS[i];
            let mv = MotionVector::new(
                center_mv.x + (gx * gstep.0) as i16,
                center_mv.y + (gy * gstep.1) as i16,
            );
            if !range.contains(mv) {
                continue;
            }
            let node = SearchNode::candidate(mv, ref_idx);
            let mv_cost =
                mv_cost_explicit(&node, pred_ctxt, PartitionId::Part2Nx2N, MvResolution::Fpel);
            let total = s + mv_cost;
            if total < best.total_cost {
                best = SearchNode {
                    mv,
                    ref_idx,
                    sad: s,
                    mv_cost,
                    total_cost: total,
                    subpel_done: false,
                    is_avail: true,
                };
                best_mv = mv;
            }
        }
        first = false;
        let already_scored = center.total_cost != MAX_COST;
        center = best;
        if best_mv == center_mv {
            // Centre holds: early exit at the finest step, else tighten.
            if step == 1 && already_scored {
                break;
            }
            if step > 1 {
                step >>= 1;
            }
        } else {
            center_mv = best_mv;
        }
    }
    center
}

/// Search one refinement layer of the current picture.
///
/// `parent` is the next-coarser layer of the same picture, already
/// searched. Progress is published per row through `dep_out`; `parent_dep`
/// is consulted before reading parent rows.
pub fn refine_search(
    layer: &LayerCtxt,
    parent: &LayerCtxt,
    refs: &[RefineRef<'_>],
    prms: &RefineParams,
    parent_dep: Option<&DepMngr>,
    dep_out: Option<&DepMngr>,
) {
    let blk = layer.bank.block_size();
    let blocks_x = layer.bank.blocks_x();
    let blocks_y = layer.bank.blocks_y();
    let parent_blk = parent.bank.block_size();
    let scale = LayerScale::between(
        (layer.dims.width, layer.dims.height),
        (parent.dims.width, parent.dims.height),
    );
    let ref_bits = RefBitsTable::new(refs.len());
    let results_per_ref = layer.bank.results_per_ref();

    for by in 0..blocks_y {
        if let Some(d) = parent_dep {
            // The parent rows overlapping this row's pixel footprint plus
            // the layer MV range must be published.
            let px_bottom = ((by + 1) * blk) as i32 + layer.max_mv.max_y as i32;
            let parent_py = (px_bottom * parent.dims.height as i32
                / layer.dims.height as i32) as usize;
            let parent_row = (parent_py / parent_blk).min(parent.bank.blocks_y() - 1);
            d.check(parent_row + 1, 0, parent.bank.blocks_x() as i32);
        }
        for bx in 0..blocks_x {
            let px = (bx * blk) as i32;
            let py = (by * blk) as i32;
            let range = derive_block_range(layer, px, py, blk);

            for r in refs.iter() {
                let ref_idx = r.ref_idx;
                let mut dedup = CandidateDedup::new(bx, by);
                let mut cands: Vec<SearchNode> = Vec::new();

                // Z: colocated result of the previous picture at this layer.
                if let Some(prev) = r.prev_bank {
                    if let Some(z) = prev.best(bx as isize, by as isize, ref_idx) {
                        push_candidate(&mut cands, &mut dedup, z, &range);
                    }
                }

                // Spatial causal neighbours from the partly built bank.
                let spatial = spatial_candidates(&layer.bank, bx, by, 1, ref_idx);
                for node in [
                    *spatial.left(),
                    *spatial.top(),
                    *spatial.top_left(),
                    *spatial.top_right(),
                ] {
                    push_candidate(&mut cands, &mut dedup, node, &range);
                }

                // Projected: every parent-bank result overlapping this block.
                let parent_bx = ((px * parent.dims.width as i32 / layer.dims.width as i32)
                    / parent_blk as i32) as isize;
                let parent_by = ((py * parent.dims.height as i32 / layer.dims.height as i32)
                    / parent_blk as i32) as isize;
                let mut proj_count = 0usize;
                'proj: for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    if let Some(set) = parent.bank.results(parent_bx + dx, parent_by + dy, ref_idx)
                    {
                        for node in set.nodes() {
                            if proj_count >= prms.max_proj_cands {
                                break 'proj;
                            }
                            let projected = SearchNode {
                                mv: scale.project(node.mv, &range),
                                ..*node
                            };
                            push_candidate(&mut cands, &mut dedup, projected, &range);
                            proj_count += 1;
                        }
                    }
                }

                // Global MV of the previous picture, rescaled to this ref's
                // POC distance.
                if prms.use_global {
                    let delta = (prms.frame_poc - r.poc).abs();
                    let gmv = scale_global_mv(r.global_mv, r.global_mv_delta_poc, delta);
                    push_candidate(
                        &mut cands,
                        &mut dedup,
                        SearchNode::candidate(gmv, ref_idx as i8),
                        &range,
                    );
                }

                push_candidate(
                    &mut cands,
                    &mut dedup,
                    SearchNode::candidate(MotionVector::ZERO, ref_idx as i8),
                    &range,
                );

                // The projected colocated node anchors the rate estimate.
                let coloc_pred = cands
                    .first()
                    .copied()
                    .unwrap_or_else(|| SearchNode::candidate(MotionVector::ZERO, ref_idx as i8));
                let pred_ctxt = PredCtxt {
                    tl: *spatial.top_left(),
                    t: *spatial.top(),
                    tr: *spatial.top_right(),
                    l: *spatial.left(),
                    bl: SearchNode::unavailable(ref_idx as i8),
                    coloc: coloc_pred,
                    zero: SearchNode::candidate(MotionVector::ZERO, ref_idx as i8),
                    pred_lx: 0,
                    lambda: prms.lambda,
                    lambda_q_shift: prms.lambda_q_shift,
                    pred_resolution: MvResolution::Fpel,
                    ref_bits: ref_bits.clone(),
                };

                let mut results = ResultSet::new(results_per_ref);
                for cand in &cands {
                    let refined = refine_one(
                        &layer.input,
                        r.plane,
                        px,
                        py,
                        blk,
                        cand.mv,
                        ref_idx as i8,
                        &range,
                        prms,
                        &pred_ctxt,
                    );
                    if refined.total_cost != MAX_COST {
                        results.insert(refined);
                    }
                }

                for node in results.nodes() {
                    layer.bank.insert(bx, by, ref_idx, *node);
                    if prms.update_hist {
                        if let Some(h) = layer.hist.lock().get_mut(ref_idx) {
                            h.update(node.mv.x, node.mv.y);
                        }
                    }
                }
            }
        }
        if let Some(d) = dep_out {
            d.set(by, blocks_x as i32);
        }
    }

    if prms.update_hist {
        let hist = layer.hist.lock();
        let mut global = layer.global_mv.lock();
        for r in refs.iter() {
            if let Some(h) = hist.get(r.ref_idx) {
                if let Some(slot) = global.get_mut(r.ref_idx) {
                    *slot = h.lobes();
                }
            }
        }
    }
}

/// Block search range: the layer MV limit clipped so the block plus MV
/// stays inside the padded picture.
fn derive_block_range(layer: &LayerCtxt, px: i32, py: i32, blk: usize) -> MvRange {
    let pad = layer.input.pad() as i32;
    MvRange {
        min_x: (-pad - px).max(layer.max_mv.min_x as i32) as i16,
        max_x: ((layer.dims.width as i32 + pad - blk as i32) - px)
            .min(layer.max_mv.max_x as i32) as i16,
        min_y: (-pad - py).max(layer.max_mv.min_y as i32) as i16,
        max_y: ((layer.dims.height as i32 + pad - blk as i32) - py)
            .min(layer.max_mv.max_y as i32) as i16,
    }
}
