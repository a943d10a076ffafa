//! Coarse-layer search: exhaustive stepped search over every 4x4 block of
//! the coarsest pyramid layer.
//!
//! The search pattern works on 8x4 and 4x8 composites:
//!
//! ```text
//!         ___
//!        | e |
//!     ___|___|___
//!    | c | a | b |
//!    |___|___|___|
//!        | d |
//!        |___|
//! ```
//!
//! For a target block `a`, the 8x4 composites are c-a (from block c) and
//! a-b; the 4x8 composites are e-a (from the row above) and a-d. Every
//! block evaluates its own a-b ("right") and a-d ("bottom") composites from
//! a row cache of 4x4 SADs and consumes the left/top composites its
//! neighbours published. Row y may start once row y-1 has advanced two
//! columns, enforced through a row-row dependency manager.

use hevme_core::{
    MotionVector, MvRange, Plane, SearchNode, MAX_COST,
};
use hevme_kernels::{
    mv_cost_coarse_fast, mv_cost_explicit, sad, MvResolution, PredCtxt, RefBitsTable,
};
use hevme_sync::DepMngr;
use tracing::trace;

use crate::candidates::spatial_candidates;
use crate::global_mv::scale_global_mv;
use crate::layer::LayerCtxt;

/// Maximum MV magnitude supported in the coarse layer, fullpel.
pub const MAX_MVX_COARSE: i16 = 128;
pub const MAX_MVY_COARSE: i16 = 64;

/// The two composite blocks evaluated per 4x4 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Composite {
    /// 8x4: current block plus its east neighbour.
    H8x4,
    /// 4x8: current block plus its south neighbour.
    V4x8,
}

impl Composite {
    fn dims(self) -> (usize, usize) {
        match self {
            Composite::H8x4 => (8, 4),
            Composite::V4x8 => (4, 8),
        }
    }
}

/// Parameters of one coarse-layer pass.
#[derive(Debug, Clone)]
pub struct CoarseParams {
    pub lambda: u32,
    pub lambda_q_shift: u8,
    /// Full-search sweep step, 2 or 4.
    pub step: i16,
    pub use_explicit_cost: bool,
    pub use_global: bool,
    /// Refinement iterations around non-point candidates.
    pub max_iters: u8,
    pub bidir_enabled: bool,
    pub frame_poc: i32,
    /// Peak vertical motion per POC unit observed on the previous picture;
    /// overrides the vertical clip for B pictures.
    pub dyn_y_per_poc: Option<i16>,
}

/// One reference picture bound to the coarse search.
pub struct CoarseRef<'a> {
    pub ref_idx: usize,
    /// Coarsest-layer input plane of the reference picture.
    pub plane: &'a Plane,
    pub poc: i32,
    pub is_past: bool,
    /// Global MV lobe from the previous picture, unscaled, with the POC
    /// distance it was observed over.
    pub global_mv: MotionVector,
    pub global_mv_delta_poc: i32,
}

/// Dynamic vertical range observed for one reference, feeding the next
/// frame's clip derivation for B pictures.
#[derive(Debug, Clone, Copy)]
pub struct DynRange {
    pub min_y: i16,
    pub max_y: i16,
    pub poc: i32,
}

impl DynRange {
    fn new(poc: i32) -> Self {
        Self { min_y: 0, max_y: 0, poc }
    }

    fn update(&mut self, mv_y: i16) {
        self.min_y = self.min_y.min(mv_y);
        self.max_y = self.max_y.max(mv_y);
    }
}

/// Per-reference MV clip for the coarse sweep: the picture-level range
/// scaled by POC distance over the nominal P-P distance of 4, rounded up
/// to a multiple of 4 and clamped to the layer maximum.
pub fn derive_mv_clip(layer_max: &MvRange, delta_poc: i32, dyn_y_per_poc: Option<i16>) -> MvRange {
    let scale = |v: i16| -> i16 {
        let scaled = (v as i32 * delta_poc.abs()) / 4;
        let aligned = (scaled + 3) & !3;
        aligned.clamp(4, i16::MAX as i32) as i16
    };
    let x = scale(layer_max.max_x).min(MAX_MVX_COARSE);
    let y = match dyn_y_per_poc {
        Some(per_poc) => {
            let v = (per_poc as i32 * delta_poc.abs()).clamp(4, MAX_MVY_COARSE as i32) as i16;
            ((v + 3) & !3).min(MAX_MVY_COARSE)
        }
        None => scale(layer_max.max_y).min(MAX_MVY_COARSE),
    };
    MvRange::symmetric(x, y)
}

/// Picture limit used to clip per-block search ranges.
#[derive(Debug, Clone, Copy)]
struct PicLimit {
    min_x: i16,
    max_x: i16,
    min_y: i16,
    max_y: i16,
}

impl PicLimit {
    /// Four pixels of the padding stay reserved: the worst-case range
    /// derivation widens blocks by one 4x4 step, and the 8-wide/8-tall
    /// composites read one extra sub-block past the search block.
    fn new(width: usize, height: usize, pad: usize) -> Self {
        let slack = (pad as i16) - 4;
        Self {
            min_x: -slack,
            max_x: width as i16 + slack,
            min_y: -slack,
            max_y: height as i16 + slack,
        }
    }
}

/// Search range for the block at pixel `(x, y)`.
fn derive_search_range(
    pic: &PicLimit,
    limit: &MvRange,
    x: i32,
    y: i32,
    blk_wd: i32,
    blk_ht: i32,
) -> MvRange {
    MvRange {
        min_x: (pic.min_x as i32 - x).max(limit.min_x as i32) as i16,
        max_x: (pic.max_x as i32 - blk_wd - x).min(limit.max_x as i32) as i16,
        min_y: (pic.min_y as i32 - y).max(limit.min_y as i32) as i16,
        max_y: (pic.max_y as i32 - blk_ht - y).min(limit.max_y as i32) as i16,
    }
}

/// Worst-case range shared by a block and its left neighbour, used to size
/// the SAD cache fill.
///
/// The `x - 4` / `y - 4` terms take the max of the left/top block, the min
/// of the current block. The formula is preserved verbatim from the
/// production derivation; see the open-question test in `tests/`.
fn derive_worst_case_search_range(
    pic: &PicLimit,
    limit: &MvRange,
    x: i32,
    y: i32,
    blk_wd: i32,
    blk_ht: i32,
) -> MvRange {
    MvRange {
        min_x: (pic.min_x as i32 - x).max(limit.min_x as i32) as i16,
        max_x: (pic.max_x as i32 - blk_wd - (x - 4)).min(limit.max_x as i32) as i16,
        min_y: (pic.min_y as i32 - y).max(limit.min_y as i32) as i16,
        max_y: (pic.max_y as i32 - blk_ht - (y - 4)).min(limit.max_y as i32) as i16,
    }
}

/// One block's 4x4 SAD cache over the stepped sweep window.
#[derive(Debug, Clone)]
struct SadCache {
    sads: Vec<u16>,
}

struct Window {
    clip: MvRange,
    step: i16,
    shift: u8,
    count_x: i32,
    count_y: i32,
}

impl Window {
    fn new(clip: MvRange, step: i16) -> Self {
        let shift = step.trailing_zeros() as u8;
        Self {
            clip,
            step,
            shift,
            count_x: ((clip.max_x - clip.min_x) >> shift) as i32,
            count_y: ((clip.max_y - clip.min_y) >> shift) as i32,
        }
    }

    fn len(&self) -> usize {
        (self.count_x * self.count_y) as usize
    }

    /// Cache slot of the offset `(mvx, mvy)`.
    fn pos(&self, mvx: i16, mvy: i16) -> usize {
        let x = ((mvx >> self.shift) as i32) - ((self.clip.min_x >> self.shift) as i32);
        let y = ((mvy >> self.shift) as i32) - ((self.clip.min_y >> self.shift) as i32);
        (y * self.count_x + x) as usize
    }
}

/// Fill a block's 4x4 SAD cache over `range`, leaving positions outside the
/// range zero.
#[allow(clippy::too_many_arguments)]
fn store_4x4_sads(
    win: &Window,
    range: &MvRange,
    src: &Plane,
    refp: &Plane,
    x: i32,
    y: i32,
    cache: &mut SadCache,
) {
    cache.sads.clear();
    cache.sads.resize(win.len(), 0);
    let stride = src.stride();
    let ref_stride = refp.stride();
    let src_view = src.view(x as isize, y as isize);
    let mut mvy = range.min_y;
    while mvy < range.max_y {
        let mut mvx = range.min_x;
        while mvx < range.max_x {
            let ref_view = refp.view((x + mvx as i32) as isize, (y + mvy as i32) as isize);
            let s = sad(ref_view.data, ref_stride, src_view.data, stride, 4, 4);
            cache.sads[win.pos(mvx, mvy)] = s as u16;
            mvx += win.step;
        }
        mvy += win.step;
    }
}

/// Sweep the combined caches and return the best 8x4 and 4x8 offsets.
#[allow(clippy::too_many_arguments)]
fn combine_sads_and_compute_cost(
    win: &Window,
    range: &MvRange,
    ref_idx: i8,
    cur: &SadCache,
    east: &SadCache,
    south: &SadCache,
    prms: &CoarseParams,
    pred_ctxt: Option<&PredCtxt>,
) -> (SearchNode, SearchNode) {
    let mut best_8x4 = SearchNode::init(ref_idx);
    let mut best_4x8 = SearchNode::init(ref_idx);

    let mut mvy = range.min_y;
    while mvy < range.max_y {
        let mut mvx = range.min_x;
        while mvx < range.max_x {
            let pos = win.pos(mvx, mvy);
            let sad_8x4 = cur.sads[pos] as u32 + east.sads[pos] as u32;
            let sad_4x8 = cur.sads[pos] as u32 + south.sads[pos] as u32;

            let mv = MotionVector::new(mvx, mvy);
            let node = SearchNode::candidate(mv, ref_idx);
            let mv_cost = match pred_ctxt {
                Some(ctx) if prms.use_explicit_cost => mv_cost_explicit(
                    &node,
                    ctx,
                    hevme_core::PartitionId::Part2Nx2N,
                    MvResolution::Fpel,
                ),
                _ => mv_cost_coarse_fast(mv, ref_idx, prms.lambda, prms.lambda_q_shift),
            };

            let cost_8x4 = sad_8x4 + mv_cost;
            if cost_8x4 < best_8x4.total_cost {
                best_8x4 = SearchNode {
                    mv,
                    ref_idx,
                    sad: sad_8x4,
                    mv_cost,
                    total_cost: cost_8x4,
                    subpel_done: false,
                    is_avail: true,
                };
            }
            let cost_4x8 = sad_4x8 + mv_cost;
            if cost_4x8 < best_4x8.total_cost {
                best_4x8 = SearchNode {
                    mv,
                    ref_idx,
                    sad: sad_4x8,
                    mv_cost,
                    total_cost: cost_4x8,
                    subpel_done: false,
                    is_avail: true,
                };
            }
            mvx += win.step;
        }
        mvy += win.step;
    }
    (best_8x4, best_4x8)
}

/// Evaluate one composite at a point MV.
#[allow(clippy::too_many_arguments)]
fn eval_point(
    comp: Composite,
    src: &Plane,
    refp: &Plane,
    x: i32,
    y: i32,
    mv: MotionVector,
    ref_idx: i8,
    prms: &CoarseParams,
    pred_ctxt: Option<&PredCtxt>,
) -> SearchNode {
    let (w, h) = comp.dims();
    let src_view = src.view(x as isize, y as isize);
    let ref_view = refp.view((x + mv.x as i32) as isize, (y + mv.y as i32) as isize);
    let s = sad(ref_view.data, refp.stride(), src_view.data, src.stride(), w, h);
    let node = SearchNode::candidate(mv, ref_idx);
    let mv_cost = match pred_ctxt {
        Some(ctx) if prms.use_explicit_cost => {
            mv_cost_explicit(&node, ctx, hevme_core::PartitionId::Part2Nx2N, MvResolution::Fpel)
        }
        _ => mv_cost_coarse_fast(mv, ref_idx, prms.lambda, prms.lambda_q_shift),
    };
    SearchNode {
        mv,
        ref_idx,
        sad: s,
        mv_cost,
        total_cost: s + mv_cost,
        subpel_done: false,
        is_avail: true,
    }
}

/// Iterative square-grid refinement around a candidate. The step halves
/// when the centre survives an iteration; the centre winning at step 1
/// terminates early.
#[allow(clippy::too_many_arguments)]
fn refine_candidate(
    comp: Composite,
    src: &Plane,
    refp: &Plane,
    x: i32,
    y: i32,
    start: SearchNode,
    range: &MvRange,
    max_iters: u8,
    prms: &CoarseParams,
    pred_ctxt: Option<&PredCtxt>,
) -> SearchNode {
    let mut center = start;
    let mut step = 2i16;
    for _ in 0..max_iters {
        let mut best = center;
        for (dx, dy) in [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)] {
            let mv = MotionVector::new(center.mv.x + dx * step, center.mv.y + dy * step);
            if !range.contains(mv) {
                continue;
            }
            let node = eval_point(comp, src, refp, x, y, mv, start.ref_idx, prms, pred_ctxt);
            if node.total_cost < best.total_cost {
                best = node;
            }
        }
        if best.mv == center.mv {
            if step == 1 {
                break;
            }
            step >>= 1;
        } else {
            center = best;
        }
    }
    center
}

/// Row-level state carried between block columns of the staggered loop.
struct RefRowState {
    /// SAD caches for the row being swept (south blocks).
    cur_caches: Vec<SadCache>,
    /// SAD caches of the row above (current + east blocks).
    prev_caches: Vec<SadCache>,
    /// 4x8 results of the last finalised row, the top candidates of the
    /// next one.
    row_4x8: Vec<SearchNode>,
    cur_row_4x8: Vec<SearchNode>,
    /// 8x4 result of the block to the left in the finalised row.
    left_8x4: SearchNode,
    clip: MvRange,
    dyn_range: DynRange,
}

/// Run the coarse search for one picture over its coarsest layer.
///
/// `layer` must be frame-initialised; `prev_coarse` provides the previous
/// picture's layer for global-MV lookup. Publishes row progress through
/// `dep` when provided.
pub fn coarse_search(
    layer: &LayerCtxt,
    refs: &[CoarseRef<'_>],
    prms: &CoarseParams,
    dep: Option<&DepMngr>,
) -> Vec<DynRange> {
    let blk = 4usize;
    let blocks_x = layer.dims.width / blk;
    let blocks_y = layer.dims.height / blk;
    let pad = layer.input.pad();
    let pic = PicLimit::new(layer.dims.width, layer.dims.height, pad);
    let ref_bits = RefBitsTable::new(refs.len());

    let mut states: Vec<RefRowState> = refs
        .iter()
        .map(|r| {
            let delta_poc = (prms.frame_poc - r.poc).abs();
            let dyn_y = if prms.bidir_enabled { prms.dyn_y_per_poc } else { None };
            let clip = derive_mv_clip(&layer.max_mv, delta_poc, dyn_y);
            RefRowState {
                cur_caches: vec![SadCache { sads: Vec::new() }; blocks_x + 2],
                prev_caches: vec![SadCache { sads: Vec::new() }; blocks_x + 2],
                row_4x8: vec![SearchNode::init(r.ref_idx as i8); blocks_x + 1],
                cur_row_4x8: vec![SearchNode::init(r.ref_idx as i8); blocks_x + 1],
                left_8x4: SearchNode::init(r.ref_idx as i8),
                clip,
                dyn_range: DynRange::new(r.poc),
            }
        })
        .collect();

    // Sweep rows 0..=blocks_y: row y fills caches and finalises row y - 1.
    for y in 0..=blocks_y {
        if let Some(d) = dep {
            if y >= 2 {
                // Top row of the finalised blocks must lead by two columns.
                d.check(y - 1, -2, 0);
            }
        }
        for x in 0..=blocks_x {
            for (r, state) in states.iter_mut().enumerate() {
                let cref = &refs[r];
                let win = Window::new(state.clip, prms.step);

                // Fill this row's cache for block (x, y); out-of-picture
                // blocks keep a zeroed cache (padded border, undefined).
                let cache = &mut state.cur_caches[x];
                if x < blocks_x && y < blocks_y {
                    let wc = derive_worst_case_search_range(
                        &pic,
                        &state.clip,
                        (x * blk) as i32,
                        (y * blk) as i32,
                        blk as i32,
                        blk as i32,
                    );
                    store_4x4_sads(
                        &win,
                        &wc,
                        &layer.input,
                        cref.plane,
                        (x * blk) as i32,
                        (y * blk) as i32,
                        cache,
                    );
                } else {
                    cache.sads.clear();
                    cache.sads.resize(win.len(), 0);
                }

                // Nothing to finalise during the priming row.
                if y == 0 || x >= blocks_x {
                    continue;
                }
                let ty = y - 1;
                let px = (x * blk) as i32;
                let py = (ty * blk) as i32;

                // Spatial neighbours of the target block for prediction.
                let spatial = spatial_candidates(&layer.bank, x, ty, 1, r);
                let pred_ctxt = PredCtxt {
                    tl: *spatial.top_left(),
                    t: *spatial.top(),
                    tr: *spatial.top_right(),
                    l: *spatial.left(),
                    bl: SearchNode::unavailable(r as i8),
                    coloc: SearchNode::candidate(MotionVector::ZERO, r as i8),
                    zero: SearchNode::candidate(MotionVector::ZERO, r as i8),
                    pred_lx: if cref.is_past { 0 } else { 1 },
                    lambda: prms.lambda,
                    lambda_q_shift: prms.lambda_q_shift,
                    pred_resolution: MvResolution::Fpel,
                    ref_bits: ref_bits.clone(),
                };

                let range = derive_search_range(&pic, &state.clip, px, py, blk as i32, blk as i32);
                let (fs_8x4, fs_4x8) = combine_sads_and_compute_cost(
                    &win,
                    &range,
                    r as i8,
                    &state.prev_caches[x],
                    &state.prev_caches[x + 1],
                    &state.cur_caches[x],
                    prms,
                    Some(&pred_ctxt),
                );

                // Candidate set: full-search winner, causal points, global,
                // zero. The stepped sweep only visits even offsets, so the
                // full-search winner is refined down to single-pel; causal
                // point candidates are not.
                let mut best_8x4 = if prms.max_iters > 0 {
                    refine_candidate(
                        Composite::H8x4, &layer.input, cref.plane, px, py, fs_8x4, &range,
                        prms.max_iters, prms, Some(&pred_ctxt),
                    )
                } else {
                    fs_8x4
                };
                let mut best_4x8 = if prms.max_iters > 0 {
                    refine_candidate(
                        Composite::V4x8, &layer.input, cref.plane, px, py, fs_4x8, &range,
                        prms.max_iters, prms, Some(&pred_ctxt),
                    )
                } else {
                    fs_4x8
                };
                let mut consider = |node: SearchNode,
                                    refine: bool,
                                    best_8x4: &mut SearchNode,
                                    best_4x8: &mut SearchNode,
                                    state_clip: &MvRange| {
                    if !node.is_avail {
                        return;
                    }
                    let mv = node.mv.clamp(state_clip).clamp(&range);
                    let seed = SearchNode::candidate(mv, r as i8);
                    for (comp, best) in
                        [(Composite::H8x4, &mut *best_8x4), (Composite::V4x8, &mut *best_4x8)]
                    {
                        let evaled = eval_point(
                            comp, &layer.input, cref.plane, px, py, seed.mv, r as i8, prms,
                            Some(&pred_ctxt),
                        );
                        let refined = if refine && prms.max_iters > 0 {
                            refine_candidate(
                                comp, &layer.input, cref.plane, px, py, evaled, &range,
                                prms.max_iters, prms, Some(&pred_ctxt),
                            )
                        } else {
                            evaled
                        };
                        if refined.total_cost < best.total_cost {
                            *best = refined;
                        }
                    }
                };

                consider(*spatial.left(), false, &mut best_8x4, &mut best_4x8, &state.clip);
                consider(*spatial.top(), false, &mut best_8x4, &mut best_4x8, &state.clip);
                consider(*spatial.top_left(), false, &mut best_8x4, &mut best_4x8, &state.clip);
                if prms.use_global {
                    let delta = (prms.frame_poc - cref.poc).abs();
                    let gmv = scale_global_mv(cref.global_mv, cref.global_mv_delta_poc, delta);
                    consider(
                        SearchNode::candidate(gmv, r as i8),
                        true,
                        &mut best_8x4,
                        &mut best_4x8,
                        &state.clip,
                    );
                }
                consider(
                    SearchNode::candidate(MotionVector::ZERO, r as i8),
                    false,
                    &mut best_8x4,
                    &mut best_4x8,
                    &state.clip,
                );

                // Histogram for the global-MV estimate of the next picture.
                if let Some(h) = layer.hist.lock().get_mut(r) {
                    h.update(best_8x4.mv.x, best_8x4.mv.y);
                    h.update(best_4x8.mv.x, best_4x8.mv.y);
                }

                // Bank update: own bottom/right composites plus the top and
                // left composites published by the neighbours.
                let top_4x8 = state.row_4x8[x];
                let left_8x4 = if x == 0 { SearchNode::init(r as i8) } else { state.left_8x4 };
                for node in [best_4x8, best_8x4, left_8x4, top_4x8] {
                    if node.is_avail && node.total_cost != MAX_COST {
                        layer.bank.insert(x, ty, r, node);
                    }
                }

                // Dynamic vertical range, P pictures only.
                if !prms.bidir_enabled {
                    state.dyn_range.update(best_8x4.mv.y);
                    state.dyn_range.update(best_4x8.mv.y);
                }

                state.cur_row_4x8[x] = best_4x8;
                state.left_8x4 = best_8x4;
            }
            if let Some(d) = dep {
                if y >= 1 {
                    d.set(y - 1, x as i32 + 1);
                }
            }
        }
        // Rotate the row state: finalised row becomes the top reference.
        for state in states.iter_mut() {
            std::mem::swap(&mut state.prev_caches, &mut state.cur_caches);
            std::mem::swap(&mut state.row_4x8, &mut state.cur_row_4x8);
            state.left_8x4 = SearchNode::init(0);
        }
    }

    // Collapse histograms into the layer's global MV lobes.
    {
        let hist = layer.hist.lock();
        let mut global = layer.global_mv.lock();
        for (r, _) in refs.iter().enumerate() {
            if let Some(h) = hist.get(r) {
                let lobes = h.lobes();
                if let Some(slot) = global.get_mut(r) {
                    *slot = lobes;
                }
                trace!(ref_idx = r, ?lobes, "coarse global mv");
            }
        }
    }

    states.into_iter().map(|s| s.dyn_range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mv_clip_scales_and_aligns() {
        let layer_max = MvRange::symmetric(48, 24);
        // delta 4: identity, already multiple of 4
        let c = derive_mv_clip(&layer_max, 4, None);
        assert_eq!(c, MvRange::symmetric(48, 24));
        // delta 2: halves then rounds up to multiple of 4
        let c2 = derive_mv_clip(&layer_max, 2, None);
        assert_eq!(c2, MvRange::symmetric(24, 12));
        // delta 8 doubles and clamps to the layer cap
        let c8 = derive_mv_clip(&layer_max, 8, None);
        assert_eq!(c8.max_x, 96.min(MAX_MVX_COARSE));
    }

    #[test]
    fn mv_clip_has_floor_of_4() {
        let c = derive_mv_clip(&MvRange::symmetric(2, 2), 1, None);
        assert_eq!(c, MvRange::symmetric(4, 4));
    }

    #[test]
    fn worst_case_range_widens_only_the_max_side() {
        let pic = PicLimit::new(64, 64, 16);
        let limit = MvRange::symmetric(32, 32);
        let norm = derive_search_range(&pic, &limit, 32, 32, 4, 4);
        let worst = derive_worst_case_search_range(&pic, &limit, 32, 32, 4, 4);
        assert_eq!(norm.min_x, worst.min_x);
        assert_eq!(norm.min_y, worst.min_y);
        assert!(worst.max_x >= norm.max_x);
        assert!(worst.max_y >= norm.max_y);
    }

    #[test]
    fn window_position_round_trip() {
        let win = Window::new(MvRange::symmetric(16, 8), 2);
        assert_eq!(win.count_x, 16);
        assert_eq!(win.count_y, 8);
        assert_eq!(win.pos(-16, -8), 0);
        assert_eq!(win.pos(-14, -8), 1);
        assert_eq!(win.pos(-16, -6), win.count_x as usize);
    }
}
