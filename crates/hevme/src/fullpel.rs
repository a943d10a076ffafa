//! L0 fullpel search: candidate sifting and 3x3 refinement over 16x16
//! blocks, producing best-N results for all 17 partition ids at once.

use hevme_core::{
    MvRange, PartMask, PartitionId, Plane, ResultSet, SearchNode, NUM_PARTITIONS,
};
use hevme_kernels::{
    lambda_q, mv_cost_explicit, partial_sads_16x16, MvResolution, PredCtxt,
};

use crate::subpel::SubpelPlanes;

/// One reference picture bound at layer 0.
pub struct L0Ref<'a> {
    /// Index in the picture-local combined list.
    pub ref_idx: usize,
    pub poc: i32,
    pub is_past: bool,
    /// Prediction list this reference serves (0 or 1).
    pub list: usize,
    /// Index within that list.
    pub idx_in_list: i8,
    pub full: &'a Plane,
    pub subpel: &'a SubpelPlanes,
    /// Weight applied to the source when weighted prediction is active.
    pub wt_src: Option<&'a Plane>,
}

impl<'a> L0Ref<'a> {
    /// Source plane to match against this reference.
    pub fn src_for<'s>(&'s self, default: &'s Plane) -> &'s Plane {
        self.wt_src.unwrap_or(default)
    }
}

/// Signalling bits estimate per partition type of a CU.
pub fn part_type_bits(id: PartitionId) -> u32 {
    use hevme_core::PartitionType::*;
    match id.part_type() {
        Size2Nx2N => 1,
        Size2NxN | SizeNx2N => 3,
        SizeNxN => 5,
        _ => 4,
    }
}

/// Best-N fullpel results for every partition id and prediction direction
/// of one 16x16 block.
pub struct FullpelResults {
    /// `[partition][list]`
    pub parts: Vec<[ResultSet; 2]>,
}

impl FullpelResults {
    pub fn new(results_per_part: usize) -> Self {
        Self {
            parts: (0..NUM_PARTITIONS)
                .map(|_| [ResultSet::new(results_per_part), ResultSet::new(results_per_part)])
                .collect(),
        }
    }

    pub fn best(&self, id: PartitionId, list: usize) -> Option<&SearchNode> {
        self.parts[id.index()][list].best()
    }

    pub fn results(&self, id: PartitionId, list: usize) -> &ResultSet {
        &self.parts[id.index()][list]
    }
}

/// Parameters for the fullpel stage.
pub struct FullpelParams<'a> {
    pub lambda: u32,
    pub lambda_q_shift: u8,
    pub max_refine_centers: usize,
    pub results_per_part: usize,
    pub part_mask: PartMask,
    /// Per-list prediction contexts for MV rate estimation.
    pub pred_ctxt: &'a [PredCtxt; 2],
}

/// Rank candidates per reference, refine the top centres on a 3x3 grid,
/// and fold partial SADs into all 17 partition results.
///
/// `cands` carries fullpel candidates across all references (`ref_idx` is
/// the combined-list index); each centre evaluation produces the 17
/// partition SADs in one pass.
pub fn fullpel_search_16x16(
    src: &Plane,
    px: i32,
    py: i32,
    refs: &[L0Ref<'_>],
    cands: &[SearchNode],
    range: &MvRange,
    prms: &FullpelParams<'_>,
) -> FullpelResults {
    let mut out = FullpelResults::new(prms.results_per_part);

    // Rank candidate centres by their 2Nx2N cost, per reference.
    for r in refs {
        let src_plane = r.src_for(src);
        let src_view = src_plane.view(px as isize, py as isize);
        let pred_ctxt = &prms.pred_ctxt[r.list];

        let mut ranked: Vec<SearchNode> = Vec::new();
        for cand in cands.iter().filter(|c| c.ref_idx == r.ref_idx as i8) {
            let mv = cand.mv.clamp(range);
            let ref_view = r.full.view((px + mv.x as i32) as isize, (py + mv.y as i32) as isize);
            let sads = partial_sads_16x16(
                src_view.data,
                src_plane.stride(),
                ref_view.data,
                r.full.stride(),
            );
            let node = SearchNode::candidate(mv, cand.ref_idx);
            let mv_cost =
                mv_cost_explicit(&node, pred_ctxt, PartitionId::Part2Nx2N, MvResolution::Fpel);
            let full_sad = sads[PartitionId::Part2Nx2N.index()];
            ranked.push(SearchNode {
                mv,
                ref_idx: cand.ref_idx,
                sad: full_sad,
                mv_cost,
                total_cost: full_sad + mv_cost,
                subpel_done: false,
                is_avail: true,
            });
            // The centre itself already counts as an evaluation.
            update_parts(&mut out, &sads, &node, pred_ctxt, prms, r.list);
        }
        ranked.sort_by_key(|n| n.total_cost);

        for center in ranked.iter().take(prms.max_refine_centers) {
            for (dx, dy) in [
                (-1i16, -1i16),
                (0, -1),
                (1, -1),
                (-1, 0),
                (1, 0),
                (-1, 1),
                (0, 1),
                (1, 1),
            ] {
                let mv = hevme_core::MotionVector::new(center.mv.x + dx, center.mv.y + dy);
                if !range.contains(mv) {
                    continue;
                }
                let ref_view =
                    r.full.view((px + mv.x as i32) as isize, (py + mv.y as i32) as isize);
                let sads = partial_sads_16x16(
                    src_view.data,
                    src_plane.stride(),
                    ref_view.data,
                    r.full.stride(),
                );
                let node = SearchNode::candidate(mv, center.ref_idx);
                update_parts(&mut out, &sads, &node, pred_ctxt, prms, r.list);
            }
        }
    }
    out
}

/// Fold one centre's 17 partition SADs into the running best tables.
fn update_parts(
    out: &mut FullpelResults,
    sads: &[u32; NUM_PARTITIONS],
    node: &SearchNode,
    pred_ctxt: &PredCtxt,
    prms: &FullpelParams<'_>,
    list: usize,
) {
    for id in prms.part_mask.ids() {
        let mv_cost = mv_cost_explicit(node, pred_ctxt, id, MvResolution::Fpel)
            + lambda_q(part_type_bits(id), prms.lambda, prms.lambda_q_shift);
        let sad = sads[id.index()];
        out.parts[id.index()][list].insert(SearchNode {
            mv: node.mv,
            ref_idx: node.ref_idx,
            sad,
            mv_cost,
            total_cost: sad + mv_cost,
            subpel_done: false,
            is_avail: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subpel::SubpelPlanes;
    use hevme_core::MotionVector;

    fn textured(w: usize, h: usize, shift: usize) -> Plane {
        let pix: Vec<u8> = (0..w * h)
            .map(|i| {
                let x = i % w + shift;
                let y = i / w;
                ((x * 31 + y * 17 + (x / 5) * 3) % 253) as u8
            })
            .collect();
        Plane::from_pixels(&pix, w, h, 16)
    }

    fn pred_pair(num_refs: usize) -> [PredCtxt; 2] {
        [
            PredCtxt::without_neighbours(0, 1 << 8, 8, MvResolution::Fpel, num_refs),
            PredCtxt::without_neighbours(1, 1 << 8, 8, MvResolution::Fpel, num_refs),
        ]
    }

    #[test]
    fn finds_known_translation() {
        let refp = textured(96, 48, 0);
        let src = textured(96, 48, 3);
        let subpel = SubpelPlanes::build(&refp);
        let refs = [L0Ref {
            ref_idx: 0,
            poc: 0,
            is_past: true,
            list: 0,
            idx_in_list: 0,
            full: &refp,
            subpel: &subpel,
            wt_src: None,
        }];
        let ctxts = pred_pair(1);
        let prms = FullpelParams {
            lambda: 1 << 8,
            lambda_q_shift: 8,
            max_refine_centers: 2,
            results_per_part: 2,
            part_mask: PartMask::ALL,
            pred_ctxt: &ctxts,
        };
        // Candidate near the true MV (3, 0): the grid closes the gap.
        let cands = [SearchNode::candidate(MotionVector::new(2, 0), 0)];
        let out = fullpel_search_16x16(
            &src,
            32,
            16,
            &refs,
            &cands,
            &MvRange::symmetric(16, 16),
            &prms,
        );
        let best = out.best(PartitionId::Part2Nx2N, 0).unwrap();
        assert_eq!(best.mv, MotionVector::new(3, 0));
        assert_eq!(best.sad, 0);
        // Every partition sees the same winner for a pure translation.
        for id in PartitionId::ALL {
            assert_eq!(out.best(id, 0).unwrap().mv, MotionVector::new(3, 0));
        }
    }

    #[test]
    fn winner_never_costs_more_than_any_evaluated_candidate() {
        let refp = textured(96, 48, 0);
        let src = textured(96, 48, 1);
        let subpel = SubpelPlanes::build(&refp);
        let refs = [L0Ref {
            ref_idx: 0,
            poc: 0,
            is_past: true,
            list: 0,
            idx_in_list: 0,
            full: &refp,
            subpel: &subpel,
            wt_src: None,
        }];
        let ctxts = pred_pair(1);
        let prms = FullpelParams {
            lambda: 1 << 8,
            lambda_q_shift: 8,
            max_refine_centers: 1,
            results_per_part: 2,
            part_mask: PartMask::ALL,
            pred_ctxt: &ctxts,
        };
        let cands = [
            SearchNode::candidate(MotionVector::new(0, 0), 0),
            SearchNode::candidate(MotionVector::new(4, 2), 0),
        ];
        let out = fullpel_search_16x16(
            &src,
            16,
            16,
            &refs,
            &cands,
            &MvRange::symmetric(16, 16),
            &prms,
        );
        for id in PartitionId::ALL {
            let set = out.results(id, 0);
            let nodes = set.nodes();
            assert!(!nodes.is_empty());
            for w in nodes.windows(2) {
                assert!(w[0].total_cost <= w[1].total_cost);
            }
        }
    }
}
