//! Merge and skip candidate derivation.
//!
//! Candidates follow the HEVC merge order: spatial A1 (left), B1 (top),
//! B0 (top-right), A0 (bottom-left), B2 (top-left), then the temporal
//! colocated candidate, combined bi-directional pairs, and zero fill.
//! Duplicates are removed; the list is capped by the preset.

use hevme_core::{MotionVector, PredDir};

/// Motion data of one merge candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeCand {
    pub mv: [MotionVector; 2],
    pub ref_idx: [i8; 2],
    pub dir: PredDir,
}

impl MergeCand {
    pub fn uni(list: usize, mv: MotionVector, ref_idx: i8) -> Self {
        let mut c = Self {
            mv: [MotionVector::ZERO; 2],
            ref_idx: [-1; 2],
            dir: if list == 0 { PredDir::L0 } else { PredDir::L1 },
        };
        c.mv[list] = mv;
        c.ref_idx[list] = ref_idx;
        c
    }

    pub fn bi(mv0: MotionVector, ref0: i8, mv1: MotionVector, ref1: i8) -> Self {
        Self { mv: [mv0, mv1], ref_idx: [ref0, ref1], dir: PredDir::Bi }
    }

    fn uses_list(&self, list: usize) -> bool {
        self.ref_idx[list] >= 0
    }
}

/// Spatial neighbour motion available to merge derivation, in HEVC
/// neighbour order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeNeighbours {
    pub a1: Option<MergeCand>,
    pub b1: Option<MergeCand>,
    pub b0: Option<MergeCand>,
    pub a0: Option<MergeCand>,
    pub b2: Option<MergeCand>,
}

/// Fixed pairing order for combined bi-predictive candidates.
const COMBINED_ORDER: [(usize, usize); 6] = [(0, 1), (1, 0), (0, 2), (2, 0), (1, 2), (2, 1)];

/// Build the merge candidate list.
///
/// `coloc` is the temporal candidate already projected to this picture.
/// Zero candidates fill the list to `max_cands` when bidir is off, or a
/// zero bi-candidate when on.
pub fn build_merge_list(
    neighbours: &MergeNeighbours,
    coloc: Option<MergeCand>,
    bidir: bool,
    max_cands: usize,
) -> Vec<MergeCand> {
    let mut list: Vec<MergeCand> = Vec::with_capacity(max_cands);

    let mut push = |cand: Option<MergeCand>, list: &mut Vec<MergeCand>| {
        if list.len() >= max_cands {
            return;
        }
        if let Some(c) = cand {
            if !list.contains(&c) {
                list.push(c);
            }
        }
    };

    // B2 enters only when the first four did not fill the list, as in the
    // standard derivation.
    push(neighbours.a1, &mut list);
    push(neighbours.b1, &mut list);
    push(neighbours.b0, &mut list);
    push(neighbours.a0, &mut list);
    if list.len() < 4 {
        push(neighbours.b2, &mut list);
    }
    push(coloc, &mut list);

    // Combined bi-predictive candidates from pairs of earlier entries.
    if bidir && list.len() >= 2 {
        let base = list.clone();
        for (i, j) in COMBINED_ORDER {
            if list.len() >= max_cands {
                break;
            }
            let (Some(ci), Some(cj)) = (base.get(i), base.get(j)) else { continue };
            if ci.uses_list(0) && cj.uses_list(1) {
                let combined = MergeCand::bi(ci.mv[0], ci.ref_idx[0], cj.mv[1], cj.ref_idx[1]);
                if !list.contains(&combined) {
                    list.push(combined);
                }
            }
        }
    }

    // Zero-MV fill.
    let mut zero_ref: i8 = 0;
    while list.len() < max_cands {
        let zero = if bidir {
            MergeCand::bi(MotionVector::ZERO, zero_ref, MotionVector::ZERO, zero_ref)
        } else {
            MergeCand::uni(0, MotionVector::ZERO, zero_ref)
        };
        if list.contains(&zero) {
            break;
        }
        list.push(zero);
        zero_ref += 1;
    }

    list
}

/// A merge candidate scores as a skip when its prediction residual falls
/// below the dead-zone of the quantiser: every coefficient would quantise
/// to zero and the coded-block-flag stays clear.
pub fn is_skip(distortion: u32, block_pixels: u32, qstep: u32) -> bool {
    // Mean absolute residual below half a quantiser step.
    distortion < (block_pixels * qstep) / 2
}
