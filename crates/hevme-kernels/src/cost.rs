//! MV rate-cost models.
//!
//! Two models exist, selected per quality preset:
//! - the fast coarse-layer model, a closed-form function of the MV
//!   magnitudes and the reference index, and
//! - the explicit model, which estimates the MVD rate against the cheaper of
//!   two AMVP-style predictors taken from the causal neighbourhood.

use hevme_core::{MotionVector, PartitionId, SearchNode};

/// MV resolution a search operates at; determines the shift to quarter-pel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvResolution {
    Fpel,
    Hpel,
    Qpel,
}

impl MvResolution {
    /// Left shift that converts this resolution to quarter-pel units.
    pub fn shift_to_qpel(self) -> u8 {
        match self {
            MvResolution::Fpel => 2,
            MvResolution::Hpel => 1,
            MvResolution::Qpel => 0,
        }
    }
}

/// Minimum number of bits needed to represent `n`.
///
/// Zero takes one bit, mirroring the range convention of the bit-count
/// tables in the reference rate model.
pub fn get_range(n: u32) -> u32 {
    if n == 0 {
        1
    } else {
        32 - n.leading_zeros()
    }
}

/// Multiply a rate by lambda in Q format with rounded right shift.
pub fn lambda_q(rate: u32, lambda: u32, lambda_q_shift: u8) -> u32 {
    let rnd = 1u64 << (lambda_q_shift - 1);
    ((rate as u64 * lambda as u64 + rnd) >> lambda_q_shift) as u32
}

/// Coarse-layer fast MV cost:
/// `(2*range(|x|) - 1) + (2*range(|y|) - 1) + ref_idx + (x != 0) + (y != 0)`
/// in bits, multiplied by lambda with rounded shift. MV components are in
/// the coarse layer's fullpel units.
pub fn mv_cost_coarse_fast(mv: MotionVector, ref_idx: i8, lambda: u32, lambda_q_shift: u8) -> u32 {
    let mut bits = (2 * get_range(mv.x.unsigned_abs() as u32) - 1)
        + (2 * get_range(mv.y.unsigned_abs() as u32) - 1)
        + ref_idx.max(0) as u32;
    bits += (mv.x != 0) as u32;
    bits += (mv.y != 0) as u32;
    lambda_q(bits, lambda, lambda_q_shift)
}

/// Reference-index signalling bits per list, truncated-unary coded.
#[derive(Debug, Clone)]
pub struct RefBitsTable {
    bits: [Vec<u32>; 2],
}

impl RefBitsTable {
    /// Build for `num_refs` active references per list.
    pub fn new(num_refs: usize) -> Self {
        let one_list: Vec<u32> = (0..num_refs.max(1))
            .map(|r| {
                if num_refs <= 1 {
                    0
                } else if r + 1 == num_refs {
                    r as u32
                } else {
                    r as u32 + 1
                }
            })
            .collect();
        Self { bits: [one_list.clone(), one_list] }
    }

    pub fn bits(&self, pred_lx: usize, ref_idx: i8) -> u32 {
        let list = &self.bits[pred_lx & 1];
        list.get(ref_idx.max(0) as usize).copied().unwrap_or(0)
    }
}

/// Prediction context for explicit MV cost: the causal neighbour nodes the
/// predictor pair is drawn from, plus rate parameters.
#[derive(Debug, Clone)]
pub struct PredCtxt {
    pub tl: SearchNode,
    pub t: SearchNode,
    pub tr: SearchNode,
    pub l: SearchNode,
    pub bl: SearchNode,
    pub coloc: SearchNode,
    pub zero: SearchNode,
    /// Which list this context predicts for (0 or 1).
    pub pred_lx: usize,
    pub lambda: u32,
    pub lambda_q_shift: u8,
    /// Resolution the predictor MVs are stored at.
    pub pred_resolution: MvResolution,
    pub ref_bits: RefBitsTable,
}

impl PredCtxt {
    /// A context with no causal neighbours; predictors fall back to the
    /// colocated and zero nodes.
    pub fn without_neighbours(
        pred_lx: usize,
        lambda: u32,
        lambda_q_shift: u8,
        pred_resolution: MvResolution,
        num_refs: usize,
    ) -> Self {
        Self {
            tl: SearchNode::unavailable(0),
            t: SearchNode::unavailable(0),
            tr: SearchNode::unavailable(0),
            l: SearchNode::unavailable(0),
            bl: SearchNode::unavailable(0),
            coloc: SearchNode::candidate(MotionVector::ZERO, 0),
            zero: SearchNode::candidate(MotionVector::ZERO, 0),
            pred_lx,
            lambda,
            lambda_q_shift,
            pred_resolution,
            ref_bits: RefBitsTable::new(num_refs),
        }
    }

    /// Predictor a: first available of bottom-left, left; b: first available
    /// of top-right, top, top-left. Unfilled slots fall back to the
    /// colocated node then the zero node; identical predictors are replaced
    /// on the b side by the colocated node.
    fn predictor_pair(&self) -> (&SearchNode, &SearchNode) {
        let a = if self.bl.is_avail {
            Some(&self.bl)
        } else if self.l.is_avail {
            Some(&self.l)
        } else {
            None
        };
        let b = if self.tr.is_avail {
            Some(&self.tr)
        } else if self.t.is_avail {
            Some(&self.t)
        } else if self.tl.is_avail {
            Some(&self.tl)
        } else {
            None
        };
        match (a, b) {
            (None, None) => (&self.coloc, &self.zero),
            (None, Some(b)) => (&self.coloc, b),
            (Some(a), None) => (a, &self.coloc),
            (Some(a), Some(b)) => {
                if a.mv == b.mv && a.ref_idx == b.ref_idx {
                    (a, &self.coloc)
                } else {
                    (a, b)
                }
            }
        }
    }
}

/// Explicit MV cost against the cheaper of the two AMVP-style predictors.
///
/// All predictor candidates share the node's reference, so no POC scaling is
/// required here; the MVD rate is
/// `range(|dx|) + range(|dy|) + (dx != 0) + (dy != 0) + ref_bits + 2`,
/// lambda-weighted.
pub fn mv_cost_explicit(
    node: &SearchNode,
    ctx: &PredCtxt,
    _part_id: PartitionId,
    node_resolution: MvResolution,
) -> u32 {
    let (a, b) = ctx.predictor_pair();

    let inp_shift = node_resolution.shift_to_qpel();
    let pred_shift = ctx.pred_resolution.shift_to_qpel();

    let mvd = |p: &SearchNode| {
        let dx = ((node.mv.x as i32) << inp_shift) - ((p.mv.x as i32) << pred_shift);
        let dy = ((node.mv.y as i32) << inp_shift) - ((p.mv.y as i32) << pred_shift);
        (dx.unsigned_abs(), dy.unsigned_abs())
    };

    let (ax, ay) = mvd(a);
    let (bx, by) = mvd(b);
    let (dx, dy) = if ax + ay < bx + by { (ax, ay) } else { (bx, by) };

    let ref_bits = ctx.ref_bits.bits(ctx.pred_lx, node.ref_idx);
    let bits = get_range(dx) + get_range(dy) + (dx > 0) as u32 + (dy > 0) as u32 + ref_bits + 2;
    lambda_q(bits, ctx.lambda, ctx.lambda_q_shift)
}
