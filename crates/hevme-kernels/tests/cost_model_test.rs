//! MV rate-cost model behaviour.

use hevme_core::{MotionVector, PartitionId, SearchNode};
use hevme_kernels::{
    get_range, lambda_q, mv_cost_coarse_fast, mv_cost_explicit, MvResolution, PredCtxt,
    RefBitsTable,
};

#[test]
fn coarse_model_matches_closed_form() {
    // (2*range(|x|) - 1) + (2*range(|y|) - 1) + ref + signs, lambda 1.0 Q8.
    let lambda = 1 << 8;
    // mv (3, 0), ref 0: (2*2-1) + (2*1-1) + 0 + 1 + 0 = 5
    assert_eq!(mv_cost_coarse_fast(MotionVector::new(3, 0), 0, lambda, 8), 5);
    // mv (-8, 5), ref 1: (2*4-1) + (2*3-1) + 1 + 1 + 1 = 15
    assert_eq!(mv_cost_coarse_fast(MotionVector::new(-8, 5), 1, lambda, 8), 15);
    // zero mv is the floor
    assert_eq!(mv_cost_coarse_fast(MotionVector::ZERO, 0, lambda, 8), 2);
}

#[test]
fn coarse_model_scales_with_lambda() {
    let base = mv_cost_coarse_fast(MotionVector::new(4, 4), 0, 1 << 8, 8);
    let double = mv_cost_coarse_fast(MotionVector::new(4, 4), 0, 2 << 8, 8);
    assert_eq!(double, base * 2);
}

#[test]
fn range_is_bit_width() {
    for (v, r) in [(0u32, 1u32), (1, 1), (2, 2), (7, 3), (8, 4), (1023, 10)] {
        assert_eq!(get_range(v), r, "range({v})");
    }
}

#[test]
fn lambda_q_rounded_shift() {
    assert_eq!(lambda_q(10, 256, 8), 10);
    assert_eq!(lambda_q(10, 384, 8), 15);
    // rounding up at the halfway point
    assert_eq!(lambda_q(1, 128, 8), 1);
}

fn ctx_with_left(mv: MotionVector) -> PredCtxt {
    let mut ctx = PredCtxt::without_neighbours(0, 1 << 8, 8, MvResolution::Fpel, 2);
    ctx.l = SearchNode::candidate(mv, 0);
    ctx
}

#[test]
fn explicit_cost_is_zero_mvd_floor_at_the_predictor() {
    let ctx = ctx_with_left(MotionVector::new(6, -2));
    let at_pred = SearchNode::candidate(MotionVector::new(6, -2), 0);
    let near = SearchNode::candidate(MotionVector::new(7, -2), 0);
    let floor = mv_cost_explicit(&at_pred, &ctx, PartitionId::Part2Nx2N, MvResolution::Fpel);
    let step = mv_cost_explicit(&near, &ctx, PartitionId::Part2Nx2N, MvResolution::Fpel);
    assert!(floor < step);
}

#[test]
fn explicit_cost_takes_the_cheaper_predictor() {
    let mut ctx = PredCtxt::without_neighbours(0, 1 << 8, 8, MvResolution::Fpel, 1);
    ctx.l = SearchNode::candidate(MotionVector::new(0, 0), 0);
    ctx.t = SearchNode::candidate(MotionVector::new(32, 0), 0);
    // A node at (30, 0) is close to the top predictor.
    let probe = SearchNode::candidate(MotionVector::new(30, 0), 0);
    let with_both = mv_cost_explicit(&probe, &ctx, PartitionId::Part2Nx2N, MvResolution::Fpel);
    // Removing the top predictor forces the expensive left MVD.
    ctx.t = SearchNode::unavailable(0);
    let left_only = mv_cost_explicit(&probe, &ctx, PartitionId::Part2Nx2N, MvResolution::Fpel);
    assert!(with_both < left_only);
}

#[test]
fn resolution_shift_aligns_predictors() {
    // Predictor stored in qpel, node searched in fullpel: an MVD of zero
    // needs the fullpel node left-shifted by 2.
    let mut ctx = PredCtxt::without_neighbours(0, 1 << 8, 8, MvResolution::Qpel, 1);
    ctx.l = SearchNode::candidate(MotionVector::new(16, 0), 0); // 4 fullpel
    let node = SearchNode::candidate(MotionVector::new(4, 0), 0);
    let zero_mvd = mv_cost_explicit(&node, &ctx, PartitionId::Part2Nx2N, MvResolution::Fpel);
    let off = SearchNode::candidate(MotionVector::new(5, 0), 0);
    let nonzero = mv_cost_explicit(&off, &ctx, PartitionId::Part2Nx2N, MvResolution::Fpel);
    assert!(zero_mvd < nonzero);
}

#[test]
fn ref_bits_grow_with_index() {
    let t = RefBitsTable::new(4);
    assert!(t.bits(0, 0) <= t.bits(0, 1));
    assert!(t.bits(0, 1) <= t.bits(0, 3));
    // truncated: the last index saves the terminating bit
    assert_eq!(t.bits(0, 3), 3);
}
