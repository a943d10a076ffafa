//! hevme-kernels: distortion and rate kernels
//!
//! This crate provides the functionally pure kernels the search engines are
//! built on:
//! - SAD for arbitrary block sizes - scalar & SIMD-accelerated
//! - 9-point grid SAD evaluation
//! - partial SADs: 17 partition SADs of a CU from its 4x4 (or N/2) sub-SADs
//! - SATD via 4x4/8x8 Hadamard transforms
//! - bi-prediction averaging and weighted-prediction input generation
//! - MV rate-cost models (coarse fast model and AMVP-style explicit model)
//! - block variance and the STIM noise-preservation factor
//!
//! Any SIMD specialisation is selected at runtime via CPU feature detection
//! and is bit-identical to the scalar definition.

pub mod cost;
pub mod satd;
pub mod simd;
pub mod stim;

pub use cost::{
    get_range, lambda_q, mv_cost_coarse_fast, mv_cost_explicit, MvResolution, PredCtxt,
    RefBitsTable,
};
pub use stim::stim_injected_distortion;
pub use satd::{satd_4x4, satd_8x8, satd_mxn};
pub use stim::{block_variance, stim_factor_q30, STIM_Q};

use hevme_core::{PartitionId, NUM_PARTITIONS};

/// Cost sentinel for grid points masked out of an evaluation.
pub const SKIPPED: u32 = u32::MAX;

/// Grid point order used by all 9-point evaluations:
/// centre, left, top, right, bottom, top-left, top-right, bottom-left,
/// bottom-right.
pub const GRID_OFFSETS: [(i32, i32); 9] = [
    (0, 0),
    (-1, 0),
    (0, -1),
    (1, 0),
    (0, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
];

/// Grid mask covering all nine points.
pub const GRID_ALL: u16 = 0x1FF;
/// Grid mask covering centre plus the four edge neighbours (diamond).
pub const GRID_DIAMOND: u16 = 0x01F;
/// Grid mask covering the eight neighbours, centre excluded.
pub const GRID_RING: u16 = 0x1FE;

/// Sum of absolute differences over a `w` x `h` block, scalar reference.
pub fn sad_scalar(
    src: &[u8],
    src_stride: usize,
    refp: &[u8],
    ref_stride: usize,
    w: usize,
    h: usize,
) -> u32 {
    let mut sad = 0u32;
    for y in 0..h {
        let s = &src[y * src_stride..y * src_stride + w];
        let r = &refp[y * ref_stride..y * ref_stride + w];
        for (a, b) in s.iter().zip(r.iter()) {
            sad += (*a as i32 - *b as i32).unsigned_abs();
        }
    }
    sad
}

/// Sum of absolute differences over a `w` x `h` block.
///
/// Dispatches to the best SIMD implementation available at runtime and falls
/// back to [`sad_scalar`].
pub fn sad(
    src: &[u8],
    src_stride: usize,
    refp: &[u8],
    ref_stride: usize,
    w: usize,
    h: usize,
) -> u32 {
    simd::sad_simd(src, src_stride, refp, ref_stride, w, h)
}

/// Evaluate SAD at up to nine offsets of a 3x3 grid centred at
/// `ref_plane[ref_anchor]`, with `step` pixels between grid points.
///
/// `mask` selects grid points by the [`GRID_OFFSETS`] order; masked-out
/// entries come back as [`SKIPPED`]. One call amortises the source-block
/// traffic over all evaluated points. The anchor must sit deep enough inside
/// the padded plane that every unmasked offset stays in bounds.
#[allow(clippy::too_many_arguments)]
pub fn sad_grid(
    src: &[u8],
    src_stride: usize,
    ref_plane: &[u8],
    ref_anchor: usize,
    ref_stride: usize,
    w: usize,
    h: usize,
    step: (i32, i32),
    mask: u16,
) -> [u32; 9] {
    let mut out = [SKIPPED; 9];
    for (i, (gx, gy)) in GRID_OFFSETS.iter().enumerate() {
        if mask & (1 << i) == 0 {
            continue;
        }
        let dx = gx * step.0;
        let dy = gy * step.1;
        let idx = ref_anchor as isize + dy as isize * ref_stride as isize + dx as isize;
        out[i] = sad(src, src_stride, &ref_plane[idx as usize..], ref_stride, w, h);
    }
    out
}

/// The 16 sub-block SADs of a CU, sub-block `b` at column `b % 4`, row
/// `b / 4` of the 4x4 arrangement.
fn sub_sads(
    src: &[u8],
    src_stride: usize,
    refp: &[u8],
    ref_stride: usize,
    sub: usize,
) -> [u32; 16] {
    let mut sads = [0u32; 16];
    for (b, s) in sads.iter_mut().enumerate() {
        let col = b % 4;
        let row = b / 4;
        let so = row * sub * src_stride + col * sub;
        let ro = row * sub * ref_stride + col * sub;
        *s = sad(&src[so..], src_stride, &refp[ro..], ref_stride, sub, sub);
    }
    sads
}

/// Fold 16 sub-SADs into the 17 partition SADs.
///
/// The symmetric partitions are additive combinations of the NxN quadrants;
/// the asymmetric remainders are derived subtractively from the 2Nx2N total
/// so the arithmetic identities (2Nx2N = 2NxN_T + 2NxN_B = ...) hold exactly.
pub fn fold_part_sads(s: &[u32; 16]) -> [u32; NUM_PARTITIONS] {
    use PartitionId::*;
    let mut p = [0u32; NUM_PARTITIONS];
    p[PartNxNTopLeft.index()] = s[0] + s[1] + s[4] + s[5];
    p[PartNxNTopRight.index()] = s[2] + s[3] + s[6] + s[7];
    p[PartNxNBotLeft.index()] = s[8] + s[9] + s[12] + s[13];
    p[PartNxNBotRight.index()] = s[10] + s[11] + s[14] + s[15];
    p[PartNx2NLeft.index()] = p[PartNxNTopLeft.index()] + p[PartNxNBotLeft.index()];
    p[PartNx2NRight.index()] = p[PartNxNTopRight.index()] + p[PartNxNBotRight.index()];
    p[Part2NxNTop.index()] = p[PartNxNTopRight.index()] + p[PartNxNTopLeft.index()];
    p[Part2NxNBot.index()] = p[PartNxNBotRight.index()] + p[PartNxNBotLeft.index()];
    p[PartnLx2NLeft.index()] = s[8] + s[0] + s[12] + s[4];
    p[PartnRx2NRight.index()] = s[3] + s[7] + s[15] + s[11];
    p[Part2NxnUTop.index()] = s[1] + s[0] + s[2] + s[3];
    p[Part2NxnDBot.index()] = s[15] + s[14] + s[12] + s[13];
    p[Part2Nx2N.index()] = p[Part2NxNTop.index()] + p[Part2NxNBot.index()];
    p[Part2NxnUBot.index()] = p[Part2Nx2N.index()] - p[Part2NxnUTop.index()];
    p[Part2NxnDTop.index()] = p[Part2Nx2N.index()] - p[Part2NxnDBot.index()];
    p[PartnRx2NLeft.index()] = p[Part2Nx2N.index()] - p[PartnRx2NRight.index()];
    p[PartnLx2NRight.index()] = p[Part2Nx2N.index()] - p[PartnLx2NLeft.index()];
    p
}

/// SADs for all 17 partition ids of a 16x16 block in one call, decomposed
/// into its 16 4x4 sub-SADs.
pub fn partial_sads_16x16(
    src: &[u8],
    src_stride: usize,
    refp: &[u8],
    ref_stride: usize,
) -> [u32; NUM_PARTITIONS] {
    fold_part_sads(&sub_sads(src, src_stride, refp, ref_stride, 4))
}

/// SADs for all 17 partition ids of a 32x32 or 64x64 block, decomposed into
/// N/2-sized sub-SADs.
pub fn partial_sads_mxm(
    src: &[u8],
    src_stride: usize,
    refp: &[u8],
    ref_stride: usize,
    cu_size: usize,
) -> [u32; NUM_PARTITIONS] {
    debug_assert!(cu_size == 16 || cu_size == 32 || cu_size == 64);
    fold_part_sads(&sub_sads(src, src_stride, refp, ref_stride, cu_size / 4))
}

/// Whole-frame SAD with rows distributed over the rayon pool.
///
/// Used by frame-level analysis sweeps (scene-change heuristics, dynamic
/// range studies), not by the per-block search hot path.
#[cfg(feature = "parallel")]
pub fn frame_sad_parallel(
    src: &[u8],
    src_stride: usize,
    refp: &[u8],
    ref_stride: usize,
    w: usize,
    h: usize,
) -> u64 {
    use rayon::prelude::*;
    (0..h)
        .into_par_iter()
        .map(|y| sad(&src[y * src_stride..], src_stride, &refp[y * ref_stride..], ref_stride, w, 1) as u64)
        .sum()
}

/// Bi-prediction averaging: `out[i] = (a[i] + b[i] + 1) >> 1`.
pub fn avg_pred(
    p0: &[u8],
    p0_stride: usize,
    p1: &[u8],
    p1_stride: usize,
    out: &mut [u8],
    out_stride: usize,
    w: usize,
    h: usize,
) {
    for y in 0..h {
        for x in 0..w {
            let a = p0[y * p0_stride + x] as u16;
            let b = p1[y * p1_stride + x] as u16;
            out[y * out_stride + x] = ((a + b + 1) >> 1) as u8;
        }
    }
}

/// Weighted-prediction input generation:
/// `out = clip8(((inp * weight + round) >> shift) + offset)`.
pub fn weighted_input(
    inp: &[u8],
    inp_stride: usize,
    out: &mut [u8],
    out_stride: usize,
    w: usize,
    h: usize,
    weight: i16,
    offset: i16,
    shift: u8,
) {
    let rnd = 1i32 << (shift - 1);
    for y in 0..h {
        for x in 0..w {
            let v = inp[y * inp_stride + x] as i32;
            let wtd = ((v * weight as i32 + rnd) >> shift) + offset as i32;
            out[y * out_stride + x] = wtd.clamp(0, 255) as u8;
        }
    }
}
