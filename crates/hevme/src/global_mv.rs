//! Picture-wide dominant motion estimation from a bucketed MV histogram.
//!
//! Every coarse-layer block contributes its winning MVs; after the picture,
//! the two strongest buckets become the layer's global MV lobes. The
//! strongest lobe serves past references, the second lobe future ones.

use hevme_core::{poc_scale_q8, MotionVector};

/// Fullpel units per histogram bucket on each axis.
const BUCKET_QUANT: i32 = 4;

/// Which global-MV lobe to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GmvLobe {
    /// Strongest histogram peak.
    Thick = 0,
    /// Second-strongest peak.
    Thin = 1,
}

/// A 2-D histogram of fullpel MVs in `BUCKET_QUANT`-wide buckets.
#[derive(Debug, Clone)]
pub struct MvHistogram {
    counts: Vec<u32>,
    buckets_x: i32,
    buckets_y: i32,
}

impl MvHistogram {
    /// Histogram sized to cover `[-max_mv_x, max_mv_x] x [-max_mv_y, max_mv_y]`.
    pub fn new(max_mv_x: i16, max_mv_y: i16) -> Self {
        let buckets_x = (max_mv_x as i32 + BUCKET_QUANT - 1) / BUCKET_QUANT;
        let buckets_y = (max_mv_y as i32 + BUCKET_QUANT - 1) / BUCKET_QUANT;
        let w = (2 * buckets_x + 1) as usize;
        let h = (2 * buckets_y + 1) as usize;
        Self { counts: vec![0; w * h], buckets_x, buckets_y }
    }

    fn bucket_of(&self, v: i32, half: i32) -> i32 {
        // Round to the nearest bucket centre, then clamp to the grid.
        let b = if v >= 0 {
            (v + BUCKET_QUANT / 2) / BUCKET_QUANT
        } else {
            (v - BUCKET_QUANT / 2) / BUCKET_QUANT
        };
        b.clamp(-half, half)
    }

    /// Record one fullpel MV.
    pub fn update(&mut self, mv_x: i16, mv_y: i16) {
        let bx = self.bucket_of(mv_x as i32, self.buckets_x);
        let by = self.bucket_of(mv_y as i32, self.buckets_y);
        let w = (2 * self.buckets_x + 1) as usize;
        let idx = ((by + self.buckets_y) as usize) * w + (bx + self.buckets_x) as usize;
        self.counts[idx] += 1;
    }

    /// The two strongest bucket centres, strongest first.
    ///
    /// Ties break toward the smaller |mv|; among equal magnitudes the
    /// raster-order earlier bucket wins, keeping repeated runs identical.
    pub fn lobes(&self) -> [MotionVector; 2] {
        let mut best: [(u32, i32, MotionVector); 2] = [
            (0, i32::MAX, MotionVector::ZERO),
            (0, i32::MAX, MotionVector::ZERO),
        ];
        let w = 2 * self.buckets_x + 1;
        for (i, &count) in self.counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let bx = (i as i32 % w) - self.buckets_x;
            let by = (i as i32 / w) - self.buckets_y;
            let mv = MotionVector::new((bx * BUCKET_QUANT) as i16, (by * BUCKET_QUANT) as i16);
            let abs = mv.abs_sum();
            let entry = (count, abs, mv);
            if Self::beats(&entry, &best[0]) {
                best[1] = best[0];
                best[0] = entry;
            } else if Self::beats(&entry, &best[1]) {
                best[1] = entry;
            }
        }
        [best[0].2, best[1].2]
    }

    fn beats(a: &(u32, i32, MotionVector), b: &(u32, i32, MotionVector)) -> bool {
        a.0 > b.0 || (a.0 == b.0 && b.0 > 0 && a.1 < b.1)
    }
}

/// Read a stored global MV scaled from the POC distance it was observed
/// over to the distance it will be applied over.
pub fn scale_global_mv(
    lobe_mv: MotionVector,
    stored_delta_poc: i32,
    new_delta_poc: i32,
) -> MotionVector {
    if stored_delta_poc == 0 || stored_delta_poc == new_delta_poc {
        return lobe_mv;
    }
    let scf = poc_scale_q8(new_delta_poc, new_delta_poc - stored_delta_poc, 0);
    lobe_mv.scale_q8(scf as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_lobes_ranked_by_count() {
        let mut h = MvHistogram::new(64, 64);
        for _ in 0..100 {
            h.update(4, 0);
        }
        for _ in 0..50 {
            h.update(-4, 0);
        }
        for _ in 0..10 {
            h.update(0, 4);
        }
        let lobes = h.lobes();
        assert_eq!(lobes[0], MotionVector::new(4, 0));
        assert_eq!(lobes[1], MotionVector::new(-4, 0));
    }

    #[test]
    fn tie_breaks_toward_smaller_magnitude() {
        let mut h = MvHistogram::new(64, 64);
        for _ in 0..7 {
            h.update(16, 0);
            h.update(4, 0);
        }
        assert_eq!(h.lobes()[0], MotionVector::new(4, 0));
    }

    #[test]
    fn empty_histogram_reads_zero() {
        let h = MvHistogram::new(32, 16);
        assert_eq!(h.lobes(), [MotionVector::ZERO; 2]);
    }

    #[test]
    fn out_of_range_updates_clamp_to_border_bucket() {
        let mut h = MvHistogram::new(8, 8);
        h.update(120, -120);
        assert_eq!(h.lobes()[0], MotionVector::new(8, -8));
    }

    #[test]
    fn global_mv_scales_with_poc_distance() {
        let mv = MotionVector::new(8, -4);
        assert_eq!(scale_global_mv(mv, 4, 4), mv);
        assert_eq!(scale_global_mv(mv, 4, 8), MotionVector::new(16, -8));
        assert_eq!(scale_global_mv(mv, 8, 4), MotionVector::new(4, -2));
    }

    #[test]
    fn bucket_rounding_to_nearest_centre() {
        let mut h = MvHistogram::new(16, 16);
        h.update(5, 0);
        h.update(6, 0);
        assert_eq!(h.lobes()[0], MotionVector::new(4, 0));
        // 6 rounds to bucket 2 (centre 8)
        let mut h2 = MvHistogram::new(16, 16);
        h2.update(6, 0);
        assert_eq!(h2.lobes()[0], MotionVector::new(8, 0));
    }
}
