//! Quality presets and their resolved search parameters.
//!
//! The original encoder selects hand-written function-pointer tables per
//! preset; here a preset resolves to a plain parameter record and callers
//! branch on it through enum matches.

use serde::{Deserialize, Serialize};

/// Encoder quality/speed trade-off presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityPreset {
    Pristine,
    HighQuality,
    MediumSpeed,
    HighSpeed,
    ExtremeSpeed,
    ExtremeSpeed25,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 6] = [
        QualityPreset::Pristine,
        QualityPreset::HighQuality,
        QualityPreset::MediumSpeed,
        QualityPreset::HighSpeed,
        QualityPreset::ExtremeSpeed,
        QualityPreset::ExtremeSpeed25,
    ];

    /// Resolve the preset to its search parameters.
    pub fn params(self) -> PresetParams {
        use QualityPreset::*;
        match self {
            Pristine => PresetParams {
                max_num_fpel_refine_centers: 4,
                max_num_subpel_cands_per_part: 2,
                use_satd_subpel: true,
                max_merge_candidates: 5,
                limit_active_partitions: false,
                coarse_step: 2,
                use_explicit_coarse_cost: true,
                refine_grid: RefineGrid::Rect9,
                max_refine_iters: 4,
                max_num_coloc_cands: 4,
                num_results_per_ref_coarse: 2,
                num_results_per_ref_refine: 2,
                use_global_candidate: true,
            },
            HighQuality => PresetParams {
                max_num_fpel_refine_centers: 4,
                max_num_subpel_cands_per_part: 2,
                use_satd_subpel: true,
                max_merge_candidates: 5,
                limit_active_partitions: false,
                coarse_step: 2,
                use_explicit_coarse_cost: true,
                refine_grid: RefineGrid::Square9,
                max_refine_iters: 4,
                max_num_coloc_cands: 4,
                num_results_per_ref_coarse: 2,
                num_results_per_ref_refine: 2,
                use_global_candidate: true,
            },
            MediumSpeed => PresetParams {
                max_num_fpel_refine_centers: 1,
                max_num_subpel_cands_per_part: 2,
                use_satd_subpel: true,
                max_merge_candidates: 5,
                limit_active_partitions: true,
                coarse_step: 4,
                use_explicit_coarse_cost: false,
                refine_grid: RefineGrid::Square9,
                max_refine_iters: 2,
                max_num_coloc_cands: 2,
                num_results_per_ref_coarse: 2,
                num_results_per_ref_refine: 2,
                use_global_candidate: true,
            },
            HighSpeed => PresetParams {
                max_num_fpel_refine_centers: 1,
                max_num_subpel_cands_per_part: 1,
                use_satd_subpel: false,
                max_merge_candidates: 3,
                limit_active_partitions: true,
                coarse_step: 4,
                use_explicit_coarse_cost: false,
                refine_grid: RefineGrid::Diamond5,
                max_refine_iters: 2,
                max_num_coloc_cands: 2,
                num_results_per_ref_coarse: 1,
                num_results_per_ref_refine: 1,
                use_global_candidate: true,
            },
            ExtremeSpeed => PresetParams {
                max_num_fpel_refine_centers: 1,
                max_num_subpel_cands_per_part: 1,
                use_satd_subpel: false,
                max_merge_candidates: 3,
                limit_active_partitions: true,
                coarse_step: 4,
                use_explicit_coarse_cost: false,
                refine_grid: RefineGrid::Diamond5,
                max_refine_iters: 1,
                max_num_coloc_cands: 1,
                num_results_per_ref_coarse: 1,
                num_results_per_ref_refine: 1,
                use_global_candidate: true,
            },
            ExtremeSpeed25 => PresetParams {
                max_num_fpel_refine_centers: 1,
                max_num_subpel_cands_per_part: 1,
                use_satd_subpel: false,
                max_merge_candidates: 3,
                limit_active_partitions: true,
                coarse_step: 4,
                use_explicit_coarse_cost: false,
                refine_grid: RefineGrid::Diamond5,
                max_refine_iters: 1,
                max_num_coloc_cands: 1,
                num_results_per_ref_coarse: 1,
                num_results_per_ref_refine: 1,
                // The fastest preset searches only the full-search winner.
                use_global_candidate: false,
            },
        }
    }
}

/// Refinement grid shapes searched around a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefineGrid {
    /// Full 3x3 square, 9 points.
    Square9,
    /// Centre plus the four edge neighbours.
    Diamond5,
    /// 3x3 rectangle with independent x/y steps.
    Rect9,
}

/// Search parameters resolved from a quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetParams {
    /// Fullpel refinement centres ranked by running total cost.
    pub max_num_fpel_refine_centers: usize,
    /// Subpel candidates refined per partition.
    pub max_num_subpel_cands_per_part: usize,
    /// SATD instead of SAD during subpel refinement.
    pub use_satd_subpel: bool,
    /// Merge candidate list length.
    pub max_merge_candidates: usize,
    /// Restrict the partition mask from segmentation activity.
    pub limit_active_partitions: bool,
    /// Coarse full-search sweep step (2 or 4).
    pub coarse_step: u8,
    /// Coarse cost model: explicit AMVP-style (true) or the fast
    /// range-based model (false).
    pub use_explicit_coarse_cost: bool,
    /// Grid shape for intermediate-layer refinement.
    pub refine_grid: RefineGrid,
    /// Maximum refinement iterations around one candidate.
    pub max_refine_iters: u8,
    /// Colocated/projected candidates retained per location.
    pub max_num_coloc_cands: usize,
    /// Best results stored per reference in the coarse MV bank.
    pub num_results_per_ref_coarse: usize,
    /// Best results stored per reference in refinement MV banks.
    pub num_results_per_ref_refine: usize,
    /// Whether the global-MV candidate participates at all.
    pub use_global_candidate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_table_matches_contract() {
        // Contract table: refine centres / subpel cands / satd / merge cands
        let expect = [
            (QualityPreset::Pristine, 4, 2, true, 5, false),
            (QualityPreset::HighQuality, 4, 2, true, 5, false),
            (QualityPreset::MediumSpeed, 1, 2, true, 5, true),
            (QualityPreset::HighSpeed, 1, 1, false, 3, true),
            (QualityPreset::ExtremeSpeed, 1, 1, false, 3, true),
            (QualityPreset::ExtremeSpeed25, 1, 1, false, 3, true),
        ];
        for (preset, centers, subpel, satd, merge, limited) in expect {
            let p = preset.params();
            assert_eq!(p.max_num_fpel_refine_centers, centers, "{preset:?}");
            assert_eq!(p.max_num_subpel_cands_per_part, subpel, "{preset:?}");
            assert_eq!(p.use_satd_subpel, satd, "{preset:?}");
            assert_eq!(p.max_merge_candidates, merge, "{preset:?}");
            assert_eq!(p.limit_active_partitions, limited, "{preset:?}");
        }
    }

    #[test]
    fn coarse_step_is_2_or_4() {
        for preset in QualityPreset::ALL {
            let p = preset.params();
            assert!(p.coarse_step == 2 || p.coarse_step == 4);
        }
    }
}
