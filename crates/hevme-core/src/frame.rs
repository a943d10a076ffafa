//! Frame-level descriptors exchanged across the engine API.

use serde::{Deserialize, Serialize};

use crate::error::{HmeError, Result};
use crate::preset::QualityPreset;

/// Prediction direction of a PU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredDir {
    L0,
    L1,
    Bi,
}

/// Frame parameters bound to a picture for one encode pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameParams {
    /// Lagrangian multiplier in fixed point.
    pub lambda: u32,
    /// Right-shift applied after multiplying a rate by `lambda`.
    pub lambda_q_shift: u8,
    pub bidir_enabled: bool,
    pub is_i_pic: bool,
    pub is_ref_pic: bool,
    /// Horizontal fullpel search range at layer 0.
    pub mv_range_x: i16,
    /// Vertical fullpel search range at layer 0.
    pub mv_range_y: i16,
    /// Quantiser step, used by the noise-aware (STIM) path.
    pub qstep: u32,
    pub quality_preset: QualityPreset,
    pub wt_pred_enable: bool,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            lambda: 1 << 8,
            lambda_q_shift: 8,
            bidir_enabled: false,
            is_i_pic: false,
            is_ref_pic: true,
            mv_range_x: 128,
            mv_range_y: 64,
            qstep: 32,
            quality_preset: QualityPreset::HighQuality,
            wt_pred_enable: false,
        }
    }
}

/// One active reference picture as seen by the current picture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefMapEntry {
    /// Index in the picture-local combined list.
    pub ref_id_lc: u8,
    /// Index in list 0, or `None` when absent from L0.
    pub ref_id_l0: Option<u8>,
    /// Index in list 1, or `None` when absent from L1.
    pub ref_id_l1: Option<u8>,
    pub poc: i32,
    pub is_past: bool,
    /// Weighted-prediction weight; must be positive non-zero.
    pub weight: i16,
    pub offset: i16,
}

impl RefMapEntry {
    /// A plain unweighted reference.
    pub fn unweighted(ref_id_lc: u8, poc: i32, is_past: bool) -> Self {
        Self {
            ref_id_lc,
            ref_id_l0: if is_past { Some(ref_id_lc) } else { None },
            ref_id_l1: if is_past { None } else { Some(ref_id_lc) },
            poc,
            is_past,
            weight: 1 << 6,
            offset: 0,
        }
    }

    /// Q15 reciprocal of the weight, used to invert weighted prediction.
    ///
    /// Callers validate the weight as positive non-zero before use; the
    /// rounding of zero/negative weights is deliberately unspecified.
    pub fn inv_weight_q15(&self) -> Result<i32> {
        if self.weight <= 0 {
            return Err(HmeError::InvalidReferenceMap(format!(
                "non-positive weighted-pred weight {} for poc {}",
                self.weight, self.poc
            )));
        }
        Ok((1 << 15) / self.weight as i32)
    }
}

/// Reference map for one picture: the active references in combined-list
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefMap {
    pub entries: Vec<RefMapEntry>,
}

impl RefMap {
    pub fn num_refs(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, ref_idx: usize) -> Option<&RefMapEntry> {
        self.entries.get(ref_idx)
    }

    pub fn poc_of(&self, ref_idx: usize) -> Option<i32> {
        self.entries.get(ref_idx).map(|e| e.poc)
    }

    /// Reject duplicate POCs up front and, when weighted prediction is in
    /// use, non-positive weights. With weighted prediction off the weight
    /// fields are never read and may hold anything.
    pub fn validate(&self, wt_pred_enabled: bool) -> Result<()> {
        for (i, e) in self.entries.iter().enumerate() {
            if wt_pred_enabled {
                e.inv_weight_q15()?;
            }
            if self.entries[..i].iter().any(|p| p.poc == e.poc) {
                return Err(HmeError::InvalidReferenceMap(format!(
                    "duplicate reference poc {}",
                    e.poc
                )));
            }
        }
        Ok(())
    }
}

/// Per-layer plane data handed over with a picture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputLayerDesc {
    pub width: usize,
    pub height: usize,
    /// Row-major luma pixels, unpadded.
    pub luma: Vec<u8>,
}

/// A picture's input planes: layer 0 first; non-encoded layer planes are
/// derived by the engine when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDesc {
    pub poc: i32,
    pub layers: Vec<InputLayerDesc>,
}

/// One prediction unit of the CTB output record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PuEntry {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
    pub mv_l0: (i16, i16),
    pub mv_l1: (i16, i16),
    pub ref_l0: i8,
    pub ref_l1: i8,
    pub pred_dir: PredDir,
    pub merge_flag: bool,
    pub merge_idx: u8,
}

/// Cost metadata for one evaluated CU candidate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CuCost {
    pub sad: u32,
    pub mv_cost: u32,
    pub total_cost: u32,
}

/// Ranked partition types of one CU, best first, handed to the downstream
/// transform/quantisation recursion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuRanking {
    pub x: u16,
    pub y: u16,
    pub size: u16,
    /// `(partition type, total cost)` ascending by cost.
    pub ranked: Vec<(crate::part::PartitionType, u32)>,
}

/// Caller-supplied record filled per CTB.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CtbOutput {
    pub ctb_x: u32,
    pub ctb_y: u32,
    pub pus: Vec<PuEntry>,
    pub cu_costs: Vec<CuCost>,
    /// Ranked partition candidates per searched CU.
    pub cu_rankings: Vec<CuRanking>,
    /// True when every PU of the CTB is a skip.
    pub all_skip: bool,
}
