//! Engine initialisation parameters.

use serde::{Deserialize, Serialize};

use hevme_core::{HmeError, QualityPreset, Result, MAX_NUM_LAYERS, MAX_NUM_REF};

/// Parameters fixed for the lifetime of an encoder handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmeInitParams {
    /// Number of simulcast layers that are actually encoded (≥ 1). The
    /// remaining pyramid layers exist only to seed motion.
    pub num_enc_layers: usize,
    /// Width per encoded layer, largest first.
    pub enc_widths: Vec<usize>,
    /// Height per encoded layer, largest first.
    pub enc_heights: Vec<usize>,
    /// Maximum references a picture may bind.
    pub max_num_ref: usize,
    /// Reference descriptors in the pool; bounds pictures in flight.
    pub num_ref_descriptors: usize,
    /// Worker threads that will call `process_frame` concurrently.
    pub num_threads: usize,
    pub quality_preset: QualityPreset,
    /// Enable the noise-preserving (STIM) cost bias.
    pub noise_aware: bool,
}

impl Default for HmeInitParams {
    fn default() -> Self {
        Self {
            num_enc_layers: 1,
            enc_widths: vec![1920],
            enc_heights: vec![1080],
            max_num_ref: 4,
            num_ref_descriptors: 8,
            num_threads: 1,
            quality_preset: QualityPreset::HighQuality,
            noise_aware: false,
        }
    }
}

impl HmeInitParams {
    /// Validate everything that does not need pyramid geometry; the pyramid
    /// module performs the per-layer ratio checks.
    pub fn validate(&self) -> Result<()> {
        if self.num_enc_layers == 0 || self.num_enc_layers > MAX_NUM_LAYERS - 1 {
            return Err(HmeError::InvalidPyramid(format!(
                "num_enc_layers {} outside 1..={}",
                self.num_enc_layers,
                MAX_NUM_LAYERS - 1
            )));
        }
        if self.enc_widths.len() != self.num_enc_layers
            || self.enc_heights.len() != self.num_enc_layers
        {
            return Err(HmeError::InvalidPyramid(
                "layer dimension arrays do not match num_enc_layers".into(),
            ));
        }
        if self.max_num_ref > MAX_NUM_REF {
            return Err(HmeError::InvalidReferenceMap(format!(
                "max_num_ref {} exceeds {}",
                self.max_num_ref, MAX_NUM_REF
            )));
        }
        if self.num_ref_descriptors == 0 {
            return Err(HmeError::ResourceExhausted("empty reference descriptor pool".into()));
        }
        if self.num_threads == 0 {
            return Err(HmeError::InvalidPyramid("num_threads must be at least 1".into()));
        }
        Ok(())
    }
}
