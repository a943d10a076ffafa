//! Pyramid geometry derivation and non-encoded layer downsampling.
//!
//! Layer 0 is the finest (encoded) layer; the last layer is the coarsest.
//! Encoded simulcast layers are supplied by the caller and validated; the
//! remaining layers are derived by halving each side, rounded up to a
//! multiple of 4, until a side would fall below twice the coarsest-layer
//! minimum or the layer cap is reached. The two coarsest layers are never
//! encoded.

use hevme_core::{HmeError, Plane, Result, MAX_NUM_LAYERS, MIN_PAD};

use crate::config::HmeInitParams;

/// Minimum width of the coarsest layer.
pub const MIN_WD_COARSE: usize = 16;
/// Minimum height of the coarsest layer.
pub const MIN_HT_COARSE: usize = 16;

/// Dimensions and role of one pyramid layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDims {
    pub width: usize,
    pub height: usize,
    /// Encoded simulcast layer (supplied) vs derived search-only layer.
    pub encoded: bool,
}

fn floor16(v: usize) -> usize {
    v & !15
}

fn ceil16(v: usize) -> usize {
    (v + 15) & !15
}

fn ceil4(v: usize) -> usize {
    (v + 3) & !3
}

/// Derive the full layer ladder from the encoded layers.
///
/// Validates that consecutive encoded layers keep a per-step ratio between
/// 1/2 (dyadic) and 3/4, with a 16-pixel alignment slack on the window, and
/// that the coarsest encoded layer is at least twice the coarsest minimum.
pub fn derive_layers(params: &HmeInitParams) -> Result<Vec<LayerDims>> {
    params.validate()?;
    let n_enc = params.num_enc_layers;
    let (wds, hts) = (&params.enc_widths, &params.enc_heights);

    for i in 1..n_enc {
        let w_lo = floor16(wds[i - 1] / 2);
        let w_hi = ceil16(wds[i - 1] * 3 / 4);
        if wds[i] < w_lo || wds[i] > w_hi {
            return Err(HmeError::InvalidPyramid(format!(
                "layer {} width {} outside [{}, {}]",
                i, wds[i], w_lo, w_hi
            )));
        }
        let h_lo = floor16(hts[i - 1] / 2);
        let h_hi = ceil16(hts[i - 1] * 3 / 4);
        if hts[i] < h_lo || hts[i] > h_hi {
            return Err(HmeError::InvalidPyramid(format!(
                "layer {} height {} outside [{}, {}]",
                i, hts[i], h_lo, h_hi
            )));
        }
    }

    if wds[n_enc - 1] < 2 * MIN_WD_COARSE || hts[n_enc - 1] < 2 * MIN_HT_COARSE {
        return Err(HmeError::InvalidPyramid(format!(
            "coarsest encoded layer {}x{} below minimum {}x{}",
            wds[n_enc - 1],
            hts[n_enc - 1],
            2 * MIN_WD_COARSE,
            2 * MIN_HT_COARSE
        )));
    }

    let mut layers: Vec<LayerDims> = (0..n_enc)
        .map(|i| LayerDims { width: wds[i], height: hts[i], encoded: true })
        .collect();

    while layers.len() < MAX_NUM_LAYERS {
        let prev = layers[layers.len() - 1];
        if prev.width < 2 * MIN_WD_COARSE || prev.height < 2 * MIN_HT_COARSE {
            break;
        }
        layers.push(LayerDims {
            width: ceil4(prev.width / 2),
            height: ceil4(prev.height / 2),
            encoded: false,
        });
    }

    // At least one non-encoded layer must exist to seed coarse motion.
    if layers.len() == n_enc {
        return Err(HmeError::InvalidPyramid(
            "encoded layers leave no room for a coarse search layer".into(),
        ));
    }
    Ok(layers)
}

/// Downsample a padded plane to the given layer dimensions.
///
/// A [1 2 1] tap in each direction smooths the source before 2:1
/// decimation; the ceil-to-4 layer sizing means the last column/row may
/// re-sample the clamped source edge.
pub fn downsample(src: &Plane, dst_w: usize, dst_h: usize) -> Plane {
    let mut dst = Plane::new(dst_w, dst_h, MIN_PAD);
    let (sw, sh) = (src.width() as isize, src.height() as isize);
    for y in 0..dst_h {
        let sy = ((2 * y) as isize).min(sh - 1);
        for x in 0..dst_w {
            let sx = ((2 * x) as isize).min(sw - 1);
            // Separable [1 2 1] x [1 2 1] around (sx, sy); padded reads are
            // in range because every plane carries MIN_PAD on each side.
            let mut acc = 0u32;
            for (dy, wy) in [(-1i8, 1u32), (0, 2), (1, 1)] {
                let row_y = sy + dy as isize;
                for (dx, wx) in [(-1i8, 1u32), (0, 2), (1, 1)] {
                    acc += wy * wx * src.pixel(sx + dx as isize, row_y) as u32;
                }
            }
            dst.set_pixel(x, y, ((acc + 8) >> 4) as u8);
        }
    }
    dst.pad_borders();
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use hevme_core::QualityPreset;

    fn params_1080p() -> HmeInitParams {
        HmeInitParams {
            num_enc_layers: 1,
            enc_widths: vec![1920],
            enc_heights: vec![1080],
            max_num_ref: 4,
            num_ref_descriptors: 4,
            num_threads: 1,
            quality_preset: QualityPreset::HighQuality,
            noise_aware: false,
        }
    }

    #[test]
    fn dyadic_1080p_ladder() {
        let layers = derive_layers(&params_1080p()).unwrap();
        let widths: Vec<usize> = layers.iter().map(|l| l.width).collect();
        let heights: Vec<usize> = layers.iter().map(|l| l.height).collect();
        assert_eq!(widths, vec![1920, 960, 480, 240]);
        assert_eq!(heights, vec![1080, 540, 272, 136]);
        assert!(layers[0].encoded);
        assert!(!layers[1].encoded && !layers[2].encoded && !layers[3].encoded);
    }

    #[test]
    fn bad_simulcast_ratio_rejected() {
        // 800 is below the dyadic floor of 1920 (960), so the ladder is
        // geometrically invalid.
        let p = HmeInitParams {
            num_enc_layers: 3,
            enc_widths: vec![1920, 800, 480],
            enc_heights: vec![1080, 540, 272],
            ..params_1080p()
        };
        assert!(matches!(derive_layers(&p), Err(HmeError::InvalidPyramid(_))));
    }

    #[test]
    fn ratio_three_quarters_accepted() {
        let p = HmeInitParams {
            num_enc_layers: 2,
            enc_widths: vec![1920, 1280],
            enc_heights: vec![1080, 720],
            ..params_1080p()
        };
        let layers = derive_layers(&p).unwrap();
        assert_eq!(layers[1], LayerDims { width: 1280, height: 720, encoded: true });
        assert!(!layers[2].encoded);
    }

    #[test]
    fn tiny_input_rejected() {
        let p = HmeInitParams {
            enc_widths: vec![24],
            enc_heights: vec![24],
            ..params_1080p()
        };
        assert!(derive_layers(&p).is_err());
    }

    #[test]
    fn downsample_halves_flat_plane() {
        let pix = vec![77u8; 64 * 48];
        let src = Plane::from_pixels(&pix, 64, 48, MIN_PAD);
        let dst = downsample(&src, 32, 24);
        assert_eq!(dst.width(), 32);
        for y in 0..24 {
            for x in 0..32 {
                assert_eq!(dst.pixel(x as isize, y as isize), 77);
            }
        }
    }

    #[test]
    fn downsample_tracks_gradient() {
        // A horizontal ramp keeps its ramp shape at half resolution.
        let pix: Vec<u8> = (0..64 * 16).map(|i| ((i % 64) * 4) as u8).collect();
        let src = Plane::from_pixels(&pix, 64, 16, MIN_PAD);
        let dst = downsample(&src, 32, 8);
        assert!(dst.pixel(1, 4) < dst.pixel(16, 4));
        assert!(dst.pixel(16, 4) < dst.pixel(30, 4));
    }
}
