//! Pyramid construction tests.

use hevme::pyramid::{derive_layers, downsample};
use hevme::HmeInitParams;
use hevme_core::{HmeError, Plane, QualityPreset, MIN_PAD};

fn params(widths: Vec<usize>, heights: Vec<usize>) -> HmeInitParams {
    HmeInitParams {
        num_enc_layers: widths.len(),
        enc_widths: widths,
        enc_heights: heights,
        max_num_ref: 4,
        num_ref_descriptors: 4,
        num_threads: 1,
        quality_preset: QualityPreset::HighQuality,
        noise_aware: false,
    }
}

#[test]
fn hd_input_derives_four_layers() {
    let layers = derive_layers(&params(vec![1920], vec![1080])).unwrap();
    assert_eq!(layers.len(), 4);
    let widths: Vec<usize> = layers.iter().map(|l| l.width).collect();
    let heights: Vec<usize> = layers.iter().map(|l| l.height).collect();
    assert_eq!(widths, vec![1920, 960, 480, 240]);
    assert_eq!(heights, vec![1080, 540, 272, 136]);
}

#[test]
fn non_dyadic_simulcast_ladder_rejected() {
    // 800 falls outside [floor16(1920/2), ceil16(1920*3/4)]
    let err = derive_layers(&params(vec![1920, 800, 480], vec![1080, 540, 272]));
    assert!(matches!(err, Err(HmeError::InvalidPyramid(_))));
}

#[test]
fn coarsest_layer_below_minimum_rejected() {
    let err = derive_layers(&params(vec![24], vec![24]));
    assert!(matches!(err, Err(HmeError::InvalidPyramid(_))));
}

#[test]
fn every_layer_padded_at_least_16() {
    let layers = derive_layers(&params(vec![640], vec![360])).unwrap();
    let mut plane = Plane::from_pixels(&vec![100u8; 640 * 360], 640, 360, MIN_PAD);
    for l in &layers[1..] {
        plane = downsample(&plane, l.width, l.height);
        assert!(plane.pad() >= 16);
        // Reads beyond every border stay valid and replicate edges.
        assert_eq!(plane.pixel(-16, 0), plane.pixel(0, 0));
        assert_eq!(
            plane.pixel(l.width as isize + 15, l.height as isize - 1),
            plane.pixel(l.width as isize - 1, l.height as isize - 1)
        );
    }
}

#[test]
fn two_coarsest_layers_never_encoded() {
    let layers = derive_layers(&params(vec![1280], vec![720])).unwrap();
    let n = layers.len();
    assert!(!layers[n - 1].encoded);
    assert!(!layers[n - 2].encoded);
}
