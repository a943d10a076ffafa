//! Global MV histogram behaviour.

use hevme::global_mv::{scale_global_mv, MvHistogram};
use hevme_core::MotionVector;

#[test]
fn injected_peaks_become_lobes() {
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
    // Past references read the strongest lobe, future references the
    // second.
    assert_eq!(lobes[0], MotionVector::new(4, 0));
    assert_eq!(lobes[1], MotionVector::new(-4, 0));
}

#[test]
fn equal_counts_break_toward_smaller_magnitude() {
    let mut h = MvHistogram::new(64, 64);
    for _ in 0..20 {
        h.update(-24, 0);
        h.update(8, 0);
    }
    assert_eq!(h.lobes()[0], MotionVector::new(8, 0));
}

#[test]
fn lobes_rescale_per_reference_distance() {
    let lobe = MotionVector::new(12, -4);
    assert_eq!(scale_global_mv(lobe, 2, 6), MotionVector::new(36, -12));
}

#[test]
fn histogram_state_is_per_picture() {
    let mut h = MvHistogram::new(32, 32);
    for _ in 0..5 {
        h.update(16, 16);
    }
    assert_eq!(h.lobes()[0], MotionVector::new(16, 16));
    // A fresh histogram carries nothing over.
    let h2 = MvHistogram::new(32, 32);
    assert_eq!(h2.lobes(), [MotionVector::ZERO; 2]);
}
