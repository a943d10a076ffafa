//! End-to-end engine tests over the public surface.

use hevme::jobq::{JobEvent, JobPhase};
use hevme::{HmeEncoder, HmeInitParams};
use hevme_core::{
    FrameParams, HmeError, InputDesc, InputLayerDesc, QualityPreset, RefMap, RefMapEntry,
};

const W: usize = 64;
const H: usize = 64;

/// Deterministic texture sampled from a wider base so a horizontal window
/// shift translates the content exactly.
fn luma(dx: usize) -> Vec<u8> {
    let mut state = 0xB5AD4ECEu32;
    let wide = W + 32;
    let mut base = vec![0u8; wide * H];
    for v in base.iter_mut() {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        *v = (state >> 24) as u8;
    }
    (0..W * H)
        .map(|i| base[(i / W) * wide + (i % W) + dx])
        .collect()
}

fn small_encoder(num_threads: usize) -> HmeEncoder {
    HmeEncoder::new(HmeInitParams {
        num_enc_layers: 1,
        enc_widths: vec![W],
        enc_heights: vec![H],
        max_num_ref: 2,
        num_ref_descriptors: 4,
        num_threads,
        quality_preset: QualityPreset::HighQuality,
        noise_aware: false,
    })
    .expect("encoder init")
}

fn input(poc: i32, dx: usize) -> InputDesc {
    InputDesc {
        poc,
        layers: vec![InputLayerDesc { width: W, height: H, luma: luma(dx) }],
    }
}

fn i_frame_params() -> FrameParams {
    FrameParams { is_i_pic: true, ..Default::default() }
}

fn p_frame_params() -> FrameParams {
    FrameParams { mv_range_x: 16, mv_range_y: 16, ..Default::default() }
}

/// Run an I picture then a P picture translated by `dx`, returning the P
/// picture's CTB outputs.
fn encode_two(encoder: &HmeEncoder, dx: usize) -> Vec<hevme_core::CtbOutput> {
    encoder.add_input(&input(0, 0)).unwrap();
    encoder.process_frame_init(0, RefMap::default(), i_frame_params()).unwrap();
    encoder.process_frame(0).unwrap();
    let i_out = encoder.take_frame_outputs(0).unwrap();
    assert!(i_out.is_empty());

    encoder.add_input(&input(4, dx)).unwrap();
    let refs = RefMap { entries: vec![RefMapEntry::unweighted(0, 0, true)] };
    encoder.process_frame_init(4, refs, p_frame_params()).unwrap();
    encoder.process_frame(0).unwrap();
    encoder.take_frame_outputs(4).unwrap()
}

#[test]
fn translated_picture_recovers_the_shift() {
    let encoder = small_encoder(1);
    let outputs = encode_two(&encoder, 4);
    assert_eq!(outputs.len(), 1);
    let ctb = &outputs[0];
    assert!(!ctb.pus.is_empty());
    // Every non-merge PU carries the true motion (4, 0) fullpel = (16, 0)
    // quarter-pel.
    for pu in ctb.pus.iter().filter(|p| !p.merge_flag) {
        assert_eq!(pu.mv_l0, (16, 0), "pu at ({}, {})", pu.x, pu.y);
        assert_eq!(pu.ref_l0, 0);
    }
}

#[test]
fn static_picture_collapses_to_skip() {
    // A P picture identical to its reference merges into zero-MV skips.
    let encoder = small_encoder(1);
    let outputs = encode_two(&encoder, 0);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].all_skip);
    for pu in &outputs[0].pus {
        assert!(pu.merge_flag);
        assert_eq!(pu.mv_l0, (0, 0));
    }
}

#[test]
fn identical_runs_are_bit_identical() {
    let a = encode_two(&small_encoder(1), 4);
    let b = encode_two(&small_encoder(1), 4);
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
}

#[test]
fn zero_reference_picture_is_all_skip() {
    let encoder = small_encoder(1);
    encoder.add_input(&input(0, 0)).unwrap();
    // P picture bound to an empty reference list.
    encoder.process_frame_init(0, RefMap::default(), p_frame_params()).unwrap();
    encoder.process_frame(0).unwrap();
    let outputs = encoder.take_frame_outputs(0).unwrap();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].all_skip);
    for pu in &outputs[0].pus {
        assert_eq!(pu.mv_l0, (0, 0));
        assert_eq!(pu.mv_l1, (0, 0));
        assert!(pu.merge_flag);
    }
}

#[test]
fn two_worker_threads_produce_a_complete_frame() {
    let encoder = small_encoder(2);
    encoder.add_input(&input(0, 0)).unwrap();
    encoder.process_frame_init(0, RefMap::default(), i_frame_params()).unwrap();
    encoder.process_frame(0).unwrap();
    encoder.take_frame_outputs(0).unwrap();

    encoder.add_input(&input(4, 4)).unwrap();
    let refs = RefMap { entries: vec![RefMapEntry::unweighted(0, 0, true)] };
    encoder.process_frame_init(4, refs, p_frame_params()).unwrap();
    std::thread::scope(|scope| {
        let e0 = &encoder;
        let t0 = scope.spawn(move || e0.process_frame(0));
        let t1 = scope.spawn(move || e0.process_frame(1));
        t0.join().unwrap().unwrap();
        t1.join().unwrap().unwrap();
    });
    let outputs = encoder.take_frame_outputs(4).unwrap();
    assert_eq!(outputs.len(), 1);
    assert!(!outputs[0].pus.is_empty());
}

#[test]
fn b_picture_searches_both_directions() {
    let encoder = small_encoder(1);
    // I picture, then the future P reference, then the B between them.
    encoder.add_input(&input(0, 0)).unwrap();
    encoder.process_frame_init(0, RefMap::default(), i_frame_params()).unwrap();
    encoder.process_frame(0).unwrap();
    encoder.take_frame_outputs(0).unwrap();

    encoder.add_input(&input(8, 4)).unwrap();
    let p_refs = RefMap { entries: vec![RefMapEntry::unweighted(0, 0, true)] };
    encoder.process_frame_init(8, p_refs, p_frame_params()).unwrap();
    encoder.process_frame(0).unwrap();
    encoder.take_frame_outputs(8).unwrap();

    encoder.add_input(&input(4, 2)).unwrap();
    let b_refs = RefMap {
        entries: vec![
            RefMapEntry::unweighted(0, 0, true),
            RefMapEntry::unweighted(1, 8, false),
        ],
    };
    let b_params = FrameParams {
        bidir_enabled: true,
        mv_range_x: 16,
        mv_range_y: 16,
        ..Default::default()
    };
    encoder.process_frame_init(4, b_refs, b_params).unwrap();
    encoder.process_frame(0).unwrap();
    let outputs = encoder.take_frame_outputs(4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert!(!outputs[0].pus.is_empty());
    for pu in &outputs[0].pus {
        match pu.pred_dir {
            hevme_core::PredDir::Bi => {
                assert!(pu.ref_l0 >= 0 && pu.ref_l1 >= 0);
            }
            hevme_core::PredDir::L0 => assert!(pu.merge_flag || pu.ref_l0 >= 0),
            hevme_core::PredDir::L1 => assert!(pu.merge_flag || pu.ref_l1 >= 0),
        }
    }
}

/// Highest number of jobs simultaneously in flight according to the trace.
fn max_in_flight(events: &[JobEvent]) -> usize {
    let mut active = 0usize;
    let mut peak = 0usize;
    for e in events {
        match e.phase {
            JobPhase::Started => {
                active += 1;
                peak = peak.max(active);
            }
            JobPhase::Finished => active = active.saturating_sub(1),
        }
    }
    peak
}

#[test]
fn worker_threads_interleave_rows_and_layers() {
    // A taller picture: 1 coarse + 2 refine + 3 CTB-row jobs per frame,
    // coupled only through the dependency managers. With two workers the
    // trace must show overlapping jobs, not a strict sequence.
    const BW: usize = 192;
    const BH: usize = 192;
    let encoder = HmeEncoder::new(HmeInitParams {
        num_enc_layers: 1,
        enc_widths: vec![BW],
        enc_heights: vec![BH],
        max_num_ref: 2,
        num_ref_descriptors: 8,
        num_threads: 2,
        quality_preset: QualityPreset::HighSpeed,
        noise_aware: false,
    })
    .unwrap();

    let luma_big = |seed: u32| -> Vec<u8> {
        let mut state = seed;
        (0..BW * BH)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect()
    };

    encoder
        .add_input(&InputDesc {
            poc: 0,
            layers: vec![InputLayerDesc { width: BW, height: BH, luma: luma_big(1) }],
        })
        .unwrap();
    encoder.process_frame_init(0, RefMap::default(), i_frame_params()).unwrap();
    encoder.process_frame(0).unwrap();
    encoder.take_frame_outputs(0).unwrap();

    // Several P frames: the wavefront overlap only needs to show up once.
    let mut overlapped = false;
    for n in 1..=5 {
        let poc = n * 4;
        encoder
            .add_input(&InputDesc {
                poc,
                layers: vec![InputLayerDesc { width: BW, height: BH, luma: luma_big(2) }],
            })
            .unwrap();
        let refs = RefMap { entries: vec![RefMapEntry::unweighted(0, (n - 1) * 4, true)] };
        encoder.process_frame_init(poc, refs, p_frame_params()).unwrap();
        std::thread::scope(|scope| {
            let e = &encoder;
            let t0 = scope.spawn(move || e.process_frame(0));
            let t1 = scope.spawn(move || e.process_frame(1));
            t0.join().unwrap().unwrap();
            t1.join().unwrap().unwrap();
        });
        let trace = encoder.take_job_trace();
        let outputs = encoder.take_frame_outputs(poc).unwrap();
        assert_eq!(outputs.len(), 9, "3x3 CTBs expected");
        let threads: std::collections::BTreeSet<usize> =
            trace.iter().map(|e| e.thread_id).collect();
        if max_in_flight(&trace) >= 2 && threads.len() >= 2 {
            overlapped = true;
            break;
        }
        encoder.discard_frame(&[(n - 1) * 4]);
    }
    assert!(overlapped, "no two jobs ever ran concurrently across five frames");
}

#[test]
fn cancellation_drops_the_picture() {
    let encoder = small_encoder(1);
    encoder.add_input(&input(0, 0)).unwrap();
    encoder.process_frame_init(0, RefMap::default(), i_frame_params()).unwrap();
    encoder.cancel_frame();
    encoder.process_frame(0).unwrap();
    assert!(encoder.take_frame_outputs(0).is_err());
}

#[test]
fn reference_lifecycle_and_discard() {
    let encoder = small_encoder(1);
    encoder.add_input(&input(0, 0)).unwrap();
    encoder.add_input(&input(4, 2)).unwrap();
    let mut active = encoder.active_pocs();
    active.sort();
    assert_eq!(active, vec![0, 4]);

    encoder.discard_frame(&[0]);
    assert_eq!(encoder.active_pocs(), vec![4]);
}

#[test]
fn binding_an_unknown_reference_poc_fails() {
    let encoder = small_encoder(1);
    encoder.add_input(&input(4, 0)).unwrap();
    let refs = RefMap { entries: vec![RefMapEntry::unweighted(0, 99, true)] };
    let err = encoder.process_frame_init(4, refs, p_frame_params());
    assert!(matches!(err, Err(HmeError::InvalidReferenceMap(_))));
}

#[test]
fn descriptor_pool_exhaustion_is_reported() {
    let encoder = HmeEncoder::new(HmeInitParams {
        num_enc_layers: 1,
        enc_widths: vec![W],
        enc_heights: vec![H],
        max_num_ref: 2,
        num_ref_descriptors: 1,
        num_threads: 1,
        quality_preset: QualityPreset::HighSpeed,
        noise_aware: false,
    })
    .unwrap();
    encoder.add_input(&input(0, 0)).unwrap();
    assert!(matches!(
        encoder.add_input(&input(4, 0)),
        Err(HmeError::ResourceExhausted(_))
    ));
}

#[test]
fn set_resolution_rederives_the_pyramid() {
    let mut encoder = small_encoder(1);
    assert_eq!(encoder.num_layers(), 3);
    encoder.set_resolution(1, &[1920], &[1080]).unwrap();
    assert_eq!(encoder.num_layers(), 4);
    assert!(encoder.set_resolution(1, &[8], &[8]).is_err());
}
