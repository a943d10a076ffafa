//! Intermediate-layer refinement behaviour.

use hevme::layer::LayerCtxt;
use hevme::pyramid::LayerDims;
use hevme::refine::{refine_search, RefineParams, RefineRef};
use hevme_core::{MotionVector, MvRange, Plane, RefineGrid, MIN_PAD};

/// Smooth translating texture; `(dx, dy)` shifts the content exactly.
fn texture(w: usize, h: usize, dx: isize, dy: isize) -> Plane {
    let pix: Vec<u8> = (0..w * h)
        .map(|i| {
            let x = (i % w) as isize + 32 + dx;
            let y = (i / w) as isize + 32 + dy;
            ((x * 5 + y * 3 + (x / 4) * (y / 4) * 7) % 251) as u8
        })
        .collect();
    Plane::from_pixels(&pix, w, h, MIN_PAD)
}

fn searched_layer(w: usize, h: usize, dx: isize, dy: isize) -> LayerCtxt {
    let dims = LayerDims { width: w, height: h, encoded: false };
    let mut layer = LayerCtxt::new(1, 4, dims, texture(w, h, dx, dy));
    layer.frame_init(vec![0], MvRange::symmetric(16, 16), 2, false);
    layer
}

fn seeded_parent(w: usize, h: usize) -> LayerCtxt {
    let dims = LayerDims { width: w, height: h, encoded: false };
    let mut parent = LayerCtxt::new(2, 4, dims, texture(w, h, 0, 0));
    parent.frame_init(vec![0], MvRange::symmetric(8, 8), 2, false);
    parent.bank.fill_intra();
    parent
}

fn prms(grid: RefineGrid) -> RefineParams {
    RefineParams {
        lambda: 1 << 8,
        lambda_q_shift: 8,
        grid,
        max_iters: 4,
        max_proj_cands: 4,
        use_global: false,
        update_hist: false,
        frame_poc: 4,
    }
}

#[test]
fn vertical_translation_recovered() {
    let refp = texture(64, 64, 0, 0);
    let mut layer = searched_layer(64, 64, 0, 3);
    let parent = seeded_parent(32, 32);
    let refs = [RefineRef {
        ref_idx: 0,
        plane: &refp,
        poc: 0,
        prev_bank: None,
        global_mv: MotionVector::ZERO,
        global_mv_delta_poc: 0,
    }];
    refine_search(&mut layer, &parent, &refs, &prms(RefineGrid::Square9), None, None);

    let best = layer.bank.best(3, 3, 0).expect("result");
    assert_eq!(best.mv, MotionVector::new(0, 3));
    assert_eq!(best.sad, 0);
}

#[test]
fn diamond_grid_also_converges() {
    let refp = texture(64, 64, 0, 0);
    let mut layer = searched_layer(64, 64, 2, 1);
    let parent = seeded_parent(32, 32);
    let refs = [RefineRef {
        ref_idx: 0,
        plane: &refp,
        poc: 0,
        prev_bank: None,
        global_mv: MotionVector::ZERO,
        global_mv_delta_poc: 0,
    }];
    let mut p = prms(RefineGrid::Diamond5);
    p.max_iters = 6;
    refine_search(&mut layer, &parent, &refs, &p, None, None);

    let best = layer.bank.best(4, 2, 0).expect("result");
    assert_eq!(best.mv, MotionVector::new(2, 1));
    assert_eq!(best.sad, 0);
}

#[test]
fn global_candidate_carries_large_motion() {
    // A shift past the local grids' reach, reachable only through the
    // global candidate.
    let refp = texture(96, 32, 0, 0);
    let dims = LayerDims { width: 96, height: 32, encoded: false };
    let mut layer = LayerCtxt::new(1, 4, dims, texture(96, 32, 14, 0));
    layer.frame_init(vec![0], MvRange::symmetric(16, 16), 2, false);
    let parent = seeded_parent(48, 16);

    let mut p = prms(RefineGrid::Square9);
    p.use_global = true;
    p.max_iters = 2;
    let refs = [RefineRef {
        ref_idx: 0,
        plane: &refp,
        poc: 0,
        prev_bank: None,
        global_mv: MotionVector::new(14, 0),
        global_mv_delta_poc: 4,
    }];
    refine_search(&mut layer, &parent, &refs, &p, None, None);

    let best = layer.bank.best(5, 1, 0).expect("result");
    assert_eq!(best.mv, MotionVector::new(14, 0));
    assert_eq!(best.sad, 0);
}

#[test]
fn refinement_blocks_until_parent_rows_publish() {
    // A consumer thread refines against a parent whose rows are published
    // one at a time from this thread: the dependency manager must hold the
    // consumer back until each parent row it needs is in.
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    let refp = texture(64, 64, 0, 0);
    let mut layer = searched_layer(64, 64, 1, 0);
    layer.frame_init(vec![0], MvRange::symmetric(8, 8), 2, false);
    let parent = seeded_parent(32, 32);
    let parent_rows = parent.bank.blocks_y();
    let parent_cols = parent.bank.blocks_x() as i32;

    let parent_dep = Arc::new(hevme_sync::DepMngr::row_row(parent_rows + 2));
    let done = Arc::new(AtomicBool::new(false));

    std::thread::scope(|scope| {
        let dep = Arc::clone(&parent_dep);
        let done_flag = Arc::clone(&done);
        let (layer_ref, parent_ref, refp_ref) = (&layer, &parent, &refp);
        scope.spawn(move || {
            let refs = [RefineRef {
                ref_idx: 0,
                plane: refp_ref,
                poc: 0,
                prev_bank: None,
                global_mv: MotionVector::ZERO,
                global_mv_delta_poc: 0,
            }];
            refine_search(
                layer_ref,
                parent_ref,
                &refs,
                &prms(RefineGrid::Square9),
                Some(&dep),
                None,
            );
            done_flag.store(true, Ordering::SeqCst);
        });

        // Nothing published: the consumer must be parked in `check`.
        std::thread::sleep(Duration::from_millis(40));
        assert!(!done.load(Ordering::SeqCst), "refinement ran ahead of its producer");

        // Publish all but the last parent row: still not finished, since
        // the bottom consumer rows reach into the last parent row.
        for row in 0..parent_rows - 1 {
            parent_dep.set(row, parent_cols + 1);
        }
        std::thread::sleep(Duration::from_millis(40));
        assert!(!done.load(Ordering::SeqCst), "refinement finished without the last parent row");

        parent_dep.set(parent_rows - 1, parent_cols + 1);
    });
    assert!(done.load(Ordering::SeqCst));

    // And the search output is the same as an ungated run.
    let best = layer.bank.best(3, 3, 0).expect("result");
    assert_eq!(best.mv, MotionVector::new(1, 0));
    assert_eq!(best.sad, 0);
}

#[test]
fn colocated_candidate_seeds_from_previous_picture() {
    let refp = texture(64, 32, 0, 0);
    let dims = LayerDims { width: 64, height: 32, encoded: false };

    // Previous picture's bank holds the true motion everywhere.
    let mut prev_layer = LayerCtxt::new(1, 4, dims, texture(64, 32, 9, 0));
    prev_layer.frame_init(vec![0], MvRange::symmetric(16, 16), 2, false);
    for by in 0..prev_layer.bank.blocks_y() {
        for bx in 0..prev_layer.bank.blocks_x() {
            let mut n = hevme_core::SearchNode::candidate(MotionVector::new(9, 0), 0);
            n.sad = 0;
            n.total_cost = 0;
            prev_layer.bank.insert(bx, by, 0, n);
        }
    }

    let mut layer = LayerCtxt::new(1, 4, dims, texture(64, 32, 9, 0));
    layer.frame_init(vec![0], MvRange::symmetric(16, 16), 2, false);
    let parent = seeded_parent(32, 16);

    let mut p = prms(RefineGrid::Square9);
    p.max_iters = 1;
    let refs = [RefineRef {
        ref_idx: 0,
        plane: &refp,
        poc: 0,
        prev_bank: Some(&prev_layer.bank),
        global_mv: MotionVector::ZERO,
        global_mv_delta_poc: 0,
    }];
    refine_search(&mut layer, &parent, &refs, &p, None, None);

    let best = layer.bank.best(3, 1, 0).expect("result");
    assert_eq!(best.mv, MotionVector::new(9, 0));
}
