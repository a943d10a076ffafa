//! The public engine surface.
//!
//! Mirrors the classic C-ABI entry points as methods on [`HmeEncoder`]:
//! `new` (init), `set_resolution`, `add_input`, `process_frame_init`,
//! `process_frame`, `discard_frame`. Multiple threads call `process_frame`
//! concurrently with distinct thread ids and advance together through the
//! picture: jobs are pulled from the queue in pipeline order and become
//! runnable purely through dependency-manager progress, so a refinement
//! layer consumes parent rows while the parent is still producing them and
//! CTB rows wavefront behind each other. The only suspension points are the
//! job pull and the dependency-manager waits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use hevme_core::{
    CtbOutput, FrameParams, HmeError, InputDesc, MotionVector, MvRange, Plane, RefMap, Result,
    CTB_SIZE, MIN_PAD,
};
use hevme_kernels::weighted_input;
use hevme_sync::DepMngr;

use crate::arena::{ScratchArena, DEFAULT_ARENA_BYTES};
use crate::coarse::{coarse_search, CoarseParams, CoarseRef, DynRange};
use crate::config::HmeInitParams;
use crate::ctb::{search_ctb, CtbContext, CtbParams};
use crate::fullpel::L0Ref;
use crate::jobq::{Job, JobEvent, JobKind, JobPhase, JobQueue};
use crate::layer::{LayerCtxt, MvBank};
use crate::pyramid::{derive_layers, downsample, LayerDims};
use crate::refine::{refine_search, RefineParams, RefineRef};
use crate::refpool::{RefPlanes, RefPool};
use crate::subpel::SubpelPlanes;

/// MV range of a pyramid layer: the frame-level range shrinks with each
/// coarser layer, never below 8.
fn layer_mv_range(frame: &FrameParams, layer_id: usize) -> MvRange {
    MvRange::symmetric(
        (frame.mv_range_x >> layer_id).max(8),
        (frame.mv_range_y >> layer_id).max(8),
    )
}

/// Carry-over state from the previous processed picture.
struct PrevFrame {
    poc: i32,
    banks: Vec<MvBank>,
    /// Per layer, per reference: the two global MV lobes.
    global_mv: Vec<Vec<[MotionVector; 2]>>,
    /// POC distance the global lobes were observed over.
    global_delta_poc: i32,
    /// Peak vertical motion per POC unit, feeding the B-picture clip.
    dyn_y_per_poc: Option<i16>,
}

/// State of the picture currently being searched.
///
/// Shared by every worker through an `Arc`: the reference binding and layer
/// inputs are immutable after `process_frame_init`, while the banks,
/// histograms, outputs, and progress counters carry interior mutability so
/// jobs on different threads advance concurrently.
struct FrameCtxt {
    poc: i32,
    params: FrameParams,
    ref_map: RefMap,
    ref_planes: Vec<Arc<RefPlanes>>,
    /// Inverse-weighted copy of the L0 input per reference, when weighted
    /// prediction is active.
    wt_inputs: Vec<Option<Plane>>,
    layers: Vec<LayerCtxt>,
    /// Previous-picture state, snapshotted at frame init.
    prev: Option<Arc<PrevFrame>>,
    /// CTB outputs per CTB row, flattened in row order on take.
    outputs: Mutex<Vec<Vec<CtbOutput>>>,
    dyn_ranges: Mutex<Vec<DynRange>>,
    done_jobs: AtomicU64,
    total_jobs: u64,
}

/// A pending picture whose pyramid has been built but that is not yet
/// bound to references.
struct PendingInput {
    poc: i32,
    planes: Vec<Plane>,
}

/// The encoder-side handle of the HME engine.
pub struct HmeEncoder {
    init: HmeInitParams,
    layer_dims: Vec<LayerDims>,
    pool: RefPool,
    pending: Mutex<Vec<PendingInput>>,
    prev: Mutex<Option<Arc<PrevFrame>>>,
    current: Mutex<Option<Arc<FrameCtxt>>>,
    jobs: JobQueue,
    thread_arenas: Vec<Mutex<ScratchArena>>,
    /// Row-row managers per layer, coarsest first consumer ordering.
    layer_deps: Vec<DepMngr>,
    /// Frame-frame manager: publishes per-picture completion.
    frame_dep: DepMngr,
    /// Job lifecycle events of the current picture.
    job_trace: Mutex<Vec<JobEvent>>,
}

impl HmeEncoder {
    /// Create an encoder handle, validating pyramid geometry.
    pub fn new(init: HmeInitParams) -> Result<Self> {
        let layer_dims = derive_layers(&init)?;
        debug!(?layer_dims, "pyramid derived");
        let thread_arenas = (0..init.num_threads)
            .map(|_| Mutex::new(ScratchArena::new(DEFAULT_ARENA_BYTES)))
            .collect();
        let layer_deps = layer_dims
            .iter()
            .map(|d| DepMngr::row_row(d.height.div_ceil(4) + 2))
            .collect();
        Ok(Self {
            pool: RefPool::new(init.num_ref_descriptors),
            pending: Mutex::new(Vec::new()),
            prev: Mutex::new(None),
            current: Mutex::new(None),
            jobs: JobQueue::new(),
            thread_arenas,
            layer_deps,
            frame_dep: DepMngr::frm_frm(),
            job_trace: Mutex::new(Vec::new()),
            init,
            layer_dims,
        })
    }

    /// Recompute derived pyramid parameters for a new resolution ladder.
    pub fn set_resolution(
        &mut self,
        num_enc_layers: usize,
        widths: &[usize],
        heights: &[usize],
    ) -> Result<()> {
        let mut init = self.init.clone();
        init.num_enc_layers = num_enc_layers;
        init.enc_widths = widths.to_vec();
        init.enc_heights = heights.to_vec();
        let layer_dims = derive_layers(&init)?;
        self.layer_deps = layer_dims
            .iter()
            .map(|d| DepMngr::row_row(d.height.div_ceil(4) + 2))
            .collect();
        self.init = init;
        self.layer_dims = layer_dims;
        Ok(())
    }

    pub fn num_layers(&self) -> usize {
        self.layer_dims.len()
    }

    pub fn layer_dims(&self) -> &[LayerDims] {
        &self.layer_dims
    }

    /// Hand over a picture's planes. Missing non-encoded layers are derived
    /// by downsampling; the picture is also claimed into the reference pool
    /// so later pictures can bind it.
    pub fn add_input(&self, input: &InputDesc) -> Result<()> {
        let l0 = input.layers.first().ok_or_else(|| {
            HmeError::InvalidPyramid("input carries no layer planes".into())
        })?;
        if l0.width != self.layer_dims[0].width || l0.height != self.layer_dims[0].height {
            return Err(HmeError::InvalidPyramid(format!(
                "layer 0 input {}x{} does not match configured {}x{}",
                l0.width, l0.height, self.layer_dims[0].width, self.layer_dims[0].height
            )));
        }

        let mut planes: Vec<Plane> = Vec::with_capacity(self.layer_dims.len());
        for (i, dims) in self.layer_dims.iter().enumerate() {
            match input.layers.get(i) {
                Some(l) if l.width == dims.width && l.height == dims.height => {
                    planes.push(Plane::from_pixels(&l.luma, l.width, l.height, MIN_PAD));
                }
                _ => {
                    let src = planes
                        .last()
                        .expect("layer 0 always present before derived layers");
                    planes.push(downsample(src, dims.width, dims.height));
                }
            }
        }

        let subpel = SubpelPlanes::build(&planes[0]);
        let ref_planes = RefPlanes {
            layers: planes.iter().cloned().collect(),
            subpel: Some(subpel),
        };
        self.pool.claim(input.poc, ref_planes)?;
        self.pending.lock().push(PendingInput { poc: input.poc, planes });
        Ok(())
    }

    /// Bind the active reference list to a pending picture and queue its
    /// search jobs.
    pub fn process_frame_init(&self, poc: i32, ref_map: RefMap, params: FrameParams) -> Result<()> {
        ref_map.validate(params.wt_pred_enable)?;
        if ref_map.num_refs() > self.init.max_num_ref {
            return Err(HmeError::InvalidReferenceMap(format!(
                "{} references exceed the configured maximum {}",
                ref_map.num_refs(),
                self.init.max_num_ref
            )));
        }

        let pending = {
            let mut lock = self.pending.lock();
            let idx = lock
                .iter()
                .position(|p| p.poc == poc)
                .ok_or_else(|| HmeError::InvalidReferenceMap(format!("poc {poc} was never added")))?;
            lock.swap_remove(idx)
        };

        // Resolve every reference up front; a missing POC fails the bind.
        let mut ref_planes = Vec::with_capacity(ref_map.num_refs());
        for entry in &ref_map.entries {
            ref_planes.push(self.pool.get(entry.poc)?);
        }

        // Inverse-weighted source copies per reference.
        let mut wt_inputs: Vec<Option<Plane>> = Vec::with_capacity(ref_map.num_refs());
        for entry in &ref_map.entries {
            if params.wt_pred_enable && entry.weight != (1 << 6) {
                let inv = entry.inv_weight_q15()?.min(i16::MAX as i32);
                let src = &pending.planes[0];
                let mut out = Plane::new(src.width(), src.height(), src.pad());
                let mut buf = vec![0u8; src.width() * src.height()];
                let view = src.view(0, 0);
                weighted_input(
                    view.data,
                    src.stride(),
                    &mut buf,
                    src.width(),
                    src.width(),
                    src.height(),
                    inv as i16,
                    -entry.offset,
                    15,
                );
                for y in 0..src.height() {
                    for x in 0..src.width() {
                        out.set_pixel(x, y, buf[y * src.width() + x]);
                    }
                }
                out.pad_borders();
                wt_inputs.push(Some(out));
            } else {
                wt_inputs.push(None);
            }
        }

        let preset = params.quality_preset.params();
        let num_layers = self.layer_dims.len();
        let ref_pocs: Vec<i32> = ref_map.entries.iter().map(|e| e.poc).collect();

        let mut layers: Vec<LayerCtxt> = Vec::with_capacity(num_layers);
        for (layer_id, plane) in pending.planes.into_iter().enumerate() {
            let mut ctxt = LayerCtxt::new(layer_id, num_layers, self.layer_dims[layer_id], plane);
            let results = if layer_id == num_layers - 1 {
                preset.num_results_per_ref_coarse
            } else {
                preset.num_results_per_ref_refine
            };
            // Histograms live where global MVs are estimated: the coarsest
            // layer, and the penultimate one that seeds L0.
            let with_hist = (layer_id == num_layers - 1 || layer_id == 1) && !params.is_i_pic;
            ctxt.frame_init(
                ref_pocs.clone(),
                layer_mv_range(&params, layer_id),
                results.max(1),
                with_hist,
            );
            layers.push(ctxt);
        }

        for dep in &self.layer_deps {
            dep.reset();
        }

        let ctb_rows = self.layer_dims[0].height.div_ceil(CTB_SIZE);
        self.jobs.reset();
        self.job_trace.lock().clear();

        let refine_jobs = num_layers.saturating_sub(2);
        let frame = Arc::new(FrameCtxt {
            poc,
            params,
            ref_map,
            ref_planes,
            wt_inputs,
            layers,
            prev: self.prev.lock().clone(),
            outputs: Mutex::new(vec![Vec::new(); ctb_rows]),
            dyn_ranges: Mutex::new(Vec::new()),
            done_jobs: AtomicU64::new(0),
            total_jobs: (1 + refine_jobs + ctb_rows) as u64,
        });
        *self.current.lock() = Some(Arc::clone(&frame));

        // Queue: coarse, refinements coarsest-1 .. 1, then CTB rows. The
        // order matches the dependency DAG so FIFO pulls always find a job
        // whose inputs are in flight or done.
        self.jobs.push(Job { kind: JobKind::Coarse, poc });
        for layer_id in (1..num_layers - 1).rev() {
            self.jobs.push(Job { kind: JobKind::Refine { layer_id }, poc });
        }
        for row in 0..ctb_rows {
            self.jobs.push(Job { kind: JobKind::CtbRow { row }, poc });
        }
        Ok(())
    }

    /// Run search jobs until the picture drains. Multiple threads enter
    /// concurrently; `thread_id` selects the caller's scratch arena. A
    /// worker blocks only inside the job pull and the dependency-manager
    /// checks its jobs perform.
    pub fn process_frame(&self, thread_id: usize) -> Result<()> {
        if thread_id >= self.thread_arenas.len() {
            return Err(HmeError::InvalidReferenceMap(format!(
                "thread id {thread_id} outside the configured thread contexts"
            )));
        }
        while let Some(job) = self.jobs.get_next_job() {
            let frame = match self.current.lock().as_ref() {
                Some(f) if f.poc == job.poc => Arc::clone(f),
                // Cancelled or superseded: observe it at the pull boundary.
                _ => break,
            };
            self.job_trace.lock().push(JobEvent {
                kind: job.kind,
                thread_id,
                phase: JobPhase::Started,
            });
            let result = match job.kind {
                JobKind::Coarse => self.run_coarse(&frame),
                JobKind::Refine { layer_id } => self.run_refine(&frame, layer_id),
                JobKind::CtbRow { row } => self.run_ctb_row(&frame, row, thread_id),
            };
            self.job_trace.lock().push(JobEvent {
                kind: job.kind,
                thread_id,
                phase: JobPhase::Finished,
            });
            if let Err(e) = result {
                warn!(?job, error = %e, "job failed; cancelling picture");
                self.jobs.cancel();
                *self.current.lock() = None;
                // Drain siblings parked in dependency checks; they observe
                // the cancellation at their next job pull.
                for dep in &self.layer_deps {
                    dep.release();
                }
                return Err(HmeError::Cancelled { poc: job.poc });
            }
            let done = frame.done_jobs.fetch_add(1, Ordering::SeqCst) + 1;
            if done == frame.total_jobs {
                let still_current = self
                    .current
                    .lock()
                    .as_ref()
                    .map_or(false, |c| Arc::ptr_eq(c, &frame));
                if still_current {
                    self.finish_frame(&frame);
                }
            }
        }
        Ok(())
    }

    fn run_coarse(&self, frame: &FrameCtxt) -> Result<()> {
        let coarse_id = frame.layers.len() - 1;
        if frame.params.is_i_pic {
            for layer in frame.layers.iter() {
                layer.bank.fill_intra();
            }
            // Publish every coarse row so downstream checks fall through.
            self.publish_all_rows(coarse_id, &frame.layers[coarse_id]);
            return Ok(());
        }

        let preset = frame.params.quality_preset.params();
        let refs: Vec<CoarseRef<'_>> = frame
            .ref_map
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let (gmv, gdelta) = frame
                    .prev
                    .as_ref()
                    .and_then(|p| {
                        p.global_mv.get(coarse_id).and_then(|per_ref| {
                            per_ref
                                .get(i)
                                .map(|l| (if e.is_past { l[0] } else { l[1] }, p.global_delta_poc))
                        })
                    })
                    .unwrap_or((MotionVector::ZERO, 0));
                CoarseRef {
                    ref_idx: i,
                    plane: &frame.ref_planes[i].layers[coarse_id],
                    poc: e.poc,
                    is_past: e.is_past,
                    global_mv: gmv,
                    global_mv_delta_poc: gdelta,
                }
            })
            .collect();

        let prms = CoarseParams {
            lambda: frame.params.lambda,
            lambda_q_shift: frame.params.lambda_q_shift,
            step: preset.coarse_step as i16,
            use_explicit_cost: preset.use_explicit_coarse_cost,
            use_global: preset.use_global_candidate,
            max_iters: preset.max_refine_iters,
            bidir_enabled: frame.params.bidir_enabled,
            frame_poc: frame.poc,
            dyn_y_per_poc: frame.prev.as_ref().and_then(|p| p.dyn_y_per_poc),
        };

        let layer = &frame.layers[coarse_id];
        let dyn_ranges = coarse_search(layer, &refs, &prms, Some(&self.layer_deps[coarse_id]));
        *frame.dyn_ranges.lock() = dyn_ranges;
        Ok(())
    }

    fn run_refine(&self, frame: &FrameCtxt, layer_id: usize) -> Result<()> {
        let layer = &frame.layers[layer_id];
        if frame.params.is_i_pic {
            self.publish_all_rows(layer_id, layer);
            return Ok(());
        }
        let preset = frame.params.quality_preset.params();
        let parent = &frame.layers[layer_id + 1];

        let refs: Vec<RefineRef<'_>> = frame
            .ref_map
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let (gmv, gdelta) = frame
                    .prev
                    .as_ref()
                    .and_then(|p| {
                        p.global_mv.get(layer_id + 1).and_then(|per_ref| {
                            per_ref
                                .get(i)
                                .map(|l| (if e.is_past { l[0] } else { l[1] }, p.global_delta_poc))
                        })
                    })
                    .unwrap_or((MotionVector::ZERO, 0));
                RefineRef {
                    ref_idx: i,
                    plane: &frame.ref_planes[i].layers[layer_id],
                    poc: e.poc,
                    prev_bank: frame.prev.as_ref().and_then(|p| p.banks.get(layer_id)),
                    global_mv: gmv,
                    global_mv_delta_poc: gdelta,
                }
            })
            .collect();

        let prms = RefineParams {
            lambda: frame.params.lambda,
            lambda_q_shift: frame.params.lambda_q_shift,
            grid: preset.refine_grid,
            max_iters: preset.max_refine_iters,
            max_proj_cands: preset.max_num_coloc_cands.max(1),
            use_global: preset.use_global_candidate,
            // The penultimate layer's lobes seed the L0 global candidate.
            update_hist: layer_id == 1,
            frame_poc: frame.poc,
        };
        refine_search(
            layer,
            parent,
            &refs,
            &prms,
            Some(&self.layer_deps[layer_id + 1]),
            Some(&self.layer_deps[layer_id]),
        );
        Ok(())
    }

    fn run_ctb_row(&self, frame: &FrameCtxt, row: usize, thread_id: usize) -> Result<()> {
        let (pic_w, pic_h) = (self.layer_dims[0].width, self.layer_dims[0].height);
        let ctbs_x = pic_w.div_ceil(CTB_SIZE);
        if frame.params.is_i_pic {
            self.layer_deps[0].set(row, ctbs_x as i32 + 1);
            return Ok(());
        }
        let preset = frame.params.quality_preset.params();

        let refs: Vec<L0Ref<'_>> = frame
            .ref_map
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| L0Ref {
                ref_idx: i,
                poc: e.poc,
                is_past: e.is_past,
                list: if e.is_past { 0 } else { 1 },
                idx_in_list: e.ref_id_l0.or(e.ref_id_l1).unwrap_or(0) as i8,
                full: &frame.ref_planes[i].layers[0],
                subpel: frame.ref_planes[i]
                    .subpel
                    .as_ref()
                    .expect("layer-0 references always carry subpel planes"),
                wt_src: frame.wt_inputs[i].as_ref(),
            })
            .collect();

        // Global MVs seed from the penultimate layer when one exists,
        // rescaled from that layer's units to full resolution.
        let global_src_layer = if frame.layers.len() > 1 { 1 } else { 0 };
        let src_dims = self.layer_dims[global_src_layer];
        let to_l0 = crate::candidates::LayerScale::between(
            (pic_w, pic_h),
            (src_dims.width, src_dims.height),
        );
        let wide = MvRange::symmetric(i16::MAX, i16::MAX);
        let l0_layer = &frame.layers[0];
        let parent = frame.layers.get(1);

        let global: Vec<[MotionVector; 2]> = frame
            .prev
            .as_ref()
            .and_then(|p| p.global_mv.get(global_src_layer))
            .map(|lobes| {
                lobes
                    .iter()
                    .map(|l| [to_l0.project(l[0], &wide), to_l0.project(l[1], &wide)])
                    .collect()
            })
            .unwrap_or_else(|| vec![[MotionVector::ZERO; 2]; refs.len().max(1)]);

        let ctx = CtbContext {
            src: &l0_layer.input,
            pic_w,
            pic_h,
            refs: &refs,
            parent,
            parent_dims: parent.map(|p| (p.dims.width, p.dims.height)),
            prev_bank: frame.prev.as_ref().and_then(|p| p.banks.first()),
            global_mv: &global,
            global_mv_delta_poc: frame.prev.as_ref().map(|p| p.global_delta_poc).unwrap_or(0),
        };
        let prms = CtbParams {
            frame: frame.params,
            preset,
            noise_aware: self.init.noise_aware,
            frame_poc: frame.poc,
        };

        // The penultimate-layer rows whose pixel footprint feeds this CTB
        // row's candidates must be published first.
        if let Some(p) = parent {
            let dep = &self.layer_deps[1];
            let px_bottom = ((row + 1) * CTB_SIZE) as i32 + frame.params.mv_range_y as i32;
            let parent_py =
                (px_bottom * p.dims.height as i32 / pic_h as i32).max(0) as usize;
            let parent_row = (parent_py / p.bank.block_size()).min(p.bank.blocks_y() - 1);
            dep.check(parent_row + 1, 0, p.bank.blocks_x() as i32);
        }

        let mut row_outputs = Vec::with_capacity(ctbs_x);
        {
            let mut arena = self.thread_arenas[thread_id].lock();
            for ctb_x in 0..ctbs_x {
                // Top-right dependency on the row above: its CTB at
                // ctb_x + 1 must be written back.
                self.layer_deps[0].check(row, -2, ctb_x as i32);
                let mut out = CtbOutput::default();
                search_ctb(ctb_x, row, &ctx, &l0_layer.bank, &prms, &mut arena, &mut out)?;
                self.layer_deps[0].set(row, ctb_x as i32 + 1);
                row_outputs.push(out);
            }
        }
        // One publish past the end so the last columns below can start.
        self.layer_deps[0].set(row, ctbs_x as i32 + 1);
        frame.outputs.lock()[row] = row_outputs;
        Ok(())
    }

    /// Mark every row of a layer complete, for stages skipped on
    /// I-pictures.
    fn publish_all_rows(&self, layer_id: usize, layer: &LayerCtxt) {
        let rows = layer.bank.blocks_y();
        let cols = layer.bank.blocks_x() as i32;
        for row in 0..rows {
            self.layer_deps[layer_id].set(row, cols + 1);
        }
    }

    /// Stash the finished picture's banks and global MVs for its successor
    /// and publish frame completion.
    fn finish_frame(&self, frame: &FrameCtxt) {
        let ref_delta = frame
            .ref_map
            .entries
            .iter()
            .map(|e| (frame.poc - e.poc).abs())
            .max()
            .unwrap_or(0);
        let dyn_y_per_poc = frame
            .dyn_ranges
            .lock()
            .iter()
            .map(|d| {
                let delta = (frame.poc - d.poc).abs().max(1);
                (d.max_y.max(d.min_y.unsigned_abs() as i16) as i32 / delta) as i16
            })
            .max();
        *self.prev.lock() = Some(Arc::new(PrevFrame {
            poc: frame.poc,
            banks: frame.layers.iter().map(|l| l.bank.clone()).collect(),
            global_mv: frame.layers.iter().map(|l| l.global_mv.lock().clone()).collect(),
            global_delta_poc: ref_delta,
            dyn_y_per_poc,
        }));
        self.frame_dep.set_frame_done();
        debug!(poc = frame.poc, "frame finished");
    }

    /// Take the finished picture's CTB outputs in row order, consuming the
    /// frame state.
    pub fn take_frame_outputs(&self, poc: i32) -> Result<Vec<CtbOutput>> {
        let mut cur = self.current.lock();
        match cur.as_ref() {
            Some(f) if f.poc == poc && f.done_jobs.load(Ordering::SeqCst) == f.total_jobs => {}
            Some(f) if f.poc == poc => return Err(HmeError::Cancelled { poc }),
            _ => {
                return Err(HmeError::InvalidReferenceMap(format!(
                    "poc {poc} is not the current frame"
                )))
            }
        }
        let frame = cur.take().expect("present per the check above");
        let rows = std::mem::take(&mut *frame.outputs.lock());
        Ok(rows.into_iter().flatten().collect())
    }

    /// Cancel the current picture before writeback completes. Workers
    /// observe the cancellation at their next job pull.
    pub fn cancel_frame(&self) {
        self.jobs.cancel();
        let mut cur = self.current.lock();
        if let Some(f) = cur.as_ref() {
            debug!(poc = f.poc, "picture cancelled");
        }
        *cur = None;
        drop(cur);
        for dep in &self.layer_deps {
            dep.release();
        }
    }

    /// Release references no longer needed by any downstream stage.
    pub fn discard_frame(&self, pocs: &[i32]) {
        self.pool.discard(pocs);
    }

    /// POCs still claimed in the descriptor pool.
    pub fn active_pocs(&self) -> Vec<i32> {
        self.pool.active_pocs()
    }

    /// Completed-picture count published through the frame-frame manager.
    pub fn frames_done(&self) -> u64 {
        self.frame_dep.frames_done()
    }

    /// Drain the current picture's job lifecycle trace.
    pub fn take_job_trace(&self) -> Vec<JobEvent> {
        std::mem::take(&mut *self.job_trace.lock())
    }
}
