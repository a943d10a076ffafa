//! Per-layer contexts and the MV bank.

use parking_lot::Mutex;

use hevme_core::{MotionVector, MvRange, Plane, ResultSet, SearchNode};

use crate::global_mv::MvHistogram;
use crate::pyramid::LayerDims;

/// MV-bank block side for a layer: 4 at the coarsest, 8 at intermediate
/// layers, 16 at the encoded (finest) layer.
pub fn bank_block_size(layer_id: usize, num_layers: usize) -> usize {
    if layer_id == num_layers - 1 {
        4
    } else if layer_id == 0 {
        16
    } else {
        8
    }
}

/// A 2-D grid of best search results for one layer.
///
/// The grid carries one block of padding on every side so neighbour lookups
/// at picture borders need no bounds checks; padded cells always read back
/// empty. Results are stored per reference, ascending by total cost.
///
/// Cells lock individually: each row has a single writer (the thread
/// holding that row's job) while readers touch only rows the dependency
/// manager has published, so cell locks are held for one lookup or insert
/// at a time and never contend along the wavefront.
#[derive(Debug)]
pub struct MvBank {
    blocks_x: usize,
    blocks_y: usize,
    block_size: usize,
    num_refs: usize,
    results_per_ref: usize,
    /// `(blocks_x + 2) * (blocks_y + 2)` cells, each holding one result set
    /// per reference.
    cells: Vec<Mutex<Vec<ResultSet>>>,
}

impl Clone for MvBank {
    fn clone(&self) -> Self {
        Self {
            blocks_x: self.blocks_x,
            blocks_y: self.blocks_y,
            block_size: self.block_size,
            num_refs: self.num_refs,
            results_per_ref: self.results_per_ref,
            cells: self.cells.iter().map(|c| Mutex::new(c.lock().clone())).collect(),
        }
    }
}

impl MvBank {
    pub fn new(width: usize, height: usize, block_size: usize) -> Self {
        let blocks_x = width.div_ceil(block_size);
        let blocks_y = height.div_ceil(block_size);
        let cells = (0..(blocks_x + 2) * (blocks_y + 2)).map(|_| Mutex::new(Vec::new())).collect();
        Self {
            blocks_x,
            blocks_y,
            block_size,
            num_refs: 0,
            results_per_ref: 0,
            cells,
        }
    }

    pub fn blocks_x(&self) -> usize {
        self.blocks_x
    }

    pub fn blocks_y(&self) -> usize {
        self.blocks_y
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_refs(&self) -> usize {
        self.num_refs
    }

    pub fn results_per_ref(&self) -> usize {
        self.results_per_ref
    }

    /// Reinitialise for a new picture. Every cell is cleared; no MV survives
    /// across pictures through the bank.
    pub fn reset(&mut self, num_refs: usize, results_per_ref: usize) {
        self.num_refs = num_refs;
        self.results_per_ref = results_per_ref;
        for cell in &mut self.cells {
            let cell = cell.get_mut();
            cell.clear();
            cell.resize_with(num_refs, || ResultSet::new(results_per_ref));
        }
    }

    fn cell_index(&self, bx: isize, by: isize) -> Option<usize> {
        if bx < -1
            || by < -1
            || bx > self.blocks_x as isize
            || by > self.blocks_y as isize
        {
            return None;
        }
        Some(((by + 1) as usize) * (self.blocks_x + 2) + (bx + 1) as usize)
    }

    /// Result set of `(bx, by)` for one reference; empty outside the padded
    /// grid or for an unbound reference. Returns a snapshot copy so the
    /// cell lock is held only for the lookup.
    pub fn results(&self, bx: isize, by: isize, ref_idx: usize) -> Option<ResultSet> {
        let idx = self.cell_index(bx, by)?;
        self.cells[idx].lock().get(ref_idx).cloned()
    }

    /// Best node of `(bx, by)` for one reference.
    pub fn best(&self, bx: isize, by: isize, ref_idx: usize) -> Option<SearchNode> {
        let idx = self.cell_index(bx, by)?;
        self.cells[idx].lock().get(ref_idx).and_then(|set| set.best().copied())
    }

    /// Insert a result, keeping the per-reference set sorted.
    pub fn insert(&self, bx: usize, by: usize, ref_idx: usize, node: SearchNode) {
        if let Some(idx) = self.cell_index(bx as isize, by as isize) {
            if let Some(set) = self.cells[idx].lock().get_mut(ref_idx) {
                set.insert(node);
            }
        }
    }

    /// Fill the whole interior with available zero MVs at zero cost, the
    /// bank state published for I-pictures.
    pub fn fill_intra(&self) {
        for by in 0..self.blocks_y {
            for bx in 0..self.blocks_x {
                for ref_idx in 0..self.num_refs {
                    let mut node = SearchNode::candidate(MotionVector::ZERO, ref_idx as i8);
                    node.sad = 0;
                    node.total_cost = 0;
                    self.insert(bx, by, ref_idx, node);
                }
            }
        }
    }
}

/// State of one pyramid layer for one picture.
///
/// The input plane, dimensions, reference binding, and MV range are fixed
/// after `frame_init`; the bank, histograms, and global MVs are the mutable
/// search state, each safe to touch from the thread holding the relevant
/// row or layer job.
#[derive(Debug)]
pub struct LayerCtxt {
    pub layer_id: usize,
    pub dims: LayerDims,
    /// Padded input luma for this layer.
    pub input: Plane,
    pub bank: MvBank,
    /// Reference index to POC for the picture owning this layer.
    pub ref_pocs: Vec<i32>,
    /// Maximum MV supported at this layer, fullpel units.
    pub max_mv: MvRange,
    /// Global MV per reference: `[strongest lobe, second lobe]`, read by the
    /// next picture.
    pub global_mv: Mutex<Vec<[MotionVector; 2]>>,
    /// Per-reference MV histograms, on the layers that estimate global MVs.
    pub hist: Mutex<Vec<MvHistogram>>,
}

impl LayerCtxt {
    pub fn new(layer_id: usize, num_layers: usize, dims: LayerDims, input: Plane) -> Self {
        let bank = MvBank::new(dims.width, dims.height, bank_block_size(layer_id, num_layers));
        Self {
            layer_id,
            dims,
            input,
            bank,
            ref_pocs: Vec::new(),
            max_mv: MvRange::symmetric(0, 0),
            global_mv: Mutex::new(Vec::new()),
            hist: Mutex::new(Vec::new()),
        }
    }

    /// Per-picture reinitialisation: bind references, reset the bank,
    /// global MVs and histograms. Cross-picture lookups go through the
    /// previous picture's own context, never through leftover state here.
    pub fn frame_init(
        &mut self,
        ref_pocs: Vec<i32>,
        max_mv: MvRange,
        results_per_ref: usize,
        with_hist: bool,
    ) {
        let num_refs = ref_pocs.len();
        self.ref_pocs = ref_pocs;
        self.max_mv = max_mv;
        self.bank.reset(num_refs.max(1), results_per_ref);
        let global = self.global_mv.get_mut();
        global.clear();
        global.resize(num_refs.max(1), [MotionVector::ZERO; 2]);
        let hist = self.hist.get_mut();
        hist.clear();
        if with_hist {
            for _ in 0..num_refs {
                hist.push(MvHistogram::new(max_mv.max_x.max(4), max_mv.max_y.max(4)));
            }
        }
    }
}
