//! Core data model for the hevme motion estimation engine.
//!
//! This crate holds the types shared by every stage of the hierarchical
//! motion estimation pipeline:
//!
//! - quarter-pel motion vectors, MV ranges and POC-distance scaling
//! - search nodes and sorted best-N result sets
//! - the 17-entry CU partition id space and partition masks
//! - quality presets resolved to search parameter records
//! - padded luma planes
//! - frame-level descriptors (frame params, reference maps, CTB outputs)
//! - the engine error enum

pub mod error;
pub mod frame;
pub mod mv;
pub mod node;
pub mod part;
pub mod plane;
pub mod preset;

pub use error::{HmeError, Result};
pub use frame::{
    CtbOutput, CuCost, CuRanking, FrameParams, InputDesc, InputLayerDesc, PredDir, PuEntry,
    RefMap, RefMapEntry,
};
pub use mv::{poc_scale_q8, MotionVector, MvRange};
pub use node::{ResultSet, SearchNode, MAX_COST};
pub use part::{PartMask, PartitionId, PartitionType, NUM_PARTITIONS};
pub use plane::{Plane, PlaneView, MIN_PAD};
pub use preset::{PresetParams, QualityPreset, RefineGrid};

/// CTB side in pixels.
pub const CTB_SIZE: usize = 64;

/// Smallest CU side considered by partition decisions.
pub const MIN_CU_SIZE: usize = 8;

/// Maximum number of active references per picture.
pub const MAX_NUM_REF: usize = 12;

/// Maximum layers in the search pyramid (encoded + non-encoded).
pub const MAX_NUM_LAYERS: usize = 4;

/// Upper bound on candidates gathered for any one search, across all
/// candidate classes and presets.
pub const MAX_INIT_CANDIDATES: usize = 32;
