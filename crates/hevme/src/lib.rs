//! Hierarchical motion estimation engine for HEVC encoding.
//!
//! The engine searches each picture over a multi-resolution luma pyramid:
//!
//! 1. The **coarse engine** sweeps every 4x4 block of the coarsest layer
//!    exhaustively for every active reference, seeding a layer MV bank and
//!    a global-MV histogram.
//! 2. The **refinement engine** walks the intermediate layers, projecting
//!    parent-layer MVs, mixing in causal spatial neighbours and the global
//!    MV, and refining with grid searches.
//! 3. The **L0 engine** runs at full resolution per CTB: partition decision
//!    from 64x64 down through the CU tree, fractional-sample refinement,
//!    bi-prediction and merge/skip evaluation, rate-distortion costing.
//!
//! Layers and rows are coupled through the dependency manager in
//! `hevme-sync`, kernels live in `hevme-kernels`, and the shared data model
//! in `hevme-core`.
//!
//! # Example
//!
//! ```no_run
//! use hevme::{HmeEncoder, HmeInitParams};
//! use hevme_core::{FrameParams, InputDesc, InputLayerDesc, RefMap};
//!
//! let encoder = HmeEncoder::new(HmeInitParams::default())?;
//! let input = InputDesc {
//!     poc: 0,
//!     layers: vec![InputLayerDesc { width: 1920, height: 1080, luma: vec![0; 1920 * 1080] }],
//! };
//! encoder.add_input(&input)?;
//! encoder.process_frame_init(0, RefMap::default(), FrameParams::default())?;
//! encoder.process_frame(0)?;
//! let _ctbs = encoder.take_frame_outputs(0)?;
//! # Ok::<(), hevme_core::HmeError>(())
//! ```

pub mod arena;
pub mod candidates;
pub mod coarse;
pub mod config;
pub mod ctb;
pub mod fullpel;
pub mod global_mv;
pub mod interface;
pub mod jobq;
pub mod layer;
pub mod merge;
pub mod partition;
pub mod pyramid;
pub mod refine;
pub mod refpool;
pub mod subpel;

pub use config::HmeInitParams;
pub use interface::HmeEncoder;
pub use layer::{LayerCtxt, MvBank};
pub use partition::CtbState;
pub use pyramid::LayerDims;
