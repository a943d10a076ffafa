//! The reference descriptor pool.
//!
//! Reference pictures live in a bounded pool of descriptors. A descriptor
//! is claimed when a picture enters the pipeline, filled as it progresses,
//! and released when no downstream stage needs it. The pool lock is taken
//! only at claim/release boundaries, never on the search hot path.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use hevme_core::{HmeError, Plane, Result};

use crate::subpel::SubpelPlanes;

/// Pyramid planes of one reference picture, one per layer (finest first),
/// plus layer-0 subpel planes.
#[derive(Debug)]
pub struct RefPlanes {
    pub layers: Vec<Plane>,
    pub subpel: Option<SubpelPlanes>,
}

/// One pool slot.
#[derive(Debug)]
struct Slot {
    poc: i32,
    in_use: bool,
    planes: Option<Arc<RefPlanes>>,
}

/// Bounded pool of reference descriptors.
#[derive(Debug)]
pub struct RefPool {
    slots: Mutex<Vec<Slot>>,
}

impl RefPool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot { poc: 0, in_use: false, planes: None }).collect();
        Self { slots: Mutex::new(slots) }
    }

    /// Claim a free descriptor for `poc`, storing its planes.
    ///
    /// A POC already present and still in use is a caller error; the pool
    /// being full is resource exhaustion.
    pub fn claim(&self, poc: i32, planes: RefPlanes) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.iter().any(|s| s.in_use && s.poc == poc) {
            return Err(HmeError::InvalidReferenceMap(format!(
                "poc {poc} already claimed and in use"
            )));
        }
        match slots.iter_mut().find(|s| !s.in_use) {
            Some(slot) => {
                slot.poc = poc;
                slot.in_use = true;
                slot.planes = Some(Arc::new(planes));
                Ok(())
            }
            None => Err(HmeError::ResourceExhausted(
                "reference descriptor pool empty".into(),
            )),
        }
    }

    /// Look up the planes of a claimed reference by POC.
    pub fn get(&self, poc: i32) -> Result<Arc<RefPlanes>> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|s| s.in_use && s.poc == poc)
            .and_then(|s| s.planes.clone())
            .ok_or_else(|| {
                HmeError::InvalidReferenceMap(format!("poc {poc} not found in any descriptor"))
            })
    }

    /// Release every descriptor whose POC appears in `pocs`.
    pub fn discard(&self, pocs: &[i32]) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.in_use && pocs.contains(&slot.poc) {
                debug!(poc = slot.poc, "releasing reference descriptor");
                slot.in_use = false;
                slot.planes = None;
            }
        }
    }

    /// POCs currently claimed.
    pub fn active_pocs(&self) -> Vec<i32> {
        let slots = self.slots.lock();
        slots.iter().filter(|s| s.in_use).map(|s| s.poc).collect()
    }
}
