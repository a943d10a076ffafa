//! hevme-sync: the dependency manager.
//!
//! Tracks producer/consumer progress across rows, frames, and 2-D maps so
//! worker threads can advance concurrently through pyramid layers without
//! data races. Four modes:
//!
//! - **Row-Row**: a producer publishes (row, column); a consumer of the next
//!   row blocks until the producer has advanced far enough.
//! - **Row-Frame**: a consumer waits for a producer row to be complete.
//! - **Frame-Frame**: a consumer waits for the previous frame's stage to
//!   finish.
//! - **Map**: an arbitrary (x, y) grid of states.
//!
//! The manager never reports an error: `check` either succeeds or waits.
//! `try_check` is the polling variant for callers that cannot block.

use parking_lot::{Condvar, Mutex};

/// State of one map-sync cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapState {
    Init = 0,
    ReconDone = 1,
    /// After half-pel plane creation.
    Complete = 2,
}

/// Published column sentinel for an untouched row.
const NO_PROGRESS: i32 = -1;

#[derive(Debug)]
enum State {
    /// Published column per producer row.
    RowRow { cols: Vec<i32> },
    /// Completion flag per producer row.
    RowFrm { done: Vec<bool> },
    /// Completed-iteration counter.
    FrmFrm { done_count: u64 },
    /// Row-major cell states.
    Map { cells: Vec<MapState>, width: usize, height: usize },
}

/// Mode state plus the teardown flag.
#[derive(Debug)]
struct Inner {
    state: State,
    /// When set, every check passes vacuously so waiters drain during
    /// picture cancellation. Cleared by `reset`.
    released: bool,
}

/// A dependency manager in one of the four sync modes.
#[derive(Debug)]
pub struct DepMngr {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl DepMngr {
    /// Row-row sync over `num_rows` producer rows.
    pub fn row_row(num_rows: usize) -> Self {
        Self::with_state(State::RowRow { cols: vec![NO_PROGRESS; num_rows] })
    }

    /// Row-frame sync over `num_rows` producer rows.
    pub fn row_frm(num_rows: usize) -> Self {
        Self::with_state(State::RowFrm { done: vec![false; num_rows] })
    }

    /// Frame-frame sync.
    pub fn frm_frm() -> Self {
        Self::with_state(State::FrmFrm { done_count: 0 })
    }

    /// Map sync over a `width` x `height` cell grid.
    pub fn map(width: usize, height: usize) -> Self {
        Self::with_state(State::Map {
            cells: vec![MapState::Init; width * height],
            width,
            height,
        })
    }

    fn with_state(state: State) -> Self {
        Self { inner: Mutex::new(Inner { state, released: false }), cond: Condvar::new() }
    }

    /// Let every pending and future check pass, draining blocked waiters
    /// during picture teardown. `reset` re-arms the manager.
    pub fn release(&self) {
        self.inner.lock().released = true;
        self.cond.notify_all();
    }

    /// Clear all progress, keeping the mode and dimensions.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.released = false;
        match &mut inner.state {
            State::RowRow { cols } => cols.fill(NO_PROGRESS),
            State::RowFrm { done } => done.fill(false),
            State::FrmFrm { done_count } => *done_count = 0,
            State::Map { cells, .. } => cells.fill(MapState::Init),
        }
        self.cond.notify_all();
    }

    // --- Row-row ---

    /// Publish progress: the producer of `row` has completed through `col`.
    pub fn set(&self, row: usize, col: i32) {
        let mut inner = self.inner.lock();
        if let State::RowRow { cols } = &mut inner.state {
            if cols[row] < col {
                cols[row] = col;
                self.cond.notify_all();
            }
        }
    }

    /// Block until the dependency of (`row`, `col`) is satisfied: the
    /// producer row `row - 1` must have published a column `c` with
    /// `c + offset >= col`. Row 0 never waits.
    pub fn check(&self, row: usize, offset: i32, col: i32) {
        if row == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        loop {
            if inner.released {
                return;
            }
            if let State::RowRow { cols } = &inner.state {
                // An untouched row counts as published through -1, so a
                // positive offset lets early columns proceed while a
                // negative offset enforces a lead of |offset| columns.
                if cols[row - 1] + offset >= col {
                    return;
                }
            } else {
                return;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Non-blocking [`check`]: true when the dependency is satisfied.
    pub fn try_check(&self, row: usize, offset: i32, col: i32) -> bool {
        if row == 0 {
            return true;
        }
        let inner = self.inner.lock();
        if inner.released {
            return true;
        }
        match &inner.state {
            State::RowRow { cols } => cols[row - 1] + offset >= col,
            _ => true,
        }
    }

    // --- Row-frame ---

    /// Mark a producer row fully processed.
    pub fn set_row_done(&self, row: usize) {
        let mut inner = self.inner.lock();
        if let State::RowFrm { done } = &mut inner.state {
            if !done[row] {
                done[row] = true;
                self.cond.notify_all();
            }
        }
    }

    /// Block until a producer row is fully processed.
    pub fn wait_row_done(&self, row: usize) {
        let mut inner = self.inner.lock();
        loop {
            if inner.released {
                return;
            }
            match &inner.state {
                State::RowFrm { done } if !done[row] => {}
                _ => return,
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Poll a producer row's completion.
    pub fn is_row_done(&self, row: usize) -> bool {
        let inner = self.inner.lock();
        match &inner.state {
            State::RowFrm { done } => done[row] || inner.released,
            _ => true,
        }
    }

    // --- Frame-frame ---

    /// Mark this frame's stage as done, waking consumers.
    pub fn set_frame_done(&self) {
        let mut inner = self.inner.lock();
        if let State::FrmFrm { done_count } = &mut inner.state {
            *done_count += 1;
            self.cond.notify_all();
        }
    }

    /// Block until at least `count` frames have completed the stage.
    pub fn wait_frame_done(&self, count: u64) {
        let mut inner = self.inner.lock();
        loop {
            if inner.released {
                return;
            }
            match &inner.state {
                State::FrmFrm { done_count } if *done_count < count => {}
                _ => return,
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Completed-stage count so far.
    pub fn frames_done(&self) -> u64 {
        let inner = self.inner.lock();
        match &inner.state {
            State::FrmFrm { done_count } => *done_count,
            _ => 0,
        }
    }

    // --- Map ---

    /// Publish the state of one cell. States only move forward.
    pub fn map_set(&self, x: usize, y: usize, value: MapState) {
        let mut inner = self.inner.lock();
        if let State::Map { cells, width, .. } = &mut inner.state {
            let cell = &mut cells[y * *width + x];
            if *cell < value {
                *cell = value;
                self.cond.notify_all();
            }
        }
    }

    /// Block until every cell in the search-range rectangle around
    /// (`x`, `y`) has reached `required`. The rectangle spans `sr_x` cells
    /// left/right and `sr_y` up/down, clipped to the grid.
    pub fn map_check(&self, x: usize, y: usize, sr_x: usize, sr_y: usize, required: MapState) {
        let mut inner = self.inner.lock();
        loop {
            if inner.released {
                return;
            }
            if let State::Map { cells, width, height } = &inner.state {
                let x0 = x.saturating_sub(sr_x);
                let y0 = y.saturating_sub(sr_y);
                let x1 = (x + sr_x).min(*width - 1);
                let y1 = (y + sr_y).min(*height - 1);
                let ready = (y0..=y1)
                    .all(|cy| (x0..=x1).all(|cx| cells[cy * *width + cx] >= required));
                if ready {
                    return;
                }
            } else {
                return;
            }
            self.cond.wait(&mut inner);
        }
    }
}
