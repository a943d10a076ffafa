//! The picture job queue.
//!
//! Rows of each pipeline stage are queued as jobs; worker threads pull from
//! the queue until it drains or the picture is cancelled. `get_next_job` is
//! the only suspension point outside the dependency manager, and
//! cancellation drains the queue atomically so sibling threads exit at
//! their next pull.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::debug;

/// Pipeline stage a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Coarse-layer search of the whole coarsest layer.
    Coarse,
    /// Refinement of one layer.
    Refine { layer_id: usize },
    /// L0 search of one CTB row.
    CtbRow { row: usize },
}

/// One unit of work for a worker thread.
///
/// Jobs queue in pipeline order but carry no ordering of their own: a job
/// becomes runnable when the dependency managers say its inputs are
/// published, so workers advance concurrently across rows and layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    pub poc: i32,
}

/// Lifecycle marker of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Started,
    Finished,
}

/// One entry of the per-picture job trace, recorded by the workers for
/// diagnostics and concurrency tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobEvent {
    pub kind: JobKind,
    pub thread_id: usize,
    pub phase: JobPhase,
}

/// Per-picture job queue with atomic cancellation.
#[derive(Debug)]
pub struct JobQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    cancelled: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, cancelled: AtomicBool::new(false) }
    }

    /// Queue one job. Jobs pushed after cancellation are dropped.
    pub fn push(&self, job: Job) {
        if !self.is_cancelled() {
            // Send on an unbounded channel only fails when disconnected.
            let _ = self.tx.send(job);
        }
    }

    /// Pull the next job, or `None` when the queue is drained or the
    /// picture was cancelled.
    pub fn get_next_job(&self) -> Option<Job> {
        if self.is_cancelled() {
            return None;
        }
        match self.rx.try_recv() {
            Ok(job) => {
                if self.is_cancelled() {
                    None
                } else {
                    Some(job)
                }
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Cancel the picture: mark and drain so siblings observe an empty
    /// queue at their next pull.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut drained = 0usize;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        debug!(drained, "job queue cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Prepare the queue for a new picture: drain leftovers and clear the
    /// cancellation mark.
    pub fn reset(&self) {
        while self.rx.try_recv().is_ok() {}
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let q = JobQueue::new();
        q.push(Job { kind: JobKind::Coarse, poc: 0 });
        q.push(Job { kind: JobKind::Refine { layer_id: 2 }, poc: 0 });
        assert_eq!(q.get_next_job().unwrap().kind, JobKind::Coarse);
        assert_eq!(q.get_next_job().unwrap().kind, JobKind::Refine { layer_id: 2 });
        assert!(q.get_next_job().is_none());
    }

    #[test]
    fn cancel_drains_and_blocks_new_pushes() {
        let q = JobQueue::new();
        for row in 0..8 {
            q.push(Job { kind: JobKind::CtbRow { row }, poc: 1 });
        }
        q.cancel();
        assert!(q.get_next_job().is_none());
        q.push(Job { kind: JobKind::Coarse, poc: 1 });
        assert!(q.get_next_job().is_none());
        assert!(q.is_cancelled());
    }
}
