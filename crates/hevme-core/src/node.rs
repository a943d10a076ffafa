//! Search nodes and sorted best-N result sets.

use serde::{Deserialize, Serialize};

use crate::mv::MotionVector;

/// Cost sentinel for unevaluated nodes.
pub const MAX_COST: u32 = i32::MAX as u32;

/// One candidate or result of a motion search.
///
/// `ref_idx` indexes the picture-local reference list; the past/future and
/// L0/L1 semantics of that index live in a parallel mapping owned by the
/// frame context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchNode {
    pub mv: MotionVector,
    pub ref_idx: i8,
    pub sad: u32,
    pub mv_cost: u32,
    pub total_cost: u32,
    /// Monotonic within a picture: once true it never reverts.
    pub subpel_done: bool,
    pub is_avail: bool,
}

impl Default for SearchNode {
    fn default() -> Self {
        Self::unavailable(-1)
    }
}

impl SearchNode {
    /// A fresh node for `ref_idx` with worst-case cost, marked available.
    pub fn init(ref_idx: i8) -> Self {
        Self {
            mv: MotionVector::ZERO,
            ref_idx,
            sad: MAX_COST,
            mv_cost: 0,
            total_cost: MAX_COST,
            subpel_done: false,
            is_avail: true,
        }
    }

    /// A node that spatial/temporal candidate extraction reports as missing.
    pub fn unavailable(ref_idx: i8) -> Self {
        Self {
            mv: MotionVector::ZERO,
            ref_idx,
            sad: MAX_COST,
            mv_cost: 0,
            total_cost: MAX_COST,
            subpel_done: false,
            is_avail: false,
        }
    }

    /// Candidate with a known MV, not yet evaluated.
    pub fn candidate(mv: MotionVector, ref_idx: i8) -> Self {
        Self {
            mv,
            ref_idx,
            sad: MAX_COST,
            mv_cost: 0,
            total_cost: MAX_COST,
            subpel_done: false,
            is_avail: true,
        }
    }

    /// Mark subpel refinement complete. The flag only ever goes up.
    pub fn set_subpel_done(&mut self) {
        self.subpel_done = true;
    }
}

/// Fixed-capacity result table kept sorted ascending by `total_cost`.
///
/// Insertion drops the worst entry when full; equal costs keep the earlier
/// arrival first so repeated runs stay deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    nodes: Vec<SearchNode>,
    capacity: usize,
}

impl ResultSet {
    pub fn new(capacity: usize) -> Self {
        Self { nodes: Vec::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn best(&self) -> Option<&SearchNode> {
        self.nodes.first()
    }

    pub fn nodes(&self) -> &[SearchNode] {
        &self.nodes
    }

    /// Insert keeping ascending `total_cost` order.
    ///
    /// Returns true when the node entered the table.
    pub fn insert(&mut self, node: SearchNode) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let pos = self.nodes.partition_point(|n| n.total_cost <= node.total_cost);
        if pos >= self.capacity {
            return false;
        }
        if self.nodes.len() == self.capacity {
            self.nodes.pop();
        }
        self.nodes.insert(pos, node);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_cost(cost: u32) -> SearchNode {
        SearchNode { total_cost: cost, sad: cost, ..SearchNode::init(0) }
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let mut set = ResultSet::new(3);
        for cost in [50, 10, 30, 20, 40] {
            set.insert(node_with_cost(cost));
        }
        let costs: Vec<u32> = set.nodes().iter().map(|n| n.total_cost).collect();
        assert_eq!(costs, vec![10, 20, 30]);
    }

    #[test]
    fn insert_rejects_worse_than_worst_when_full() {
        let mut set = ResultSet::new(2);
        set.insert(node_with_cost(1));
        set.insert(node_with_cost(2));
        assert!(!set.insert(node_with_cost(3)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn equal_cost_keeps_first_arrival() {
        let mut set = ResultSet::new(2);
        let mut a = node_with_cost(5);
        a.ref_idx = 0;
        let mut b = node_with_cost(5);
        b.ref_idx = 1;
        set.insert(a);
        set.insert(b);
        assert_eq!(set.nodes()[0].ref_idx, 0);
        assert_eq!(set.nodes()[1].ref_idx, 1);
    }

    #[test]
    fn subpel_done_is_monotonic() {
        let mut n = SearchNode::init(0);
        assert!(!n.subpel_done);
        n.set_subpel_done();
        n.set_subpel_done();
        assert!(n.subpel_done);
    }
}
