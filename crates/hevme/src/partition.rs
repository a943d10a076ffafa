//! CTB partition bookkeeping: the per-CTB state machine, per-preset
//! partition masks, and ranked partition selection.

use hevme_core::{PartMask, PartitionId, PartitionType, PresetParams};

/// Processing state of one CTB. Transitions are strictly forward; a
/// cancelled picture drops CTBs in any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CtbState {
    Idle,
    CandidatesBuilt,
    FpelRefined,
    SubpelRefined,
    BiEvaluated,
    MergeEvaluated,
    PartitionSelected,
    WrittenBack,
}

impl CtbState {
    /// Advance to `next`, panicking in debug builds on a backward move.
    pub fn advance(&mut self, next: CtbState) {
        debug_assert!(next > *self, "CTB state may only move forward: {self:?} -> {next:?}");
        *self = next;
    }

    pub fn is_terminal(&self) -> bool {
        *self == CtbState::WrittenBack
    }
}

/// Partition mask for a CU search under the given preset.
///
/// Speed presets restrict the mask: AMP partitions are dropped, and for the
/// fastest presets NxN is searched only when the block shows mixed
/// activity (`split_hint`).
pub fn active_part_mask(preset: &PresetParams, split_hint: bool) -> PartMask {
    if !preset.limit_active_partitions {
        return PartMask::ALL;
    }
    let mut mask = PartMask::ALL.without_amp();
    if !split_hint {
        let keep = [
            PartitionId::Part2Nx2N,
            PartitionId::Part2NxNTop,
            PartitionId::Part2NxNBot,
            PartitionId::PartNx2NLeft,
            PartitionId::PartNx2NRight,
        ];
        mask = PartMask::of(&keep);
    }
    mask
}

/// A scored partition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredPartition {
    pub part_type: PartitionType,
    pub cost: u32,
}

/// Rank partition types ascending by cost and keep the top `k` for the
/// downstream TU recursion. Ties keep the earlier (simpler) type.
pub fn select_partitions(mut scored: Vec<ScoredPartition>, k: usize) -> Vec<ScoredPartition> {
    scored.sort_by_key(|s| s.cost);
    scored.truncate(k.max(1));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use hevme_core::QualityPreset;

    #[test]
    fn state_moves_forward() {
        let mut s = CtbState::Idle;
        s.advance(CtbState::CandidatesBuilt);
        s.advance(CtbState::FpelRefined);
        s.advance(CtbState::WrittenBack);
        assert!(s.is_terminal());
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn backward_transition_panics() {
        let mut s = CtbState::SubpelRefined;
        s.advance(CtbState::CandidatesBuilt);
    }

    #[test]
    fn pristine_keeps_all_partitions() {
        let p = QualityPreset::Pristine.params();
        assert_eq!(active_part_mask(&p, false), PartMask::ALL);
    }

    #[test]
    fn speed_presets_drop_amp_and_gate_nxn() {
        let p = QualityPreset::HighSpeed.params();
        let gated = active_part_mask(&p, false);
        assert!(gated.contains(PartitionId::Part2Nx2N));
        assert!(!gated.contains(PartitionId::PartNxNTopLeft));
        assert!(!gated.contains(PartitionId::Part2NxnUTop));
        let hinted = active_part_mask(&p, true);
        assert!(hinted.contains(PartitionId::PartNxNTopLeft));
        assert!(!hinted.contains(PartitionId::Part2NxnUTop));
    }

    #[test]
    fn selection_ranks_and_truncates() {
        let scored = vec![
            ScoredPartition { part_type: PartitionType::Size2NxN, cost: 30 },
            ScoredPartition { part_type: PartitionType::Size2Nx2N, cost: 10 },
            ScoredPartition { part_type: PartitionType::SizeNxN, cost: 20 },
        ];
        let top = select_partitions(scored, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].part_type, PartitionType::Size2Nx2N);
        assert_eq!(top[1].part_type, PartitionType::SizeNxN);
    }
}
