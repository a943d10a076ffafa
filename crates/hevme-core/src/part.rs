//! Partition identifiers for CU search results.
//!
//! A CU of size 2Nx2N is searched as 17 partitions at once: the full block,
//! the symmetric 2NxN / Nx2N / NxN splits, and the four asymmetric (AMP)
//! splits, each half tracked separately.

use serde::{Deserialize, Serialize};

/// Number of distinct partition ids per CU.
pub const NUM_PARTITIONS: usize = 17;

/// Identifier of one partition inside a CU.
///
/// The discriminant order is the result-table index order; the partial-SAD
/// kernels index their output arrays by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PartitionId {
    /// Full CU.
    Part2Nx2N = 0,
    /// Horizontal split, top half.
    Part2NxNTop = 1,
    /// Horizontal split, bottom half.
    Part2NxNBot = 2,
    /// Vertical split, left half.
    PartNx2NLeft = 3,
    /// Vertical split, right half.
    PartNx2NRight = 4,
    /// Quad split, top-left.
    PartNxNTopLeft = 5,
    /// Quad split, top-right.
    PartNxNTopRight = 6,
    /// Quad split, bottom-left.
    PartNxNBotLeft = 7,
    /// Quad split, bottom-right.
    PartNxNBotRight = 8,
    /// Asymmetric horizontal, narrow top quarter.
    Part2NxnUTop = 9,
    /// Asymmetric horizontal, wide bottom remainder.
    Part2NxnUBot = 10,
    /// Asymmetric horizontal, wide top remainder.
    Part2NxnDTop = 11,
    /// Asymmetric horizontal, narrow bottom quarter.
    Part2NxnDBot = 12,
    /// Asymmetric vertical, narrow left quarter.
    PartnLx2NLeft = 13,
    /// Asymmetric vertical, wide right remainder.
    PartnLx2NRight = 14,
    /// Asymmetric vertical, wide left remainder.
    PartnRx2NLeft = 15,
    /// Asymmetric vertical, narrow right quarter.
    PartnRx2NRight = 16,
}

impl PartitionId {
    pub const ALL: [PartitionId; NUM_PARTITIONS] = [
        PartitionId::Part2Nx2N,
        PartitionId::Part2NxNTop,
        PartitionId::Part2NxNBot,
        PartitionId::PartNx2NLeft,
        PartitionId::PartNx2NRight,
        PartitionId::PartNxNTopLeft,
        PartitionId::PartNxNTopRight,
        PartitionId::PartNxNBotLeft,
        PartitionId::PartNxNBotRight,
        PartitionId::Part2NxnUTop,
        PartitionId::Part2NxnUBot,
        PartitionId::Part2NxnDTop,
        PartitionId::Part2NxnDBot,
        PartitionId::PartnLx2NLeft,
        PartitionId::PartnLx2NRight,
        PartitionId::PartnRx2NLeft,
        PartitionId::PartnRx2NRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<PartitionId> {
        Self::ALL.get(idx).copied()
    }

    /// The partition type this id belongs to.
    pub fn part_type(self) -> PartitionType {
        use PartitionId::*;
        match self {
            Part2Nx2N => PartitionType::Size2Nx2N,
            Part2NxNTop | Part2NxNBot => PartitionType::Size2NxN,
            PartNx2NLeft | PartNx2NRight => PartitionType::SizeNx2N,
            PartNxNTopLeft | PartNxNTopRight | PartNxNBotLeft | PartNxNBotRight => {
                PartitionType::SizeNxN
            }
            Part2NxnUTop | Part2NxnUBot => PartitionType::Size2NxnU,
            Part2NxnDTop | Part2NxnDBot => PartitionType::Size2NxnD,
            PartnLx2NLeft | PartnLx2NRight => PartitionType::SizenLx2N,
            PartnRx2NLeft | PartnRx2NRight => PartitionType::SizenRx2N,
        }
    }

    /// Offset and size of this partition inside a CU of side `cu_size`,
    /// as `(x, y, w, h)` in pixels.
    pub fn geometry(self, cu_size: u32) -> (u32, u32, u32, u32) {
        use PartitionId::*;
        let n = cu_size / 2;
        let q = cu_size / 4;
        match self {
            Part2Nx2N => (0, 0, cu_size, cu_size),
            Part2NxNTop => (0, 0, cu_size, n),
            Part2NxNBot => (0, n, cu_size, n),
            PartNx2NLeft => (0, 0, n, cu_size),
            PartNx2NRight => (n, 0, n, cu_size),
            PartNxNTopLeft => (0, 0, n, n),
            PartNxNTopRight => (n, 0, n, n),
            PartNxNBotLeft => (0, n, n, n),
            PartNxNBotRight => (n, n, n, n),
            Part2NxnUTop => (0, 0, cu_size, q),
            Part2NxnUBot => (0, q, cu_size, cu_size - q),
            Part2NxnDTop => (0, 0, cu_size, cu_size - q),
            Part2NxnDBot => (0, cu_size - q, cu_size, q),
            PartnLx2NLeft => (0, 0, q, cu_size),
            PartnLx2NRight => (q, 0, cu_size - q, cu_size),
            PartnRx2NLeft => (0, 0, cu_size - q, cu_size),
            PartnRx2NRight => (cu_size - q, 0, q, cu_size),
        }
    }
}

/// HEVC inter partition types of a CU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionType {
    Size2Nx2N,
    Size2NxN,
    SizeNx2N,
    SizeNxN,
    Size2NxnU,
    Size2NxnD,
    SizenLx2N,
    SizenRx2N,
}

impl PartitionType {
    pub const ALL: [PartitionType; 8] = [
        PartitionType::Size2Nx2N,
        PartitionType::Size2NxN,
        PartitionType::SizeNx2N,
        PartitionType::SizeNxN,
        PartitionType::Size2NxnU,
        PartitionType::Size2NxnD,
        PartitionType::SizenLx2N,
        PartitionType::SizenRx2N,
    ];

    /// Partition ids making up this type, in raster order.
    pub fn part_ids(self) -> &'static [PartitionId] {
        use PartitionId::*;
        match self {
            PartitionType::Size2Nx2N => &[Part2Nx2N],
            PartitionType::Size2NxN => &[Part2NxNTop, Part2NxNBot],
            PartitionType::SizeNx2N => &[PartNx2NLeft, PartNx2NRight],
            PartitionType::SizeNxN => {
                &[PartNxNTopLeft, PartNxNTopRight, PartNxNBotLeft, PartNxNBotRight]
            }
            PartitionType::Size2NxnU => &[Part2NxnUTop, Part2NxnUBot],
            PartitionType::Size2NxnD => &[Part2NxnDTop, Part2NxnDBot],
            PartitionType::SizenLx2N => &[PartnLx2NLeft, PartnLx2NRight],
            PartitionType::SizenRx2N => &[PartnRx2NLeft, PartnRx2NRight],
        }
    }

    pub fn num_parts(self) -> usize {
        self.part_ids().len()
    }

    pub fn is_amp(self) -> bool {
        matches!(
            self,
            PartitionType::Size2NxnU
                | PartitionType::Size2NxnD
                | PartitionType::SizenLx2N
                | PartitionType::SizenRx2N
        )
    }
}

/// Bit mask over partition ids used to gate which partitions a search
/// evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMask(pub u32);

impl PartMask {
    pub const ALL: PartMask = PartMask((1 << NUM_PARTITIONS) - 1);
    pub const NONE: PartMask = PartMask(0);

    pub fn only(id: PartitionId) -> PartMask {
        PartMask(1 << id.index())
    }

    pub fn of(ids: &[PartitionId]) -> PartMask {
        PartMask(ids.iter().fold(0, |m, id| m | (1 << id.index())))
    }

    pub fn contains(&self, id: PartitionId) -> bool {
        self.0 & (1 << id.index()) != 0
    }

    pub fn with(&self, id: PartitionId) -> PartMask {
        PartMask(self.0 | (1 << id.index()))
    }

    pub fn without_amp(&self) -> PartMask {
        let amp: u32 = PartitionId::ALL
            .iter()
            .filter(|id| id.part_type().is_amp())
            .fold(0, |m, id| m | (1 << id.index()));
        PartMask(self.0 & !amp)
    }

    /// Ids present in the mask, in table order.
    pub fn ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        PartitionId::ALL.iter().copied().filter(move |id| self.contains(*id))
    }
}
