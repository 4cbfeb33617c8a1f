//! Mapping of blocks onto worker ranks.

use hb_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::message::Rank;

/// Splits ranks `1..world_size` into `num_blocks` equal, contiguous,
/// non-overlapping ranges. Blocks are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    num_blocks: usize,
    world_size: usize,
}

impl BlockLayout {
    pub fn new(num_blocks: usize, world_size: usize) -> Result<Self, ConfigError> {
        if num_blocks == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "num_blocks".into(),
                message: "must be at least 1".into(),
            });
        }
        if world_size < 2 {
            return Err(ConfigError::InvalidParameter {
                parameter: "world_size".into(),
                message: format!("needs the coordinator plus workers, got {world_size}"),
            });
        }
        let workers = world_size - 1;
        if workers % num_blocks != 0 || workers < num_blocks {
            return Err(ConfigError::IndivisibleBlocks {
                workers,
                num_blocks,
            });
        }
        Ok(Self {
            num_blocks,
            world_size,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn workers(&self) -> usize {
        self.world_size - 1
    }

    pub fn block_size(&self) -> usize {
        self.workers() / self.num_blocks
    }

    /// Block ids, `1..=num_blocks`.
    pub fn blocks(&self) -> RangeInclusive<usize> {
        1..=self.num_blocks
    }

    /// Ranks `[start(b), end(b)]` of block `b`.
    pub fn ranks(&self, block: usize) -> RangeInclusive<Rank> {
        debug_assert!(self.blocks().contains(&block), "block {block} out of range");
        let size = self.block_size();
        let start = (block - 1) * size + 1;
        start..=block * size
    }

    /// The rank whose figure of merit counts for block `b`.
    pub fn authoritative(&self, block: usize) -> Rank {
        *self.ranks(block).start()
    }

    /// Block a worker rank belongs to.
    pub fn block_of(&self, rank: Rank) -> Option<usize> {
        if rank == 0 || rank >= self.world_size {
            return None;
        }
        Some((rank - 1) / self.block_size() + 1)
    }

    pub fn is_authoritative(&self, rank: Rank) -> bool {
        self.block_of(rank)
            .map_or(false, |block| self.authoritative(block) == rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_partition_the_workers() {
        let layout = BlockLayout::new(2, 5).unwrap();
        assert_eq!(layout.block_size(), 2);
        assert_eq!(layout.ranks(1), 1..=2);
        assert_eq!(layout.ranks(2), 3..=4);
        assert_eq!(layout.authoritative(2), 3);

        let covered: Vec<Rank> = layout.blocks().flat_map(|b| layout.ranks(b)).collect();
        assert_eq!(covered, vec![1, 2, 3, 4]);
    }

    #[test]
    fn block_lookup() {
        let layout = BlockLayout::new(3, 7).unwrap();
        assert_eq!(layout.block_of(0), None);
        assert_eq!(layout.block_of(1), Some(1));
        assert_eq!(layout.block_of(4), Some(2));
        assert_eq!(layout.block_of(6), Some(3));
        assert_eq!(layout.block_of(7), None);
        assert!(layout.is_authoritative(5));
        assert!(!layout.is_authoritative(6));
    }

    #[test]
    fn indivisible_split_rejected() {
        assert_eq!(
            BlockLayout::new(2, 4),
            Err(ConfigError::IndivisibleBlocks {
                workers: 3,
                num_blocks: 2
            })
        );
        assert!(BlockLayout::new(0, 4).is_err());
        assert!(BlockLayout::new(1, 1).is_err());
        assert!(BlockLayout::new(4, 3).is_err());
    }
}
