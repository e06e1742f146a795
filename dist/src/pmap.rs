//! Assignment of tile ordinals to the ranks which own them.

use std::fmt;
use std::sync::Arc;

use crate::World;

/// The ownership of each tile of a distributed array.
pub trait Pmap: fmt::Debug + Send + Sync {
    /// The rank of the local process.
    fn rank(&self) -> usize;

    /// The number of ranks which own tiles.
    fn procs(&self) -> usize;

    /// The number of tiles.
    fn size(&self) -> usize;

    /// The rank which owns the tile at `ordinal`.
    fn owner(&self, ordinal: usize) -> usize;

    /// A map with the same policy and local rank, over `size` tiles.
    fn resize(&self, size: usize) -> Arc<dyn Pmap>;

    fn is_local(&self, ordinal: usize) -> bool {
        self.owner(ordinal) == self.rank()
    }

    /// The ordinals of every tile owned by the local rank, in ascending order.
    fn local_ordinals(&self) -> Vec<usize> {
        (0..self.size())
            .filter(|ordinal| self.is_local(*ordinal))
            .collect()
    }
}

/// Assigns each rank a contiguous block of tiles.
#[derive(Clone, Debug)]
pub struct BlockedPmap {
    rank: usize,
    procs: usize,
    size: usize,
    block: usize,
}

impl BlockedPmap {
    pub fn new(world: &World, size: usize) -> Self {
        Self::with_rank(world.rank(), world.procs(), size)
    }

    fn with_rank(rank: usize, procs: usize, size: usize) -> Self {
        let block = ((size + procs - 1) / procs).max(1);

        Self {
            rank,
            procs,
            size,
            block,
        }
    }
}

impl Pmap for BlockedPmap {
    fn rank(&self) -> usize {
        self.rank
    }

    fn procs(&self) -> usize {
        self.procs
    }

    fn size(&self) -> usize {
        self.size
    }

    fn owner(&self, ordinal: usize) -> usize {
        ordinal / self.block
    }

    fn resize(&self, size: usize) -> Arc<dyn Pmap> {
        Arc::new(Self::with_rank(self.rank, self.procs, size))
    }

    fn local_ordinals(&self) -> Vec<usize> {
        let start = (self.rank * self.block).min(self.size);
        let end = (start + self.block).min(self.size);
        (start..end).collect()
    }
}

/// Deals tiles out to ranks in round-robin order.
#[derive(Clone, Debug)]
pub struct CyclicPmap {
    rank: usize,
    procs: usize,
    size: usize,
}

impl CyclicPmap {
    pub fn new(world: &World, size: usize) -> Self {
        Self {
            rank: world.rank(),
            procs: world.procs(),
            size,
        }
    }
}

impl Pmap for CyclicPmap {
    fn rank(&self) -> usize {
        self.rank
    }

    fn procs(&self) -> usize {
        self.procs
    }

    fn size(&self) -> usize {
        self.size
    }

    fn owner(&self, ordinal: usize) -> usize {
        ordinal % self.procs
    }

    fn resize(&self, size: usize) -> Arc<dyn Pmap> {
        Arc::new(Self {
            rank: self.rank,
            procs: self.procs,
            size,
        })
    }

    fn local_ordinals(&self) -> Vec<usize> {
        (self.rank..self.size).step_by(self.procs).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::Config;

    use super::*;

    fn partition(pmaps: &[Arc<dyn Pmap>]) -> Vec<usize> {
        let mut ordinals: Vec<usize> = pmaps.iter().flat_map(|pmap| pmap.local_ordinals()).collect();
        ordinals.sort();
        ordinals
    }

    #[test]
    fn test_blocked() {
        let worlds = World::create(3, Config::default()).unwrap();
        let pmaps: Vec<Arc<dyn Pmap>> = worlds
            .iter()
            .map(|world| Arc::new(BlockedPmap::new(world, 7)) as Arc<dyn Pmap>)
            .collect();

        assert_eq!(pmaps[0].local_ordinals(), vec![0, 1, 2]);
        assert_eq!(pmaps[2].local_ordinals(), vec![6]);
        assert_eq!(pmaps[1].owner(4), 1);
        assert!(pmaps[2].is_local(6));
        assert_eq!(partition(&pmaps), (0..7).collect::<Vec<_>>());

        let resized: Vec<_> = pmaps.iter().map(|pmap| pmap.resize(2)).collect();
        assert_eq!(resized[0].local_ordinals(), vec![0]);
        assert!(resized[2].local_ordinals().is_empty());
        assert_eq!(partition(&resized), vec![0, 1]);
    }

    #[test]
    fn test_cyclic() {
        let worlds = World::create(2, Config::default()).unwrap();
        let pmaps: Vec<Arc<dyn Pmap>> = worlds
            .iter()
            .map(|world| Arc::new(CyclicPmap::new(world, 5)) as Arc<dyn Pmap>)
            .collect();

        assert_eq!(pmaps[1].local_ordinals(), vec![1, 3]);
        assert_eq!(pmaps[0].owner(4), 0);
        assert_eq!(partition(&pmaps), (0..5).collect::<Vec<_>>());

        for pmap in &pmaps {
            for ordinal in pmap.local_ordinals() {
                assert_eq!(pmap.owner(ordinal), pmap.rank());
            }
        }
    }
}
