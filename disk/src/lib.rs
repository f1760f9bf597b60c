use log::debug;

#[derive(Debug, PartialEq)]
pub enum DiskError {
    OutOfBlocks,
    NotAllocated,
    AlreadyAllocated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStat {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

/// Fixed pool of disk blocks backing the swap area. A block is either
/// free or owned by exactly one process; a swapped-out page holds at
/// most one block at a time.
#[derive(Debug, Clone)]
pub struct BlockPool<const BLOCKS: usize> {
    owners: Vec<Option<u32>>,
}

impl<const BLOCKS: usize> BlockPool<BLOCKS> {
    pub fn init() -> Self {
        Self {
            owners: vec![None; BLOCKS],
        }
    }

    /// Hands out the lowest-numbered free block.
    pub fn alloc_block(&mut self, pid: u32) -> Result<u32, DiskError> {
        for (block, owner) in self.owners.iter_mut().enumerate() {
            if owner.is_none() {
                *owner = Some(pid);
                debug!("block[{}] allocated to pid {}", block, pid);
                return Ok(block as u32);
            }
        }
        debug!("swap area full");
        Err(DiskError::OutOfBlocks)
    }

    pub fn free_block(&mut self, block: u32) -> Result<(), DiskError> {
        match self.owners.get_mut(block as usize) {
            Some(owner) if owner.is_some() => {
                *owner = None;
                debug!("block[{}] freed", block);
                Ok(())
            }
            _ => Err(DiskError::NotAllocated),
        }
    }

    /// Releases every block still owned by `pid`. Returns how many
    /// blocks were reclaimed.
    pub fn free_owned_by(&mut self, pid: u32) -> usize {
        let mut freed = 0;
        for owner in self.owners.iter_mut() {
            if *owner == Some(pid) {
                *owner = None;
                freed += 1;
            }
        }
        if freed > 0 {
            debug!("reclaimed {} blocks from pid {}", freed, pid);
        }
        freed
    }

    /// Marks a specific block as owned by `pid`. Used when rebuilding a
    /// pool from a snapshot.
    pub fn claim(&mut self, block: u32, pid: u32) -> Result<(), DiskError> {
        match self.owners.get_mut(block as usize) {
            Some(owner) if owner.is_none() => {
                *owner = Some(pid);
                Ok(())
            }
            Some(_) => Err(DiskError::AlreadyAllocated),
            None => Err(DiskError::NotAllocated),
        }
    }

    pub fn owner_of(&self, block: u32) -> Option<u32> {
        *self.owners.get(block as usize)?
    }

    pub fn stat(&self) -> DiskStat {
        let used = self.owners.iter().filter(|owner| owner.is_some()).count();
        DiskStat {
            total: BLOCKS,
            used,
            free: BLOCKS - used,
        }
    }

    /// Owner of every block in block-id order.
    pub fn owners(&self) -> &[Option<u32>] {
        &self.owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_free() {
        let mut pool = BlockPool::<3>::init();
        assert_eq!(pool.alloc_block(1), Ok(0));
        assert_eq!(pool.alloc_block(2), Ok(1));
        pool.free_block(0).unwrap();
        assert_eq!(pool.alloc_block(3), Ok(0));
        assert_eq!(pool.owner_of(0), Some(3));
    }

    #[test]
    fn test_alloc_over_capacity() {
        let mut pool = BlockPool::<1>::init();
        pool.alloc_block(1).unwrap();
        assert_eq!(pool.alloc_block(1), Err(DiskError::OutOfBlocks));
    }

    #[test]
    fn test_double_free() {
        let mut pool = BlockPool::<2>::init();
        pool.alloc_block(1).unwrap();
        pool.free_block(0).unwrap();
        assert_eq!(pool.free_block(0), Err(DiskError::NotAllocated));
    }

    #[test]
    fn test_free_owned_by() {
        let mut pool = BlockPool::<4>::init();
        pool.alloc_block(1).unwrap();
        pool.alloc_block(2).unwrap();
        pool.alloc_block(1).unwrap();
        assert_eq!(pool.free_owned_by(1), 2);
        assert_eq!(pool.stat().used, 1);
        assert_eq!(pool.free_owned_by(1), 0);
        assert_eq!(pool.owner_of(1), Some(2));
    }

    #[test]
    fn test_stat() {
        let mut pool = BlockPool::<2>::init();
        assert_eq!(
            pool.stat(),
            DiskStat {
                total: 2,
                used: 0,
                free: 2
            }
        );
        pool.alloc_block(1).unwrap();
        assert_eq!(pool.stat().free, 1);
    }

    #[test]
    fn test_claim_conflicts() {
        let mut pool = BlockPool::<2>::init();
        pool.claim(0, 1).unwrap();
        assert_eq!(pool.claim(0, 2), Err(DiskError::AlreadyAllocated));
        assert_eq!(pool.claim(9, 2), Err(DiskError::NotAllocated));
    }
}
