use log::debug;

#[derive(Debug, PartialEq)]
pub enum MemoryError {
    OutOfFrames,
    NotAllocated,
    AlreadyAllocated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStat {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

/// Fixed pool of physical page frames. Each slot records the owning pid,
/// or `None` while the frame is free. Frames are never shared, so the
/// owner slot doubles as the reference count.
#[derive(Debug, Clone)]
pub struct FramePool<const FRAMES: usize> {
    owners: Vec<Option<u32>>,
}

impl<const FRAMES: usize> FramePool<FRAMES> {
    pub fn init() -> Self {
        Self {
            owners: vec![None; FRAMES],
        }
    }

    /// Hands out the lowest-numbered free frame.
    pub fn alloc_frame(&mut self, pid: u32) -> Result<u32, MemoryError> {
        for (frame, owner) in self.owners.iter_mut().enumerate() {
            if owner.is_none() {
                *owner = Some(pid);
                debug!("frame[{}] allocated to pid {}", frame, pid);
                return Ok(frame as u32);
            }
        }
        debug!("no free frames");
        Err(MemoryError::OutOfFrames)
    }

    pub fn free_frame(&mut self, frame: u32) -> Result<(), MemoryError> {
        match self.owners.get_mut(frame as usize) {
            Some(owner) if owner.is_some() => {
                *owner = None;
                debug!("frame[{}] freed", frame);
                Ok(())
            }
            _ => Err(MemoryError::NotAllocated),
        }
    }

    /// Marks a specific frame as owned by `pid`. Used when rebuilding a
    /// pool from a snapshot.
    pub fn claim(&mut self, frame: u32, pid: u32) -> Result<(), MemoryError> {
        match self.owners.get_mut(frame as usize) {
            Some(owner) if owner.is_none() => {
                *owner = Some(pid);
                Ok(())
            }
            Some(_) => Err(MemoryError::AlreadyAllocated),
            None => Err(MemoryError::NotAllocated),
        }
    }

    pub fn owner_of(&self, frame: u32) -> Option<u32> {
        *self.owners.get(frame as usize)?
    }

    pub fn stat(&self) -> MemoryStat {
        let used = self.owners.iter().filter(|owner| owner.is_some()).count();
        MemoryStat {
            total: FRAMES,
            used,
            free: FRAMES - used,
        }
    }

    /// Owner of every frame in frame-id order.
    pub fn owners(&self) -> &[Option<u32>] {
        &self.owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_lowest_first() {
        let mut pool = FramePool::<4>::init();
        assert_eq!(pool.alloc_frame(1), Ok(0));
        assert_eq!(pool.alloc_frame(1), Ok(1));
        assert_eq!(pool.alloc_frame(2), Ok(2));
    }

    #[test]
    fn test_freed_frame_is_reused_first() {
        let mut pool = FramePool::<4>::init();
        pool.alloc_frame(1).unwrap();
        pool.alloc_frame(1).unwrap();
        pool.alloc_frame(1).unwrap();
        pool.free_frame(1).unwrap();
        assert_eq!(pool.alloc_frame(2), Ok(1));
    }

    #[test]
    fn test_alloc_exhausted() {
        let mut pool = FramePool::<2>::init();
        pool.alloc_frame(1).unwrap();
        pool.alloc_frame(1).unwrap();
        assert_eq!(pool.alloc_frame(1), Err(MemoryError::OutOfFrames));
    }

    #[test]
    fn test_free_unallocated() {
        let mut pool = FramePool::<2>::init();
        assert_eq!(pool.free_frame(0), Err(MemoryError::NotAllocated));
        assert_eq!(pool.free_frame(7), Err(MemoryError::NotAllocated));
    }

    #[test]
    fn test_stat_tracks_usage() {
        let mut pool = FramePool::<3>::init();
        pool.alloc_frame(1).unwrap();
        pool.alloc_frame(2).unwrap();
        assert_eq!(
            pool.stat(),
            MemoryStat {
                total: 3,
                used: 2,
                free: 1
            }
        );
        pool.free_frame(0).unwrap();
        assert_eq!(pool.stat().used, 1);
    }

    #[test]
    fn test_owner_of() {
        let mut pool = FramePool::<2>::init();
        pool.alloc_frame(9).unwrap();
        assert_eq!(pool.owner_of(0), Some(9));
        assert_eq!(pool.owner_of(1), None);
        assert_eq!(pool.owner_of(5), None);
    }

    #[test]
    fn test_claim() {
        let mut pool = FramePool::<2>::init();
        pool.claim(1, 4).unwrap();
        assert_eq!(pool.owner_of(1), Some(4));
        assert_eq!(pool.claim(1, 5), Err(MemoryError::AlreadyAllocated));
        assert_eq!(pool.claim(2, 5), Err(MemoryError::NotAllocated));
        // claimed frames are skipped by the allocator
        assert_eq!(pool.alloc_frame(6), Ok(0));
    }
}
