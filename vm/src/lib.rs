mod page_table;

use std::collections::BTreeMap;

use disk::{BlockPool, DiskStat};
use log::{debug, info};
use memory::{FramePool, MemoryStat};

pub use page_table::{AccessKind, AccessOutcome, PageTableEntry};

/// Size of one page/frame in bytes of simulated address space.
pub const PAGE_SIZE: u64 = 512;

#[derive(Debug, PartialEq)]
pub enum VmError {
    NoSuchProcess,
    NoSuchBlock,
    /// The block backs a mapped page and cannot be freed directly.
    BlockInUse,
    OutOfMemory,
    InvalidAddress,
    NoVictim,
    /// Restored state contradicts itself.
    Inconsistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStat {
    pub total_blocks: usize,
    pub used_blocks: usize,
    pub free_blocks: usize,
    pub swapped_pages: usize,
}

/// Virtual memory manager: per-process page tables over a frame pool and
/// a swap block pool. Frames and blocks are referred to by index only;
/// the `resident` table maps each owned frame back to the (pid, page)
/// it holds so the eviction sweep never walks the page tables blind.
#[derive(Debug)]
pub struct Vmm<const FRAMES: usize, const BLOCKS: usize> {
    frames: FramePool<FRAMES>,
    blocks: BlockPool<BLOCKS>,
    tables: BTreeMap<u32, Vec<PageTableEntry>>,
    resident: Vec<Option<(u32, u32)>>,
}

impl<const FRAMES: usize, const BLOCKS: usize> Vmm<FRAMES, BLOCKS> {
    pub fn init() -> Self {
        Self {
            frames: FramePool::init(),
            blocks: BlockPool::init(),
            tables: BTreeMap::new(),
            resident: vec![None; FRAMES],
        }
    }

    /// Appends `count` new pages to the process's table, each resident in
    /// a frame. Prefers free frames and falls back to eviction. Rolls
    /// back everything it mapped if a page cannot be placed.
    pub fn map_pages(&mut self, pid: u32, count: u32) -> Result<(), VmError> {
        let had_table = self.tables.contains_key(&pid);
        let before = self.mapped_pages(pid);
        for _ in 0..count {
            if let Err(e) = self.map_one(pid) {
                // the very first page may fail before any table exists
                let added = self.mapped_pages(pid) - before;
                if added > 0 {
                    self.unmap_pages(pid, added).unwrap();
                }
                if !had_table {
                    self.tables.remove(&pid);
                }
                return Err(e);
            }
        }
        info!("pid {}: mapped {} pages", pid, count);
        Ok(())
    }

    fn map_one(&mut self, pid: u32) -> Result<(), VmError> {
        let frame = self.grab_frame(pid)?;
        let table = self.tables.entry(pid).or_default();
        let page = table.len() as u32;
        table.push(PageTableEntry::resident_in(frame));
        self.resident[frame as usize] = Some((pid, page));
        Ok(())
    }

    /// Unmaps the highest-numbered `count` pages, returning their frames
    /// and blocks to the pools.
    pub fn unmap_pages(&mut self, pid: u32, count: u32) -> Result<(), VmError> {
        let table = self.tables.get_mut(&pid).ok_or(VmError::NoSuchProcess)?;
        if count as usize > table.len() {
            return Err(VmError::InvalidAddress);
        }
        let at = table.len() - count as usize;
        let drained = table.split_off(at);
        for entry in drained {
            if let Some(frame) = entry.frame {
                self.frames.free_frame(frame).unwrap();
                self.resident[frame as usize] = None;
            }
            if let Some(block) = entry.block {
                self.blocks.free_block(block).unwrap();
            }
        }
        Ok(())
    }

    /// Releases every frame and block the process owns, page-backed or
    /// not. Called on kill; cannot fail.
    pub fn unmap_all(&mut self, pid: u32) {
        if let Some(table) = self.tables.remove(&pid) {
            for entry in table {
                if let Some(frame) = entry.frame {
                    self.frames.free_frame(frame).unwrap();
                    self.resident[frame as usize] = None;
                }
                if let Some(block) = entry.block {
                    self.blocks.free_block(block).unwrap();
                }
            }
        }
        // blocks handed out directly, outside any page table
        self.blocks.free_owned_by(pid);
        info!("pid {}: address space released", pid);
    }

    /// Translates `vaddr` and touches the page, faulting it in from its
    /// backing block if it is not resident.
    pub fn access(
        &mut self,
        pid: u32,
        vaddr: u64,
        kind: AccessKind,
    ) -> Result<AccessOutcome, VmError> {
        let table = self.tables.get(&pid).ok_or(VmError::NoSuchProcess)?;
        let page = (vaddr / PAGE_SIZE) as usize;
        if page >= table.len() {
            return Err(VmError::InvalidAddress);
        }
        if let Some(frame) = table[page].frame {
            let entry = &mut self.tables.get_mut(&pid).unwrap()[page];
            entry.referenced = true;
            if kind == AccessKind::Write {
                entry.dirty = true;
            }
            return Ok(AccessOutcome::Hit { frame });
        }
        // page fault: a non-resident page always has a backing block
        let frame = self.grab_frame(pid)?;
        let entry = &mut self.tables.get_mut(&pid).unwrap()[page];
        entry.frame = Some(frame);
        entry.referenced = true;
        if kind == AccessKind::Write {
            entry.dirty = true;
        }
        self.resident[frame as usize] = Some((pid, page as u32));
        info!("pid {}: fault on page {}, loaded into frame {}", pid, page, frame);
        Ok(AccessOutcome::Fault { frame })
    }

    fn grab_frame(&mut self, pid: u32) -> Result<u32, VmError> {
        match self.frames.alloc_frame(pid) {
            Ok(frame) => Ok(frame),
            Err(_) => {
                // a frame the allocator cannot produce and eviction
                // cannot free is an out-of-memory, not a policy miss
                self.evict_one().map_err(|e| match e {
                    VmError::NoVictim => VmError::OutOfMemory,
                    other => other,
                })?;
                Ok(self.frames.alloc_frame(pid).unwrap())
            }
        }
    }

    /// Second-chance eviction. Sweeps frames in ascending id order,
    /// clearing `referenced` as it passes; the first frame found without
    /// its second chance is the victim, so ties resolve to the lowest
    /// frame id. Two sweeps suffice: after the first, some frame is
    /// unreferenced unless the pool holds no pages at all. A sweep that
    /// fails gives every page its cleared bit back, so a failed caller
    /// leaves no trace in the eviction metadata.
    pub fn evict_one(&mut self) -> Result<u32, VmError> {
        let mut cleared: Vec<(u32, u32)> = Vec::new();
        for _sweep in 0..2 {
            for frame in 0..FRAMES {
                let Some((pid, page)) = self.resident[frame] else {
                    continue;
                };
                let entry = self.tables[&pid][page as usize];
                if entry.referenced {
                    self.tables.get_mut(&pid).unwrap()[page as usize].referenced = false;
                    cleared.push((pid, page));
                    continue;
                }
                if entry.block.is_none() {
                    let block = match self.blocks.alloc_block(pid) {
                        Ok(block) => block,
                        Err(_) => {
                            self.restore_referenced(&cleared);
                            return Err(VmError::OutOfMemory);
                        }
                    };
                    self.tables.get_mut(&pid).unwrap()[page as usize].block = Some(block);
                }
                let slot = &mut self.tables.get_mut(&pid).unwrap()[page as usize];
                // the simulated write-back leaves the disk copy current
                slot.dirty = false;
                slot.frame = None;
                self.frames.free_frame(frame as u32).unwrap();
                self.resident[frame] = None;
                debug!("evicted pid {} page {} from frame {}", pid, page, frame);
                return Ok(frame as u32);
            }
        }
        // both sweeps came up empty, so nothing was resident and
        // nothing was cleared
        Err(VmError::NoVictim)
    }

    fn restore_referenced(&mut self, cleared: &[(u32, u32)]) {
        for &(pid, page) in cleared {
            if let Some(table) = self.tables.get_mut(&pid) {
                table[page as usize].referenced = true;
            }
        }
    }

    /// Hands a raw disk block to the process, outside its page table.
    pub fn alloc_block(&mut self, pid: u32) -> Result<u32, VmError> {
        self.blocks.alloc_block(pid).map_err(|_| VmError::OutOfMemory)
    }

    /// Frees a raw block owned by the process. Blocks backing a mapped
    /// page are reclaimed through the page table only.
    pub fn free_block(&mut self, pid: u32, block: u32) -> Result<(), VmError> {
        if self.blocks.owner_of(block) != Some(pid) {
            return Err(VmError::NoSuchBlock);
        }
        let backing = self
            .tables
            .get(&pid)
            .map_or(false, |table| table.iter().any(|e| e.block == Some(block)));
        if backing {
            return Err(VmError::BlockInUse);
        }
        self.blocks.free_block(block).unwrap();
        Ok(())
    }

    pub fn table(&self, pid: u32) -> Option<&[PageTableEntry]> {
        self.tables.get(&pid).map(|t| t.as_slice())
    }

    pub fn tables(&self) -> &BTreeMap<u32, Vec<PageTableEntry>> {
        &self.tables
    }

    pub fn mapped_pages(&self, pid: u32) -> u32 {
        self.tables.get(&pid).map_or(0, |t| t.len() as u32)
    }

    pub fn frame_owners(&self) -> &[Option<u32>] {
        self.frames.owners()
    }

    pub fn block_owners(&self) -> &[Option<u32>] {
        self.blocks.owners()
    }

    pub fn mem_stat(&self) -> MemoryStat {
        self.frames.stat()
    }

    pub fn disk_stat(&self) -> DiskStat {
        self.blocks.stat()
    }

    pub fn swap_stat(&self) -> SwapStat {
        let disk = self.blocks.stat();
        let swapped = self
            .tables
            .values()
            .flat_map(|t| t.iter())
            .filter(|e| !e.is_resident())
            .count();
        SwapStat {
            total_blocks: disk.total,
            used_blocks: disk.used,
            free_blocks: disk.free,
            swapped_pages: swapped,
        }
    }

    /// Rebuilds a manager from snapshot parts, verifying that the page
    /// tables and the pool owner lists tell the same story.
    pub fn restore(
        tables: BTreeMap<u32, Vec<PageTableEntry>>,
        frame_owners: &[Option<u32>],
        block_owners: &[Option<u32>],
    ) -> Result<Self, VmError> {
        if frame_owners.len() != FRAMES || block_owners.len() != BLOCKS {
            return Err(VmError::Inconsistent);
        }
        let mut frames = FramePool::init();
        let mut blocks = BlockPool::init();
        for (id, owner) in frame_owners.iter().enumerate() {
            if let Some(pid) = owner {
                frames
                    .claim(id as u32, *pid)
                    .map_err(|_| VmError::Inconsistent)?;
            }
        }
        for (id, owner) in block_owners.iter().enumerate() {
            if let Some(pid) = owner {
                blocks
                    .claim(id as u32, *pid)
                    .map_err(|_| VmError::Inconsistent)?;
            }
        }

        let mut resident = vec![None; FRAMES];
        let mut block_seen = vec![false; BLOCKS];
        for (&pid, table) in &tables {
            for (page, entry) in table.iter().enumerate() {
                if entry.frame.is_none() && entry.block.is_none() {
                    return Err(VmError::Inconsistent);
                }
                if let Some(frame) = entry.frame {
                    if frames.owner_of(frame) != Some(pid) {
                        return Err(VmError::Inconsistent);
                    }
                    if resident[frame as usize].is_some() {
                        return Err(VmError::Inconsistent);
                    }
                    resident[frame as usize] = Some((pid, page as u32));
                }
                if let Some(block) = entry.block {
                    if blocks.owner_of(block) != Some(pid) {
                        return Err(VmError::Inconsistent);
                    }
                    if block_seen[block as usize] {
                        return Err(VmError::Inconsistent);
                    }
                    block_seen[block as usize] = true;
                }
            }
        }
        // every owned frame must hold exactly one page
        for frame in 0..FRAMES {
            if frames.owner_of(frame as u32).is_some() != resident[frame].is_some() {
                return Err(VmError::Inconsistent);
            }
        }
        Ok(Self {
            frames,
            blocks,
            tables,
            resident,
        })
    }
}
