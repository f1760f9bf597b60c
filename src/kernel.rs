use disk::DiskStat;
use log::info;
use memory::MemoryStat;
use vm::{AccessKind, AccessOutcome, SwapStat, Vmm};

use crate::command::{Command, Reply};
use crate::process::{Pcb, ProcInfo, ProcSummary, ProcessState, ProcessTable};
use crate::scheduler::Scheduler;
use crate::snapshot;
use crate::{KernelError, MAX_PROCESS_PAGES, PRIORITY_MAX, PRIORITY_MIN};

/// The whole simulated machine: process table, scheduler and virtual
/// memory, with pool sizes fixed at the type level. One value per
/// simulator instance; no ambient state anywhere, so independent
/// kernels never interfere.
#[derive(Debug)]
pub struct Kernel<const FRAMES: usize, const BLOCKS: usize> {
    pub(crate) procs: ProcessTable,
    pub(crate) sched: Scheduler,
    pub(crate) vmm: Vmm<FRAMES, BLOCKS>,
}

impl<const FRAMES: usize, const BLOCKS: usize> Kernel<FRAMES, BLOCKS> {
    pub fn init() -> Self {
        Self {
            procs: ProcessTable::init(),
            sched: Scheduler::init(),
            vmm: Vmm::init(),
        }
    }

    /// Runs one command to completion. Exhaustive by construction: a
    /// new command variant will not compile until it is handled here.
    pub fn execute(&mut self, cmd: Command) -> Result<Reply, KernelError> {
        match cmd {
            Command::ProcCreate {
                name,
                priority,
                code_pages,
                data_pages,
            } => self
                .create_process(&name, priority, code_pages, data_pages)
                .map(Reply::Pid),
            Command::ProcKill { pid } => self.kill(pid).map(|()| Reply::Done),
            Command::ProcList => Ok(Reply::Procs(self.list())),
            Command::ProcInfo { pid } => self.info(pid).map(|info| Reply::Proc(Box::new(info))),
            Command::ProcSetPriority { pid, priority } => {
                self.set_priority(pid, priority).map(|()| Reply::Done)
            }
            Command::MemMap { pid, count } => self.mem_map(pid, count).map(|()| Reply::Done),
            Command::MemUnmap { pid, count } => self.mem_unmap(pid, count).map(|()| Reply::Done),
            Command::MemRead { pid, addr } => {
                self.access(pid, addr, AccessKind::Read).map(Reply::Access)
            }
            Command::MemWrite { pid, addr } => {
                self.access(pid, addr, AccessKind::Write).map(Reply::Access)
            }
            Command::MemStat => Ok(Reply::Mem(self.mem_stat())),
            Command::VmPageFault { pid, addr } => {
                self.access(pid, addr, AccessKind::Read).map(Reply::Access)
            }
            Command::VmSwapStat => Ok(Reply::Swap(self.swap_stat())),
            Command::DiskAlloc { pid } => self.disk_alloc(pid).map(Reply::Block),
            Command::DiskFree { pid, block } => self.disk_free(pid, block).map(|()| Reply::Done),
            Command::DiskStat => Ok(Reply::Disk(self.disk_stat())),
            Command::SysSave => Ok(Reply::Snapshot(self.save_state())),
            Command::SysLoad { bytes } => self.load_state(&bytes).map(|()| Reply::Done),
            Command::SysReset => {
                self.reset();
                Ok(Reply::Done)
            }
            Command::ClockTick => Ok(Reply::Clock(self.tick())),
        }
    }

    /// Creates a process and maps its full resident set. Nothing is
    /// recorded if the pages cannot all be placed; only the pid counter
    /// advances.
    pub fn create_process(
        &mut self,
        name: &str,
        priority: i64,
        code_pages: u32,
        data_pages: u32,
    ) -> Result<u32, KernelError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(KernelError::InvalidArgument);
        }
        let total = code_pages
            .checked_add(data_pages)
            .ok_or(KernelError::InvalidArgument)?;
        if total == 0 || total > MAX_PROCESS_PAGES {
            return Err(KernelError::InvalidArgument);
        }
        let pid = self.procs.allocate_pid();
        self.vmm.map_pages(pid, total)?;
        let mut pcb = Pcb::new(pid, name, priority, code_pages, data_pages);
        pcb.state = ProcessState::Ready;
        self.procs.insert(pcb);
        self.sched.enqueue(pid);
        info!("pid {}: created ({} pages)", pid, total);
        Ok(pid)
    }

    /// Terminates a process and reclaims every frame and block it owns
    /// in one step.
    pub fn kill(&mut self, pid: u32) -> Result<(), KernelError> {
        let pcb = self.procs.get_mut(pid).ok_or(KernelError::NotFound)?;
        pcb.state = ProcessState::Terminated;
        self.vmm.unmap_all(pid);
        self.sched.remove(pid);
        self.procs.remove(pid);
        info!("pid {}: killed", pid);
        Ok(())
    }

    pub fn set_priority(&mut self, pid: u32, priority: i64) -> Result<(), KernelError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(KernelError::InvalidArgument);
        }
        let pcb = self.procs.get_mut(pid).ok_or(KernelError::NotFound)?;
        pcb.priority = priority;
        self.sched.resort(&self.procs);
        Ok(())
    }

    pub fn list(&self) -> Vec<ProcSummary> {
        self.procs.summaries()
    }

    pub fn info(&self, pid: u32) -> Result<ProcInfo, KernelError> {
        let pcb = self.procs.get(pid).ok_or(KernelError::NotFound)?;
        let page_table = self.vmm.table(pid).unwrap_or(&[]).to_vec();
        let resident = page_table.iter().filter(|e| e.is_resident()).count() as u32;
        let swapped = page_table.len() as u32 - resident;
        Ok(ProcInfo {
            pcb: pcb.clone(),
            page_table,
            resident_pages: resident,
            swapped_pages: swapped,
        })
    }

    /// Grows the process's data segment by `count` pages.
    pub fn mem_map(&mut self, pid: u32, count: u32) -> Result<(), KernelError> {
        let pcb = self.procs.get(pid).ok_or(KernelError::NotFound)?;
        let grown = pcb
            .total_pages()
            .checked_add(count)
            .ok_or(KernelError::InvalidArgument)?;
        if count == 0 || grown > MAX_PROCESS_PAGES {
            return Err(KernelError::InvalidArgument);
        }
        self.vmm.map_pages(pid, count)?;
        self.procs.get_mut(pid).unwrap().data_pages += count;
        Ok(())
    }

    /// Shrinks the data segment; code pages cannot be unmapped.
    pub fn mem_unmap(&mut self, pid: u32, count: u32) -> Result<(), KernelError> {
        let pcb = self.procs.get(pid).ok_or(KernelError::NotFound)?;
        if count == 0 || count > pcb.data_pages {
            return Err(KernelError::InvalidArgument);
        }
        self.vmm.unmap_pages(pid, count)?;
        self.procs.get_mut(pid).unwrap().data_pages -= count;
        Ok(())
    }

    /// Touches one simulated address. A fault taken by the running
    /// process parks it Blocked until the next tick, when its swap-in
    /// is considered complete.
    pub fn access(
        &mut self,
        pid: u32,
        addr: u64,
        kind: AccessKind,
    ) -> Result<AccessOutcome, KernelError> {
        if self.procs.get(pid).is_none() {
            return Err(KernelError::NotFound);
        }
        let outcome = self.vmm.access(pid, addr, kind)?;
        if matches!(outcome, AccessOutcome::Fault { .. }) && self.sched.running() == Some(pid) {
            let wake_at = self.sched.clock() + 1;
            let pcb = self.procs.get_mut(pid).unwrap();
            pcb.state = ProcessState::Blocked;
            pcb.wake_at = Some(wake_at);
            self.sched.clear_running();
            info!("pid {}: blocked on swap-in", pid);
        }
        Ok(outcome)
    }

    pub fn mem_stat(&self) -> MemoryStat {
        self.vmm.mem_stat()
    }

    pub fn swap_stat(&self) -> SwapStat {
        self.vmm.swap_stat()
    }

    pub fn disk_stat(&self) -> DiskStat {
        self.vmm.disk_stat()
    }

    pub fn disk_alloc(&mut self, pid: u32) -> Result<u32, KernelError> {
        if self.procs.get(pid).is_none() {
            return Err(KernelError::NotFound);
        }
        Ok(self.vmm.alloc_block(pid)?)
    }

    pub fn disk_free(&mut self, pid: u32, block: u32) -> Result<(), KernelError> {
        if self.procs.get(pid).is_none() {
            return Err(KernelError::NotFound);
        }
        Ok(self.vmm.free_block(pid, block)?)
    }

    /// Advances the simulation one tick.
    pub fn tick(&mut self) -> u64 {
        self.sched.tick(&mut self.procs)
    }

    pub fn clock(&self) -> u64 {
        self.sched.clock()
    }

    pub fn running(&self) -> Option<u32> {
        self.sched.running()
    }

    /// Serializes the whole observable system.
    pub fn save_state(&self) -> Vec<u8> {
        snapshot::encode(self)
    }

    /// Replaces the whole system with the snapshot, or rejects it
    /// untouched.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), KernelError> {
        let restored = snapshot::decode::<FRAMES, BLOCKS>(bytes)?;
        *self = restored;
        info!("state loaded, clock at {}", self.clock());
        Ok(())
    }

    /// Back to the empty initial state, clock included.
    pub fn reset(&mut self) {
        *self = Self::init();
        info!("system reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_bad_arguments() {
        let mut kernel = Kernel::<4, 4>::init();
        assert_eq!(
            kernel.create_process("p", -1, 1, 1),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            kernel.create_process("p", 11, 1, 1),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            kernel.create_process("p", 5, 0, 0),
            Err(KernelError::InvalidArgument)
        );
        assert!(kernel.list().is_empty());
    }

    #[test]
    fn test_failed_create_leaves_no_pcb() {
        let mut kernel = Kernel::<2, 0>::init();
        kernel.create_process("a", 5, 2, 0).unwrap();
        // no frames left and nowhere to swap
        assert_eq!(
            kernel.create_process("b", 5, 1, 0),
            Err(KernelError::OutOfMemory)
        );
        assert_eq!(kernel.list().len(), 1);
        assert_eq!(kernel.mem_stat().used, 2);
    }

    #[test]
    fn test_kill_is_not_idempotent() {
        let mut kernel = Kernel::<4, 4>::init();
        let pid = kernel.create_process("a", 5, 1, 1).unwrap();
        kernel.kill(pid).unwrap();
        assert_eq!(kernel.kill(pid), Err(KernelError::NotFound));
        assert_eq!(kernel.mem_stat().used, 0);
        assert_eq!(kernel.disk_stat().used, 0);
    }

    #[test]
    fn test_set_priority_bounds() {
        let mut kernel = Kernel::<4, 4>::init();
        let pid = kernel.create_process("a", 5, 1, 0).unwrap();
        assert_eq!(
            kernel.set_priority(pid, -1),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(kernel.info(pid).unwrap().pcb.priority, 5);
        kernel.set_priority(pid, 0).unwrap();
        assert_eq!(kernel.info(pid).unwrap().pcb.priority, 0);
    }

    #[test]
    fn test_mem_map_grows_data_segment() {
        let mut kernel = Kernel::<8, 4>::init();
        let pid = kernel.create_process("a", 5, 1, 1).unwrap();
        kernel.mem_map(pid, 2).unwrap();
        let info = kernel.info(pid).unwrap();
        assert_eq!(info.pcb.data_pages, 3);
        assert_eq!(info.page_table.len(), 4);
        kernel.mem_unmap(pid, 3).unwrap();
        assert_eq!(
            kernel.mem_unmap(pid, 1),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(kernel.info(pid).unwrap().page_table.len(), 1);
    }

    #[test]
    fn test_running_process_blocks_on_fault() {
        let mut kernel = Kernel::<2, 2>::init();
        let pid = kernel.create_process("a", 5, 2, 0).unwrap();
        kernel.tick();
        assert_eq!(kernel.running(), Some(pid));
        // push page 0 out, then touch it from the running process
        kernel.vmm.evict_one().unwrap();
        let outcome = kernel.access(pid, 0, AccessKind::Read).unwrap();
        assert!(matches!(outcome, AccessOutcome::Fault { .. }));
        assert_eq!(
            kernel.info(pid).unwrap().pcb.state,
            ProcessState::Blocked
        );
        assert_eq!(kernel.running(), None);
        kernel.tick();
        assert_eq!(kernel.running(), Some(pid));
    }

    #[test]
    fn test_disk_alloc_requires_process() {
        let mut kernel = Kernel::<4, 4>::init();
        assert_eq!(kernel.disk_alloc(7), Err(KernelError::NotFound));
        let pid = kernel.create_process("a", 5, 1, 0).unwrap();
        let block = kernel.disk_alloc(pid).unwrap();
        kernel.disk_free(pid, block).unwrap();
        assert_eq!(kernel.disk_free(pid, block), Err(KernelError::NotFound));
    }

    #[test]
    fn test_execute_dispatch() {
        let mut kernel = Kernel::<4, 4>::init();
        let reply = kernel
            .execute(Command::ProcCreate {
                name: String::from("a"),
                priority: 5,
                code_pages: 1,
                data_pages: 1,
            })
            .unwrap();
        let Reply::Pid(pid) = reply else {
            panic!("expected pid reply");
        };
        assert_eq!(kernel.execute(Command::ClockTick), Ok(Reply::Clock(1)));
        let reply = kernel.execute(Command::MemStat).unwrap();
        let Reply::Mem(stat) = reply else {
            panic!("expected mem stat");
        };
        assert_eq!(stat.used, 2);
        kernel.execute(Command::ProcKill { pid }).unwrap();
        assert_eq!(
            kernel.execute(Command::ProcKill { pid }),
            Err(KernelError::NotFound)
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut kernel = Kernel::<4, 4>::init();
        kernel.create_process("a", 5, 2, 0).unwrap();
        kernel.tick();
        kernel.reset();
        assert!(kernel.list().is_empty());
        assert_eq!(kernel.clock(), 0);
        assert_eq!(kernel.mem_stat().used, 0);
        // pid numbering starts over after a reset
        assert_eq!(kernel.create_process("b", 5, 1, 0), Ok(1));
    }
}
