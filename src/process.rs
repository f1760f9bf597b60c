use std::collections::BTreeMap;

use vm::PageTableEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// The kernel's record of one simulated process. Lower priority value
/// means higher priority. The page table itself lives in the virtual
/// memory manager, keyed by pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcb {
    pub pid: u32,
    pub name: String,
    pub state: ProcessState,
    pub priority: i64,
    pub code_pages: u32,
    pub data_pages: u32,
    pub remaining_ticks: u32,
    /// Clock value at which a pending swap-in completes, while Blocked.
    pub wake_at: Option<u64>,
}

impl Pcb {
    pub fn new(pid: u32, name: &str, priority: i64, code_pages: u32, data_pages: u32) -> Self {
        Self {
            pid,
            name: String::from(name),
            state: ProcessState::New,
            priority,
            code_pages,
            data_pages,
            remaining_ticks: 0,
            wake_at: None,
        }
    }

    pub fn total_pages(&self) -> u32 {
        self.code_pages + self.data_pages
    }
}

/// One-line view of a process, as returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcSummary {
    pub pid: u32,
    pub name: String,
    pub state: ProcessState,
    pub priority: i64,
    pub pages: u32,
}

/// Full view of a process, page table included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pcb: Pcb,
    pub page_table: Vec<PageTableEntry>,
    pub resident_pages: u32,
    pub swapped_pages: u32,
}

/// PCB storage with monotonic pid assignment. A `BTreeMap` keeps every
/// listing in ascending pid order for free.
#[derive(Debug)]
pub struct ProcessTable {
    procs: BTreeMap<u32, Pcb>,
    next_pid: u32,
}

impl ProcessTable {
    pub fn init() -> Self {
        Self {
            procs: BTreeMap::new(),
            next_pid: 1,
        }
    }

    /// Reserves the next pid. Pids are never reused, even when creation
    /// fails afterwards.
    pub fn allocate_pid(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn insert(&mut self, pcb: Pcb) {
        self.procs.insert(pcb.pid, pcb);
    }

    pub fn get(&self, pid: u32) -> Option<&Pcb> {
        self.procs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Pcb> {
        self.procs.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: u32) -> Option<Pcb> {
        self.procs.remove(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.procs.values()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn summaries(&self) -> Vec<ProcSummary> {
        self.procs
            .values()
            .map(|pcb| ProcSummary {
                pid: pcb.pid,
                name: pcb.name.clone(),
                state: pcb.state,
                priority: pcb.priority,
                pages: pcb.total_pages(),
            })
            .collect()
    }

    pub fn next_pid(&self) -> u32 {
        self.next_pid
    }

    pub(crate) fn restore(procs: BTreeMap<u32, Pcb>, next_pid: u32) -> Self {
        Self { procs, next_pid }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pids_are_monotonic() {
        let mut table = ProcessTable::init();
        assert_eq!(table.allocate_pid(), 1);
        assert_eq!(table.allocate_pid(), 2);
        // a pid burned by a failed create is not handed out again
        assert_eq!(table.allocate_pid(), 3);
    }

    #[test]
    fn test_summaries_sorted_by_pid() {
        let mut table = ProcessTable::init();
        for name in ["a", "b", "c"] {
            let pid = table.allocate_pid();
            table.insert(Pcb::new(pid, name, 5, 1, 0));
        }
        table.remove(2).unwrap();
        let pid = table.allocate_pid();
        table.insert(Pcb::new(pid, "d", 5, 1, 0));
        let pids: Vec<u32> = table.summaries().iter().map(|s| s.pid).collect();
        assert_eq!(pids, vec![1, 3, 4]);
    }

    #[test]
    fn test_remove_twice() {
        let mut table = ProcessTable::init();
        let pid = table.allocate_pid();
        table.insert(Pcb::new(pid, "a", 5, 1, 1));
        assert!(table.remove(pid).is_some());
        assert!(table.remove(pid).is_none());
    }
}
