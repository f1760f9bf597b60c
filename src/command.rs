use disk::DiskStat;
use memory::MemoryStat;
use vm::{AccessOutcome, SwapStat};

use crate::process::{ProcInfo, ProcSummary};

/// Everything the outside world can ask of the kernel. The CLI layer
/// owns the textual syntax; it only ever hands the core one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ProcCreate {
        name: String,
        priority: i64,
        code_pages: u32,
        data_pages: u32,
    },
    ProcKill {
        pid: u32,
    },
    ProcList,
    ProcInfo {
        pid: u32,
    },
    ProcSetPriority {
        pid: u32,
        priority: i64,
    },
    MemMap {
        pid: u32,
        count: u32,
    },
    MemUnmap {
        pid: u32,
        count: u32,
    },
    MemRead {
        pid: u32,
        addr: u64,
    },
    MemWrite {
        pid: u32,
        addr: u64,
    },
    MemStat,
    VmPageFault {
        pid: u32,
        addr: u64,
    },
    VmSwapStat,
    DiskAlloc {
        pid: u32,
    },
    DiskFree {
        pid: u32,
        block: u32,
    },
    DiskStat,
    SysSave,
    SysLoad {
        bytes: Vec<u8>,
    },
    SysReset,
    ClockTick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Pid(u32),
    Procs(Vec<ProcSummary>),
    Proc(Box<ProcInfo>),
    Access(AccessOutcome),
    Mem(MemoryStat),
    Swap(SwapStat),
    Disk(DiskStat),
    Block(u32),
    Snapshot(Vec<u8>),
    Clock(u64),
    Done,
}
