use disk::DiskError;
use memory::MemoryError;
use vm::VmError;

pub mod command;
pub mod kernel;
pub mod process;
pub mod scheduler;
mod snapshot;

pub use command::{Command, Reply};
pub use kernel::Kernel;
pub use process::{Pcb, ProcInfo, ProcSummary, ProcessState};
pub use vm::{AccessKind, AccessOutcome, PageTableEntry, SwapStat, PAGE_SIZE};

pub const TIME_SLICE: u32 = 3;
pub const PRIORITY_MIN: i64 = 0;
pub const PRIORITY_MAX: i64 = 10;
pub const MAX_PROCESS_PAGES: u32 = 64;

/// Every command resolves to a value or one of these kinds; a failed
/// command never leaves partial mutation behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    NotFound,
    OutOfMemory,
    InvalidArgument,
    InvalidAddress,
    NoVictim,
    CorruptState,
}

impl From<VmError> for KernelError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::NoSuchProcess | VmError::NoSuchBlock => KernelError::NotFound,
            VmError::BlockInUse => KernelError::InvalidArgument,
            VmError::OutOfMemory => KernelError::OutOfMemory,
            VmError::InvalidAddress => KernelError::InvalidAddress,
            VmError::NoVictim => KernelError::NoVictim,
            VmError::Inconsistent => KernelError::CorruptState,
        }
    }
}

impl From<MemoryError> for KernelError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::OutOfFrames => KernelError::OutOfMemory,
            MemoryError::NotAllocated => KernelError::NotFound,
            MemoryError::AlreadyAllocated => KernelError::CorruptState,
        }
    }
}

impl From<DiskError> for KernelError {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::OutOfBlocks => KernelError::OutOfMemory,
            DiskError::NotAllocated => KernelError::NotFound,
            DiskError::AlreadyAllocated => KernelError::CorruptState,
        }
    }
}
