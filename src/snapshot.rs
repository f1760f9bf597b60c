//! Binary save/load of the whole kernel. Fixed-width big-endian fields;
//! options use an all-ones sentinel. A snapshot is rebuilt into a fresh
//! kernel and cross-checked in full before it replaces anything, so a
//! malformed snapshot is rejected wholesale.

use std::collections::BTreeMap;

use vm::{PageTableEntry, Vmm};

use crate::kernel::Kernel;
use crate::process::{Pcb, ProcessState, ProcessTable};
use crate::scheduler::Scheduler;
use crate::{KernelError, PRIORITY_MAX, PRIORITY_MIN, TIME_SLICE};

const MAGIC: u32 = 0x4B53_494D; // "KSIM"
const VERSION: u16 = 1;

const NONE_U32: u32 = u32::MAX;
const NONE_U64: u64 = u64::MAX;

const DIRTY: u8 = 1 << 0;
const REFERENCED: u8 = 1 << 1;

fn state_to_byte(state: ProcessState) -> u8 {
    match state {
        ProcessState::New => 0,
        ProcessState::Ready => 1,
        ProcessState::Running => 2,
        ProcessState::Blocked => 3,
        ProcessState::Terminated => 4,
    }
}

// New and Terminated are transient within a single command and never
// appear in a saved kernel.
fn state_from_byte(byte: u8) -> Result<ProcessState, KernelError> {
    match byte {
        1 => Ok(ProcessState::Ready),
        2 => Ok(ProcessState::Running),
        3 => Ok(ProcessState::Blocked),
        _ => Err(KernelError::CorruptState),
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_opt_u32(buf: &mut Vec<u8>, v: Option<u32>) {
    put_u32(buf, v.unwrap_or(NONE_U32));
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

pub(crate) fn encode<const FRAMES: usize, const BLOCKS: usize>(
    kernel: &Kernel<FRAMES, BLOCKS>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    put_u32(&mut buf, MAGIC);
    buf.extend_from_slice(&VERSION.to_be_bytes());
    put_u32(&mut buf, FRAMES as u32);
    put_u32(&mut buf, BLOCKS as u32);
    put_u64(&mut buf, kernel.sched.clock());
    put_u32(&mut buf, kernel.procs.next_pid());
    put_opt_u32(&mut buf, kernel.sched.running());
    put_u32(&mut buf, kernel.sched.ready().len() as u32);
    for &pid in kernel.sched.ready() {
        put_u32(&mut buf, pid);
    }

    put_u32(&mut buf, kernel.procs.len() as u32);
    for pcb in kernel.procs.iter() {
        put_u32(&mut buf, pcb.pid);
        put_str(&mut buf, &pcb.name);
        buf.push(state_to_byte(pcb.state));
        buf.extend_from_slice(&pcb.priority.to_be_bytes());
        put_u32(&mut buf, pcb.code_pages);
        put_u32(&mut buf, pcb.data_pages);
        put_u32(&mut buf, pcb.remaining_ticks);
        put_u64(&mut buf, pcb.wake_at.unwrap_or(NONE_U64));

        let table = kernel.vmm.table(pcb.pid).unwrap_or(&[]);
        put_u32(&mut buf, table.len() as u32);
        for entry in table {
            put_opt_u32(&mut buf, entry.frame);
            put_opt_u32(&mut buf, entry.block);
            let mut flags = 0u8;
            if entry.dirty {
                flags |= DIRTY;
            }
            if entry.referenced {
                flags |= REFERENCED;
            }
            buf.push(flags);
        }
    }

    for owner in kernel.vmm.frame_owners() {
        put_opt_u32(&mut buf, *owner);
    }
    for owner in kernel.vmm.block_owners() {
        put_opt_u32(&mut buf, *owner);
    }
    buf
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], KernelError> {
        let end = self.pos.checked_add(n).ok_or(KernelError::CorruptState)?;
        if end > self.buf.len() {
            return Err(KernelError::CorruptState);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, KernelError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, KernelError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, KernelError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, KernelError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, KernelError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn opt_u32(&mut self) -> Result<Option<u32>, KernelError> {
        let v = self.u32()?;
        Ok(if v == NONE_U32 { None } else { Some(v) })
    }

    fn opt_u64(&mut self) -> Result<Option<u64>, KernelError> {
        let v = self.u64()?;
        Ok(if v == NONE_U64 { None } else { Some(v) })
    }

    fn string(&mut self) -> Result<String, KernelError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| KernelError::CorruptState)
    }

    fn done(&self) -> bool {
        self.pos == self.buf.len()
    }
}

pub(crate) fn decode<const FRAMES: usize, const BLOCKS: usize>(
    bytes: &[u8],
) -> Result<Kernel<FRAMES, BLOCKS>, KernelError> {
    let mut r = Reader::new(bytes);
    if r.u32()? != MAGIC || r.u16()? != VERSION {
        return Err(KernelError::CorruptState);
    }
    if r.u32()? != FRAMES as u32 || r.u32()? != BLOCKS as u32 {
        return Err(KernelError::CorruptState);
    }
    let clock = r.u64()?;
    let next_pid = r.u32()?;
    let running = r.opt_u32()?;
    let ready_len = r.u32()? as usize;
    let mut ready = Vec::with_capacity(ready_len.min(1024));
    for _ in 0..ready_len {
        ready.push(r.u32()?);
    }

    let proc_count = r.u32()? as usize;
    let mut procs = BTreeMap::new();
    let mut tables = BTreeMap::new();
    for _ in 0..proc_count {
        let pid = r.u32()?;
        let name = r.string()?;
        let state = state_from_byte(r.u8()?)?;
        let priority = r.i64()?;
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(KernelError::CorruptState);
        }
        let code_pages = r.u32()?;
        let data_pages = r.u32()?;
        let remaining_ticks = r.u32()?;
        let wake_at = r.opt_u64()?;
        if (state == ProcessState::Blocked) != wake_at.is_some() {
            return Err(KernelError::CorruptState);
        }
        if state == ProcessState::Running && !(1..=TIME_SLICE).contains(&remaining_ticks) {
            return Err(KernelError::CorruptState);
        }
        if pid == 0 || pid >= next_pid {
            return Err(KernelError::CorruptState);
        }

        let total_pages = code_pages
            .checked_add(data_pages)
            .ok_or(KernelError::CorruptState)?;
        if total_pages == 0 {
            return Err(KernelError::CorruptState);
        }
        let table_len = r.u32()?;
        if table_len != total_pages {
            return Err(KernelError::CorruptState);
        }
        let mut table = Vec::with_capacity(table_len as usize);
        for _ in 0..table_len {
            let frame = r.opt_u32()?;
            let block = r.opt_u32()?;
            let flags = r.u8()?;
            if flags & !(DIRTY | REFERENCED) != 0 {
                return Err(KernelError::CorruptState);
            }
            table.push(PageTableEntry {
                frame,
                block,
                dirty: flags & DIRTY != 0,
                referenced: flags & REFERENCED != 0,
            });
        }

        let pcb = Pcb {
            pid,
            name,
            state,
            priority,
            code_pages,
            data_pages,
            remaining_ticks,
            wake_at,
        };
        if procs.insert(pid, pcb).is_some() {
            return Err(KernelError::CorruptState);
        }
        tables.insert(pid, table);
    }

    let mut frame_owners = Vec::with_capacity(FRAMES);
    for _ in 0..FRAMES {
        frame_owners.push(r.opt_u32()?);
    }
    let mut block_owners = Vec::with_capacity(BLOCKS);
    for _ in 0..BLOCKS {
        block_owners.push(r.opt_u32()?);
    }
    if !r.done() {
        return Err(KernelError::CorruptState);
    }

    // every owned frame or block must belong to a live process
    for owner in frame_owners.iter().chain(block_owners.iter()) {
        if let Some(pid) = owner {
            if !procs.contains_key(pid) {
                return Err(KernelError::CorruptState);
            }
        }
    }

    // scheduler queues must agree with the PCB states
    if let Some(pid) = running {
        match procs.get(&pid) {
            Some(pcb) if pcb.state == ProcessState::Running => {}
            _ => return Err(KernelError::CorruptState),
        }
    }
    let mut seen = Vec::new();
    for &pid in &ready {
        match procs.get(&pid) {
            Some(pcb) if pcb.state == ProcessState::Ready => {}
            _ => return Err(KernelError::CorruptState),
        }
        if seen.contains(&pid) {
            return Err(KernelError::CorruptState);
        }
        seen.push(pid);
    }
    let running_count = procs
        .values()
        .filter(|pcb| pcb.state == ProcessState::Running)
        .count();
    if running_count != running.iter().count() {
        return Err(KernelError::CorruptState);
    }
    let ready_count = procs
        .values()
        .filter(|pcb| pcb.state == ProcessState::Ready)
        .count();
    if ready_count != ready.len() {
        return Err(KernelError::CorruptState);
    }

    let vmm = Vmm::<FRAMES, BLOCKS>::restore(tables, &frame_owners, &block_owners)
        .map_err(|_| KernelError::CorruptState)?;

    Ok(Kernel {
        procs: ProcessTable::restore(procs, next_pid),
        sched: Scheduler::restore(clock, running, ready),
        vmm,
    })
}
