use log::{debug, info};

use crate::process::{ProcessState, ProcessTable};
use crate::TIME_SLICE;

/// Round-robin scheduler with priorities and a global tick counter. The
/// ready queue is kept in priority order by a stable sort, so processes
/// of equal priority run in the order they became ready.
#[derive(Debug)]
pub struct Scheduler {
    clock: u64,
    running: Option<u32>,
    ready: Vec<u32>,
}

impl Scheduler {
    pub fn init() -> Self {
        Self {
            clock: 0,
            running: None,
            ready: Vec::new(),
        }
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn running(&self) -> Option<u32> {
        self.running
    }

    pub fn ready(&self) -> &[u32] {
        &self.ready
    }

    pub fn enqueue(&mut self, pid: u32) {
        self.ready.push(pid);
    }

    /// Forgets the process entirely; used by kill.
    pub fn remove(&mut self, pid: u32) {
        if self.running == Some(pid) {
            self.running = None;
        }
        self.ready.retain(|&p| p != pid);
    }

    /// Parks the running process; it re-enters the ready queue via the
    /// tick that completes its swap-in.
    pub fn clear_running(&mut self) {
        self.running = None;
    }

    /// Restores priority order after a priority change. The sort is
    /// stable, so queue order within a priority level is untouched.
    pub fn resort(&mut self, procs: &ProcessTable) {
        self.ready
            .sort_by_key(|&pid| procs.get(pid).map_or(i64::MAX, |pcb| pcb.priority));
    }

    /// Advances the clock one unit: wakes processes whose swap-in is
    /// due, charges the running process one tick and preempts it when
    /// its slice runs out, then dispatches if the CPU is idle.
    pub fn tick(&mut self, procs: &mut ProcessTable) -> u64 {
        self.clock += 1;
        debug!("tick -> {}", self.clock);

        let due: Vec<u32> = procs
            .iter()
            .filter(|pcb| {
                pcb.state == ProcessState::Blocked
                    && pcb.wake_at.map_or(false, |at| at <= self.clock)
            })
            .map(|pcb| pcb.pid)
            .collect();
        for pid in due {
            let pcb = procs.get_mut(pid).unwrap();
            pcb.state = ProcessState::Ready;
            pcb.wake_at = None;
            self.enqueue(pid);
            info!("pid {}: swap-in complete, ready", pid);
        }

        if let Some(pid) = self.running {
            let pcb = procs.get_mut(pid).unwrap();
            pcb.remaining_ticks -= 1;
            if pcb.remaining_ticks == 0 {
                pcb.state = ProcessState::Ready;
                self.running = None;
                self.enqueue(pid);
                info!("pid {}: time slice expired", pid);
            }
        }

        if self.running.is_none() {
            self.dispatch(procs);
        }
        self.clock
    }

    fn dispatch(&mut self, procs: &mut ProcessTable) {
        let mut best: Option<(usize, i64)> = None;
        for (ix, &pid) in self.ready.iter().enumerate() {
            let priority = match procs.get(pid) {
                Some(pcb) => pcb.priority,
                None => continue,
            };
            // strictly-less keeps the earliest entry among equals
            if best.map_or(true, |(_, p)| priority < p) {
                best = Some((ix, priority));
            }
        }
        let Some((ix, _)) = best else {
            return;
        };
        let pid = self.ready.remove(ix);
        let pcb = procs.get_mut(pid).unwrap();
        pcb.state = ProcessState::Running;
        pcb.remaining_ticks = TIME_SLICE;
        self.running = Some(pid);
        info!("pid {}: dispatched", pid);
    }

    pub(crate) fn restore(clock: u64, running: Option<u32>, ready: Vec<u32>) -> Self {
        Self {
            clock,
            running,
            ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Pcb;

    fn ready_proc(procs: &mut ProcessTable, sched: &mut Scheduler, priority: i64) -> u32 {
        let pid = procs.allocate_pid();
        let mut pcb = Pcb::new(pid, "p", priority, 1, 0);
        pcb.state = ProcessState::Ready;
        procs.insert(pcb);
        sched.enqueue(pid);
        pid
    }

    #[test]
    fn test_single_process_keeps_cpu() {
        let mut procs = ProcessTable::init();
        let mut sched = Scheduler::init();
        let pid = ready_proc(&mut procs, &mut sched, 5);

        let mut observed = Vec::new();
        for _ in 0..5 {
            sched.tick(&mut procs);
            assert_eq!(sched.running(), Some(pid));
            assert_eq!(procs.get(pid).unwrap().state, ProcessState::Running);
            observed.push(procs.get(pid).unwrap().remaining_ticks);
        }
        // slice of 3: full slice on dispatch, then counts down and
        // starts over
        assert_eq!(observed, vec![3, 2, 1, 3, 2]);
    }

    #[test]
    fn test_priority_wins() {
        let mut procs = ProcessTable::init();
        let mut sched = Scheduler::init();
        let low = ready_proc(&mut procs, &mut sched, 8);
        let high = ready_proc(&mut procs, &mut sched, 1);

        sched.tick(&mut procs);
        assert_eq!(sched.running(), Some(high));
        assert_eq!(procs.get(low).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut procs = ProcessTable::init();
        let mut sched = Scheduler::init();
        let first = ready_proc(&mut procs, &mut sched, 5);
        let second = ready_proc(&mut procs, &mut sched, 5);

        sched.tick(&mut procs);
        assert_eq!(sched.running(), Some(first));
        // run out the slice: first rotates behind second
        for _ in 0..TIME_SLICE {
            sched.tick(&mut procs);
        }
        assert_eq!(sched.running(), Some(second));
    }

    #[test]
    fn test_blocked_process_wakes() {
        let mut procs = ProcessTable::init();
        let mut sched = Scheduler::init();
        let pid = ready_proc(&mut procs, &mut sched, 5);

        sched.tick(&mut procs);
        // simulate a page fault parking the running process
        let wake_at = sched.clock() + 1;
        let pcb = procs.get_mut(pid).unwrap();
        pcb.state = ProcessState::Blocked;
        pcb.wake_at = Some(wake_at);
        sched.clear_running();

        sched.tick(&mut procs);
        // woken and immediately dispatched: nobody else wants the CPU
        assert_eq!(sched.running(), Some(pid));
        assert_eq!(procs.get(pid).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_resort_after_priority_change() {
        let mut procs = ProcessTable::init();
        let mut sched = Scheduler::init();
        let a = ready_proc(&mut procs, &mut sched, 5);
        let b = ready_proc(&mut procs, &mut sched, 5);

        procs.get_mut(b).unwrap().priority = 2;
        sched.resort(&procs);
        sched.tick(&mut procs);
        assert_eq!(sched.running(), Some(b));
        assert_eq!(procs.get(a).unwrap().state, ProcessState::Ready);
    }
}
