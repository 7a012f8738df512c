//! Split read/write FIFO scheduler with dependency tracking

use std::collections::VecDeque;

use crate::command::{DdrCommand, IssueConstraint};
use crate::signal::Signal;
use crate::transaction::ChannelTransaction;

use super::{Accept, SchedulerConfig, SchedulerCore, SchedulerState, SwitchMode};

#[derive(Debug)]
struct QueueEntry {
    ct: ChannelTransaction,
    /// Serial of the transaction this one must wait for, in the other queue
    dependency: Option<u64>,
    serial: u64,
    timestamp: u64,
}

/// FIFO of channel transactions where each entry may depend on an entry of
/// the opposite queue whose byte range overlaps. The head is only eligible
/// once its dependency has left the other queue.
#[derive(Debug, Default)]
pub struct DependencyQueue {
    entries: VecDeque<QueueEntry>,
}

impl DependencyQueue {
    pub fn new() -> DependencyQueue {
        DependencyQueue {
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serial of the most recently enqueued transaction overlapping
    /// `request`, which is the dependency a new opposite-kind transaction
    /// must record
    pub fn find_dependency(&self, request: &ChannelTransaction) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|entry| request.overlaps_with(&entry.ct))
            .map(|entry| entry.serial)
    }

    /// Clears the dependency of every entry waiting on `serial`
    pub fn wakeup(&mut self, serial: u64) {
        for entry in &mut self.entries {
            if entry.dependency == Some(serial) {
                entry.dependency = None;
            }
        }
    }

    pub fn enqueue(
        &mut self,
        ct: ChannelTransaction,
        dependency: Option<u64>,
        serial: u64,
        timestamp: u64,
    ) {
        self.entries.push_back(QueueEntry {
            ct,
            dependency,
            serial,
            timestamp,
        });
    }

    /// True when a head exists and has no pending dependency
    pub fn ready(&self) -> bool {
        self.entries
            .front()
            .map_or(false, |entry| entry.dependency.is_none())
    }

    pub fn front(&self) -> Option<&ChannelTransaction> {
        self.entries.front().map(|entry| &entry.ct)
    }

    pub fn front_timestamp(&self) -> Option<u64> {
        self.entries.front().map(|entry| entry.timestamp)
    }

    /// Removes the head, returning it with its serial so the opposite
    /// queue can be woken up
    ///
    /// # Panics
    ///
    /// Panics when the queue is empty or the head still has a dependency
    pub fn pop(&mut self) -> (ChannelTransaction, u64) {
        assert!(self.ready(), "popping a dependency queue whose head is not ready");
        let entry = self.entries.pop_front().unwrap();
        (entry.ct, entry.serial)
    }

    /// Queued transactions of the head's kind targeting the head's row
    pub fn consecutive_accesses(&self, writes: bool) -> u32 {
        let front = match self.entries.front() {
            Some(entry) => entry,
            None => return 0,
        };
        let row = front.ct.row();
        self.entries
            .iter()
            .filter(|entry| entry.ct.row() == row && !entry.ct.is_read() == writes)
            .count() as u32
    }
}

/// Scheduler with dedicated read and write queues. Read-after-write and
/// write-after-read hazards are tracked at enqueue time; selection between
/// the two eligible heads goes through the switch-operation-mode policy.
pub(super) struct RwFifoScheduler {
    read_queue: DependencyQueue,
    write_queue: DependencyQueue,
    max_read_transactions: usize,
    max_write_transactions: usize,
    switch_mode: SwitchMode,
    pending_bank_accesses: Vec<u32>,
    next_serial: u64,
}

impl RwFifoScheduler {
    pub(super) fn new(banks: u32, config: &SchedulerConfig) -> RwFifoScheduler {
        assert!(
            config.dedicated_read_transactions < config.max_channel_transactions,
            "dedicated read transactions ({}) must be strictly less than the channel capacity ({})",
            config.dedicated_read_transactions,
            config.max_channel_transactions
        );
        // one slot of slack per queue absorbs the in-flight transaction of
        // the state-signal handoff cycle
        let (reads, writes) = if config.dedicated_read_transactions == 0 {
            let half = config.max_channel_transactions / 2;
            (half + 1, half + 1)
        } else {
            (
                config.dedicated_read_transactions + 1,
                config.max_channel_transactions - config.dedicated_read_transactions + 1,
            )
        };
        RwFifoScheduler {
            read_queue: DependencyQueue::new(),
            write_queue: DependencyQueue::new(),
            max_read_transactions: reads as usize,
            max_write_transactions: writes as usize,
            switch_mode: SwitchMode::new(
                config.switch_mode,
                config.max_consecutive_reads,
                config.max_consecutive_writes,
            ),
            pending_bank_accesses: vec![0; banks as usize],
            next_serial: 0,
        }
    }

    pub(super) fn receive_request(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        ct: ChannelTransaction,
    ) {
        let bank = ct.bank();
        if bank >= core.banks() {
            self.core_dump(core);
            panic!("{}: cycle {}: bank identifier too high", core.name, cycle);
        }
        self.pending_bank_accesses[bank as usize] += 1;

        let serial = self.next_serial;
        self.next_serial += 1;

        if ct.is_read() {
            if self.read_queue.len() == self.max_read_transactions {
                self.core_dump(core);
                panic!("{}: cycle {}: read FIFO queue is full", core.name, cycle);
            }
            let dependency = self.write_queue.find_dependency(&ct);
            self.read_queue.enqueue(ct, dependency, serial, cycle);
        } else {
            if self.write_queue.len() == self.max_write_transactions {
                self.core_dump(core);
                panic!("{}: cycle {}: write FIFO queue is full", core.name, cycle);
            }
            let dependency = self.read_queue.find_dependency(&ct);
            self.write_queue.enqueue(ct, dependency, serial, cycle);
        }
    }

    pub(super) fn select_next(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
    ) -> Option<ChannelTransaction> {
        if self.read_queue.is_empty() && self.write_queue.is_empty() {
            return None;
        }

        let read_ready = self.read_queue.ready();
        let write_ready = self.write_queue.ready();
        let read_is_hit = read_ready
            && self.read_queue.front().map_or(false, |ct| {
                core.module_state().active_row(ct.bank()) == Some(ct.row())
            });
        let write_is_hit = write_ready
            && self.write_queue.front().map_or(false, |ct| {
                core.module_state().active_row(ct.bank()) == Some(ct.row())
            });

        if !read_ready && !write_ready {
            self.core_dump(core);
            panic!(
                "{}: cycle {}: transactions queued but none ready, read/write deadlock",
                core.name, cycle
            );
        }

        self.switch_mode
            .update(read_ready, write_ready, read_is_hit, write_is_hit);

        let (ct, _serial) = if self.switch_mode.reading() {
            assert!(read_ready, "switch mode selected reads with no ready read");
            let popped = self.read_queue.pop();
            self.write_queue.wakeup(popped.1);
            popped
        } else {
            assert!(write_ready, "switch mode selected writes with no ready write");
            let popped = self.write_queue.pop();
            self.read_queue.wakeup(popped.1);
            popped
        };

        let pending = &mut self.pending_bank_accesses[ct.bank() as usize];
        assert!(*pending > 0, "{}: pending bank access counter underflow", core.name);
        *pending -= 1;
        Some(ct)
    }

    pub(super) fn on_command_not_sent(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        sig: &mut Signal<DdrCommand>,
        stalled_bank: Option<u32>,
        constraint: IssueConstraint,
    ) {
        let pending: Vec<bool> = self.pending_bank_accesses.iter().map(|&n| n > 0).collect();
        core.close_page_sweep(cycle, sig, stalled_bank, constraint, &pending);
    }

    pub(super) fn end_of_clock(&mut self, core: &mut SchedulerCore, cycle: u64) {
        let read_accept = self.read_queue.len() < self.max_read_transactions - 1;
        let write_accept = self.write_queue.len() < self.max_write_transactions - 1;
        let accept = match (read_accept, write_accept) {
            (true, true) => Accept::Both,
            (true, false) => Accept::Read,
            (false, true) => Accept::Write,
            (false, false) => Accept::None,
        };
        core.set_state(cycle, SchedulerState::Shared(accept));
    }

    fn core_dump(&self, core: &SchedulerCore) {
        eprintln!("{}", core.dump());
        eprintln!(
            "read queue: {} entries (head ready: {}), write queue: {} entries (head ready: {})",
            self.read_queue.len(),
            self.read_queue.ready(),
            self.write_queue.len(),
            self.write_queue.ready()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientSource, ClientTransaction, GpuUnit};
    use crate::request::{RequestBuffer, RequestId};

    fn request_id() -> RequestId {
        let mut buffer = RequestBuffer::new("requestBuffer", 1);
        buffer.alloc(
            ClientTransaction::read_req(0, ClientSource::new(GpuUnit::TextureUnit, 0), 0, 64),
            0,
        )
    }

    fn read(id: RequestId, row: u32, col: u32) -> ChannelTransaction {
        ChannelTransaction::new_read(id, 0, 0, row, col, 16, 0)
    }

    fn write(id: RequestId, row: u32, col: u32) -> ChannelTransaction {
        ChannelTransaction::new_write(id, 0, 0, row, col, vec![0; 16], None, 0)
    }

    #[test]
    fn overlapping_read_waits_for_the_write() {
        let id = request_id();
        let mut writes = DependencyQueue::new();
        let mut reads = DependencyQueue::new();

        writes.enqueue(write(id, 0, 0), None, 0, 0);
        let dep = writes.find_dependency(&read(id, 0, 2));
        assert_eq!(dep, Some(0));
        reads.enqueue(read(id, 0, 2), dep, 1, 1);
        assert!(!reads.ready());

        let (_, serial) = writes.pop();
        reads.wakeup(serial);
        assert!(reads.ready());
    }

    #[test]
    fn disjoint_ranges_carry_no_dependency() {
        let id = request_id();
        let mut writes = DependencyQueue::new();
        writes.enqueue(write(id, 0, 0), None, 0, 0);
        assert_eq!(writes.find_dependency(&read(id, 1, 0)), None);
        assert_eq!(writes.find_dependency(&read(id, 0, 32)), None);
    }

    #[test]
    fn consecutive_accesses_count_the_head_row() {
        let id = request_id();
        let mut writes = DependencyQueue::new();
        writes.enqueue(write(id, 3, 0), None, 0, 0);
        writes.enqueue(write(id, 3, 8), None, 1, 0);
        writes.enqueue(write(id, 1, 0), None, 2, 0);
        assert_eq!(writes.consecutive_accesses(true), 2);
        assert_eq!(writes.consecutive_accesses(false), 0);
    }

    #[test]
    #[should_panic(expected = "not ready")]
    fn popping_a_blocked_head_panics() {
        let id = request_id();
        let mut reads = DependencyQueue::new();
        reads.enqueue(read(id, 0, 0), Some(7), 0, 0);
        let _ = reads.pop();
    }
}
