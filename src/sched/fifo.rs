//! Shared-queue FIFO scheduler

use std::collections::VecDeque;

use crate::command::{DdrCommand, IssueConstraint};
use crate::signal::Signal;
use crate::transaction::ChannelTransaction;

use super::{Accept, SchedulerConfig, SchedulerCore, SchedulerState};

/// Basic scheduler with a single unified read/write queue served in
/// arrival order.
pub(super) struct FifoScheduler {
    queue: VecDeque<ChannelTransaction>,
    max_queue: usize,
    /// Pending transactions per bank; drives the close-page sweep
    pending_bank_accesses: Vec<u32>,
}

impl FifoScheduler {
    pub(super) fn new(banks: u32, config: &SchedulerConfig) -> FifoScheduler {
        assert!(
            config.max_channel_transactions >= 2,
            "a FIFO channel needs at least two transaction slots"
        );
        FifoScheduler {
            queue: VecDeque::new(),
            max_queue: config.max_channel_transactions as usize,
            pending_bank_accesses: vec![0; banks as usize],
        }
    }

    pub(super) fn receive_request(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        ct: ChannelTransaction,
    ) {
        if self.queue.len() == self.max_queue {
            eprintln!("{}", core.dump());
            panic!("{}: cycle {}: FIFO scheduler queue is full", core.name, cycle);
        }
        let bank = ct.bank();
        assert!(bank < core.banks(), "bank identifier too high");
        self.pending_bank_accesses[bank as usize] += 1;
        self.queue.push_back(ct);
    }

    pub(super) fn select_next(
        &mut self,
        core: &mut SchedulerCore,
        _cycle: u64,
    ) -> Option<ChannelTransaction> {
        let ct = self.queue.pop_front()?;
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
        let accept = if self.queue.len() < self.max_queue - 1 {
            Accept::Both
        } else {
            Accept::None
        };
        core.set_state(cycle, SchedulerState::Shared(accept));
    }
}
