//! Per-bank queue scheduler with Precharge and Activate Managers

use std::collections::VecDeque;

use crate::command::{DdrCommand, IssueConstraint};
use crate::module_state::BankState;
use crate::signal::Signal;
use crate::transaction::ChannelTransaction;

use super::bank_policy::{BankInfo, BankSelectionPolicy};
use super::{
    Accept, ActiveManagerMode, ManagerOrder, SchedulerConfig, SchedulerCore, SchedulerState,
    SwitchMode,
};

/// FIFO of channel transactions for one bank, timestamped at enqueue
#[derive(Debug, Default)]
struct BankQueue {
    entries: VecDeque<(ChannelTransaction, u64)>,
}

impl BankQueue {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn front(&self) -> Option<&ChannelTransaction> {
        self.entries.front().map(|(ct, _)| ct)
    }

    fn front_timestamp(&self) -> Option<u64> {
        self.entries.front().map(|&(_, ts)| ts)
    }

    fn push(&mut self, ct: ChannelTransaction, timestamp: u64) {
        self.entries.push_back((ct, timestamp));
    }

    fn pop(&mut self) -> ChannelTransaction {
        self.entries.pop_front().expect("popping an empty bank queue").0
    }

    /// Queued transactions of the given kind targeting the head's row
    fn consecutive_accesses(&self, writes: bool) -> u32 {
        let row = match self.front() {
            Some(ct) => ct.row(),
            None => return 0,
        };
        self.entries
            .iter()
            .filter(|(ct, _)| ct.row() == row && !ct.is_read() == writes)
            .count() as u32
    }
}

struct Candidates {
    read: Option<u32>,
    write: Option<u32>,
    read_is_hit: bool,
    write_is_hit: bool,
}

/// Scheduler keeping one FIFO per bank. Banks are prioritized by a
/// composable [`BankSelectionPolicy`]; when the selected command stalls,
/// the Precharge and Activate Managers opportunistically close or open
/// rows on other banks to hide latency.
pub(super) struct BankQueueScheduler {
    queues: Vec<BankQueue>,
    bank_queue_size: usize,
    switch_mode: SwitchMode,
    policy: BankSelectionPolicy,
    active_manager_mode: ActiveManagerMode,
    disable_active_manager: bool,
    disable_precharge_manager: bool,
    manager_order: ManagerOrder,
    per_bank_state: bool,
}

impl BankQueueScheduler {
    pub(super) fn new(banks: u32, config: &SchedulerConfig) -> BankQueueScheduler {
        assert!(
            config.max_channel_transactions >= banks
                && config.max_channel_transactions % banks == 0,
            "channel capacity ({}) must be a non-zero multiple of the number of banks ({})",
            config.max_channel_transactions,
            banks
        );
        BankQueueScheduler {
            queues: (0..banks).map(|_| BankQueue::default()).collect(),
            // one extra slot per bank absorbs the state-signal handoff cycle
            bank_queue_size: (config.max_channel_transactions / banks + 1) as usize,
            switch_mode: SwitchMode::new(
                config.switch_mode,
                config.max_consecutive_reads,
                config.max_consecutive_writes,
            ),
            policy: BankSelectionPolicy::parse(&config.bank_selection_policy, banks),
            active_manager_mode: config.active_manager_mode,
            disable_active_manager: config.disable_active_manager,
            disable_precharge_manager: config.disable_precharge_manager,
            manager_order: config.manager_order,
            per_bank_state: config.per_bank_state,
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
            eprintln!("{}", core.dump());
            panic!("{}: cycle {}: bank identifier too high", core.name, cycle);
        }
        if self.queues[bank as usize].len() == self.bank_queue_size {
            eprintln!("{}", core.dump());
            panic!("{}: cycle {}: bank {} queue is full", core.name, cycle, bank);
        }
        self.queues[bank as usize].push(ct, cycle);
    }

    /// Banks ordered by descending priority under the selection policy
    fn bank_priority(&mut self) -> Vec<u32> {
        let mut infos: Vec<BankInfo> = self
            .queues
            .iter()
            .enumerate()
            .map(|(bank, queue)| BankInfo {
                bank_id: bank as u32,
                age: queue.front_timestamp().unwrap_or(0),
                queue_size: queue.len() as u32,
                consecutive_hits: match queue.front() {
                    Some(head) => queue.consecutive_accesses(!head.is_read()),
                    None => 0,
                },
            })
            .collect();
        self.policy.sort_banks(&mut infos);
        infos.into_iter().map(|info| info.bank_id).collect()
    }

    /// First eligible read and write heads in priority order, preferring
    /// row hits: once a hitting candidate of a kind is found, lower-priority
    /// banks cannot displace it
    fn find_candidates(&mut self, core: &SchedulerCore) -> Candidates {
        let order = self.bank_priority();
        let mut candidates = Candidates {
            read: None,
            write: None,
            read_is_hit: false,
            write_is_hit: false,
        };

        for &bank in &order {
            if candidates.read_is_hit && candidates.write_is_hit {
                break;
            }
            let head = match self.queues[bank as usize].front() {
                Some(head) => head,
                None => continue,
            };
            let hit = core.module_state().active_row(bank) == Some(head.row());
            if head.is_read() && !candidates.read_is_hit {
                if candidates.read.is_none() || hit {
                    candidates.read = Some(bank);
                    candidates.read_is_hit = hit;
                }
            } else if !head.is_read() && !candidates.write_is_hit
                && (candidates.write.is_none() || hit)
            {
                candidates.write = Some(bank);
                candidates.write_is_hit = hit;
            }
        }

        candidates
    }

    pub(super) fn select_next(
        &mut self,
        core: &mut SchedulerCore,
        _cycle: u64,
    ) -> Option<ChannelTransaction> {
        let candidates = self.find_candidates(core);
        if candidates.read.is_none() && candidates.write.is_none() {
            return None;
        }

        self.switch_mode.update(
            candidates.read.is_some(),
            candidates.write.is_some(),
            candidates.read_is_hit,
            candidates.write_is_hit,
        );

        let bank = if self.switch_mode.reading() {
            candidates
                .read
                .expect("switch mode selected reads with no read candidate")
        } else {
            candidates
                .write
                .expect("switch mode selected writes with no write candidate")
        };
        Some(self.queues[bank as usize].pop())
    }

    pub(super) fn on_command_not_sent(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        sig: &mut Signal<DdrCommand>,
        stalled_bank: Option<u32>,
        constraint: IssueConstraint,
    ) {
        let pending: Vec<bool> = self.queues.iter().map(|q| !q.is_empty()).collect();
        if core.close_page_sweep(cycle, sig, stalled_bank, constraint, &pending) {
            return;
        }

        match self.manager_order {
            ManagerOrder::PrechargeFirst => {
                if self.try_precharge_manager(core, cycle, sig, stalled_bank, constraint) {
                    return;
                }
                self.try_active_manager(core, cycle, sig, stalled_bank, constraint);
            }
            ManagerOrder::ActiveFirst => {
                if self.try_active_manager(core, cycle, sig, stalled_bank, constraint) {
                    return;
                }
                self.try_precharge_manager(core, cycle, sig, stalled_bank, constraint);
            }
        }
    }

    /// Precharge Manager: close a row that the bank's next transaction
    /// will miss anyway
    fn try_precharge_manager(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        sig: &mut Signal<DdrCommand>,
        stalled_bank: Option<u32>,
        constraint: IssueConstraint,
    ) -> bool {
        if self.disable_precharge_manager {
            return false;
        }
        let stalled = match stalled_bank {
            Some(bank) => bank,
            None => return false,
        };

        let order = self.bank_priority();
        for &bank in &order {
            if bank == stalled || self.queues[bank as usize].is_empty() {
                continue;
            }
            let open_row = match core.module_state().active_row(bank) {
                Some(row) => row,
                None => continue,
            };
            if core.module_state().state(bank) != BankState::Active {
                continue;
            }
            let head_row = self.queues[bank as usize].front().unwrap().row();
            if open_row != head_row {
                let cmd = DdrCommand::precharge(bank).with_constraint(constraint);
                if core.try_send(cycle, cmd, sig).is_ok() {
                    return true;
                }
            }
        }
        false
    }

    /// Activate Manager: pre-open the row of a queued transaction, within
    /// the switch-mode budget so a read-mode scheduler does not open rows
    /// for writes it will not issue soon
    fn try_active_manager(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        sig: &mut Signal<DdrCommand>,
        stalled_bank: Option<u32>,
        constraint: IssueConstraint,
    ) -> bool {
        if self.disable_active_manager {
            return false;
        }

        let (read_hits, write_hits, any_pending) = self.count_hits(core, stalled_bank);
        if !any_pending {
            return false;
        }

        let order = self.bank_priority();
        let mut sent = false;
        if self.switch_mode.reading() && read_hits < self.switch_mode.remaining_ops() {
            sent = self.try_activate_kind(core, cycle, sig, constraint, true, &order);
        } else if self.switch_mode.writing() && write_hits < self.switch_mode.remaining_ops() {
            sent = self.try_activate_kind(core, cycle, sig, constraint, false, &order);
        }

        if self.active_manager_mode == ActiveManagerMode::Aggressive && !sent {
            if self.switch_mode.reading()
                && read_hits >= self.switch_mode.remaining_ops()
                && write_hits < self.switch_mode.max_consecutive_writes()
            {
                sent = self.try_activate_kind(core, cycle, sig, constraint, false, &order);
            } else if self.switch_mode.writing()
                && write_hits >= self.switch_mode.remaining_ops()
                && read_hits < self.switch_mode.max_consecutive_reads()
            {
                sent = self.try_activate_kind(core, cycle, sig, constraint, true, &order);
            }
        }
        sent
    }

    fn try_activate_kind(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        sig: &mut Signal<DdrCommand>,
        constraint: IssueConstraint,
        try_read: bool,
        order: &[u32],
    ) -> bool {
        for &bank in order {
            if core.module_state().active_row(bank).is_some() {
                continue;
            }
            let head = match self.queues[bank as usize].front() {
                Some(head) => head,
                None => continue,
            };
            if head.is_read() != try_read {
                continue;
            }
            let cmd = DdrCommand::activate(bank, head.row()).with_constraint(constraint);
            if core.try_send(cycle, cmd, sig).is_ok() {
                return true;
            }
        }
        false
    }

    /// Sums the expected consecutive row hits of the queued reads and
    /// writes, ignoring `ignored_bank`
    fn count_hits(&self, core: &SchedulerCore, ignored_bank: Option<u32>) -> (u32, u32, bool) {
        let mut read_hits = 0;
        let mut write_hits = 0;
        let mut any_pending = false;
        for (bank, queue) in self.queues.iter().enumerate() {
            if Some(bank as u32) == ignored_bank {
                continue;
            }
            let head = match queue.front() {
                Some(head) => head,
                None => continue,
            };
            any_pending = true;
            if core.module_state().active_row(bank as u32) == Some(head.row()) {
                if head.is_read() {
                    read_hits += queue.consecutive_accesses(false);
                } else {
                    write_hits += queue.consecutive_accesses(true);
                }
            }
        }
        (read_hits, write_hits, any_pending)
    }

    pub(super) fn end_of_clock(&mut self, core: &mut SchedulerCore, cycle: u64) {
        if self.per_bank_state {
            let states: Vec<Accept> = self
                .queues
                .iter()
                .map(|queue| {
                    if queue.len() >= self.bank_queue_size - 1 {
                        Accept::None
                    } else {
                        Accept::Both
                    }
                })
                .collect();
            core.set_state(cycle, SchedulerState::PerBank(states));
        } else {
            // classic behaviour: one nearly full bank stalls the channel
            let any_full = self
                .queues
                .iter()
                .any(|queue| queue.len() >= self.bank_queue_size - 1);
            let accept = if any_full { Accept::None } else { Accept::Both };
            core.set_state(cycle, SchedulerState::Shared(accept));
        }
    }
}
