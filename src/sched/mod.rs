//! Channel schedulers: turn queued channel transactions into DDR command
//! streams under the GDDR protocol rules

use std::collections::VecDeque;

use crate::burst::DdrBurst;
use crate::command::{BankSel, DdrCmdKind, DdrCommand, IssueConstraint};
use crate::module_state::{CommandId, DdrModuleState};
use crate::signal::Signal;
use crate::timing::GddrTiming;
use crate::transaction::ChannelTransaction;

mod bank_policy;
mod bank_queue;
mod fifo;
mod rw_fifo;
mod switch_mode;

pub use bank_policy::{BankInfo, BankSelectionPolicy};
pub use rw_fifo::DependencyQueue;
pub use switch_mode::SwitchMode;

use bank_queue::BankQueueScheduler;
use fifo::FifoScheduler;
use rw_fifo::RwFifoScheduler;

/// What kinds of channel transactions a bank's queue resources can take
/// next cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accept {
    Both,
    Read,
    Write,
    None,
}

impl Accept {
    /// True when a transaction of the given kind may be routed
    pub fn allows(self, is_read: bool) -> bool {
        match self {
            Accept::Both => true,
            Accept::Read => is_read,
            Accept::Write => !is_read,
            Accept::None => false,
        }
    }
}

/// Backpressure state a scheduler publishes at the end of every cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// All bank resources share one state
    Shared(Accept),
    /// Independent state per bank
    PerBank(Vec<Accept>),
}

impl SchedulerState {
    pub fn bank(&self, bank: u32) -> Accept {
        match self {
            SchedulerState::Shared(accept) => *accept,
            SchedulerState::PerBank(states) => {
                assert!(
                    (bank as usize) < states.len(),
                    "bank {} out of bounds of the scheduler state",
                    bank
                );
                states[bank as usize]
            }
        }
    }
}

/// Scheduler algorithm selected per channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerKind {
    /// One shared FIFO for reads and writes
    Fifo,
    /// Separate read and write FIFOs with dependency tracking
    RwFifo,
    /// One queue per bank with Precharge/Activate Managers
    BankQueue,
}

/// Whether idle banks are implicitly closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagePolicy {
    ClosePage,
    OpenPage,
}

/// Read-versus-write arbitration policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchModePolicy {
    /// Budgeted consecutive-operation counters per mode
    TwoCounters,
    /// Prefer reads; stay on writes only while they hit the open row
    LoadsOverStores,
    /// Reserved, not implemented
    SwitchOnMiss,
    /// Reserved, not implemented
    MinSwitches,
}

/// How eagerly the Active Manager pre-opens rows
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveManagerMode {
    /// Only pre-open rows for the current operation mode
    Conservative,
    /// Also pre-open rows for the mode the scheduler will switch to
    Aggressive,
}

/// Relative order of the two opportunistic managers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerOrder {
    ActiveFirst,
    PrechargeFirst,
}

/// Configuration common to all channel schedulers
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
    pub page_policy: PagePolicy,
    /// In-flight channel transactions a channel can hold
    pub max_channel_transactions: u32,
    /// Queue slots dedicated to reads in the split R/W scheduler;
    /// 0 divides the capacity evenly
    pub dedicated_read_transactions: u32,
    pub switch_mode: SwitchModePolicy,
    pub max_consecutive_reads: u32,
    pub max_consecutive_writes: u32,
    pub active_manager_mode: ActiveManagerMode,
    pub disable_active_manager: bool,
    pub disable_precharge_manager: bool,
    pub manager_order: ManagerOrder,
    /// Textual bank-selection pipeline, e.g. `"MORE_CONSECUTIVE_HITS OLDEST_FIRST"`
    pub bank_selection_policy: String,
    /// Publish one state per bank instead of a shared one
    pub per_bank_state: bool,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            kind: SchedulerKind::Fifo,
            page_policy: PagePolicy::ClosePage,
            max_channel_transactions: 32,
            dedicated_read_transactions: 0,
            switch_mode: SwitchModePolicy::LoadsOverStores,
            max_consecutive_reads: 8,
            max_consecutive_writes: 8,
            active_manager_mode: ActiveManagerMode::Conservative,
            disable_active_manager: false,
            disable_precharge_manager: false,
            manager_order: ManagerOrder::ActiveFirst,
            bank_selection_policy: "OLDEST_FIRST".to_string(),
            per_bank_state: false,
        }
    }
}

/// Event counters of one channel scheduler
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_commands: u64,
    pub write_commands: u64,
    pub activate_commands: u64,
    pub precharge_commands: u64,
    pub row_hits: u64,
    pub read_row_hits: u64,
    pub write_row_hits: u64,
    pub row_misses: u64,
    pub read_row_misses: u64,
    pub write_row_misses: u64,
    pub close_page_activations: u64,
}

/// Signals connecting the controller, one channel scheduler and its DDR
/// module
#[derive(Debug)]
pub struct ChannelWires {
    /// Controller to scheduler: next channel transaction
    pub request: Signal<ChannelTransaction>,
    /// Scheduler to controller: completed channel transactions
    pub reply: Signal<ChannelTransaction>,
    /// Scheduler to controller: backpressure state
    pub sched_state: Signal<SchedulerState>,
    /// Scheduler to module: DDR commands
    pub module_cmd: Signal<DdrCommand>,
    /// Module to scheduler: read bursts
    pub module_reply: Signal<DdrBurst>,
}

impl ChannelWires {
    pub fn new(prefix: &str) -> ChannelWires {
        ChannelWires {
            request: Signal::new(&format!("{}.ChannelRequest", prefix), 1),
            reply: Signal::new(&format!("{}.ChannelReply", prefix), 1),
            sched_state: Signal::with_initial(
                &format!("{}.SchedulerState", prefix),
                1,
                SchedulerState::Shared(Accept::None),
            ),
            module_cmd: Signal::new(&format!("{}.DdrModuleRequest", prefix), 1),
            module_reply: Signal::new(&format!("{}.DdrModuleReply", prefix), 1),
        }
    }
}

struct InProgressRead {
    ct: ChannelTransaction,
    total_bursts: u32,
    received: u32,
}

/// State and helpers shared by every scheduler variant
pub(crate) struct SchedulerCore {
    name: String,
    mod_state: DdrModuleState,
    page_policy: PagePolicy,
    burst_length: u32,

    command_buffer: VecDeque<DdrCommand>,
    /// Write transaction whose commands are in the buffer
    current_write: Option<ChannelTransaction>,
    /// Read transactions with issued commands, in burst arrival order
    in_progress_reads: VecDeque<InProgressRead>,
    /// Completions waiting for the reply port, drained one per cycle
    reply_queue: VecDeque<ChannelTransaction>,

    pending_state: Option<SchedulerState>,
    last_cmd_cycle: Option<u64>,
    /// Whether the last R/W-or-ACT/PRE command per bank was a read/write;
    /// drives the row hit/miss counters
    last_cmd_was_rw: Vec<bool>,

    stats: SchedulerStats,
}

impl SchedulerCore {
    fn new(
        name: &str,
        banks: u32,
        burst_length: u32,
        burst_bytes_per_cycle: u32,
        timing: GddrTiming,
        page_policy: PagePolicy,
    ) -> SchedulerCore {
        SchedulerCore {
            name: name.to_string(),
            mod_state: DdrModuleState::new(banks, burst_length, burst_bytes_per_cycle, timing),
            page_policy,
            burst_length,
            command_buffer: VecDeque::new(),
            current_write: None,
            in_progress_reads: VecDeque::new(),
            reply_queue: VecDeque::new(),
            pending_state: None,
            last_cmd_cycle: None,
            last_cmd_was_rw: vec![false; banks as usize],
            stats: SchedulerStats::default(),
        }
    }

    fn banks(&self) -> u32 {
        self.mod_state.banks()
    }

    fn burst_bytes(&self) -> u32 {
        4 * self.burst_length
    }

    pub(crate) fn module_state(&self) -> &DdrModuleState {
        &self.mod_state
    }

    fn set_state(&mut self, cycle: u64, state: SchedulerState) {
        assert!(
            self.pending_state.is_none(),
            "{}: cycle {}: set_state called twice in one clock",
            self.name,
            cycle
        );
        self.pending_state = Some(state);
    }

    /// Merges an arriving read burst into the oldest in-progress read and
    /// queues the completion once the transaction's last burst landed
    fn receive_data(&mut self, cycle: u64, burst: DdrBurst) {
        self.stats.read_bytes += u64::from(4 * burst.len());
        let burst_bytes = self.burst_bytes();
        let entry = match self.in_progress_reads.front_mut() {
            Some(entry) => entry,
            None => panic!("{}: cycle {}: read burst arrived with no read in progress", self.name, cycle),
        };
        let offset = entry.received * burst_bytes;
        let take = burst_bytes.min(entry.ct.bytes() - offset) as usize;
        entry.ct.set_data(offset, &burst.to_bytes()[..take]);
        entry.received += 1;
        if entry.received == entry.total_bursts {
            let entry = self.in_progress_reads.pop_front().unwrap();
            mc_trace!("{}: cycle {}: completed {}", self.name, cycle, entry.ct);
            self.reply_queue.push_back(entry.ct);
        }
    }

    /// Translates a selected transaction into its DDR command sequence:
    /// a PRECHARGE when another row is open, an ACTIVATE when the row is
    /// not open, then one READ or WRITE per burst-aligned fragment.
    fn begin_transaction(&mut self, cycle: u64, ct: ChannelTransaction) {
        mc_trace!("{}: cycle {}: selected {}", self.name, cycle, ct);
        let bank = ct.bank();
        let burst_bytes = self.burst_bytes();
        let mut commands = VecDeque::new();

        let open_row = self.mod_state.active_row(bank);
        if open_row != Some(ct.row()) {
            if open_row.is_some() {
                commands.push_back(DdrCommand::precharge(bank));
            }
            commands.push_back(DdrCommand::activate(bank, ct.row()));
        }

        let bursts = (ct.bytes() + burst_bytes - 1) / burst_bytes;
        let partial_tail = ct.bytes() % burst_bytes != 0;
        let mut column = ct.start_col();

        if ct.is_read() {
            for _ in 0..bursts {
                commands.push_back(DdrCommand::read(bank, column, false));
                column += self.burst_length;
            }
        } else {
            for i in 0..bursts {
                let from = (i * burst_bytes) as usize;
                let to = if i == bursts - 1 && partial_tail {
                    ct.bytes() as usize
                } else {
                    from + burst_bytes as usize
                };
                let mut burst = DdrBurst::new(self.burst_length);
                burst.fill_bytes(&ct.data()[from..to]);
                if let Some(mask) = ct.mask() {
                    let word = (i * self.burst_length) as usize;
                    let words = (to - from) / 4;
                    burst.apply_word_mask(&mask[word..word + words]);
                }
                commands.push_back(DdrCommand::write(bank, column, burst, false));
                column += self.burst_length;
            }
        }

        self.command_buffer = commands;
        if ct.is_read() {
            self.in_progress_reads.push_back(InProgressRead {
                ct,
                total_bursts: bursts,
                received: 0,
            });
        } else {
            self.current_write = Some(ct);
        }
    }

    /// Checks the protocol against the module mirror and, when legal,
    /// records and sends the command. The rejected command is handed back
    /// together with the violated constraint.
    fn try_send(
        &mut self,
        cycle: u64,
        cmd: DdrCommand,
        sig: &mut Signal<DdrCommand>,
    ) -> Result<(), (DdrCommand, IssueConstraint)> {
        let constraint = match &cmd.kind {
            DdrCmdKind::Activate { bank, .. } => {
                self.mod_state.issue_constraint(*bank, CommandId::Activate)
            }
            DdrCmdKind::Read { bank, .. } => self.mod_state.issue_constraint(*bank, CommandId::Read),
            DdrCmdKind::Write { bank, .. } => self.mod_state.issue_constraint(*bank, CommandId::Write),
            DdrCmdKind::Precharge { bank: BankSel::Bank(b) } => {
                self.mod_state.issue_constraint(*b, CommandId::Precharge)
            }
            DdrCmdKind::Precharge { bank: BankSel::All } => (0..self.banks())
                .map(|b| self.mod_state.issue_constraint(b, CommandId::Precharge))
                .find(|c| *c != IssueConstraint::None)
                .unwrap_or(IssueConstraint::None),
            // a dummy occupies the command pins only on otherwise idle cycles
            DdrCmdKind::Dummy => {
                if self.last_cmd_cycle == Some(cycle) {
                    return Err((cmd, IssueConstraint::None));
                }
                IssueConstraint::None
            }
        };
        if constraint != IssueConstraint::None {
            return Err((cmd, constraint));
        }

        match &cmd.kind {
            DdrCmdKind::Activate { bank, row } => {
                self.stats.activate_commands += 1;
                self.last_cmd_was_rw[*bank as usize] = false;
                self.mod_state.post_activate(*bank, *row);
            }
            DdrCmdKind::Read { bank, autoprecharge, .. } => {
                self.stats.read_commands += 1;
                if self.last_cmd_was_rw[*bank as usize] {
                    self.stats.row_hits += 1;
                    self.stats.read_row_hits += 1;
                } else {
                    self.stats.row_misses += 1;
                    self.stats.read_row_misses += 1;
                }
                self.last_cmd_was_rw[*bank as usize] = true;
                self.mod_state.post_read(*bank, *autoprecharge);
            }
            DdrCmdKind::Write {
                bank,
                burst,
                autoprecharge,
                ..
            } => {
                self.stats.write_commands += 1;
                self.stats.write_bytes += u64::from(4 * burst.len());
                if self.last_cmd_was_rw[*bank as usize] {
                    self.stats.row_hits += 1;
                    self.stats.write_row_hits += 1;
                } else {
                    self.stats.row_misses += 1;
                    self.stats.write_row_misses += 1;
                }
                self.last_cmd_was_rw[*bank as usize] = true;
                self.mod_state.post_write(*bank, *autoprecharge);
            }
            DdrCmdKind::Precharge { bank: BankSel::Bank(b) } => {
                self.stats.precharge_commands += 1;
                self.last_cmd_was_rw[*b as usize] = false;
                self.mod_state.post_precharge(*b);
            }
            DdrCmdKind::Precharge { bank: BankSel::All } => {
                self.stats.precharge_commands += 1;
                for bank in &mut self.last_cmd_was_rw {
                    *bank = false;
                }
                self.mod_state.post_precharge_all();
            }
            DdrCmdKind::Dummy => {}
        }

        mc_trace!("{}: cycle {}: sending {}", self.name, cycle, cmd);
        sig.write(cycle, cmd);
        self.last_cmd_cycle = Some(cycle);
        Ok(())
    }

    /// Close-page policy: precharge one bank with an open row and no
    /// pending work. `bank_has_pending` is indexed by bank id; the bank
    /// of the stalled command is skipped.
    fn close_page_sweep(
        &mut self,
        cycle: u64,
        sig: &mut Signal<DdrCommand>,
        skip_bank: Option<u32>,
        tag: IssueConstraint,
        bank_has_pending: &[bool],
    ) -> bool {
        if self.page_policy != PagePolicy::ClosePage {
            return false;
        }
        for bank in 0..self.banks() {
            if Some(bank) == skip_bank {
                continue;
            }
            if !bank_has_pending[bank as usize] && self.mod_state.active_row(bank).is_some() {
                let cmd = DdrCommand::precharge(bank).with_constraint(tag);
                if self.try_send(cycle, cmd, sig).is_ok() {
                    self.stats.close_page_activations += 1;
                    return true;
                }
            }
        }
        false
    }

    fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "scheduler '{}' local state:", self.name);
        let _ = writeln!(out, " command buffer: {} pending commands", self.command_buffer.len());
        for cmd in &self.command_buffer {
            let _ = writeln!(out, "  {}", cmd);
        }
        let _ = writeln!(out, " in-progress reads: {}", self.in_progress_reads.len());
        let _ = writeln!(out, " queued replies: {}", self.reply_queue.len());
        if let Some(write) = &self.current_write {
            let _ = writeln!(out, " current write: {}", write);
        }
        out
    }
}

enum Variant {
    Fifo(FifoScheduler),
    RwFifo(RwFifoScheduler),
    BankQueue(BankQueueScheduler),
}

impl Variant {
    fn receive_request(&mut self, core: &mut SchedulerCore, cycle: u64, ct: ChannelTransaction) {
        match self {
            Variant::Fifo(v) => v.receive_request(core, cycle, ct),
            Variant::RwFifo(v) => v.receive_request(core, cycle, ct),
            Variant::BankQueue(v) => v.receive_request(core, cycle, ct),
        }
    }

    fn select_next(&mut self, core: &mut SchedulerCore, cycle: u64) -> Option<ChannelTransaction> {
        match self {
            Variant::Fifo(v) => v.select_next(core, cycle),
            Variant::RwFifo(v) => v.select_next(core, cycle),
            Variant::BankQueue(v) => v.select_next(core, cycle),
        }
    }

    fn on_command_not_sent(
        &mut self,
        core: &mut SchedulerCore,
        cycle: u64,
        sig: &mut Signal<DdrCommand>,
        stalled_bank: Option<u32>,
        constraint: IssueConstraint,
    ) {
        match self {
            Variant::Fifo(v) => v.on_command_not_sent(core, cycle, sig, stalled_bank, constraint),
            Variant::RwFifo(v) => v.on_command_not_sent(core, cycle, sig, stalled_bank, constraint),
            Variant::BankQueue(v) => v.on_command_not_sent(core, cycle, sig, stalled_bank, constraint),
        }
    }

    fn end_of_clock(&mut self, core: &mut SchedulerCore, cycle: u64) {
        match self {
            Variant::Fifo(v) => v.end_of_clock(core, cycle),
            Variant::RwFifo(v) => v.end_of_clock(core, cycle),
            Variant::BankQueue(v) => v.end_of_clock(core, cycle),
        }
    }
}

/// One channel's scheduler: selects the next channel transaction each
/// cycle and drives the attached DDR module, respecting backpressure and
/// the protocol constraints mirrored in its [`DdrModuleState`].
pub struct ChannelScheduler {
    core: SchedulerCore,
    variant: Variant,
}

impl ChannelScheduler {
    pub fn new(
        name: &str,
        banks: u32,
        burst_length: u32,
        burst_bytes_per_cycle: u32,
        timing: GddrTiming,
        config: &SchedulerConfig,
    ) -> ChannelScheduler {
        let core = SchedulerCore::new(
            name,
            banks,
            burst_length,
            burst_bytes_per_cycle,
            timing,
            config.page_policy,
        );
        let variant = match config.kind {
            SchedulerKind::Fifo => Variant::Fifo(FifoScheduler::new(banks, config)),
            SchedulerKind::RwFifo => Variant::RwFifo(RwFifoScheduler::new(banks, config)),
            SchedulerKind::BankQueue => Variant::BankQueue(BankQueueScheduler::new(banks, config)),
        };
        ChannelScheduler { core, variant }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.core.stats
    }

    pub fn dump(&self) -> String {
        self.core.dump()
    }

    /// Runs one scheduler cycle: ingest at most one transaction, absorb at
    /// most one read burst, issue at most one DDR command, publish the
    /// next-cycle state.
    pub fn clock(&mut self, cycle: u64, wires: &mut ChannelWires) {
        let ChannelScheduler { core, variant } = self;

        core.mod_state.update_state(cycle);

        if let Some(ct) = wires.request.read(cycle) {
            mc_trace!("{}: cycle {}: received {}", core.name, cycle, ct);
            variant.receive_request(core, cycle, ct);
        }

        if let Some(burst) = wires.module_reply.read(cycle) {
            core.receive_data(cycle, burst);
        }

        if core.command_buffer.is_empty() {
            if let Some(ct) = variant.select_next(core, cycle) {
                core.begin_transaction(cycle, ct);
            }
        }

        if let Some(head) = core.command_buffer.pop_front() {
            match core.try_send(cycle, head, &mut wires.module_cmd) {
                Ok(()) => {
                    if core.command_buffer.is_empty() {
                        if let Some(write) = core.current_write.take() {
                            mc_trace!("{}: cycle {}: completed {}", core.name, cycle, write);
                            core.reply_queue.push_back(write);
                        }
                    }
                }
                Err((head, constraint)) => {
                    let stalled_bank = head.bank();
                    core.command_buffer.push_front(head);
                    variant.on_command_not_sent(
                        core,
                        cycle,
                        &mut wires.module_cmd,
                        stalled_bank,
                        constraint,
                    );
                    if core.last_cmd_cycle != Some(cycle) {
                        // annotate the wasted cycle for the module trace
                        let _ = core.try_send(cycle, DdrCommand::dummy(constraint), &mut wires.module_cmd);
                    }
                }
            }
        } else {
            // idle cycle: give the page policy a chance to close rows
            variant.on_command_not_sent(
                core,
                cycle,
                &mut wires.module_cmd,
                None,
                IssueConstraint::None,
            );
        }

        // the reply port carries one completion per cycle
        if let Some(reply) = core.reply_queue.pop_front() {
            wires.reply.write(cycle, reply);
        }

        variant.end_of_clock(core, cycle);

        let state = match core.pending_state.take() {
            Some(state) => state,
            None => panic!(
                "{}: cycle {}: set_state must be called every scheduler clock",
                core.name, cycle
            ),
        };
        wires.sched_state.write(cycle, state);
    }
}
