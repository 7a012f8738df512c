//! DDR module chip model

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::bank::DdrBank;
use crate::burst::DdrBurst;
use crate::command::{BankSel, DdrCmdKind, DdrCommand, IssueConstraint};
use crate::signal::Signal;
use crate::timing::GddrTiming;

/// Number of received commands kept for the core dump
const COMMAND_HISTORY_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ModBankState {
    Idle,
    Activating,
    Active,
    Reading,
    Writing,
    Precharging,
}

impl ModBankState {
    fn name(self) -> &'static str {
        match self {
            ModBankState::Idle => "IDLE",
            ModBankState::Activating => "ACTIVATING",
            ModBankState::Active => "ACTIVE",
            ModBankState::Reading => "READING",
            ModBankState::Writing => "WRITING",
            ModBankState::Precharging => "PRECHARGING",
        }
    }
}

#[derive(Clone, Debug)]
struct BankTiming {
    state: ModBankState,
    /// Cycle at which the current operation finishes
    end_cycle: u64,
    /// End cycle of the last write to this bank (write recovery)
    last_write_end: u64,
    /// Precharge as soon as the current read/write completes
    autoprecharge: bool,
}

/// What occupies the data pins in one cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PinUse {
    ReadData,
    WriteData,
    Constraint(IssueConstraint),
}

/// Event counters of one DDR module
#[derive(Clone, Copy, Debug, Default)]
pub struct DdrModuleStats {
    pub data_cycles: u64,
    pub read_data_cycles: u64,
    pub read_data_bytes: u64,
    pub write_data_cycles: u64,
    pub write_data_bytes: u64,
    pub idle_cycles: u64,
    pub cas_cycles: u64,
    pub wl_cycles: u64,
    pub constraint_cycles: u64,
    pub activate_commands: u64,
    pub precharge_commands: u64,
    pub all_banks_precharged_cycles: u64,
}

/// A GDDR module chip: an array of banks behind one command port and one
/// shared data-pin port.
///
/// The module consumes at most one [`DdrCommand`] per cycle from its input
/// signal and emits at most one read [`DdrBurst`] per cycle on the reply
/// signal. All GDDR timing rules are enforced on the incoming command
/// stream; a violation dumps the module state plus the last received
/// commands and panics.
#[derive(Debug)]
pub struct DdrModule {
    name: String,
    banks: Vec<DdrBank>,
    bank_state: Vec<BankTiming>,

    timing: GddrTiming,
    burst_length: u32,
    burst_transmission_time: u32,

    last_activate_start: u64,
    last_activate_end: u64,
    last_activate_bank: u32,
    last_read_start: u64,
    last_read_end: u64,
    last_read_bank: u32,
    last_write_start: u64,
    last_write_end: u64,
    last_write_bank: u32,

    /// In-progress reads waiting to leave on the reply signal
    readout: VecDeque<(u64, DdrBurst)>,
    /// Completion cycles of in-progress writes
    readin: VecDeque<u64>,
    /// Scheduled data-pin occupancy
    pins: VecDeque<(u64, PinUse)>,
    /// Constraint supplied by the scheduler for an otherwise idle pin cycle
    bypass_constraint: Option<IssueConstraint>,

    history: VecDeque<(u64, String)>,
    last_clock: u64,
    stats: DdrModuleStats,
}

impl DdrModule {
    /// Creates a module of `banks` banks of `bank_rows x bank_cols` words
    ///
    /// # Panics
    ///
    /// Panics when `banks` is zero or the burst length does not divide
    /// evenly into `burst_bytes_per_cycle` transfers
    pub fn new(
        name: &str,
        burst_length: u32,
        banks: u32,
        bank_rows: u32,
        bank_cols: u32,
        burst_bytes_per_cycle: u32,
        timing: GddrTiming,
    ) -> DdrModule {
        assert!(banks > 0, "number of banks cannot be 0");
        assert!(
            burst_bytes_per_cycle > 0 && (4 * burst_length) % burst_bytes_per_cycle == 0,
            "burst bytes per cycle must divide the burst byte size"
        );
        DdrModule {
            name: name.to_string(),
            banks: (0..banks).map(|_| DdrBank::new(bank_rows, bank_cols)).collect(),
            bank_state: (0..banks)
                .map(|_| BankTiming {
                    state: ModBankState::Idle,
                    end_cycle: 0,
                    last_write_end: 0,
                    autoprecharge: false,
                })
                .collect(),
            timing,
            burst_length,
            burst_transmission_time: (4 * burst_length) / burst_bytes_per_cycle,
            last_activate_start: 0,
            last_activate_end: 0,
            last_activate_bank: 0,
            last_read_start: 0,
            last_read_end: 0,
            last_read_bank: 0,
            last_write_start: 0,
            last_write_end: 0,
            last_write_bank: 0,
            readout: VecDeque::new(),
            readin: VecDeque::new(),
            pins: VecDeque::new(),
            bypass_constraint: None,
            history: VecDeque::new(),
            last_clock: 0,
            stats: DdrModuleStats::default(),
        }
    }

    pub fn banks(&self) -> u32 {
        self.banks.len() as u32
    }

    pub fn burst_length(&self) -> u32 {
        self.burst_length
    }

    pub fn stats(&self) -> &DdrModuleStats {
        &self.stats
    }

    pub fn bank(&self, bank: u32) -> &DdrBank {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        &self.banks[bank as usize]
    }

    /// Simulates one cycle: passive bank transitions, at most one command
    /// from `cmd_in`, and the data-pin schedule including the reply burst.
    pub fn clock(
        &mut self,
        cycle: u64,
        cmd_in: &mut Signal<DdrCommand>,
        reply_out: &mut Signal<DdrBurst>,
    ) {
        let mut all_precharged = true;
        for bank in 0..self.banks.len() {
            self.update_bank_state(cycle, bank);
            if self.bank_state[bank].state != ModBankState::Idle {
                all_precharged = false;
            }
        }
        if all_precharged {
            self.stats.all_banks_precharged_cycles += 1;
        }

        if let Some(cmd) = cmd_in.read(cycle) {
            self.process_command(cycle, cmd);
        }

        // Send due read data out of the chip
        if let Some(&(due, _)) = self.readout.front() {
            if due < cycle {
                self.fatal(cycle, &format!("read data due at cycle {} was not sent", due));
            }
            if due == cycle {
                let (_, burst) = self.readout.pop_front().unwrap();
                mc_trace!("{}: cycle {}: reading out {} bytes", self.name, cycle, 4 * burst.len());
                reply_out.write(cycle, burst);
            }
        }

        // Retire completed write data
        if let Some(&due) = self.readin.front() {
            if due < cycle {
                self.fatal(cycle, &format!("write data due at cycle {} was not retired", due));
            }
            if due == cycle {
                self.readin.pop_front();
            }
        }

        self.account_data_pins(cycle);
        self.last_clock = cycle;

        mc_trace!("{}: cycle {}: banks {}", self.name, cycle, self.bank_summary());
    }

    /// Accounts one cycle of data-pin occupancy in priority order: real
    /// burst data, then CAS/write-latency gaps of in-flight bursts, then
    /// an externally supplied protocol constraint, else idle.
    fn account_data_pins(&mut self, cycle: u64) {
        if let Some(&(due, _)) = self.pins.front() {
            if due < cycle {
                self.fatal(cycle, &format!("data-pin slot due at cycle {} was lost", due));
            }
            if due == cycle {
                let (_, item) = self.pins.pop_front().unwrap();
                match item {
                    PinUse::ReadData => {
                        self.stats.data_cycles += 1;
                        self.stats.read_data_cycles += 1;
                        self.stats.read_data_bytes +=
                            u64::from(4 * self.burst_length / self.burst_transmission_time);
                    }
                    PinUse::WriteData => {
                        self.stats.data_cycles += 1;
                        self.stats.write_data_cycles += 1;
                        self.stats.write_data_bytes +=
                            u64::from(4 * self.burst_length / self.burst_transmission_time);
                    }
                    PinUse::Constraint(_) => self.stats.constraint_cycles += 1,
                }
                // data beats any constraint annotation this cycle
                self.bypass_constraint = None;
                return;
            }
        }

        let reading = self.last_read_end != 0 && self.last_read_end > cycle;
        let writing = self.last_write_end != 0 && self.last_write_end > cycle;
        if writing {
            // read and write can overlap only on a read-to-write switch;
            // the write is younger and owns the gap
            if self.readin.is_empty() {
                self.fatal(cycle, "write latency visible but no write data is pending");
            }
            self.stats.wl_cycles += 1;
            self.bypass_constraint = None;
        } else if reading {
            if self.readout.is_empty() {
                self.fatal(cycle, "CAS latency visible but no read data is pending");
            }
            self.stats.cas_cycles += 1;
            self.bypass_constraint = None;
        } else if self.bypass_constraint.take().is_some() {
            self.stats.constraint_cycles += 1;
        } else {
            self.stats.idle_cycles += 1;
        }
    }

    // Passive state transitions
    fn update_bank_state(&mut self, cycle: u64, bank: usize) {
        let t_rp = u64::from(self.timing.t_rp);
        let t_wr = u64::from(self.timing.t_wr);
        let read_tail = u64::from(self.timing.cas_latency + self.burst_transmission_time);

        let bstate = &mut self.bank_state[bank];
        if bstate.state == ModBankState::Idle || bstate.state == ModBankState::Active {
            return;
        }
        if cycle < bstate.end_cycle {
            return;
        }

        let mut extra_delay = 0;
        let mut push_end_cycle = false;

        match bstate.state {
            ModBankState::Activating => bstate.state = ModBankState::Active,
            ModBankState::Reading => {
                if bstate.autoprecharge {
                    if t_rp + 1 <= read_tail {
                        // precharge fully overlapped with the read
                        bstate.state = ModBankState::Idle;
                        self.banks[bank].deactivate();
                    } else {
                        extra_delay = t_rp + 1 - read_tail;
                        if cycle >= bstate.end_cycle + extra_delay {
                            bstate.state = ModBankState::Idle;
                            self.banks[bank].deactivate();
                        } else {
                            bstate.state = ModBankState::Precharging;
                            push_end_cycle = true;
                        }
                    }
                    bstate.autoprecharge = false;
                } else {
                    bstate.state = ModBankState::Active;
                }
            }
            ModBankState::Writing => {
                if bstate.autoprecharge {
                    extra_delay = t_wr + t_rp;
                    if cycle >= bstate.end_cycle + extra_delay {
                        bstate.state = ModBankState::Idle;
                        self.banks[bank].deactivate();
                    } else {
                        bstate.state = ModBankState::Precharging;
                        push_end_cycle = true;
                    }
                    bstate.autoprecharge = false;
                } else {
                    bstate.state = ModBankState::Active;
                }
            }
            ModBankState::Precharging => {
                bstate.state = ModBankState::Idle;
                self.banks[bank].deactivate();
            }
            ModBankState::Idle | ModBankState::Active => unreachable!(),
        }

        if push_end_cycle {
            let end = self.bank_state[bank].end_cycle + extra_delay;
            self.bank_state[bank].end_cycle = end;
        }
    }

    fn process_command(&mut self, cycle: u64, cmd: DdrCommand) {
        if cmd.kind != DdrCmdKind::Dummy {
            if self.history.len() >= COMMAND_HISTORY_LEN {
                self.history.pop_front();
            }
            self.history.push_back((cycle, cmd.to_string()));
        }

        // A constraint tag explains an otherwise idle data-pin cycle
        if cmd.constraint != IssueConstraint::None {
            self.bypass_constraint = Some(cmd.constraint);
        }

        mc_trace!("{}: cycle {}: executing {}", self.name, cycle, cmd);
        match cmd.kind {
            DdrCmdKind::Activate { bank, row } => self.process_activate(cycle, bank, row),
            DdrCmdKind::Read {
                bank,
                column,
                autoprecharge,
            } => self.process_read(cycle, bank, column, autoprecharge),
            DdrCmdKind::Write {
                bank,
                column,
                burst,
                autoprecharge,
            } => self.process_write(cycle, bank, column, burst, autoprecharge),
            DdrCmdKind::Precharge { bank: BankSel::Bank(b) } => self.process_precharge(cycle, b),
            DdrCmdKind::Precharge { bank: BankSel::All } => {
                for bank in 0..self.banks.len() as u32 {
                    self.process_precharge(cycle, bank);
                }
            }
            DdrCmdKind::Dummy => self.process_dummy(cycle, cmd.constraint),
        }
    }

    fn process_activate(&mut self, cycle: u64, bank: u32, row: u32) {
        self.check_bank(cycle, bank, "ACTIVATE");
        self.stats.activate_commands += 1;

        match self.bank_state[bank as usize].state {
            ModBankState::Idle => {}
            ModBankState::Precharging => {
                self.fatal(cycle, &format!("PreToAct: bank {} is still precharging", bank))
            }
            _ => self.fatal(
                cycle,
                &format!("ActWithOpenRow: bank {} is not idle, cannot be activated", bank),
            ),
        }
        if self.last_activate_end != 0
            && self.last_activate_start + u64::from(self.timing.t_rrd) > cycle
        {
            self.fatal(cycle, "ActToAct: tRRD violated between two ACTIVATE commands");
        }

        self.last_activate_bank = bank;
        self.last_activate_start = cycle;
        self.last_activate_end = cycle + u64::from(self.timing.t_rcd);

        self.banks[bank as usize].activate(row);
        let bstate = &mut self.bank_state[bank as usize];
        bstate.state = ModBankState::Activating;
        bstate.end_cycle = self.last_activate_end;
    }

    fn process_read(&mut self, cycle: u64, bank: u32, column: u32, autoprecharge: bool) {
        self.check_bank(cycle, bank, "READ");
        let cas = u64::from(self.timing.cas_latency);

        let state = self.bank_state[bank as usize].state;
        if state != ModBankState::Active && state != ModBankState::Reading {
            self.fatal(
                cycle,
                &format!("NoActWithRead: bank {} can only be read in Active or Reading state", bank),
            );
        }
        if self.bank_state[bank as usize].autoprecharge {
            self.fatal(cycle, "AutoPrechargeRead: previous access with autoprecharge pending");
        }
        if self.last_write_end != 0 && self.last_write_end + u64::from(self.timing.t_wtr) > cycle {
            self.fatal(cycle, "WriteToRead: write to read delay violated");
        }
        if let Some(&(due, _)) = self.readout.back() {
            if due > cycle + cas {
                self.fatal(cycle, "DataBusConflict: readout collision between two reads");
            }
        }

        for i in 0..u64::from(self.burst_transmission_time) {
            self.schedule_pin(cycle, cycle + i + cas, PinUse::ReadData);
        }

        self.last_read_bank = bank;
        self.last_read_start = cycle;
        self.last_read_end = cycle + cas + u64::from(self.burst_transmission_time);

        let end = self.last_read_end;
        let bstate = &mut self.bank_state[bank as usize];
        bstate.state = ModBankState::Reading;
        bstate.end_cycle = end;
        bstate.autoprecharge = autoprecharge;

        let burst = self.banks[bank as usize].read(column, self.burst_length);
        self.readout.push_back((end, burst));
    }

    fn process_write(
        &mut self,
        cycle: u64,
        bank: u32,
        column: u32,
        burst: DdrBurst,
        autoprecharge: bool,
    ) {
        self.check_bank(cycle, bank, "WRITE");
        let wl = u64::from(self.timing.write_latency);

        if column >= self.banks[bank as usize].columns() {
            self.fatal(cycle, &format!("WRITE column {} out of bounds", column));
        }
        if self.last_write_end != 0 && self.last_write_end > cycle + wl {
            self.fatal(cycle, "DataBusConflict: write collision with a previous write");
        }
        if self.last_read_end != 0 && self.last_read_end > cycle + wl {
            self.fatal(cycle, "DataBusConflict: write collision with a previous read");
        }
        if self.last_read_end != 0 && cycle + wl < self.last_read_end + u64::from(self.timing.t_rtw) {
            self.fatal(
                cycle,
                &format!(
                    "ReadToWrite: data pins must stay idle for tRTW={} cycles after read data",
                    self.timing.t_rtw
                ),
            );
        }
        match self.bank_state[bank as usize].state {
            ModBankState::Activating => {
                self.fatal(cycle, &format!("ActToWrite: bank {} row is still opening", bank))
            }
            ModBankState::Idle | ModBankState::Precharging => self.fatal(
                cycle,
                &format!("NoActWithWrite: bank {} has no open row to write", bank),
            ),
            _ => {}
        }
        if self.bank_state[bank as usize].autoprecharge {
            self.fatal(cycle, "AutoPrechargeWrite: previous access with autoprecharge pending");
        }

        for i in 0..u64::from(self.burst_transmission_time) {
            self.schedule_pin(cycle, cycle + i + wl, PinUse::WriteData);
        }

        self.last_write_bank = bank;
        self.last_write_start = cycle;
        self.last_write_end = cycle + wl + u64::from(self.burst_transmission_time);

        let end = self.last_write_end;
        let bstate = &mut self.bank_state[bank as usize];
        bstate.state = ModBankState::Writing;
        bstate.end_cycle = end;
        bstate.last_write_end = end;
        bstate.autoprecharge = autoprecharge;

        self.banks[bank as usize].write(column, &burst);
        self.readin.push_back(end);
    }

    fn process_precharge(&mut self, cycle: u64, bank: u32) {
        self.check_bank(cycle, bank, "PRECHARGE");
        self.stats.precharge_commands += 1;

        if self.bank_state[bank as usize].autoprecharge {
            // the pending autoprecharge already covers this precharge
            return;
        }

        let state = self.bank_state[bank as usize].state;
        // Write recovery also covers the Writing state and must be tested
        // before the Idle/Precharging no-op cases.
        if self.bank_state[bank as usize].last_write_end != 0
            && self.bank_state[bank as usize].last_write_end + u64::from(self.timing.t_wr) > cycle
        {
            self.fatal(cycle, "WriteToPre: write to precharge delay violated");
        }

        match state {
            ModBankState::Idle | ModBankState::Precharging => return, // no-op
            ModBankState::Activating => {
                self.fatal(cycle, &format!("ActToPre: bank {} is being activated", bank))
            }
            ModBankState::Reading => {
                if self.bank_state[bank as usize].end_cycle > cycle + u64::from(self.timing.t_rp) {
                    self.fatal(cycle, "ReadToPre: read to precharge delay violated");
                }
            }
            ModBankState::Active | ModBankState::Writing => {}
        }

        let bstate = &mut self.bank_state[bank as usize];
        bstate.state = ModBankState::Precharging;
        bstate.end_cycle = cycle + u64::from(self.timing.t_rp);
    }

    fn process_dummy(&mut self, cycle: u64, constraint: IssueConstraint) {
        let reading = self.last_read_end != 0 && self.last_read_end > cycle;
        let writing = self.last_write_end != 0 && self.last_write_end > cycle;
        if !(reading || writing) {
            return; // the bypass constraint set during preprocessing applies
        }
        // The pins are busy now; the annotated gap becomes visible after
        // the latency of the operation the constraint refers to.
        let offset = match constraint {
            IssueConstraint::ReadToWrite | IssueConstraint::ActToWrite => {
                u64::from(self.timing.write_latency)
            }
            IssueConstraint::ActToRead => u64::from(self.timing.cas_latency),
            _ => 0,
        };
        if offset != 0 {
            self.schedule_pin(cycle, cycle + offset, PinUse::Constraint(constraint));
        }
    }

    fn schedule_pin(&mut self, cycle: u64, due: u64, item: PinUse) {
        if let Some(&(back_due, _)) = self.pins.back() {
            if back_due >= due {
                self.fatal(
                    cycle,
                    &format!(
                        "data-pin conflict: slot at cycle {} already taken at cycle {}",
                        due, back_due
                    ),
                );
            }
        }
        self.pins.push_back((due, item));
    }

    fn check_bank(&self, cycle: u64, bank: u32, what: &str) {
        if (bank as usize) >= self.banks.len() {
            self.fatal(cycle, &format!("{} bank identifier {} too high", what, bank));
        }
    }

    /// Direct storage access with no timing effect
    ///
    /// Applies the data (and optional word-granular write mask) burst by
    /// burst at the given location, leaving the bank state untouched.
    pub fn preload(&mut self, bank: u32, row: u32, start_col: u32, data: &[u8], mask: Option<&[u32]>) {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        let the_bank = &mut self.banks[bank as usize];
        let old_active = the_bank.active_row();
        the_bank.activate(row);

        let burst_bytes = (4 * self.burst_length) as usize;
        let burst_len = self.burst_length as usize;
        let full_bursts = data.len() / burst_bytes;
        let mut col = start_col;

        for i in 0..full_bursts {
            let mut burst = DdrBurst::new(self.burst_length);
            burst.fill_bytes(&data[burst_bytes * i..burst_bytes * (i + 1)]);
            if let Some(mask) = mask {
                burst.apply_word_mask(&mask[burst_len * i..burst_len * (i + 1)]);
            }
            the_bank.write(col, &burst);
            col += self.burst_length;
        }

        let tail = data.len() % burst_bytes;
        if tail != 0 {
            let mut burst = DdrBurst::new(self.burst_length);
            burst.fill_bytes(&data[burst_bytes * full_bursts..]);
            if let Some(mask) = mask {
                let words = tail / 4;
                burst.apply_word_mask(&mask[burst_len * full_bursts..burst_len * full_bursts + words]);
            }
            the_bank.write(col, &burst);
        }

        match old_active {
            Some(row) => the_bank.activate(row),
            None => the_bank.deactivate(),
        }
    }

    /// Reads raw bytes from a bank into `out` with no timing effect
    pub fn read_data(&self, bank: u32, row: u32, start_col: u32, bytes: u32, out: &mut Vec<u8>) {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        self.banks[bank as usize].read_raw(row, start_col, bytes, out);
    }

    /// Writes raw bytes into a bank with no timing effect
    pub fn write_data(&mut self, bank: u32, row: u32, start_col: u32, data: &[u8]) {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        self.banks[bank as usize].write_raw(row, start_col, data);
    }

    fn bank_summary(&self) -> String {
        let mut out = String::new();
        for (i, bstate) in self.bank_state.iter().enumerate() {
            let _ = write!(out, "b[{}]={}", i, bstate.state.name());
            if let Some(row) = self.banks[i].active_row() {
                let _ = write!(out, "{}", row);
            }
            if i + 1 < self.bank_state.len() {
                out.push(' ');
            }
        }
        out
    }

    /// Renders the module state and the last received commands
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "DDR module '{}' state at cycle {}:", self.name, self.last_clock);
        for (i, bstate) in self.bank_state.iter().enumerate() {
            let _ = write!(out, " bank {} -> {}", i, bstate.state.name());
            if let Some(row) = self.banks[i].active_row() {
                let _ = write!(out, " row={}", row);
            }
            if bstate.end_cycle > self.last_clock {
                let _ = write!(out, " ({} remaining cycles)", bstate.end_cycle - self.last_clock);
            }
            if bstate.autoprecharge {
                out.push_str(" [autoprecharge]");
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            " last activate [bank={}] start={} end={}",
            self.last_activate_bank, self.last_activate_start, self.last_activate_end
        );
        let _ = writeln!(
            out,
            " last read  [bank={}] start={} end={}",
            self.last_read_bank, self.last_read_start, self.last_read_end
        );
        let _ = writeln!(
            out,
            " last write [bank={}] start={} end={}",
            self.last_write_bank, self.last_write_start, self.last_write_end
        );
        let _ = writeln!(out, " latest {} received commands:", self.history.len());
        for (cycle, cmd) in &self.history {
            let _ = writeln!(out, "  cycle {}: {}", cycle, cmd);
        }
        out
    }

    fn fatal(&self, cycle: u64, cause: &str) -> ! {
        eprintln!("{}", self.dump());
        panic!("{}: cycle {}: {}", self.name, cycle, cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> GddrTiming {
        GddrTiming::custom(2, 3, 2, 2, 3, 4, 5, 2)
    }

    fn module() -> (DdrModule, Signal<DdrCommand>, Signal<DdrBurst>) {
        (
            DdrModule::new("DDRModule0", 4, 2, 8, 16, 8, timing()),
            Signal::new("DDRModuleRequest", 1),
            Signal::new("DDRModuleReply", 1),
        )
    }

    fn run(
        module: &mut DdrModule,
        cmd: &mut Signal<DdrCommand>,
        reply: &mut Signal<DdrBurst>,
        from: u64,
        to: u64,
    ) -> Vec<(u64, DdrBurst)> {
        let mut bursts = Vec::new();
        for cycle in from..to {
            module.clock(cycle, cmd, reply);
            if let Some(b) = reply.read(cycle) {
                bursts.push((cycle, b));
            }
        }
        bursts
    }

    #[test]
    fn activate_write_read_round_trip() {
        let (mut module, mut cmd, mut reply) = module();

        cmd.write(0, DdrCommand::activate(0, 3));
        module.clock(1, &mut cmd, &mut reply);
        assert!(reply.read(1).is_none());

        // tRCD = 3: write accepted from cycle 4 on
        run(&mut module, &mut cmd, &mut reply, 2, 4);
        let mut burst = DdrBurst::new(4);
        burst.fill_bytes(&[0x10; 16]);
        cmd.write(4, DdrCommand::write(0, 0, burst, false));
        run(&mut module, &mut cmd, &mut reply, 4, 12);

        // write end = 5 + WL 2 + 2 = 9, tWTR 2 -> read from cycle 11
        cmd.write(11, DdrCommand::read(0, 0, false));
        let bursts = run(&mut module, &mut cmd, &mut reply, 11, 25);
        assert_eq!(bursts.len(), 1);
        // read posted at 12, readout end = 12 + CAS 5 + 2 = 19, one cycle
        // of reply-signal transport
        assert_eq!(bursts[0].0, 20);
        assert_eq!(bursts[0].1.to_bytes(), vec![0x10; 16]);
    }

    #[test]
    #[should_panic(expected = "NoActWithRead")]
    fn read_without_activate_is_fatal() {
        let (mut module, mut cmd, mut reply) = module();
        cmd.write(0, DdrCommand::read(0, 0, false));
        module.clock(1, &mut cmd, &mut reply);
    }

    #[test]
    #[should_panic(expected = "ActWithOpenRow")]
    fn double_activate_is_fatal() {
        let (mut module, mut cmd, mut reply) = module();
        cmd.write(0, DdrCommand::activate(0, 0));
        run(&mut module, &mut cmd, &mut reply, 1, 8);
        cmd.write(8, DdrCommand::activate(0, 1));
        module.clock(9, &mut cmd, &mut reply);
    }

    #[test]
    #[should_panic(expected = "ActToAct")]
    fn trrd_violation_is_fatal() {
        let (mut module, mut cmd, mut reply) = module();
        cmd.write(0, DdrCommand::activate(0, 0));
        module.clock(1, &mut cmd, &mut reply);
        cmd.write(1, DdrCommand::activate(1, 0));
        module.clock(2, &mut cmd, &mut reply);
    }

    #[test]
    fn autoprecharged_read_leaves_the_bank_idle() {
        let (mut module, mut cmd, mut reply) = module();
        cmd.write(0, DdrCommand::activate(0, 2));
        run(&mut module, &mut cmd, &mut reply, 1, 5);
        cmd.write(5, DdrCommand::read(0, 0, true));
        // tRP + 1 = 5 <= CAS + transmission = 7: idle right at read end
        run(&mut module, &mut cmd, &mut reply, 5, 20);
        assert_eq!(module.bank_state[0].state, ModBankState::Idle);
        assert_eq!(module.bank(0).active_row(), None);
    }

    #[test]
    fn preload_is_visible_to_a_timed_read() {
        let (mut module, mut cmd, mut reply) = module();
        let payload: Vec<u8> = (0u8..16).collect();
        module.preload(1, 4, 0, &payload, None);

        cmd.write(0, DdrCommand::activate(1, 4));
        run(&mut module, &mut cmd, &mut reply, 1, 4);
        cmd.write(4, DdrCommand::read(1, 0, false));
        let bursts = run(&mut module, &mut cmd, &mut reply, 4, 20);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].1.to_bytes(), payload);
    }

    #[test]
    fn precharge_all_closes_every_open_bank() {
        let (mut module, mut cmd, mut reply) = module();
        cmd.write(0, DdrCommand::activate(0, 1));
        run(&mut module, &mut cmd, &mut reply, 1, 4);
        cmd.write(4, DdrCommand::activate(1, 2));
        run(&mut module, &mut cmd, &mut reply, 4, 10);
        cmd.write(10, DdrCommand::precharge_all());
        run(&mut module, &mut cmd, &mut reply, 10, 16);
        assert_eq!(module.bank_state[0].state, ModBankState::Idle);
        assert_eq!(module.bank_state[1].state, ModBankState::Idle);
    }

    #[test]
    fn idle_cycles_are_accounted() {
        let (mut module, mut cmd, mut reply) = module();
        run(&mut module, &mut cmd, &mut reply, 0, 10);
        assert_eq!(module.stats().idle_cycles, 10);
    }
}
