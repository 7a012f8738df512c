//! Query mirror of a DDR module used by channel schedulers

use crate::command::IssueConstraint;
use crate::timing::GddrTiming;

/// Commands the state view can be queried about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandId {
    Activate,
    Precharge,
    Read,
    Write,
}

/// Bit set in [`DdrModuleState::accepted_commands`] when ACTIVATE can issue
pub const ACTIVATE_BIT: u8 = 0x1;
/// Bit set when PRECHARGE can issue
pub const PRECHARGE_BIT: u8 = 0x2;
/// Bit set when READ can issue
pub const READ_BIT: u8 = 0x4;
/// Bit set when WRITE can issue
pub const WRITE_BIT: u8 = 0x8;

/// Bank states of the GDDR protocol machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankState {
    /// No page open (after a completed precharge)
    Idle,
    /// Opening a page
    Activating,
    /// A read or write can be issued
    Active,
    /// Performing a read
    Reading,
    /// Performing a write
    Writing,
    /// Performing a precharge
    Precharging,
}

#[derive(Clone, Debug)]
struct BankMirror {
    state: BankState,
    end_cycle: u64,
    last_write_end: u64,
    open_row: Option<u32>,
    autoprecharge: bool,
}

/// Read-only mirror of a [`crate::DdrModule`]'s timing state machine.
///
/// The scheduler advances the mirror once per cycle with
/// [`DdrModuleState::update_state`] and records every command it issues
/// through the `post_*` methods; the mirror never issues commands on its
/// own. Queries answer whether a candidate command would violate a GDDR
/// timing rule and name the violated constraint.
#[derive(Debug)]
pub struct DdrModuleState {
    cycle: u64,
    banks: Vec<BankMirror>,
    timing: GddrTiming,
    burst_length: u32,
    burst_transmission_time: u32,

    last_activate_start: u64,
    last_activate_end: u64,
    last_read_end: u64,
    last_write_end: u64,
}

impl DdrModuleState {
    pub fn new(
        banks: u32,
        burst_length: u32,
        burst_bytes_per_cycle: u32,
        timing: GddrTiming,
    ) -> DdrModuleState {
        assert!(banks > 0, "number of banks cannot be 0");
        assert!(
            burst_bytes_per_cycle > 0 && (4 * burst_length) % burst_bytes_per_cycle == 0,
            "burst bytes per cycle must divide the burst byte size"
        );
        DdrModuleState {
            cycle: 0,
            banks: (0..banks)
                .map(|_| BankMirror {
                    state: BankState::Idle,
                    end_cycle: 0,
                    last_write_end: 0,
                    open_row: None,
                    autoprecharge: false,
                })
                .collect(),
            timing,
            burst_length,
            burst_transmission_time: (4 * burst_length) / burst_bytes_per_cycle,
            last_activate_start: 0,
            last_activate_end: 0,
            last_read_end: 0,
            last_write_end: 0,
        }
    }

    pub fn banks(&self) -> u32 {
        self.banks.len() as u32
    }

    pub fn burst_length(&self) -> u32 {
        self.burst_length
    }

    /// Cycles from a READ issue until its data has fully crossed the pins
    pub fn read_burst_cycles(&self) -> u32 {
        self.timing.cas_latency + self.burst_transmission_time
    }

    /// Cycles from a WRITE issue until its data has fully crossed the pins
    pub fn write_burst_cycles(&self) -> u32 {
        self.timing.write_latency + self.burst_transmission_time
    }

    pub fn state(&self, bank: u32) -> BankState {
        self.bank(bank).state
    }

    /// Open row of `bank` in the current cycle
    pub fn active_row(&self, bank: u32) -> Option<u32> {
        self.bank(bank).open_row
    }

    /// Cycles remaining until the bank's current state changes passively.
    /// Returns 0 for states that only change on a command.
    pub fn remaining_cycles(&self, bank: u32) -> u32 {
        let end = self.bank(bank).end_cycle;
        if self.cycle >= end {
            return 0;
        }
        assert!(
            end < self.cycle + 1000,
            "bank end cycle runs {} cycles ahead of the mirror",
            end - self.cycle
        );
        (end - self.cycle) as u32
    }

    fn bank(&self, bank: u32) -> &BankMirror {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        &self.banks[bank as usize]
    }

    /// Bitmask over {ACTIVATE, PRECHARGE, READ, WRITE} accepted this cycle.
    /// READ/WRITE bits assume the target row is the open row.
    pub fn accepted_commands(&self, bank: u32) -> u8 {
        let mut mask = 0;
        if self.can_issue(bank, CommandId::Activate) {
            mask |= ACTIVATE_BIT;
        }
        if self.can_issue(bank, CommandId::Read) {
            mask |= READ_BIT;
        }
        if self.can_issue(bank, CommandId::Write) {
            mask |= WRITE_BIT;
        }
        if self.can_issue(bank, CommandId::Precharge) {
            mask |= PRECHARGE_BIT;
        }
        mask
    }

    pub fn can_issue(&self, bank: u32, cmd: CommandId) -> bool {
        self.issue_constraint(bank, cmd) == IssueConstraint::None
    }

    /// Names the first timing rule a candidate command would violate, or
    /// [`IssueConstraint::None`] when it can be issued. The check order is
    /// observable and fixed: data-bus conflicts are reported before
    /// per-bank state problems so bus occupancy can be attributed.
    pub fn issue_constraint(&self, bank: u32, cmd: CommandId) -> IssueConstraint {
        let mirror = self.bank(bank);
        let state = mirror.state;
        let t = &self.timing;

        match cmd {
            CommandId::Activate => {
                if state == BankState::Precharging {
                    return IssueConstraint::PreToAct;
                }
                if self.last_activate_end != 0 && self.last_activate_start + u64::from(t.t_rrd) > self.cycle {
                    return IssueConstraint::ActToAct;
                }
                if state != BankState::Idle {
                    return IssueConstraint::ActWithOpenRow;
                }
                IssueConstraint::None
            }
            CommandId::Read => {
                if self.last_read_end != 0 && self.last_read_end > self.cycle + u64::from(t.cas_latency) {
                    return IssueConstraint::DataBusConflict;
                }
                if self.any_bank(BankState::Writing) {
                    return IssueConstraint::DataBusConflict;
                }
                if state == BankState::Activating {
                    return IssueConstraint::ActToRead;
                }
                if state == BankState::Idle || state == BankState::Precharging {
                    return IssueConstraint::NoActWithRead;
                }
                if mirror.autoprecharge {
                    return IssueConstraint::AutoPrechargeRead;
                }
                if self.last_write_end != 0 && self.last_write_end + u64::from(t.t_wtr) > self.cycle {
                    return IssueConstraint::WriteToRead;
                }
                IssueConstraint::None
            }
            CommandId::Write => {
                let wl = u64::from(t.write_latency);
                if self.last_write_end != 0 && self.last_write_end > self.cycle + wl {
                    return IssueConstraint::DataBusConflict;
                }
                if self.last_read_end != 0 && self.cycle + wl < self.last_read_end {
                    return IssueConstraint::DataBusConflict;
                }
                if self.last_read_end != 0 && self.cycle + wl < self.last_read_end + u64::from(t.t_rtw) {
                    return IssueConstraint::ReadToWrite;
                }
                if state == BankState::Activating {
                    return IssueConstraint::ActToWrite;
                }
                if state == BankState::Idle || state == BankState::Precharging {
                    return IssueConstraint::NoActWithWrite;
                }
                if mirror.autoprecharge {
                    return IssueConstraint::AutoPrechargeWrite;
                }
                IssueConstraint::None
            }
            CommandId::Precharge => {
                // The write-recovery check also covers the Writing state
                // and must run before the Idle/Precharging no-op cases.
                if mirror.last_write_end != 0 && mirror.last_write_end + u64::from(t.t_wr) > self.cycle {
                    return IssueConstraint::WriteToPre;
                }
                if state == BankState::Activating {
                    return IssueConstraint::ActToPre;
                }
                if state == BankState::Reading && mirror.end_cycle > self.cycle + u64::from(t.t_rp) {
                    return IssueConstraint::ReadToPre;
                }
                if state != BankState::Active
                    && state != BankState::Reading
                    && state != BankState::Idle
                    && state != BankState::Precharging
                {
                    return IssueConstraint::Unknown;
                }
                IssueConstraint::None
            }
        }
    }

    fn any_bank(&self, state: BankState) -> bool {
        self.banks.iter().any(|b| b.state == state)
    }

    /// Advances the mirror to `cycle`, applying passive bank transitions.
    /// Must be called before any query or post in that cycle.
    pub fn update_state(&mut self, cycle: u64) {
        self.cycle = cycle;
        for bank in 0..self.banks.len() {
            self.update_bank_state(cycle, bank);
        }
    }

    fn update_bank_state(&mut self, cycle: u64, bank: usize) {
        let t_rp = u64::from(self.timing.t_rp);
        let t_wr = u64::from(self.timing.t_wr);
        let read_tail = u64::from(self.timing.cas_latency + self.burst_transmission_time);
        let mirror = &mut self.banks[bank];

        if mirror.state == BankState::Idle || mirror.state == BankState::Active {
            return;
        }
        if cycle < mirror.end_cycle {
            return;
        }

        let mut extra_delay = 0;
        let mut push_end_cycle = false;

        match mirror.state {
            BankState::Activating => mirror.state = BankState::Active,
            BankState::Reading => {
                if mirror.autoprecharge {
                    if t_rp + 1 <= read_tail {
                        // precharge fully overlapped with the read
                        mirror.state = BankState::Idle;
                        mirror.open_row = None;
                    } else {
                        extra_delay = t_rp + 1 - read_tail;
                        if cycle >= mirror.end_cycle + extra_delay {
                            mirror.state = BankState::Idle;
                            mirror.open_row = None;
                        } else {
                            mirror.state = BankState::Precharging;
                            mirror.open_row = None;
                            push_end_cycle = true;
                        }
                    }
                    mirror.autoprecharge = false;
                } else {
                    mirror.state = BankState::Active;
                }
            }
            BankState::Writing => {
                if mirror.autoprecharge {
                    extra_delay = t_wr + t_rp;
                    if cycle >= mirror.end_cycle + extra_delay {
                        mirror.state = BankState::Idle;
                        mirror.open_row = None;
                    } else {
                        mirror.state = BankState::Precharging;
                        mirror.open_row = None;
                        push_end_cycle = true;
                    }
                    mirror.autoprecharge = false;
                } else {
                    mirror.state = BankState::Active;
                }
            }
            BankState::Precharging => mirror.state = BankState::Idle,
            BankState::Idle | BankState::Active => unreachable!(),
        }

        if push_end_cycle {
            mirror.end_cycle = cycle + extra_delay;
        }
    }

    /// Records an issued ACTIVATE
    ///
    /// # Panics
    ///
    /// Panics on the same protocol violations the module itself rejects
    pub fn post_activate(&mut self, bank: u32, row: u32) {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        assert!(
            self.banks[bank as usize].state == BankState::Idle,
            "bank {} is not idle, cannot be activated",
            bank
        );
        assert!(
            !(self.last_activate_end != 0
                && self.last_activate_start + u64::from(self.timing.t_rrd) > self.cycle),
            "ActToAct: tRRD violated between two ACTIVATE commands"
        );

        self.last_activate_start = self.cycle;
        self.last_activate_end = self.cycle + u64::from(self.timing.t_rcd);

        let mirror = &mut self.banks[bank as usize];
        mirror.open_row = Some(row);
        mirror.state = BankState::Activating;
        mirror.end_cycle = self.last_activate_end;
    }

    /// Records an issued READ
    pub fn post_read(&mut self, bank: u32, autoprecharge: bool) {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        let state = self.banks[bank as usize].state;
        assert!(
            state == BankState::Active || state == BankState::Reading,
            "NoActWithRead: bank {} can only be read in Active or Reading state",
            bank
        );
        assert!(
            !self.banks[bank as usize].autoprecharge,
            "AutoPrechargeRead: previous access with autoprecharge pending"
        );
        assert!(
            !(self.last_write_end != 0
                && self.last_write_end + u64::from(self.timing.t_wtr) > self.cycle),
            "WriteToRead: tWTR violated"
        );
        assert!(
            !(self.last_read_end != 0
                && self.last_read_end > self.cycle + u64::from(self.timing.cas_latency)),
            "DataBusConflict: readout collision between two reads"
        );

        self.last_read_end = self.cycle + u64::from(self.read_burst_cycles());

        let end = self.last_read_end;
        let mirror = &mut self.banks[bank as usize];
        mirror.state = BankState::Reading;
        mirror.end_cycle = end;
        mirror.autoprecharge = autoprecharge;
    }

    /// Records an issued WRITE
    pub fn post_write(&mut self, bank: u32, autoprecharge: bool) {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");
        assert!(
            !self.banks[bank as usize].autoprecharge,
            "AutoPrechargeWrite: previous access with autoprecharge pending"
        );
        let wl = u64::from(self.timing.write_latency);
        assert!(
            !(self.last_read_end != 0
                && self.cycle + wl < self.last_read_end + u64::from(self.timing.t_rtw)),
            "ReadToWrite: data pins must stay idle for tRTW after read data"
        );
        assert!(
            !(self.last_write_end != 0 && self.last_write_end > self.cycle + wl),
            "DataBusConflict: write collision between two writes"
        );

        self.last_write_end = self.cycle + u64::from(self.write_burst_cycles());

        let end = self.last_write_end;
        let mirror = &mut self.banks[bank as usize];
        mirror.state = BankState::Writing;
        mirror.end_cycle = end;
        mirror.last_write_end = end;
        mirror.autoprecharge = autoprecharge;
    }

    /// Records an issued PRECHARGE on one bank
    pub fn post_precharge(&mut self, bank: u32) {
        assert!((bank as usize) < self.banks.len(), "bank identifier too high");

        if self.banks[bank as usize].autoprecharge {
            // the pending autoprecharge already covers this precharge
            return;
        }

        let mirror = &self.banks[bank as usize];
        let state = mirror.state;
        assert!(
            !(mirror.last_write_end != 0
                && mirror.last_write_end + u64::from(self.timing.t_wr) > self.cycle),
            "WriteToPre: tWR violated on bank {}",
            bank
        );

        if state == BankState::Idle || state == BankState::Precharging {
            return; // treated as a no-op
        }
        assert!(
            state != BankState::Activating,
            "ActToPre: bank {} is being activated, cannot be precharged",
            bank
        );
        if state == BankState::Reading {
            assert!(
                mirror.end_cycle <= self.cycle + u64::from(self.timing.t_rp),
                "ReadToPre: tRP violated on bank {}",
                bank
            );
        }

        let end = self.cycle + u64::from(self.timing.t_rp);
        let mirror = &mut self.banks[bank as usize];
        mirror.state = BankState::Precharging;
        mirror.end_cycle = end;
        mirror.open_row = None;
    }

    /// Records an issued PRECHARGE addressed to every bank
    pub fn post_precharge_all(&mut self) {
        for bank in 0..self.banks() {
            self.post_precharge(bank);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> GddrTiming {
        GddrTiming::custom(2, 3, 2, 2, 3, 4, 5, 2)
    }

    fn state() -> DdrModuleState {
        DdrModuleState::new(4, 4, 8, timing())
    }

    #[test]
    fn idle_bank_accepts_only_activate_and_precharge() {
        let mut st = state();
        st.update_state(0);
        assert_eq!(st.accepted_commands(0), ACTIVATE_BIT | PRECHARGE_BIT);
        assert_eq!(st.issue_constraint(0, CommandId::Read), IssueConstraint::NoActWithRead);
        assert_eq!(st.issue_constraint(0, CommandId::Write), IssueConstraint::NoActWithWrite);
    }

    #[test]
    fn activate_walks_through_trcd() {
        let mut st = state();
        st.update_state(0);
        st.post_activate(0, 5);
        assert_eq!(st.state(0), BankState::Activating);
        assert_eq!(st.issue_constraint(0, CommandId::Read), IssueConstraint::ActToRead);

        st.update_state(3);
        assert_eq!(st.state(0), BankState::Active);
        assert_eq!(st.active_row(0), Some(5));
        assert!(st.can_issue(0, CommandId::Read));
    }

    #[test]
    fn trrd_limits_back_to_back_activates() {
        let mut st = state();
        st.update_state(0);
        st.post_activate(0, 1);
        st.update_state(1);
        assert_eq!(st.issue_constraint(1, CommandId::Activate), IssueConstraint::ActToAct);
        st.update_state(2);
        assert!(st.can_issue(1, CommandId::Activate));
    }

    #[test]
    fn write_to_read_needs_twtr() {
        let mut st = state();
        st.update_state(0);
        st.post_activate(0, 0);
        st.update_state(3);
        st.post_write(0, false);
        // write end = 3 + WL(2) + transmission(2) = 7; tWTR = 2
        st.update_state(8);
        assert_eq!(st.issue_constraint(0, CommandId::Read), IssueConstraint::WriteToRead);
        st.update_state(9);
        assert!(st.can_issue(0, CommandId::Read));
    }

    #[test]
    fn precharge_respects_write_recovery() {
        let mut st = state();
        st.update_state(0);
        st.post_activate(0, 0);
        st.update_state(3);
        st.post_write(0, false);
        st.update_state(8);
        assert_eq!(st.issue_constraint(0, CommandId::Precharge), IssueConstraint::WriteToPre);
        // write end 7 + tWR 3
        st.update_state(10);
        assert!(st.can_issue(0, CommandId::Precharge));
    }

    #[test]
    fn autoprecharged_read_overlaps_when_trp_is_short() {
        // tRP + 1 = 5 <= CAS + transmission = 7: straight to Idle
        let mut st = state();
        st.update_state(0);
        st.post_activate(0, 0);
        st.update_state(3);
        st.post_read(0, true);
        st.update_state(3 + 7);
        assert_eq!(st.state(0), BankState::Idle);
        assert_eq!(st.active_row(0), None);
    }

    #[test]
    fn autoprecharged_read_pays_the_residual_trp() {
        // tRP + 1 = 10 > CAS + transmission = 7: 3 residual cycles
        let mut st = DdrModuleState::new(1, 4, 8, GddrTiming::custom(2, 3, 2, 2, 3, 9, 5, 2));
        st.update_state(0);
        st.post_activate(0, 0);
        st.update_state(3);
        st.post_read(0, true);
        st.update_state(10);
        assert_eq!(st.state(0), BankState::Precharging);
        st.update_state(13);
        assert_eq!(st.state(0), BankState::Idle);
    }

    #[test]
    fn autoprecharged_write_closes_after_twr_plus_trp() {
        let mut st = state();
        st.update_state(0);
        st.post_activate(0, 0);
        st.update_state(3);
        st.post_write(0, true);
        // write end 7, extra = tWR 3 + tRP 4
        st.update_state(7);
        assert_eq!(st.state(0), BankState::Precharging);
        st.update_state(14);
        assert_eq!(st.state(0), BankState::Idle);
    }

    #[test]
    #[should_panic(expected = "NoActWithRead")]
    fn posting_a_read_on_an_idle_bank_panics() {
        let mut st = state();
        st.update_state(0);
        st.post_read(0, false);
    }

    #[test]
    fn zero_delay_profile_accepts_immediately() {
        let mut st = DdrModuleState::new(2, 4, 8, GddrTiming::ZERO_DELAY);
        st.update_state(0);
        st.post_activate(0, 0);
        st.update_state(1);
        assert_eq!(st.state(0), BankState::Active);
        assert!(st.can_issue(0, CommandId::Read));
    }
}
