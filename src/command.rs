//! DDR command port vocabulary

use std::fmt;

use crate::burst::DdrBurst;

/// Bank addressed by a PRECHARGE command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankSel {
    /// A single bank
    Bank(u32),
    /// Every bank of the module
    All,
}

/// Reason a candidate DDR command cannot be issued in the current cycle.
///
/// The token is also carried on DUMMY commands and opportunistic commands
/// so the data-pin trace can attribute otherwise idle cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueConstraint {
    /// No constraint, the command can be issued
    None,
    /// tRRD between two ACTIVATEs
    ActToAct,
    /// The target bank is still activating (tRCD) before a READ
    ActToRead,
    /// The target bank is still activating (tRCD) before a WRITE
    ActToWrite,
    /// The target bank is still activating before a PRECHARGE
    ActToPre,
    /// tRTW idle gap between read data and write data
    ReadToWrite,
    /// tRP would be violated precharging a reading bank
    ReadToPre,
    /// tWTR after the last write burst
    WriteToRead,
    /// tWR write recovery before a PRECHARGE
    WriteToPre,
    /// ACTIVATE sent to a bank that is still precharging
    PreToAct,
    /// The data pins are occupied by an in-flight burst
    DataBusConflict,
    /// READ against a bank with no open row
    NoActWithRead,
    /// WRITE against a bank with no open row
    NoActWithWrite,
    /// ACTIVATE against a bank that already has an open row
    ActWithOpenRow,
    /// READ while a previous autoprecharge is still pending
    AutoPrechargeRead,
    /// WRITE while a previous autoprecharge is still pending
    AutoPrechargeWrite,
    /// Command does not make sense in the bank's current state
    Unknown,
}

impl fmt::Display for IssueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            IssueConstraint::None => "None",
            IssueConstraint::ActToAct => "ActToAct",
            IssueConstraint::ActToRead => "ActToRead",
            IssueConstraint::ActToWrite => "ActToWrite",
            IssueConstraint::ActToPre => "ActToPre",
            IssueConstraint::ReadToWrite => "ReadToWrite",
            IssueConstraint::ReadToPre => "ReadToPre",
            IssueConstraint::WriteToRead => "WriteToRead",
            IssueConstraint::WriteToPre => "WriteToPre",
            IssueConstraint::PreToAct => "PreToAct",
            IssueConstraint::DataBusConflict => "DataBusConflict",
            IssueConstraint::NoActWithRead => "NoActWithRead",
            IssueConstraint::NoActWithWrite => "NoActWithWrite",
            IssueConstraint::ActWithOpenRow => "ActWithOpenRow",
            IssueConstraint::AutoPrechargeRead => "AutoPrechargeRead",
            IssueConstraint::AutoPrechargeWrite => "AutoPrechargeWrite",
            IssueConstraint::Unknown => "Unknown",
        };
        f.write_str(token)
    }
}

/// Primitive DDR command kinds
#[derive(Clone, Debug, PartialEq)]
pub enum DdrCmdKind {
    Activate {
        bank: u32,
        row: u32,
    },
    Read {
        bank: u32,
        column: u32,
        autoprecharge: bool,
    },
    Write {
        bank: u32,
        column: u32,
        burst: DdrBurst,
        autoprecharge: bool,
    },
    Precharge {
        bank: BankSel,
    },
    /// Carries only a protocol-constraint annotation, never stored
    Dummy,
}

/// A command on the scheduler-to-module port: the primitive command plus an
/// optional protocol-constraint tag explaining an otherwise idle cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct DdrCommand {
    pub kind: DdrCmdKind,
    pub constraint: IssueConstraint,
}

impl DdrCommand {
    pub fn activate(bank: u32, row: u32) -> DdrCommand {
        DdrCommand {
            kind: DdrCmdKind::Activate { bank, row },
            constraint: IssueConstraint::None,
        }
    }

    pub fn read(bank: u32, column: u32, autoprecharge: bool) -> DdrCommand {
        DdrCommand {
            kind: DdrCmdKind::Read {
                bank,
                column,
                autoprecharge,
            },
            constraint: IssueConstraint::None,
        }
    }

    pub fn write(bank: u32, column: u32, burst: DdrBurst, autoprecharge: bool) -> DdrCommand {
        DdrCommand {
            kind: DdrCmdKind::Write {
                bank,
                column,
                burst,
                autoprecharge,
            },
            constraint: IssueConstraint::None,
        }
    }

    pub fn precharge(bank: u32) -> DdrCommand {
        DdrCommand {
            kind: DdrCmdKind::Precharge {
                bank: BankSel::Bank(bank),
            },
            constraint: IssueConstraint::None,
        }
    }

    pub fn precharge_all() -> DdrCommand {
        DdrCommand {
            kind: DdrCmdKind::Precharge { bank: BankSel::All },
            constraint: IssueConstraint::None,
        }
    }

    pub fn dummy(constraint: IssueConstraint) -> DdrCommand {
        DdrCommand {
            kind: DdrCmdKind::Dummy,
            constraint,
        }
    }

    /// Tags the command with the constraint that stalled the command it
    /// replaces on the port
    pub fn with_constraint(mut self, constraint: IssueConstraint) -> DdrCommand {
        self.constraint = constraint;
        self
    }

    /// Bank addressed by the command, if it addresses a single one
    pub fn bank(&self) -> Option<u32> {
        match self.kind {
            DdrCmdKind::Activate { bank, .. }
            | DdrCmdKind::Read { bank, .. }
            | DdrCmdKind::Write { bank, .. } => Some(bank),
            DdrCmdKind::Precharge {
                bank: BankSel::Bank(b),
            } => Some(b),
            DdrCmdKind::Precharge { bank: BankSel::All } => None,
            DdrCmdKind::Dummy => None,
        }
    }
}

impl fmt::Display for DdrCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DdrCmdKind::Activate { bank, row } => write!(f, "ACT bank={} row={}", bank, row),
            DdrCmdKind::Read {
                bank,
                column,
                autoprecharge,
            } => write!(
                f,
                "READ{} bank={} col={}",
                if *autoprecharge { "A" } else { "" },
                bank,
                column
            ),
            DdrCmdKind::Write {
                bank,
                column,
                burst,
                autoprecharge,
            } => write!(
                f,
                "WRITE{} bank={} col={} bytes={}",
                if *autoprecharge { "A" } else { "" },
                bank,
                column,
                4 * burst.len()
            ),
            DdrCmdKind::Precharge {
                bank: BankSel::Bank(b),
            } => write!(f, "PRE bank={}", b),
            DdrCmdKind::Precharge { bank: BankSel::All } => write!(f, "PRE bank=ALL"),
            DdrCmdKind::Dummy => write!(f, "DUMMY constraint={}", self.constraint),
        }
    }
}
