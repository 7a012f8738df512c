//! Cycle-accurate simulation model of a GPU GDDR memory controller
//!
//! The controller sits between the on-chip clients of a GPU (command
//! processor, streamers, ROPs, texture units, display controller) and a
//! pool of simulated GDDR modules. Client requests are split into
//! channel transactions, queued per channel (or per bank), scheduled
//! under a page policy and the full GDDR3 timing rule set, broken into
//! primitive ACTIVATE / READ / WRITE / PRECHARGE commands, and their
//! data bursts are transferred cycle by cycle across the shared data
//! pins of each module.
//!
//! # Construction
//!
//! The controller is built from a [`ControllerConfig`]; timing comes from
//! a named device profile or a custom [`GddrTiming`] tuple.
//!
//! ```no_run
//! use gddr_mc::devices::hy5rs123235fp_16::Hy5rs123235fp;
//! use gddr_mc::{ControllerConfig, GddrChip, MemoryController};
//!
//! let mut config = ControllerConfig::default();
//! config.timing = Hy5rs123235fp::TIMING;
//! let mut mc = MemoryController::new(config);
//! ```
//!
//! # Simulation
//!
//! One call to [`MemoryController::clock`] advances the whole model by
//! one cycle. Clients attach through [`ClientPort`]s and must gate their
//! submissions on the accept token broadcast each cycle.
//!
//! ```no_run
//! # use gddr_mc::*;
//! # let mut mc = MemoryController::new(ControllerConfig::default());
//! let src = ClientSource::new(GpuUnit::TextureUnit, 0);
//! for cycle in 0..1000u64 {
//!     let port = mc.port(GpuUnit::TextureUnit, 0);
//!     if cycle == 0 && port.mem_state().accepts_read() {
//!         port.send(cycle, ClientTransaction::read_req(1, src, 0x100, 64));
//!     }
//!     mc.clock(cycle);
//!     if let Some(reply) = mc.port(GpuUnit::TextureUnit, 0).take_reply(cycle) {
//!         // reply.op is ClientOp::ReadData with the 64 bytes
//!     }
//! }
//! ```
//!
//! # Failure semantics
//!
//! Every protocol violation, queue overflow, address-range error and
//! invalid configuration is fatal: the offending component dumps its
//! state and panics with the cycle and a one-line cause. Only the
//! snapshot file I/O returns a [`SnapshotError`].

// rustc lints.
#![warn(
    bare_trait_objects,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]

#[macro_use]
mod macros;

mod bank;
pub use bank::DdrBank;

mod burst;
pub use burst::{DdrBurst, MAX_BURST_LENGTH};

mod client;
pub use client::{
    ClientOp, ClientSource, ClientTransaction, GpuUnit, MemState, ADDRESS_SPACE_MASK,
    GPU_ADDRESS_SPACE, SPACE_OFFSET_MASK, SYSTEM_ADDRESS_SPACE,
};

mod command;
pub use command::{BankSel, DdrCmdKind, DdrCommand, IssueConstraint};

mod controller;
pub use controller::{
    BankQueueSelection, BusWidths, ClientPort, ClockDomain, ControllerConfig, ControllerStats,
    MemoryController, SplitterKind, SYSTEM_MEMORY_BUSES,
};

pub mod devices;

mod module;
pub use module::{DdrModule, DdrModuleStats};

mod module_state;
pub use module_state::{
    BankState, CommandId, DdrModuleState, ACTIVATE_BIT, PRECHARGE_BIT, READ_BIT, WRITE_BIT,
};

mod request;
pub use request::{MemReqState, MemoryRequest, RequestBuffer, RequestId};

mod sched;
pub use sched::{
    Accept, ActiveManagerMode, BankInfo, BankSelectionPolicy, ChannelScheduler, ChannelWires,
    DependencyQueue, ManagerOrder, PagePolicy, SchedulerConfig, SchedulerKind, SchedulerState,
    SchedulerStats, SwitchMode, SwitchModePolicy,
};

mod signal;
pub use signal::Signal;

mod snapshot;
pub use snapshot::{SnapshotError, GPU_SNAPSHOT_FILE, SYSTEM_SNAPSHOT_FILE};

mod splitter;
pub use splitter::{
    AddressInfo, BitmaskSplitter, InterleavedSplitter, RequestSplitter, SplitPiece,
};

mod timing;
pub use timing::{GddrChip, GddrTiming};

mod transaction;
pub use transaction::ChannelTransaction;
