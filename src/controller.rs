//! Memory-controller orchestrator: demultiplexes client buses into the
//! request buffer, splits requests, drives the channel schedulers and
//! their DDR modules, and reassembles read replies

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::client::{ClientOp, ClientSource, ClientTransaction, GpuUnit, MemState, GPU_UNIT_COUNT};
use crate::module::{DdrModule, DdrModuleStats};
use crate::request::{MemReqState, RequestBuffer, RequestId};
use crate::sched::{ChannelScheduler, ChannelWires, SchedulerConfig, SchedulerKind, SchedulerStats};
use crate::signal::Signal;
use crate::splitter::{BitmaskSplitter, InterleavedSplitter, RequestSplitter};
use crate::timing::GddrTiming;
use crate::transaction::ChannelTransaction;

/// Number of buses to system memory: one for reads, one for writes
pub const SYSTEM_MEMORY_BUSES: usize = 2;

const SYSTEM_READ_BUS: usize = 0;
const SYSTEM_WRITE_BUS: usize = 1;

/// Clock domains of the multi-domain entry point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockDomain {
    /// Client buses, buffers and the system-memory path
    Gpu,
    /// Channel schedulers and DDR modules
    Memory,
}

/// Declared bandwidth of each client bus, in bytes per cycle
#[derive(Clone, Copy, Debug)]
pub struct BusWidths {
    pub command_processor: u32,
    pub streamer_fetch: u32,
    pub streamer_loader: u32,
    pub z_stencil_test: u32,
    pub color_write: u32,
    pub display_controller: u32,
    pub texture_unit: u32,
}

impl BusWidths {
    pub fn for_unit(&self, unit: GpuUnit) -> u32 {
        match unit {
            GpuUnit::CommandProcessor => self.command_processor,
            GpuUnit::StreamerFetch => self.streamer_fetch,
            GpuUnit::StreamerLoader => self.streamer_loader,
            GpuUnit::ZStencilTest => self.z_stencil_test,
            GpuUnit::ColorWrite => self.color_write,
            GpuUnit::DisplayController => self.display_controller,
            GpuUnit::TextureUnit => self.texture_unit,
        }
    }
}

impl Default for BusWidths {
    fn default() -> BusWidths {
        BusWidths {
            command_processor: 8,
            streamer_fetch: 8,
            streamer_loader: 8,
            z_stencil_test: 16,
            color_write: 16,
            display_controller: 8,
            texture_unit: 16,
        }
    }
}

/// Address-layout policy of the controller
#[derive(Clone, Debug)]
pub enum SplitterKind {
    /// Channel/bank selector bits at fixed byte-interleaving offsets
    Interleaved {
        channel_interleaving: u32,
        bank_interleaving: u32,
    },
    /// Channel/bank selector bits named explicitly, e.g. `"9 10 11"`
    Bitmask {
        channel_bits: String,
        bank_bits: String,
    },
}

/// How the per-bank channel queues are drained
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankQueueSelection {
    RoundRobin,
    OldestFirst,
}

/// Full parameter set of the memory controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// GPU local memory size in bytes
    pub gpu_memory_size: u32,
    /// Mapped system memory size in bytes
    pub system_memory_size: u32,
    pub memory_channels: u32,
    pub banks_per_channel: u32,
    /// Bytes per bank row
    pub row_size_bytes: u32,
    /// Burst length in 32-bit words
    pub burst_length: u32,
    pub burst_bytes_per_cycle: u32,
    pub timing: GddrTiming,

    /// Slots in each of the two request-buffer pools
    pub request_queue_size: u32,
    pub service_queue_size: u32,
    pub read_buffers: u32,
    pub write_buffers: u32,

    pub num_texture_units: u32,
    /// Render-output pipes; sizes both the ZStencil and ColorWrite ports
    pub num_rop_units: u32,
    pub num_loader_units: u32,
    pub bus_widths: BusWidths,

    pub splitter: SplitterKind,
    /// Layout used at and above the second-interleaving start address
    pub second_splitter: Option<SplitterKind>,

    pub scheduler: SchedulerConfig,
    /// Keep one channel queue per bank instead of one per channel
    pub per_bank_channel_queues: bool,
    pub bank_queue_selection: BankQueueSelection,
    /// Cap each ROP instance at `request_queue_size / num_rop_units`
    /// outstanding requests
    pub per_rop_reservation: bool,

    pub system_memory_read_latency: u32,
    pub system_memory_write_latency: u32,
    /// Minimum gap between transactions on one system bus
    pub system_transaction_cycles: u32,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            gpu_memory_size: 16 * 1024 * 1024,
            system_memory_size: 1024 * 1024,
            memory_channels: 4,
            banks_per_channel: 4,
            row_size_bytes: 4096,
            burst_length: 8,
            burst_bytes_per_cycle: 8,
            timing: GddrTiming::ZERO_DELAY,
            request_queue_size: 32,
            service_queue_size: 16,
            read_buffers: 16,
            write_buffers: 16,
            num_texture_units: 1,
            num_rop_units: 1,
            num_loader_units: 1,
            bus_widths: BusWidths::default(),
            splitter: SplitterKind::Interleaved {
                channel_interleaving: 64,
                bank_interleaving: 256,
            },
            second_splitter: None,
            scheduler: SchedulerConfig::default(),
            bank_queue_selection: BankQueueSelection::RoundRobin,
            per_bank_channel_queues: false,
            per_rop_reservation: false,
            system_memory_read_latency: 500,
            system_memory_write_latency: 500,
            system_transaction_cycles: 16,
        }
    }
}

impl ControllerConfig {
    fn validate(&self) {
        assert!(
            matches!(self.memory_channels, 1 | 2 | 4 | 8 | 16),
            "number of memory channels must be 1, 2, 4, 8 or 16"
        );
        assert!(
            matches!(self.banks_per_channel, 1 | 2 | 4 | 8),
            "number of banks per channel must be 1, 2, 4 or 8"
        );
        assert!(self.gpu_memory_size > 0, "GPU memory size must be greater than 0");
        let stride = self.memory_channels * self.banks_per_channel * self.row_size_bytes;
        assert!(
            self.gpu_memory_size % stride == 0,
            "GPU memory size ({} bytes) must be a multiple of channels*banks*rowSize ({} bytes)",
            self.gpu_memory_size,
            stride
        );
        assert!(
            self.system_memory_size % 4 == 0,
            "system memory size must be a multiple of 4 bytes"
        );
        assert!(self.row_size_bytes % 4 == 0, "row size must be a multiple of 4 bytes");
        assert!(
            self.burst_length.is_power_of_two() && self.burst_length <= 32,
            "burst length must be a power of two of at most 32 words"
        );
        assert!(self.num_rop_units > 0, "there should be at least one ROP pipe");
        assert!(self.num_texture_units > 0, "there should be at least one texture unit");
        assert!(self.num_loader_units > 0, "there should be at least one loader unit");
        let min_queue =
            (self.num_texture_units + self.num_rop_units + self.num_loader_units + 3) * 2;
        assert!(
            self.request_queue_size >= min_queue,
            "minimum request queue size is (texUnits + ropUnits + loaderUnits + 3) * 2 = {}",
            min_queue
        );
        assert!(self.service_queue_size > 0, "service queue defined with size 0");
        assert!(self.read_buffers > 0, "at least one read buffer line is required");
        assert!(self.write_buffers > 0, "at least one write buffer line is required");
        assert!(
            self.system_transaction_cycles > 0,
            "system bus transactions need at least one cycle"
        );
    }

    fn bank_rows(&self) -> u32 {
        self.gpu_memory_size
            / (self.memory_channels * self.banks_per_channel * self.row_size_bytes)
    }

    fn bank_cols(&self) -> u32 {
        self.row_size_bytes / 4
    }

    fn build_splitter(&self, kind: &SplitterKind) -> RequestSplitter {
        match kind {
            SplitterKind::Interleaved {
                channel_interleaving,
                bank_interleaving,
            } => RequestSplitter::Interleaved(InterleavedSplitter::new(
                self.burst_length,
                self.memory_channels,
                self.banks_per_channel,
                self.bank_rows(),
                self.bank_cols(),
                *channel_interleaving,
                *bank_interleaving,
            )),
            SplitterKind::Bitmask {
                channel_bits,
                bank_bits,
            } => RequestSplitter::Bitmask(BitmaskSplitter::new(
                self.burst_length,
                self.memory_channels,
                self.banks_per_channel,
                self.bank_rows(),
                self.bank_cols(),
                channel_bits,
                bank_bits,
            )),
        }
    }
}

/// Event counters of the controller
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerStats {
    pub total_transactions: u64,
    pub read_transactions: u64,
    pub write_transactions: u64,
    pub preload_transactions: u64,
    /// Bytes of completed channel-transaction reads
    pub read_bytes: u64,
    /// Bytes of completed channel-transaction writes
    pub write_bytes: u64,
    /// Cycles a pending channel transaction could not be routed
    pub read_stall_cycles: u64,
    pub write_stall_cycles: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BusEntry {
    None,
    Gpu(RequestId),
    System(RequestId),
}

/// Transmission state of one client I/O bus
#[derive(Debug)]
struct BusState {
    /// Cycles until the current transmission completes
    bus_cycles: u32,
    /// Reserved for the service-queue head
    reserved: bool,
    /// The transmission is a read reply
    service: bool,
    entry: BusEntry,
}

impl BusState {
    fn new() -> BusState {
        BusState {
            bus_cycles: 0,
            reserved: false,
            service: false,
            entry: BusEntry::None,
        }
    }
}

/// One client's attachment point: a request signal into the controller, a
/// data signal out of it, and the accept token of the last cycle.
#[derive(Debug)]
pub struct ClientPort {
    request_in: Signal<ClientTransaction>,
    data_out: Signal<ClientTransaction>,
    state: MemState,
    bus: BusState,
}

impl ClientPort {
    fn new(source: ClientSource) -> ClientPort {
        ClientPort {
            request_in: Signal::new(&format!("{}.MemoryRequest", source), 1),
            data_out: Signal::new(&format!("{}.MemoryData", source), 1),
            state: MemState::None,
            bus: BusState::new(),
        }
    }

    /// Submits a transaction; it reaches the controller next cycle.
    /// Callers must gate on [`ClientPort::mem_state`].
    pub fn send(&mut self, cycle: u64, txn: ClientTransaction) {
        self.request_in.write(cycle, txn);
    }

    /// Accept token computed at the end of the previous cycle
    pub fn mem_state(&self) -> MemState {
        self.state
    }

    /// Takes the read reply delivered at `cycle`, if any
    pub fn take_reply(&mut self, cycle: u64) -> Option<ClientTransaction> {
        self.data_out.read(cycle)
    }
}

struct ServiceEntry {
    reply: ClientTransaction,
    arrival: u64,
}

struct Channel {
    sched: ChannelScheduler,
    module: DdrModule,
    wires: ChannelWires,
}

#[derive(Debug, Default)]
struct SystemBus {
    bus_cycles: u32,
    txn: Option<ClientTransaction>,
}

/// The memory controller: routes client requests over multiple GDDR
/// channels and a fixed-latency system-memory path.
///
/// Everything runs in a single simulation thread; [`MemoryController::clock`]
/// advances all owned components one cycle in a fixed order. The
/// multi-clock variant splits that work over
/// [`MemoryController::clock_domain`] calls driven by an external clock
/// source.
pub struct MemoryController {
    config: ControllerConfig,

    splitters: Vec<RequestSplitter>,
    second_interleaving_start: u32,

    channels: Vec<Channel>,
    /// Per channel, one queue (or one per bank) of pending transactions
    channel_queues: Vec<Vec<VecDeque<(ChannelTransaction, u64)>>>,
    next_bank_rr: Vec<usize>,

    ports: Vec<Vec<ClientPort>>,

    request_buffer: RequestBuffer,
    system_buffer: RequestBuffer,
    /// FIFO of system requests ready to issue
    system_request_queue: VecDeque<RequestId>,

    service_queue: VecDeque<ServiceEntry>,

    free_read_buffers: u32,
    free_write_buffers: u32,
    rop_counters: Vec<u32>,

    system_memory: Vec<u8>,
    system_signals: Vec<Signal<ClientTransaction>>,
    system_bus_last: [u64; SYSTEM_MEMORY_BUSES],
    system_buses: [SystemBus; SYSTEM_MEMORY_BUSES],
    system_read_ids: VecDeque<RequestId>,
    system_arrival_times: VecDeque<u64>,
    system_arrival_check_ids: VecDeque<u32>,

    stats: ControllerStats,
    last_cycle: u64,
    last_cycle_mem: u64,
}

impl MemoryController {
    /// Builds the controller, its channels and their DDR modules
    ///
    /// # Panics
    ///
    /// Panics on any inconsistent configuration value
    pub fn new(config: ControllerConfig) -> MemoryController {
        config.validate();

        let mut splitters = vec![config.build_splitter(&config.splitter)];
        if let Some(second) = &config.second_splitter {
            splitters.push(config.build_splitter(second));
        }

        let mut channels = Vec::new();
        for i in 0..config.memory_channels {
            let sched_name = match config.scheduler.kind {
                SchedulerKind::Fifo => format!("FifoSched{}", i),
                SchedulerKind::RwFifo => format!("RwFifoSched{}", i),
                SchedulerKind::BankQueue => format!("BankFifoSched{}", i),
            };
            channels.push(Channel {
                sched: ChannelScheduler::new(
                    &sched_name,
                    config.banks_per_channel,
                    config.burst_length,
                    config.burst_bytes_per_cycle,
                    config.timing,
                    &config.scheduler,
                ),
                module: DdrModule::new(
                    &format!("DdrModule{}", i),
                    config.burst_length,
                    config.banks_per_channel,
                    config.bank_rows(),
                    config.bank_cols(),
                    config.burst_bytes_per_cycle,
                    config.timing,
                ),
                wires: ChannelWires::new(&format!("Sched{}", i)),
            });
        }

        let bank_queues = if config.per_bank_channel_queues {
            config.banks_per_channel as usize
        } else {
            1
        };
        let channel_queues = (0..config.memory_channels)
            .map(|_| (0..bank_queues).map(|_| VecDeque::new()).collect())
            .collect();

        let mut ports = Vec::new();
        for unit in GpuUnit::ALL {
            let count = match unit {
                GpuUnit::CommandProcessor | GpuUnit::StreamerFetch | GpuUnit::DisplayController => 1,
                GpuUnit::StreamerLoader => config.num_loader_units,
                GpuUnit::ZStencilTest | GpuUnit::ColorWrite => config.num_rop_units,
                GpuUnit::TextureUnit => config.num_texture_units,
            };
            ports.push(
                (0..count)
                    .map(|i| ClientPort::new(ClientSource::new(unit, i)))
                    .collect(),
            );
        }

        let mut system_memory = vec![0u8; config.system_memory_size as usize];
        for chunk in system_memory.chunks_exact_mut(4) {
            chunk.copy_from_slice(&crate::bank::FRESH_PATTERN.to_le_bytes());
        }

        let system_signals = (0..SYSTEM_MEMORY_BUSES)
            .map(|i| Signal::new(&format!("SystemMemory{:02}", i), 1))
            .collect();

        MemoryController {
            request_buffer: RequestBuffer::new("requestBuffer", config.request_queue_size),
            system_buffer: RequestBuffer::new("systemRequestBuffer", config.request_queue_size),
            system_request_queue: VecDeque::new(),
            service_queue: VecDeque::new(),
            free_read_buffers: config.read_buffers,
            free_write_buffers: config.write_buffers,
            rop_counters: vec![0; config.num_rop_units as usize],
            system_memory,
            system_signals,
            system_bus_last: [0; SYSTEM_MEMORY_BUSES],
            system_buses: Default::default(),
            system_read_ids: VecDeque::new(),
            system_arrival_times: VecDeque::new(),
            system_arrival_check_ids: VecDeque::new(),
            stats: ControllerStats::default(),
            last_cycle: 0,
            last_cycle_mem: 0,
            next_bank_rr: vec![0; config.memory_channels as usize],
            second_interleaving_start: 0,
            splitters,
            channels,
            channel_queues,
            ports,
            config,
        }
    }

    /// Client attachment point of `(unit, index)`
    pub fn port(&mut self, unit: GpuUnit, index: u32) -> &mut ClientPort {
        &mut self.ports[unit.index()][index as usize]
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn channel_stats(&self, channel: u32) -> &SchedulerStats {
        self.channels[channel as usize].sched.stats()
    }

    pub fn module_stats(&self, channel: u32) -> &DdrModuleStats {
        self.channels[channel as usize].module.stats()
    }

    pub(crate) fn module(&self, channel: u32) -> &DdrModule {
        &self.channels[channel as usize].module
    }

    pub(crate) fn module_mut(&mut self, channel: u32) -> &mut DdrModule {
        &mut self.channels[channel as usize].module
    }

    pub(crate) fn gpu_memory_size(&self) -> u32 {
        self.config.gpu_memory_size
    }

    pub(crate) fn burst_bytes(&self) -> u32 {
        4 * self.config.burst_length
    }

    pub(crate) fn system_memory(&self) -> &[u8] {
        &self.system_memory
    }

    pub(crate) fn system_memory_mut(&mut self) -> &mut [u8] {
        &mut self.system_memory
    }

    /// Start address of the second interleaving range; 0 disables it.
    /// The boundary address itself belongs to the second range.
    pub fn set_second_interleaving_start(&mut self, address: u32) {
        self.second_interleaving_start = address;
    }

    /// Splitter serving `address`, honoring the second-interleaving range
    pub(crate) fn splitter(&self, address: u32, size: u32) -> &RequestSplitter {
        if self.splitters.len() == 1 || self.second_interleaving_start == 0 {
            return &self.splitters[0];
        }
        let start = self.second_interleaving_start;
        if address < start {
            assert!(
                address + size <= start,
                "request [{:#x}, {:#x}) straddles the second-interleaving boundary {:#x}",
                address,
                address + size,
                start
            );
            &self.splitters[0]
        } else {
            &self.splitters[1]
        }
    }

    /// Advances the whole controller one cycle (single clock domain)
    pub fn clock(&mut self, cycle: u64) {
        self.last_cycle = cycle;
        self.last_cycle_mem = cycle;

        self.stage_read_requests(cycle);
        self.update_bus_counters(cycle);
        self.stage_serve_request(cycle);
        self.reserve_client_bus(cycle);

        for channel in &mut self.channels {
            channel.sched.clock(cycle, &mut channel.wires);
            channel
                .module
                .clock(cycle, &mut channel.wires.module_cmd, &mut channel.wires.module_reply);
        }

        self.stage_update_completed_requests(cycle);
        self.stage_receive_from_schedulers(cycle);
        self.stage_send_to_schedulers(cycle);

        self.update_system_buses(cycle);
        self.issue_system_transaction(cycle);
        self.process_system_replies(cycle);

        self.send_bus_state_to_clients(cycle);
    }

    /// Advances one clock domain. The external clock source must invoke at
    /// most one domain per tick; the two domains never run concurrently.
    pub fn clock_domain(&mut self, domain: ClockDomain, cycle: u64) {
        match domain {
            ClockDomain::Gpu => {
                self.last_cycle = cycle;
                self.update_bus_counters(cycle);
                self.stage_read_requests(cycle);
                self.stage_serve_request(cycle);
                self.reserve_client_bus(cycle);
                self.stage_update_completed_requests(cycle);
                self.update_system_buses(cycle);
                self.issue_system_transaction(cycle);
                self.process_system_replies(cycle);
                self.send_bus_state_to_clients(cycle);
            }
            ClockDomain::Memory => {
                self.last_cycle_mem = cycle;
                for channel in &mut self.channels {
                    channel.sched.clock(cycle, &mut channel.wires);
                    channel.module.clock(
                        cycle,
                        &mut channel.wires.module_cmd,
                        &mut channel.wires.module_reply,
                    );
                }
                self.stage_receive_from_schedulers(cycle);
                self.stage_send_to_schedulers(cycle);
            }
        }
    }

    fn stage_read_requests(&mut self, cycle: u64) {
        for unit in 0..GPU_UNIT_COUNT {
            for sub in 0..self.ports[unit].len() {
                if let Some(txn) = self.ports[unit][sub].request_in.read(cycle) {
                    mc_trace!("MemoryController: cycle {}: received {}", cycle, txn);
                    self.process_client_transaction(cycle, txn);
                }
            }
        }
    }

    fn process_client_transaction(&mut self, cycle: u64, txn: ClientTransaction) {
        self.stats.total_transactions += 1;

        match &txn.op {
            ClientOp::Preload { .. } => {
                self.stats.preload_transactions += 1;
                self.preload(txn);
                return;
            }
            ClientOp::ReadReq { .. } => self.stats.read_transactions += 1,
            ClientOp::WriteData { data, mask, .. } => {
                if let Some(mask) = mask {
                    assert!(
                        mask.len() * 4 >= data.len(),
                        "write mask shorter than the data payload"
                    );
                }
                self.stats.write_transactions += 1;
            }
            ClientOp::ReadData { .. } => {
                panic!("MemoryController: cycle {}: unexpected transaction received", cycle)
            }
        }

        let source = txn.source;
        let is_system = txn.is_system();
        let is_write = !txn.is_read();
        let width = self.config.bus_widths.for_unit(source.unit);
        let payload_cycles = txn.bus_cycles(width);

        let id = if is_system {
            self.add_system_request(cycle, txn)
        } else {
            self.add_request(cycle, txn)
        };

        if is_write {
            let unit = source.unit.index();
            let sub = source.index as usize;
            if self.ports[unit][sub].bus.bus_cycles != 0 {
                eprintln!("{}", self.debug_dump());
                panic!(
                    "MemoryController: cycle {}: write not allowed, bus {}[{}] is busy",
                    cycle, source.unit, sub
                );
            }
            if self.free_write_buffers == 0 {
                panic!("MemoryController: cycle {}: no free write buffer available", cycle);
            }
            self.free_write_buffers -= 1;

            let buffer = if is_system {
                &mut self.system_buffer
            } else {
                &mut self.request_buffer
            };
            buffer.get_mut(id).set_state(MemReqState::Transmitting);

            let bus = &mut self.ports[unit][sub].bus;
            bus.bus_cycles = payload_cycles;
            bus.service = false;
            bus.entry = if is_system {
                BusEntry::System(id)
            } else {
                BusEntry::Gpu(id)
            };
        }
    }

    /// Splits a GPU-memory request into channel transactions and routes
    /// them to the channel queues
    fn add_request(&mut self, cycle: u64, txn: ClientTransaction) -> RequestId {
        let offset = txn.space_offset();
        let size = txn.size();
        assert!(
            (offset as u64) + u64::from(size) <= u64::from(self.config.gpu_memory_size),
            "MemoryController: cycle {}: GPU memory operation out of range ({:#x}+{})",
            cycle,
            offset,
            size
        );

        let pieces = self.splitter(offset, size).split(offset, size);
        let is_read = txn.is_read();

        // copy each piece's slice of the payload before the transaction
        // moves into the buffer
        let mut write_slices: VecDeque<(Vec<u8>, Option<Vec<u32>>)> = VecDeque::new();
        if let ClientOp::WriteData { data, mask, .. } = &txn.op {
            for piece in &pieces {
                let from = piece.offset as usize;
                let to = from + piece.bytes as usize;
                let slice = data[from..to].to_vec();
                let mask_slice = mask.as_ref().map(|mask| {
                    let word = from / 4;
                    let words = (piece.bytes as usize + 3) / 4;
                    mask[word..word + words].to_vec()
                });
                write_slices.push_back((slice, mask_slice));
            }
        }

        let source = txn.source;
        let id = self.request_buffer.alloc(txn, cycle);
        if source.unit.is_rop() {
            self.rop_counters[source.index as usize] += 1;
        }
        self.request_buffer.get_mut(id).set_counter(pieces.len() as u32);

        let mut channel_seen = vec![false; self.config.memory_channels as usize];
        for piece in &pieces {
            let channel = piece.info.channel as usize;
            assert!(
                !channel_seen[channel],
                "MemoryController: cycle {}: memory request chunks split to the same channel {}",
                cycle,
                channel
            );
            channel_seen[channel] = true;

            let ct = if is_read {
                ChannelTransaction::new_read(
                    id,
                    piece.info.channel,
                    piece.info.bank,
                    piece.info.row,
                    piece.info.start_col,
                    piece.bytes,
                    piece.offset,
                )
            } else {
                let (data, mask) = write_slices.pop_front().unwrap();
                ChannelTransaction::new_write(
                    id,
                    piece.info.channel,
                    piece.info.bank,
                    piece.info.row,
                    piece.info.start_col,
                    data,
                    mask,
                    piece.offset,
                )
            };

            let bank_queue = if self.config.per_bank_channel_queues {
                piece.info.bank as usize
            } else {
                0
            };
            let queue = &mut self.channel_queues[channel][bank_queue];
            assert!(
                queue.len() < self.config.request_queue_size as usize,
                "MemoryController: cycle {}: channel {} queue is full",
                cycle,
                channel
            );
            queue.push_back((ct, cycle));
        }

        id
    }

    fn add_system_request(&mut self, cycle: u64, txn: ClientTransaction) -> RequestId {
        let id = self.system_buffer.alloc(txn, cycle);
        self.system_request_queue.push_back(id);
        id
    }

    /// Writes preload data straight into storage, bypassing all timing
    fn preload(&mut self, txn: ClientTransaction) {
        let (data, mask) = match &txn.op {
            ClientOp::Preload { data, mask, .. } => (data, mask),
            _ => unreachable!(),
        };
        let offset = txn.space_offset();
        let size = data.len() as u32;

        if txn.is_system() {
            assert!(
                (offset as u64) + u64::from(size) <= self.system_memory.len() as u64,
                "system memory operation out of range ({:#x}+{})",
                offset,
                size
            );
            let from = offset as usize;
            self.system_memory[from..from + data.len()].copy_from_slice(data);
            return;
        }

        assert!(
            (offset as u64) + u64::from(size) <= u64::from(self.config.gpu_memory_size),
            "GPU memory operation out of range ({:#x}+{})",
            offset,
            size
        );
        let pieces = self.splitter(offset, size).split(offset, size);
        for piece in &pieces {
            let from = piece.offset as usize;
            let to = from + piece.bytes as usize;
            let mask_slice = mask.as_ref().map(|mask| {
                let word = from / 4;
                let words = (piece.bytes as usize + 3) / 4;
                &mask[word..word + words]
            });
            self.channels[piece.info.channel as usize].module.preload(
                piece.info.bank,
                piece.info.row,
                piece.info.start_col,
                &data[from..to],
                mask_slice,
            );
        }
    }

    /// Advances every client bus transmission by one cycle; completed
    /// transmissions release buffers and mark requests ready
    fn update_bus_counters(&mut self, _cycle: u64) {
        for unit_ports in &mut self.ports {
            for port in unit_ports {
                if port.bus.bus_cycles == 0 {
                    continue;
                }
                port.bus.bus_cycles -= 1;
                if port.bus.bus_cycles > 0 {
                    continue;
                }
                if port.bus.service {
                    // a read reply finished transmitting
                    port.bus.service = false;
                    self.free_read_buffers += 1;
                } else {
                    match port.bus.entry {
                        BusEntry::Gpu(id) => {
                            self.request_buffer.get_mut(id).set_state(MemReqState::Ready)
                        }
                        BusEntry::System(id) => {
                            self.system_buffer.get_mut(id).set_state(MemReqState::Ready)
                        }
                        BusEntry::None => panic!("bus transmission completed with no request"),
                    }
                }
            }
        }
    }

    /// Sends the service-queue head over its client bus when the bus is
    /// free and was reserved last cycle
    fn stage_serve_request(&mut self, cycle: u64) {
        let (unit, sub, width) = match self.service_queue.front() {
            Some(entry) => (
                entry.reply.source.unit,
                entry.reply.source.index as usize,
                self.config.bus_widths.for_unit(entry.reply.source.unit),
            ),
            None => return,
        };
        let port = &mut self.ports[unit.index()][sub];
        if port.bus.bus_cycles != 0 || !port.bus.reserved {
            return;
        }

        let entry = self.service_queue.pop_front().unwrap();
        assert!(
            entry.arrival < cycle,
            "MemoryController: cycle {}: serving a request with zero or negative latency",
            cycle
        );
        let cycles = entry.reply.bus_cycles(width);
        mc_trace!("MemoryController: cycle {}: serving {}", cycle, entry.reply);

        let port = &mut self.ports[unit.index()][sub];
        port.data_out.write(cycle, entry.reply);
        port.bus.bus_cycles = cycles;
        port.bus.service = true;
        port.bus.reserved = false;
        port.bus.entry = BusEntry::None;
    }

    /// Reserves the originating bus for the service-queue head if it will
    /// be free next cycle
    fn reserve_client_bus(&mut self, _cycle: u64) {
        if let Some(entry) = self.service_queue.front() {
            let source = entry.reply.source;
            let port = &mut self.ports[source.unit.index()][source.index as usize];
            if port.bus.bus_cycles <= 1 {
                port.bus.reserved = true;
            }
        }
    }

    /// Releases request-buffer slots whose outstanding counter reached
    /// zero; completed reads move into the service queue
    fn stage_update_completed_requests(&mut self, cycle: u64) {
        let completed: Vec<RequestId> = self
            .request_buffer
            .iter_occupied()
            .filter(|(_, request)| request.counter() == 0)
            .map(|(id, _)| id)
            .collect();

        for id in completed {
            if self.request_buffer.get(id).is_read() {
                if self.service_queue.len() == self.config.service_queue_size as usize {
                    continue; // no reply slot available, try again later
                }
                let request = self.request_buffer.get_mut(id);
                let data = request.take_read_data();
                let txn = request.transaction();
                let reply = ClientTransaction {
                    id: txn.id,
                    source: txn.source,
                    op: ClientOp::ReadData {
                        addr: txn.addr(),
                        data,
                    },
                };
                let arrival = request.arrival();
                self.service_queue.push_back(ServiceEntry { reply, arrival });
            } else {
                self.free_write_buffers += 1;
            }

            let request = self.request_buffer.release(id);
            let source = request.transaction().source;
            if source.unit.is_rop() {
                let counter = &mut self.rop_counters[source.index as usize];
                assert!(*counter > 0, "ROP counter released below zero");
                *counter -= 1;
            }
            mc_trace!(
                "MemoryController: cycle {}: request {} completed",
                cycle,
                request.transaction()
            );
        }
    }

    /// Absorbs completed channel transactions, decrementing the parent
    /// request's outstanding counter and merging read data
    fn stage_receive_from_schedulers(&mut self, cycle: u64) {
        for channel in &mut self.channels {
            if let Some(ct) = channel.wires.reply.read(cycle) {
                let request = self.request_buffer.get_mut(ct.request());
                assert!(
                    request.state() == MemReqState::Memory,
                    "channel transaction completed but the request is not in memory state"
                );
                request.dec_counter();
                if request.counter() == 0 {
                    request.set_state(MemReqState::Ready);
                }
                if ct.is_read() {
                    request.merge_read_data(ct.request_offset(), ct.data());
                    self.stats.read_bytes += u64::from(ct.bytes());
                } else {
                    self.stats.write_bytes += u64::from(ct.bytes());
                }
            }
        }
    }

    /// Routes at most one eligible channel transaction per channel, gated
    /// by the scheduler's per-bank accept state
    fn stage_send_to_schedulers(&mut self, cycle: u64) {
        for ch in 0..self.channels.len() {
            let state = match self.channels[ch].wires.sched_state.read(cycle) {
                Some(state) => state,
                None => panic!(
                    "MemoryController: cycle {}: state from scheduler {} was not received",
                    cycle, ch
                ),
            };

            let bank_queues = self.channel_queues[ch].len();

            // banks with a dispatchable head, in selection order
            let mut candidates: Vec<usize> = Vec::new();
            if bank_queues == 1 {
                if self.head_is_ready(ch, 0) {
                    candidates.push(0);
                }
            } else {
                match self.config.bank_queue_selection {
                    BankQueueSelection::RoundRobin => {
                        for j in 0..bank_queues {
                            let bank = (self.next_bank_rr[ch] + j) % bank_queues;
                            if self.head_is_ready(ch, bank) {
                                candidates.push(bank);
                            }
                        }
                    }
                    BankQueueSelection::OldestFirst => {
                        let mut stamped: Vec<(u64, usize)> = (0..bank_queues)
                            .filter(|&bank| self.head_is_ready(ch, bank))
                            .map(|bank| (self.channel_queues[ch][bank].front().unwrap().1, bank))
                            .collect();
                        stamped.sort_unstable();
                        candidates.extend(stamped.into_iter().map(|(_, bank)| bank));
                    }
                }
            }

            let mut first_kind: Option<bool> = None;
            let mut sent = false;
            for &bank_queue in &candidates {
                let (is_read, bank, request) = {
                    let (ct, _) = self.channel_queues[ch][bank_queue].front().unwrap();
                    (ct.is_read(), ct.bank(), ct.request())
                };
                if first_kind.is_none() {
                    first_kind = Some(is_read);
                }
                if !state.bank(bank).allows(is_read) {
                    continue;
                }
                let request_state = self.request_buffer.get(request).state();
                if request_state == MemReqState::Ready && is_read && self.free_read_buffers == 0 {
                    continue; // no read buffer to reserve for this request
                }

                let (ct, _) = self.channel_queues[ch][bank_queue].pop_front().unwrap();
                if bank_queues > 1 {
                    self.next_bank_rr[ch] = (bank_queue + 1) % bank_queues;
                }
                match request_state {
                    MemReqState::Ready => {
                        self.request_buffer.get_mut(request).set_state(MemReqState::Memory);
                        if is_read {
                            self.free_read_buffers -= 1;
                        }
                    }
                    MemReqState::Memory => {}
                    _ => panic!("unexpected memory request state at dispatch"),
                }
                mc_trace!("MemoryController: cycle {}: to scheduler {}: {}", cycle, ch, ct);
                self.channels[ch].wires.request.write(cycle, ct);
                sent = true;
                break;
            }

            if !sent {
                if let Some(is_read) = first_kind {
                    if is_read {
                        self.stats.read_stall_cycles += 1;
                    } else {
                        self.stats.write_stall_cycles += 1;
                    }
                }
            }
        }
    }

    /// True when the queue head exists and its parent request is past the
    /// bus-transmission phase
    fn head_is_ready(&self, channel: usize, bank_queue: usize) -> bool {
        match self.channel_queues[channel][bank_queue].front() {
            Some((ct, _)) => matches!(
                self.request_buffer.get(ct.request()).state(),
                MemReqState::Ready | MemReqState::Memory
            ),
            None => false,
        }
    }

    /// Advances the two system buses; completed reads join the service
    /// queue after their arrival-time consistency check
    fn update_system_buses(&mut self, cycle: u64) {
        for bus in 0..SYSTEM_MEMORY_BUSES {
            if self.system_buses[bus].bus_cycles == 0 {
                continue;
            }
            self.system_buses[bus].bus_cycles -= 1;
            if self.system_buses[bus].bus_cycles > 0 {
                continue;
            }
            let txn = self.system_buses[bus]
                .txn
                .take()
                .expect("system bus completed with no transaction");
            match &txn.op {
                ClientOp::ReadData { data, .. } => {
                    let check_id = self
                        .system_arrival_check_ids
                        .pop_front()
                        .expect("system read completed with no arrival record");
                    assert!(
                        check_id == txn.id,
                        "MemoryController: cycle {}: system arrival time check failed",
                        cycle
                    );
                    let arrival = self.system_arrival_times.pop_front().unwrap();
                    assert!(
                        self.service_queue.len() < self.config.service_queue_size as usize,
                        "MemoryController: cycle {}: service queue full, system read cannot be allocated",
                        cycle
                    );
                    self.stats.read_bytes += data.len() as u64;
                    self.service_queue.push_back(ServiceEntry { reply: txn, arrival });

                    let id = self
                        .system_read_ids
                        .pop_front()
                        .expect("system read completed with no request entry");
                    let _ = self.system_buffer.release(id);
                }
                ClientOp::WriteData { data, .. } => {
                    self.stats.write_bytes += data.len() as u64;
                    self.free_write_buffers += 1;
                }
                _ => panic!("unsupported transaction on a system bus"),
            }
        }
    }

    /// Issues the next ready system request. Bus 0 carries reads, bus 1
    /// writes; each bus enforces the configured transaction gap.
    fn issue_system_transaction(&mut self, cycle: u64) {
        let id = match self.system_request_queue.front() {
            Some(&id) => id,
            None => return,
        };

        let gap = u64::from(self.config.system_transaction_cycles);
        // the slot may be released below, so work on an owned copy
        let txn = self.system_buffer.get(id).transaction().clone();
        let arrival = self.system_buffer.get(id).arrival();
        let request_state = self.system_buffer.get(id).state();

        match txn.op {
            ClientOp::ReadReq { addr, size } => {
                if cycle - self.system_bus_last[SYSTEM_READ_BUS] < gap || self.free_read_buffers == 0
                {
                    return;
                }
                let offset = txn.space_offset() as usize;
                let size = size as usize;
                assert!(
                    offset + size <= self.system_memory.len(),
                    "MemoryController: cycle {}: system memory operation out of range",
                    cycle
                );
                let reply = ClientTransaction {
                    id: txn.id,
                    source: txn.source,
                    op: ClientOp::ReadData {
                        addr,
                        data: self.system_memory[offset..offset + size].to_vec(),
                    },
                };

                self.system_arrival_times.push_back(arrival);
                self.system_arrival_check_ids.push_back(reply.id);
                self.system_signals[SYSTEM_READ_BUS].write_with_latency(
                    cycle,
                    u64::from(self.config.system_memory_read_latency),
                    reply,
                );
                self.system_bus_last[SYSTEM_READ_BUS] = cycle;
                self.system_read_ids.push_back(id);
                self.free_read_buffers -= 1;
                self.system_request_queue.pop_front();
            }
            ClientOp::WriteData { .. } => {
                if cycle - self.system_bus_last[SYSTEM_WRITE_BUS] < gap
                    || request_state != MemReqState::Ready
                {
                    return;
                }
                let offset = txn.space_offset() as usize;
                let (data, mask) = match &txn.op {
                    ClientOp::WriteData { data, mask, .. } => (data.clone(), mask.clone()),
                    _ => unreachable!(),
                };
                assert!(
                    offset + data.len() <= self.system_memory.len(),
                    "MemoryController: cycle {}: system memory operation out of range",
                    cycle
                );
                match mask {
                    Some(mask) => {
                        // a mask word selects, bit-wise, the bytes taken
                        // from the new data
                        for (i, chunk) in data.chunks_exact(4).enumerate() {
                            let slot = &mut self.system_memory[offset + 4 * i..offset + 4 * i + 4];
                            let old = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
                            let new = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                            let m = mask[i];
                            slot.copy_from_slice(&((old & !m) | (new & m)).to_le_bytes());
                        }
                    }
                    None => {
                        self.system_memory[offset..offset + data.len()].copy_from_slice(&data);
                    }
                }

                self.system_signals[SYSTEM_WRITE_BUS].write_with_latency(
                    cycle,
                    u64::from(self.config.system_memory_write_latency),
                    txn,
                );
                self.system_bus_last[SYSTEM_WRITE_BUS] = cycle;
                self.system_request_queue.pop_front();
                let _ = self.system_buffer.release(id);
            }
            _ => panic!("unsupported system memory transaction"),
        }
    }

    /// Receives transactions emerging from the system-memory latency
    /// signals and starts their bus transmission
    fn process_system_replies(&mut self, cycle: u64) {
        for bus in 0..SYSTEM_MEMORY_BUSES {
            if let Some(txn) = self.system_signals[bus].read(cycle) {
                assert!(
                    self.system_buses[bus].bus_cycles == 0,
                    "MemoryController: cycle {}: system memory bus {} busy",
                    cycle,
                    bus
                );
                assert!(
                    matches!(txn.op, ClientOp::ReadData { .. } | ClientOp::WriteData { .. }),
                    "unsupported transaction on a system bus"
                );
                self.system_buses[bus].bus_cycles = self.config.system_transaction_cycles;
                self.system_buses[bus].txn = Some(txn);
            }
        }
    }

    /// Broadcasts the accept token to every client bus
    fn send_bus_state_to_clients(&mut self, _cycle: u64) {
        // Free slots needed to absorb the requests already in flight on
        // every bus plus the signal latency.
        let required = 2
            + 2
            + 2 * self.config.num_loader_units
            + 4 * self.config.num_rop_units
            + 2
            + 2 * self.config.num_texture_units;

        let global = if self.request_buffer.free_slots() >= required
            && self.system_buffer.free_slots() >= required
        {
            MemState::ReadAccept
        } else {
            MemState::None
        };

        // Only the units allowed to write count against the write buffers
        let enough_write_buffers =
            self.free_write_buffers >= 2 + 4 * self.config.num_rop_units;

        let rop_limit = self.request_buffer.capacity() / self.rop_counters.len() as u32;

        for unit in GpuUnit::ALL {
            for sub in 0..self.ports[unit.index()].len() {
                let rop_blocked = self.config.per_rop_reservation
                    && unit.is_rop()
                    && self.rop_counters[sub] >= rop_limit;

                let port = &mut self.ports[unit.index()][sub];
                let mut state = global;
                if enough_write_buffers
                    && port.bus.bus_cycles < 2
                    && !port.bus.reserved
                    && global == MemState::ReadAccept
                {
                    state = MemState::Both;
                }
                if rop_blocked {
                    state = MemState::None;
                }
                port.state = state;
            }
        }
    }

    /// Renders the controller-level state for diagnostics
    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "MEMORY CONTROLLER (debug info)");
        let _ = writeln!(
            out,
            "  (GPU domain cycle, MEM domain cycle): ({}, {})",
            self.last_cycle, self.last_cycle_mem
        );
        let _ = writeln!(
            out,
            "  request buffer entries in use (max {}): {} -> {}",
            self.request_buffer.capacity(),
            self.request_buffer.allocated(),
            self.request_buffer.occupancy_ranges()
        );
        let _ = writeln!(
            out,
            "  system request buffer entries in use (max {}): {} -> {}",
            self.system_buffer.capacity(),
            self.system_buffer.allocated(),
            self.system_buffer.occupancy_ranges()
        );
        let _ = writeln!(
            out,
            "  service queue entries in use (max {}): {}",
            self.config.service_queue_size,
            self.service_queue.len()
        );
        let _ = writeln!(out, "  free read buffers: {}", self.free_read_buffers);
        let _ = writeln!(out, "  free write buffers: {}", self.free_write_buffers);

        let _ = writeln!(out, "  data in IO buses (kind.space.cycles):");
        for unit in GpuUnit::ALL {
            for (sub, port) in self.ports[unit.index()].iter().enumerate() {
                if port.bus.bus_cycles > 0 {
                    let _ = writeln!(
                        out,
                        "    {}[{}]: {}.{}.{}",
                        unit,
                        sub,
                        if port.bus.service { "R" } else { "W" },
                        match port.bus.entry {
                            BusEntry::System(_) => "s",
                            _ => "g",
                        },
                        port.bus.bus_cycles
                    );
                }
            }
        }

        for unit in GpuUnit::ALL {
            for (sub, port) in self.ports[unit.index()].iter().enumerate() {
                if port.bus.reserved {
                    let _ = writeln!(out, "  bus {}[{}] = RESERVED", unit, sub);
                }
            }
        }
        out
    }
}
