//! Split read/write scheduler: hazard tracking between the two queues

mod common;
use common::{source, Harness};

use gddr_mc::{
    ClientTransaction, ControllerConfig, GddrTiming, GpuUnit, PagePolicy, SchedulerKind,
    SplitterKind, SwitchModePolicy,
};

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.memory_channels = 1;
    config.banks_per_channel = 1;
    config.row_size_bytes = 64; // 16 columns
    config.gpu_memory_size = 1024; // 16 rows
    config.system_memory_size = 256;
    config.burst_length = 2; // 8-byte bursts
    config.burst_bytes_per_cycle = 8;
    config.timing = GddrTiming::custom(2, 3, 2, 2, 3, 4, 5, 2);
    config.request_queue_size = 16;
    config.splitter = SplitterKind::Interleaved {
        channel_interleaving: 64,
        bank_interleaving: 64,
    };
    config.scheduler.kind = SchedulerKind::RwFifo;
    config.scheduler.page_policy = PagePolicy::OpenPage;
    config.scheduler.max_channel_transactions = 8;
    config.scheduler.switch_mode = SwitchModePolicy::LoadsOverStores;
    config
}

/// A read overlapping a queued write must wait for the write and then
/// observe its data.
#[test]
fn overlapping_read_observes_the_earlier_write() {
    let unit = GpuUnit::ColorWrite;
    let mut harness = Harness::new(config(), &[(unit, 0)]);
    let src = source(unit, 0);

    harness.send(ClientTransaction::preload(0, src, 0, vec![0x22; 1024], None), 50);

    // a long write to another row keeps the scheduler busy so the next
    // two transactions queue up behind it
    harness.send(ClientTransaction::write_data(1, src, 64, vec![0x33; 32], None), 100);
    // the write under test: row 0, columns 0..3
    harness.send(ClientTransaction::write_data(2, src, 0, vec![0x11; 16], None), 100);
    // the read under test overlaps its tail: columns 2..5
    harness.send(ClientTransaction::read_req(3, src, 8, 16), 100);

    harness.wait_replies(1, 600);

    let mut expected = vec![0x11; 8];
    expected.extend_from_slice(&[0x22; 8]);
    assert_eq!(harness.reply_data(3), expected.as_slice());
}

/// With dedicated read slots the scheduler advertises read-only and
/// write-only states independently; both kinds still complete.
#[test]
fn dedicated_read_slots_still_drain_both_kinds() {
    let mut config = config();
    config.scheduler.dedicated_read_transactions = 2;
    config.scheduler.switch_mode = SwitchModePolicy::TwoCounters;
    config.scheduler.max_consecutive_reads = 2;
    config.scheduler.max_consecutive_writes = 2;

    let unit = GpuUnit::ColorWrite;
    let mut harness = Harness::new(config, &[(unit, 0)]);
    let src = source(unit, 0);

    harness.send(ClientTransaction::preload(0, src, 0, vec![0xAA; 1024], None), 50);

    for i in 0..4u32 {
        harness.send(
            ClientTransaction::write_data(10 + i, src, (i as u32) * 64, vec![i as u8; 16], None),
            300,
        );
        harness.send(ClientTransaction::read_req(20 + i, src, (i as u32) * 64, 16), 300);
    }
    harness.wait_replies(4, 2000);

    for i in 0..4u32 {
        assert_eq!(harness.reply_data(20 + i), &[i as u8; 16][..]);
    }
}
