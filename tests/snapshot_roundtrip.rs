//! Snapshot save/load round trips

mod common;
use common::{source, Harness};

use gddr_mc::{
    ClientTransaction, ControllerConfig, GddrTiming, GpuUnit, MemoryController, PagePolicy,
    SchedulerKind, SplitterKind, GPU_SNAPSHOT_FILE, SYSTEM_ADDRESS_SPACE, SYSTEM_SNAPSHOT_FILE,
};

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.memory_channels = 2;
    config.banks_per_channel = 2;
    config.row_size_bytes = 64;
    config.gpu_memory_size = 4096;
    config.system_memory_size = 512;
    config.burst_length = 4;
    config.burst_bytes_per_cycle = 8;
    config.timing = GddrTiming::ZERO_DELAY;
    config.request_queue_size = 16;
    config.splitter = SplitterKind::Interleaved {
        channel_interleaving: 16,
        bank_interleaving: 64,
    };
    config.scheduler.kind = SchedulerKind::Fifo;
    config.scheduler.page_policy = PagePolicy::OpenPage;
    config.scheduler.max_channel_transactions = 8;
    config
}

#[test]
fn save_load_save_produces_identical_files() {
    let unit = GpuUnit::CommandProcessor;
    let src = source(unit, 0);
    let mut harness = Harness::new(config(), &[(unit, 0)]);

    // distinctive content in both address spaces
    let gpu_pattern: Vec<u8> = (0..4096usize).map(|i| (i % 241) as u8).collect();
    let sys_pattern: Vec<u8> = (0..512usize).map(|i| (i % 13) as u8).collect();
    harness.send(ClientTransaction::preload(0, src, 0, gpu_pattern, None), 50);
    harness.send(
        ClientTransaction::preload(0, src, SYSTEM_ADDRESS_SPACE, sys_pattern, None),
        50,
    );

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    harness.mc.snapshot_save(dir_a.path()).unwrap();

    // a fresh controller restored from the snapshot holds the same bytes
    let mut restored = MemoryController::new(config());
    restored.snapshot_load(dir_a.path()).unwrap();
    restored.snapshot_save(dir_b.path()).unwrap();

    for file in [GPU_SNAPSHOT_FILE, SYSTEM_SNAPSHOT_FILE] {
        let a = std::fs::read(dir_a.path().join(file)).unwrap();
        let b = std::fs::read(dir_b.path().join(file)).unwrap();
        assert_eq!(a, b, "{} differs after restore", file);
    }
}

#[test]
fn restored_memory_serves_reads() {
    let unit = GpuUnit::CommandProcessor;
    let src = source(unit, 0);
    let mut harness = Harness::new(config(), &[(unit, 0)]);

    let pattern: Vec<u8> = (0..64).map(|i| 0x80 | i as u8).collect();
    harness.send(ClientTransaction::preload(0, src, 256, pattern.clone(), None), 50);

    let dir = tempfile::tempdir().unwrap();
    harness.mc.snapshot_save(dir.path()).unwrap();

    let mut restored = Harness::new(config(), &[(unit, 0)]);
    restored.mc.snapshot_load(dir.path()).unwrap();
    restored.send(ClientTransaction::read_req(1, src, 256, 32), 100);
    restored.wait_replies(1, 400);
    assert_eq!(restored.reply_data(1), &pattern[..32]);
}

#[test]
fn missing_snapshot_file_reports_io_error() {
    let mut mc = MemoryController::new(config());
    let dir = tempfile::tempdir().unwrap();
    assert!(mc.snapshot_load(dir.path()).is_err());
}
