//! The fixed-latency system-memory path

mod common;
use common::{source, Harness};

use gddr_mc::{
    ClientTransaction, ControllerConfig, GddrTiming, GpuUnit, SplitterKind, SYSTEM_ADDRESS_SPACE,
};

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.memory_channels = 1;
    config.banks_per_channel = 1;
    config.row_size_bytes = 64;
    config.gpu_memory_size = 1024;
    config.system_memory_size = 1024;
    config.burst_length = 4;
    config.burst_bytes_per_cycle = 8;
    config.timing = GddrTiming::ZERO_DELAY;
    config.request_queue_size = 16;
    config.splitter = SplitterKind::Interleaved {
        channel_interleaving: 16,
        bank_interleaving: 16,
    };
    config.system_memory_read_latency = 20;
    config.system_memory_write_latency = 20;
    config.system_transaction_cycles = 4;
    config
}

#[test]
fn system_write_then_read_round_trips() {
    let unit = GpuUnit::CommandProcessor;
    let src = source(unit, 0);
    let mut harness = Harness::new(config(), &[(unit, 0)]);

    let payload: Vec<u8> = (0x40..0x50).collect();
    harness.send(
        ClientTransaction::write_data(1, src, SYSTEM_ADDRESS_SPACE | 0x80, payload.clone(), None),
        100,
    );
    // write latency plus two bus transmissions before the data is settled
    harness.run(100);

    harness.send(
        ClientTransaction::read_req(2, src, SYSTEM_ADDRESS_SPACE | 0x80, 16),
        100,
    );
    harness.wait_replies(1, 300);
    assert_eq!(harness.reply_data(2), payload.as_slice());
}

#[test]
fn masked_system_write_merges_bytes() {
    let unit = GpuUnit::CommandProcessor;
    let src = source(unit, 0);
    let mut harness = Harness::new(config(), &[(unit, 0)]);

    harness.send(
        ClientTransaction::preload(0, src, SYSTEM_ADDRESS_SPACE, vec![0xEE; 64], None),
        50,
    );

    // keep the middle two words
    let mask = vec![0xFFFF_FFFF, 0x0000_0000, 0x0000_0000, 0xFFFF_FFFF];
    harness.send(
        ClientTransaction::write_data(1, src, SYSTEM_ADDRESS_SPACE, vec![0x77; 16], Some(mask)),
        100,
    );
    harness.run(100);

    harness.send(ClientTransaction::read_req(2, src, SYSTEM_ADDRESS_SPACE, 16), 100);
    harness.wait_replies(1, 300);

    let mut expected = Vec::new();
    expected.extend_from_slice(&[0x77; 4]);
    expected.extend_from_slice(&[0xEE; 8]);
    expected.extend_from_slice(&[0x77; 4]);
    assert_eq!(harness.reply_data(2), expected.as_slice());
}

/// System reads carry the configured latency: the reply cannot arrive
/// before the read signal latency plus both bus transmissions.
#[test]
fn system_read_pays_the_configured_latency() {
    let unit = GpuUnit::CommandProcessor;
    let src = source(unit, 0);
    let mut harness = Harness::new(config(), &[(unit, 0)]);

    let sent_at = harness.send(
        ClientTransaction::read_req(1, src, SYSTEM_ADDRESS_SPACE, 16),
        100,
    );
    harness.wait_replies(1, 300);
    let (arrived_at, _) = harness.replies[0];
    assert!(
        arrived_at >= sent_at + 20,
        "system read completed after {} cycles, before the configured latency",
        arrived_at - sent_at
    );
}
