//! Request-buffer backpressure and per-ROP reservation

mod common;
use common::{source, Harness};

use gddr_mc::{
    ClientOp, ClientTransaction, ControllerConfig, GddrTiming, GpuUnit, MemState, PagePolicy,
    SchedulerKind, SplitterKind,
};

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.memory_channels = 1;
    config.banks_per_channel = 1;
    config.row_size_bytes = 64;
    config.gpu_memory_size = 2048;
    config.system_memory_size = 256;
    config.burst_length = 4;
    config.burst_bytes_per_cycle = 8;
    config.timing = GddrTiming::custom(2, 3, 2, 2, 3, 4, 5, 2);
    config.request_queue_size = 16;
    config.service_queue_size = 16;
    config.splitter = SplitterKind::Interleaved {
        channel_interleaving: 16,
        bank_interleaving: 16,
    };
    config.scheduler.kind = SchedulerKind::Fifo;
    config.scheduler.page_policy = PagePolicy::OpenPage;
    config.scheduler.max_channel_transactions = 8;
    config.per_rop_reservation = false;
    config
}

/// Sixty-four reads against a sixteen-slot request buffer: the controller
/// must throttle the client with AcceptNone for a stretch of cycles and
/// still complete every read without losing data.
#[test]
fn sixty_four_reads_throttle_and_complete() {
    let unit = GpuUnit::TextureUnit;
    let src = source(unit, 0);
    let mut harness = Harness::new(config(), &[(unit, 0)]);

    let pattern: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
    harness.send(ClientTransaction::preload(0, src, 0, pattern.clone(), None), 50);

    let mut max_none_streak = 0u32;
    let mut none_streak = 0u32;
    let mut sent = 0u32;
    while sent < 64 {
        let state = harness.mc.port(unit, 0).mem_state();
        if state.accepts_read() {
            none_streak = 0;
            let addr = sent * 16;
            harness
                .mc
                .port(unit, 0)
                .send(harness.cycle, ClientTransaction::read_req(sent + 1, src, addr, 16));
            sent += 1;
        } else {
            none_streak += 1;
            max_none_streak = max_none_streak.max(none_streak);
        }
        harness.tick();
        assert!(harness.cycle < 5000, "injection did not finish");
    }

    harness.wait_replies(64, 5000);
    assert!(
        max_none_streak >= 3,
        "expected at least 3 consecutive AcceptNone cycles, saw {}",
        max_none_streak
    );

    // every read completed with the right bytes, none lost
    assert_eq!(harness.replies.len(), 64);
    for i in 0..64u32 {
        let from = (i * 16) as usize;
        assert_eq!(harness.reply_data(i + 1), &pattern[from..from + 16]);
    }
}

/// With per-ROP reservation a single ROP instance is capped at its share
/// of the request buffer while other clients keep their accept state.
#[test]
fn rop_reservation_blocks_only_the_saturated_rop() {
    let mut config = config();
    config.request_queue_size = 32;
    config.num_rop_units = 2;
    config.per_rop_reservation = true;

    let unit = GpuUnit::ZStencilTest;
    let src = source(unit, 0);
    let mut harness = Harness::new(config, &[(unit, 0)]);

    harness.send(ClientTransaction::preload(0, src, 0, vec![0x5A; 1024], None), 50);

    let mut saw_rop_only_block = false;
    let mut sent = 0u32;
    while sent < 40 {
        let rop_state = harness.mc.port(unit, 0).mem_state();
        let other_state = harness.mc.port(GpuUnit::CommandProcessor, 0).mem_state();
        if rop_state == MemState::None && other_state != MemState::None {
            saw_rop_only_block = true;
        }
        if rop_state.accepts_read() {
            let addr = (sent % 64) * 16;
            harness
                .mc
                .port(unit, 0)
                .send(harness.cycle, ClientTransaction::read_req(sent + 1, src, addr, 16));
            sent += 1;
        }
        harness.tick();
        assert!(harness.cycle < 5000, "injection did not finish");
    }
    harness.wait_replies(40, 5000);

    assert!(
        saw_rop_only_block,
        "the saturated ROP was never blocked independently of other clients"
    );
    assert!(harness
        .replies
        .iter()
        .all(|(_, reply)| matches!(reply.op, ClientOp::ReadData { .. })));
}
