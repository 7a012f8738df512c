//! Per-bank queue scheduler with its opportunistic managers

mod common;
use common::{source, Harness};

use gddr_mc::{
    ActiveManagerMode, BankQueueSelection, ClientTransaction, ControllerConfig, GddrTiming,
    GpuUnit, ManagerOrder, PagePolicy, SchedulerKind, SplitterKind, SwitchModePolicy,
};

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.memory_channels = 1;
    config.banks_per_channel = 4;
    config.row_size_bytes = 64; // 16 columns
    config.gpu_memory_size = 8192; // 32 rows per bank
    config.system_memory_size = 256;
    config.burst_length = 4;
    config.burst_bytes_per_cycle = 8;
    config.timing = GddrTiming::custom(2, 3, 2, 2, 3, 4, 5, 2);
    config.request_queue_size = 16;
    config.splitter = SplitterKind::Interleaved {
        channel_interleaving: 16,
        bank_interleaving: 64,
    };
    config.scheduler.kind = SchedulerKind::BankQueue;
    config.scheduler.page_policy = PagePolicy::OpenPage;
    config.scheduler.max_channel_transactions = 8; // two slots per bank
    config.scheduler.switch_mode = SwitchModePolicy::TwoCounters;
    config.scheduler.max_consecutive_reads = 4;
    config.scheduler.max_consecutive_writes = 4;
    config.scheduler.bank_selection_policy = "MORE_CONSECUTIVE_HITS OLDEST_FIRST".to_string();
    config.scheduler.manager_order = ManagerOrder::ActiveFirst;
    config.scheduler.active_manager_mode = ActiveManagerMode::Conservative;
    config
}

/// Reads spread over all four banks complete and each bank is opened once
#[test]
fn reads_across_banks_complete_with_one_activate_each() {
    let unit = GpuUnit::TextureUnit;
    let src = source(unit, 0);
    let mut harness = Harness::new(config(), &[(unit, 0)]);

    let pattern: Vec<u8> = (0..256).map(|i| (i as u8) ^ 0x5A).collect();
    harness.send(ClientTransaction::preload(0, src, 0, pattern.clone(), None), 50);

    // bank interleaving is one row: offsets 0, 64, 128, 192 hit banks 0..3
    for i in 0..4u32 {
        harness.send(ClientTransaction::read_req(i + 1, src, i * 64, 32), 200);
    }
    harness.wait_replies(4, 1500);

    for i in 0..4u32 {
        let from = (i * 64) as usize;
        assert_eq!(harness.reply_data(i + 1), &pattern[from..from + 32]);
    }

    let stats = harness.mc.channel_stats(0);
    assert_eq!(stats.activate_commands, 4);
    assert_eq!(stats.read_commands, 8); // two bursts per request
    assert_eq!(stats.precharge_commands, 0);
}

/// The Activate Manager pre-opens waiting banks while the selected bank
/// stalls on its timing constraints: all rows are opened with fewer
/// wasted cycles but the data is unchanged
#[test]
fn managers_hide_activation_latency() {
    let unit = GpuUnit::TextureUnit;
    let src = source(unit, 0);

    let mut with_managers = Harness::new(config(), &[(unit, 0)]);
    let mut without = {
        let mut config = config();
        config.scheduler.disable_active_manager = true;
        config.scheduler.disable_precharge_manager = true;
        Harness::new(config, &[(unit, 0)])
    };

    let pattern: Vec<u8> = (0..256).map(|i| i as u8).collect();
    for harness in [&mut with_managers, &mut without] {
        harness.send(ClientTransaction::preload(0, src, 0, pattern.clone(), None), 50);
        for i in 0..4u32 {
            harness.send(ClientTransaction::read_req(i + 1, src, i * 64, 32), 200);
        }
        harness.wait_replies(4, 1500);
        for i in 0..4u32 {
            let from = (i * 64) as usize;
            assert_eq!(harness.reply_data(i + 1), &pattern[from..from + 32]);
        }
    }

    let eager = with_managers.mc.channel_stats(0).activate_commands;
    let lazy = without.mc.channel_stats(0).activate_commands;
    assert_eq!(eager, 4);
    assert_eq!(lazy, 4);
    // with the managers enabled the last reply cannot arrive later
    let done_eager = with_managers.replies.iter().map(|(c, _)| *c).max().unwrap();
    let done_lazy = without.replies.iter().map(|(c, _)| *c).max().unwrap();
    assert!(done_eager <= done_lazy);
}

/// Per-bank scheduler states let an almost-full bank stall alone while
/// other banks keep accepting
#[test]
fn per_bank_states_keep_other_banks_flowing() {
    let mut config = config();
    config.scheduler.per_bank_state = true;
    config.per_bank_channel_queues = true;
    config.bank_queue_selection = BankQueueSelection::OldestFirst;

    let unit = GpuUnit::TextureUnit;
    let src = source(unit, 0);
    let mut harness = Harness::new(config, &[(unit, 0)]);

    let pattern: Vec<u8> = (0..1024).map(|i| (i % 199) as u8).collect();
    harness.send(ClientTransaction::preload(0, src, 0, pattern.clone(), None), 50);

    // hammer bank 0 with row-alternating reads while bank 1 gets a few
    let mut id = 1u32;
    for row in 0..6u32 {
        // bank 0 rows live at row * 256 (4-bank interleaving of one row)
        harness.send(ClientTransaction::read_req(id, src, row * 256, 16), 400);
        id += 1;
    }
    for i in 0..2u32 {
        harness.send(ClientTransaction::read_req(id, src, 64 + i * 256, 16), 400);
        id += 1;
    }
    harness.wait_replies(8, 3000);

    for (_, reply) in &harness.replies {
        let addr = reply.addr() as usize;
        match &reply.op {
            gddr_mc::ClientOp::ReadData { data, .. } => {
                assert_eq!(data.as_slice(), &pattern[addr..addr + 16]);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
