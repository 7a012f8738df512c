//! Shared driver for controller-level tests

#![allow(dead_code)]

use gddr_mc::{
    ClientOp, ClientSource, ClientTransaction, ControllerConfig, GpuUnit, MemoryController,
};

/// Drives a [`MemoryController`] the way a client block would: polls the
/// accept token before submitting and drains replies every cycle.
pub struct Harness {
    pub mc: MemoryController,
    pub cycle: u64,
    watched: Vec<(GpuUnit, u32)>,
    pub replies: Vec<(u64, ClientTransaction)>,
}

impl Harness {
    pub fn new(config: ControllerConfig, watched: &[(GpuUnit, u32)]) -> Harness {
        Harness {
            mc: MemoryController::new(config),
            cycle: 0,
            watched: watched.to_vec(),
            replies: Vec::new(),
        }
    }

    /// Advances one cycle and collects replies from the watched ports
    pub fn tick(&mut self) {
        self.mc.clock(self.cycle);
        for &(unit, index) in &self.watched {
            if let Some(reply) = self.mc.port(unit, index).take_reply(self.cycle) {
                self.replies.push((self.cycle, reply));
            }
        }
        self.cycle += 1;
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    /// Waits for the accept token matching the transaction kind, then
    /// submits it. Returns the submission cycle.
    pub fn send(&mut self, txn: ClientTransaction, timeout: u64) -> u64 {
        let unit = txn.source.unit;
        let index = txn.source.index;
        let limit = self.cycle + timeout;
        loop {
            let state = self.mc.port(unit, index).mem_state();
            let accepted = match txn.op {
                ClientOp::ReadReq { .. } => state.accepts_read(),
                ClientOp::WriteData { .. } => state.accepts_write(),
                // preloads bypass the buffers, no backpressure applies
                _ => true,
            };
            if accepted {
                let sent_at = self.cycle;
                self.mc.port(unit, index).send(sent_at, txn);
                self.tick();
                return sent_at;
            }
            self.tick();
            assert!(
                self.cycle < limit,
                "timed out at cycle {} waiting to submit to {}[{}]",
                self.cycle,
                unit,
                index
            );
        }
    }

    /// Runs until `count` replies have been collected
    pub fn wait_replies(&mut self, count: usize, timeout: u64) {
        let limit = self.cycle + timeout;
        while self.replies.len() < count {
            self.tick();
            assert!(
                self.cycle < limit,
                "timed out at cycle {} with {} of {} replies",
                self.cycle,
                self.replies.len(),
                count
            );
        }
    }

    /// Payload of the reply with client ticket `id`
    pub fn reply_data(&self, id: u32) -> &[u8] {
        for (_, reply) in &self.replies {
            if reply.id == id {
                match &reply.op {
                    ClientOp::ReadData { data, .. } => return data,
                    other => panic!("reply {} is not read data: {:?}", id, other),
                }
            }
        }
        panic!("no reply with id {}", id);
    }
}

pub fn source(unit: GpuUnit, index: u32) -> ClientSource {
    ClientSource::new(unit, index)
}
