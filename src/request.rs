//! Memory-request slots and the request-buffer arena

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::client::ClientTransaction;

/// Lifecycle of a memory request inside the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemReqState {
    /// Channel transactions of the request may be dispatched
    Ready,
    /// Parked, not eligible for dispatch
    Waiting,
    /// At least one channel transaction is inside a channel
    Memory,
    /// The payload is still crossing the client bus
    Transmitting,
}

/// Stable handle to a request-buffer slot.
///
/// The generation counter detects use of an expired handle after the slot
/// has been recycled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestId {
    slot: u32,
    generation: u32,
}

impl RequestId {
    pub fn slot(self) -> u32 {
        self.slot
    }
}

/// One client-visible memory request occupying a request-buffer slot
#[derive(Debug)]
pub struct MemoryRequest {
    txn: Option<ClientTransaction>,
    state: MemReqState,
    /// Channel transactions still outstanding for this request
    counter: u32,
    arrival: u64,
    /// Reassembly buffer of a read request
    read_data: Vec<u8>,
}

impl MemoryRequest {
    pub fn transaction(&self) -> &ClientTransaction {
        self.txn.as_ref().expect("request slot without a transaction")
    }

    pub fn state(&self) -> MemReqState {
        self.state
    }

    pub fn set_state(&mut self, state: MemReqState) {
        self.state = state;
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn set_counter(&mut self, value: u32) {
        self.counter = value;
    }

    pub fn dec_counter(&mut self) {
        assert!(self.counter > 0, "decrementing a zero outstanding counter");
        self.counter -= 1;
    }

    pub fn arrival(&self) -> u64 {
        self.arrival
    }

    pub fn is_read(&self) -> bool {
        self.transaction().is_read()
    }

    /// Merges a completed channel transaction's read data at `offset`
    pub fn merge_read_data(&mut self, offset: u32, data: &[u8]) {
        let offset = offset as usize;
        assert!(
            offset + data.len() <= self.read_data.len(),
            "read reassembly overflows the request buffer"
        );
        self.read_data[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Takes the reassembled read data, leaving the buffer empty
    pub fn take_read_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.read_data)
    }
}

/// Fixed pool of memory-request slots backed by a free list
#[derive(Debug)]
pub struct RequestBuffer {
    name: &'static str,
    slots: Vec<Slot>,
    free: VecDeque<u32>,
}

#[derive(Debug)]
struct Slot {
    request: Option<MemoryRequest>,
    generation: u32,
}

impl RequestBuffer {
    pub fn new(name: &'static str, capacity: u32) -> RequestBuffer {
        RequestBuffer {
            name,
            slots: (0..capacity)
                .map(|_| Slot {
                    request: None,
                    generation: 0,
                })
                .collect(),
            free: (0..capacity).collect(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn free_slots(&self) -> u32 {
        self.free.len() as u32
    }

    pub fn allocated(&self) -> u32 {
        self.capacity() - self.free_slots()
    }

    /// Allocates a slot for an incoming transaction
    ///
    /// # Panics
    ///
    /// Panics when the pool is exhausted, which means a client sent a
    /// request despite an `AcceptNone` token
    pub fn alloc(&mut self, txn: ClientTransaction, cycle: u64) -> RequestId {
        let slot = match self.free.pop_front() {
            Some(slot) => slot,
            None => panic!("{}: cycle {}: request buffer is full", self.name, cycle),
        };
        let read_data = if txn.is_read() {
            vec![0; txn.size() as usize]
        } else {
            Vec::new()
        };
        let entry = &mut self.slots[slot as usize];
        entry.request = Some(MemoryRequest {
            txn: Some(txn),
            state: MemReqState::Ready,
            counter: 0,
            arrival: cycle,
            read_data,
        });
        RequestId {
            slot,
            generation: entry.generation,
        }
    }

    pub fn get(&self, id: RequestId) -> &MemoryRequest {
        let entry = &self.slots[id.slot as usize];
        assert!(
            entry.generation == id.generation,
            "{}: stale request handle for slot {}",
            self.name,
            id.slot
        );
        entry.request.as_ref().expect("request slot is not occupied")
    }

    pub fn get_mut(&mut self, id: RequestId) -> &mut MemoryRequest {
        let entry = &mut self.slots[id.slot as usize];
        assert!(
            entry.generation == id.generation,
            "{}: stale request handle for slot {}",
            self.name,
            id.slot
        );
        entry.request.as_mut().expect("request slot is not occupied")
    }

    /// Releases the slot, returning the request and invalidating handles
    pub fn release(&mut self, id: RequestId) -> MemoryRequest {
        let entry = &mut self.slots[id.slot as usize];
        assert!(
            entry.generation == id.generation,
            "{}: stale request handle for slot {}",
            self.name,
            id.slot
        );
        let request = entry.request.take().expect("releasing an empty request slot");
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push_back(id.slot);
        request
    }

    /// Iterates the occupied slots with their handles
    pub fn iter_occupied(&self) -> impl Iterator<Item = (RequestId, &MemoryRequest)> {
        self.slots.iter().enumerate().filter_map(|(i, entry)| {
            entry.request.as_ref().map(|req| {
                (
                    RequestId {
                        slot: i as u32,
                        generation: entry.generation,
                    },
                    req,
                )
            })
        })
    }

    /// Compact `{3, [5..8], 11(2)}`-style rendering of the occupied slots
    pub fn occupancy_ranges(&self) -> String {
        let indices: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, e)| e.request.is_some())
            .map(|(i, _)| i as u32)
            .collect();
        if indices.is_empty() {
            return "[]".to_string();
        }
        let mut out = String::from("{ ");
        let mut start = indices[0];
        let mut prev = indices[0];
        for &i in &indices[1..] {
            if i == prev + 1 {
                prev = i;
                continue;
            }
            if start == prev {
                let _ = write!(out, "{}, ", start);
            } else {
                let _ = write!(out, "[{}..{}], ", start, prev);
            }
            start = i;
            prev = i;
        }
        if start == prev {
            let _ = write!(out, "{}", start);
        } else {
            let _ = write!(out, "[{}..{}]", start, prev);
        }
        out.push_str(" }");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientSource, ClientTransaction, GpuUnit};

    fn txn(id: u32) -> ClientTransaction {
        ClientTransaction::read_req(id, ClientSource::new(GpuUnit::TextureUnit, 0), 0, 16)
    }

    #[test]
    fn alloc_and_release_cycle() {
        let mut buffer = RequestBuffer::new("requestBuffer", 2);
        let a = buffer.alloc(txn(1), 0);
        let b = buffer.alloc(txn(2), 0);
        assert_eq!(buffer.free_slots(), 0);
        buffer.release(a);
        assert_eq!(buffer.free_slots(), 1);
        assert_eq!(buffer.get(b).transaction().id, 2);
    }

    #[test]
    #[should_panic(expected = "request buffer is full")]
    fn exhausted_pool_is_fatal() {
        let mut buffer = RequestBuffer::new("requestBuffer", 1);
        let _ = buffer.alloc(txn(1), 0);
        let _ = buffer.alloc(txn(2), 0);
    }

    #[test]
    #[should_panic(expected = "stale request handle")]
    fn stale_handle_is_rejected() {
        let mut buffer = RequestBuffer::new("requestBuffer", 1);
        let a = buffer.alloc(txn(1), 0);
        buffer.release(a);
        let _ = buffer.alloc(txn(2), 0);
        let _ = buffer.get(a);
    }

    #[test]
    fn occupancy_ranges_render_compactly() {
        let mut buffer = RequestBuffer::new("requestBuffer", 6);
        let ids: Vec<_> = (0..5).map(|i| buffer.alloc(txn(i), 0)).collect();
        buffer.release(ids[1]);
        assert_eq!(buffer.occupancy_ranges(), "{ 0, [2..4] }");
    }
}
