//! Channel transactions: the unit of work a channel scheduler operates on

use std::fmt;

use crate::request::RequestId;

/// An atomic DDR-address-range access confined to a single
/// `(channel, bank, row)` tuple.
///
/// A memory request splits into one or more channel transactions. Each
/// transaction owns its byte payload: the write data copied out of the
/// parent request, or the buffer read data accumulates into before it is
/// merged back at `request_offset`.
#[derive(Clone, Debug)]
pub struct ChannelTransaction {
    read: bool,
    request: RequestId,
    channel: u32,
    bank: u32,
    row: u32,
    start_col: u32,
    data: Vec<u8>,
    mask: Option<Vec<u32>>,
    request_offset: u32,
}

impl ChannelTransaction {
    /// Creates a read transaction for `bytes` bytes; the payload buffer is
    /// zero-filled until the read data arrives
    pub fn new_read(
        request: RequestId,
        channel: u32,
        bank: u32,
        row: u32,
        start_col: u32,
        bytes: u32,
        request_offset: u32,
    ) -> ChannelTransaction {
        assert!(bytes > 0, "channel transaction cannot be empty");
        ChannelTransaction {
            read: true,
            request,
            channel,
            bank,
            row,
            start_col,
            data: vec![0; bytes as usize],
            mask: None,
            request_offset,
        }
    }

    /// Creates a write transaction carrying its slice of the request
    /// payload and, when present, the matching word-granular mask slice
    pub fn new_write(
        request: RequestId,
        channel: u32,
        bank: u32,
        row: u32,
        start_col: u32,
        data: Vec<u8>,
        mask: Option<Vec<u32>>,
        request_offset: u32,
    ) -> ChannelTransaction {
        assert!(!data.is_empty(), "channel transaction cannot be empty");
        if let Some(mask) = &mask {
            assert!(
                mask.len() * 4 >= data.len(),
                "write mask shorter than the data payload"
            );
        }
        ChannelTransaction {
            read: false,
            request,
            channel,
            bank,
            row,
            start_col,
            data,
            mask,
            request_offset,
        }
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn bank(&self) -> u32 {
        self.bank
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn start_col(&self) -> u32 {
        self.start_col
    }

    pub fn bytes(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    pub fn mask(&self) -> Option<&[u32]> {
        self.mask.as_deref()
    }

    /// Byte offset of this transaction inside the parent request's buffer
    pub fn request_offset(&self) -> u32 {
        self.request_offset
    }

    /// Stores arriving read data at `offset` within the transaction
    pub fn set_data(&mut self, offset: u32, data: &[u8]) {
        let offset = offset as usize;
        assert!(
            offset + data.len() <= self.data.len(),
            "channel transaction overflow"
        );
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }

    /// True when both transactions touch an overlapping byte range of the
    /// same bank and row. Used for read-after-write and write-after-read
    /// dependency tracking.
    pub fn overlaps_with(&self, other: &ChannelTransaction) -> bool {
        if self.bank != other.bank || self.row != other.row {
            return false;
        }
        let a_start = self.start_col << 2;
        let a_end = a_start + self.bytes();
        let b_start = other.start_col << 2;
        let b_end = b_start + other.bytes();
        a_start <= b_end && b_start <= a_end
    }
}

impl fmt::Display for ChannelTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} slot={} bytes={} (C,B,R,Col)=({},{},{},{})",
            if self.read { "READ" } else { "WRITE" },
            self.request.slot(),
            self.bytes(),
            self.channel,
            self.bank,
            self.row,
            self.start_col
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientSource, ClientTransaction, GpuUnit};
    use crate::request::RequestBuffer;

    fn request_id() -> RequestId {
        let mut buffer = RequestBuffer::new("requestBuffer", 1);
        buffer.alloc(
            ClientTransaction::read_req(0, ClientSource::new(GpuUnit::TextureUnit, 0), 0, 64),
            0,
        )
    }

    #[test]
    fn overlap_requires_same_bank_and_row() {
        let id = request_id();
        let a = ChannelTransaction::new_read(id, 0, 0, 1, 0, 16, 0);
        let b = ChannelTransaction::new_read(id, 0, 0, 1, 2, 16, 0);
        let c = ChannelTransaction::new_read(id, 0, 1, 1, 2, 16, 0);
        let d = ChannelTransaction::new_read(id, 0, 0, 2, 2, 16, 0);
        assert!(a.overlaps_with(&b));
        assert!(!a.overlaps_with(&c));
        assert!(!a.overlaps_with(&d));
    }

    #[test]
    fn disjoint_column_ranges_do_not_overlap() {
        let id = request_id();
        let a = ChannelTransaction::new_read(id, 0, 0, 1, 0, 16, 0);
        let b = ChannelTransaction::new_read(id, 0, 0, 1, 16, 16, 0);
        assert!(!a.overlaps_with(&b));
    }
}
