//! Address splitters: map linear client addresses onto
//! `(channel, bank, row, column)` tuples and split requests into
//! channel-transaction-sized pieces

use std::fmt::Write as _;

/// A linear address decomposed into its DDR coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressInfo {
    pub channel: u32,
    pub bank: u32,
    pub row: u32,
    pub start_col: u32,
}

/// One burst-aligned piece of a split request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitPiece {
    pub info: AddressInfo,
    pub bytes: u32,
    /// Byte offset of the piece inside the original request
    pub offset: u32,
}

/// Memory geometry shared by both splitter variants
#[derive(Clone, Copy, Debug)]
struct Geometry {
    burst_bytes: u32,
    channels: u32,
    banks: u32,
    rows: u32,
    cols: u32,
}

impl Geometry {
    fn new(burst_length: u32, channels: u32, banks: u32, rows: u32, cols: u32) -> Geometry {
        assert!(burst_length > 0, "burst length must be non-zero");
        assert!(
            channels.is_power_of_two(),
            "only a power-of-two number of channels is supported"
        );
        assert!(
            banks.is_power_of_two(),
            "only a power-of-two number of banks is supported"
        );
        assert!(rows.is_power_of_two(), "bank rows must be a power of two");
        assert!(cols.is_power_of_two(), "bank columns must be a power of two");
        Geometry {
            burst_bytes: 4 * burst_length,
            channels,
            banks,
            rows,
            cols,
        }
    }

    fn check_piece(&self, info: AddressInfo) {
        assert!(info.channel < self.channels, "channel out of bounds");
        assert!(info.bank < self.banks, "bank out of bounds");
        assert!(info.row < self.rows, "row out of bounds");
        assert!(info.start_col < self.cols, "column out of bounds");
    }
}

/// Byte-interleaved splitter: channel bits sit at
/// `log2(channel_interleaving)` and bank bits at `log2(bank_interleaving)`
/// of the remaining address; everything above forms `(row, column)`.
#[derive(Clone, Debug)]
pub struct InterleavedSplitter {
    geometry: Geometry,
    channel_mask: u32,
    channel_shift: u32,
    channel_interleaving_mask: u32,
    channel_interleaving_shift: u32,
    bank_mask: u32,
    bank_shift: u32,
    bank_interleaving_mask: u32,
    bank_interleaving_shift: u32,
    row_mask: u32,
    row_shift: u32,
    col_mask: u32,
    col_shift: u32,
}

impl InterleavedSplitter {
    pub fn new(
        burst_length: u32,
        channels: u32,
        banks: u32,
        rows: u32,
        cols: u32,
        channel_interleaving: u32,
        bank_interleaving: u32,
    ) -> InterleavedSplitter {
        let geometry = Geometry::new(burst_length, channels, banks, rows, cols);
        let burst_bytes = geometry.burst_bytes;
        assert!(
            channel_interleaving >= burst_bytes,
            "channel interleaving must be at least the burst byte size"
        );
        assert!(
            bank_interleaving >= burst_bytes,
            "bank interleaving must be at least the burst byte size"
        );
        assert!(
            channel_interleaving % burst_bytes == 0 && channel_interleaving.is_power_of_two(),
            "channel interleaving must be a power-of-two multiple of the burst byte size"
        );
        assert!(
            bank_interleaving % burst_bytes == 0 && bank_interleaving.is_power_of_two(),
            "bank interleaving must be a power-of-two multiple of the burst byte size"
        );

        InterleavedSplitter {
            geometry,
            channel_mask: channels - 1,
            channel_shift: channel_interleaving.trailing_zeros(),
            channel_interleaving_mask: channel_interleaving - 1,
            channel_interleaving_shift: channels.trailing_zeros(),
            bank_mask: banks - 1,
            bank_shift: bank_interleaving.trailing_zeros(),
            bank_interleaving_mask: bank_interleaving - 1,
            bank_interleaving_shift: banks.trailing_zeros(),
            row_mask: rows - 1,
            row_shift: cols.trailing_zeros() + 2,
            col_mask: cols - 1,
            col_shift: 2,
        }
    }

    fn extract(&self, mut address: u32) -> AddressInfo {
        let channel = if self.geometry.channels == 1 {
            0
        } else {
            let channel = (address >> self.channel_shift) & self.channel_mask;
            // squeeze the channel selector bits out of the address
            address = ((address >> self.channel_interleaving_shift)
                & !self.channel_interleaving_mask)
                | (address & self.channel_interleaving_mask);
            channel
        };

        let bank = if self.geometry.banks == 1 {
            0
        } else {
            let bank = (address >> self.bank_shift) & self.bank_mask;
            address = ((address >> self.bank_interleaving_shift) & !self.bank_interleaving_mask)
                | (address & self.bank_interleaving_mask);
            bank
        };

        AddressInfo {
            channel,
            bank,
            row: (address >> self.row_shift) & self.row_mask,
            start_col: (address >> self.col_shift) & self.col_mask,
        }
    }

    fn create(&self, info: AddressInfo) -> u32 {
        let mut address = (info.row << self.row_shift) | (info.start_col << self.col_shift);

        if self.geometry.banks > 1 {
            address = ((address & !self.bank_interleaving_mask) << self.bank_interleaving_shift)
                | (info.bank << self.bank_shift)
                | (address & self.bank_interleaving_mask);
        }
        if self.geometry.channels > 1 {
            address = ((address & !self.channel_interleaving_mask)
                << self.channel_interleaving_shift)
                | (info.channel << self.channel_shift)
                | (address & self.channel_interleaving_mask);
        }
        address
    }
}

/// Bitmask splitter: channel and bank values are gathered from explicitly
/// named address bits; the remaining bits are compacted into
/// `(row, column)`.
///
/// Bit lists are textual, e.g. `"9 10 11"`; the first listed bit is the
/// least significant bit of the gathered value.
#[derive(Clone, Debug)]
pub struct BitmaskSplitter {
    geometry: Geometry,
    channel_bits: Vec<u32>,
    bank_bits: Vec<u32>,
    /// All selector bits, sorted descending, for address compaction
    bits_to_remove: Vec<u32>,
    row_mask: u32,
    row_shift: u32,
    col_mask: u32,
    col_shift: u32,
}

impl BitmaskSplitter {
    pub fn new(
        burst_length: u32,
        channels: u32,
        banks: u32,
        rows: u32,
        cols: u32,
        channel_bitmask: &str,
        bank_bitmask: &str,
    ) -> BitmaskSplitter {
        let geometry = Geometry::new(burst_length, channels, banks, rows, cols);

        let channel_bits = Self::parse_bits(channel_bitmask, channels, "channel");
        let bank_bits = Self::parse_bits(bank_bitmask, banks, "bank");
        for bit in &bank_bits {
            assert!(
                !channel_bits.contains(bit),
                "bank bitmask selects bit {} already used by the channel bitmask",
                bit
            );
        }

        let mut bits_to_remove: Vec<u32> =
            channel_bits.iter().chain(bank_bits.iter()).copied().collect();
        bits_to_remove.sort_unstable_by(|a, b| b.cmp(a));

        BitmaskSplitter {
            geometry,
            channel_bits,
            bank_bits,
            bits_to_remove,
            row_mask: rows - 1,
            row_shift: cols.trailing_zeros() + 2,
            col_mask: cols - 1,
            col_shift: 2,
        }
    }

    fn parse_bits(bitmask: &str, selections: u32, target: &str) -> Vec<u32> {
        let mut bits = Vec::new();
        for token in bitmask.split_whitespace() {
            let bit: u32 = token
                .parse()
                .unwrap_or_else(|_| panic!("{} bitmask token '{}' is not a bit index", target, token));
            assert!(bit <= 31, "{} bitmask selects bit {} greater than 31", target, bit);
            assert!(
                !bits.contains(&bit),
                "{} bitmask selects bit {} twice",
                target,
                bit
            );
            bits.push(bit);
        }
        let expected = if selections <= 1 {
            0
        } else {
            selections.trailing_zeros() as usize
        };
        assert!(
            bits.len() == expected,
            "{} bitmask names {} bits but {} selections need {}",
            target,
            bits.len(),
            selections,
            expected
        );
        bits
    }

    fn gather(bits: &[u32], address: u32) -> u32 {
        bits.iter()
            .enumerate()
            .fold(0, |value, (k, &bit)| value | (((address >> bit) & 1) << k))
    }

    fn remove_bits(&self, mut address: u32) -> u32 {
        for &bit in &self.bits_to_remove {
            let low = (1u32 << bit) - 1;
            address = ((address >> 1) & !low) | (address & low);
        }
        address
    }

    fn extract(&self, address: u32) -> AddressInfo {
        let channel = Self::gather(&self.channel_bits, address);
        let bank = Self::gather(&self.bank_bits, address);
        let compact = self.remove_bits(address);
        AddressInfo {
            channel,
            bank,
            row: (compact >> self.row_shift) & self.row_mask,
            start_col: (compact >> self.col_shift) & self.col_mask,
        }
    }

    fn create(&self, info: AddressInfo) -> u32 {
        let mut compact = (info.row << self.row_shift) | (info.start_col << self.col_shift);
        let mut address = 0u32;
        for bit in 0..32 {
            if let Some(k) = self.channel_bits.iter().position(|&b| b == bit) {
                address |= ((info.channel >> k) & 1) << bit;
            } else if let Some(k) = self.bank_bits.iter().position(|&b| b == bit) {
                address |= ((info.bank >> k) & 1) << bit;
            } else {
                address |= (compact & 1) << bit;
                compact >>= 1;
            }
        }
        address
    }
}

/// Policy object mapping addresses to channels. Selected at construction
/// from the controller parameters; both variants implement the same
/// contract.
#[derive(Clone, Debug)]
pub enum RequestSplitter {
    Interleaved(InterleavedSplitter),
    Bitmask(BitmaskSplitter),
}

impl RequestSplitter {
    pub fn extract_address_info(&self, address: u32) -> AddressInfo {
        match self {
            RequestSplitter::Interleaved(s) => s.extract(address),
            RequestSplitter::Bitmask(s) => s.extract(address),
        }
    }

    pub fn create_address(&self, info: AddressInfo) -> u32 {
        match self {
            RequestSplitter::Interleaved(s) => s.create(info),
            RequestSplitter::Bitmask(s) => s.create(info),
        }
    }

    fn geometry(&self) -> &Geometry {
        match self {
            RequestSplitter::Interleaved(s) => &s.geometry,
            RequestSplitter::Bitmask(s) => &s.geometry,
        }
    }

    /// Bytes covered by one burst
    pub fn burst_bytes(&self) -> u32 {
        self.geometry().burst_bytes
    }

    /// Splits the byte range `[address, address + size)` into pieces, each
    /// confined to a single `(channel, bank, row)`. Consecutive bursts
    /// landing on the same tuple extend the current piece.
    ///
    /// # Panics
    ///
    /// * Panics when `address` is not burst-aligned or `size` is zero
    ///
    /// * Panics when a piece falls outside the configured geometry
    pub fn split(&self, address: u32, size: u32) -> Vec<SplitPiece> {
        let burst_bytes = self.geometry().burst_bytes;
        assert!(size > 0, "request size cannot be 0");
        assert!(
            address % burst_bytes == 0,
            "request address {:#x} is not aligned to the burst length",
            address
        );

        let mut pieces: Vec<SplitPiece> = Vec::new();
        let mut remaining = size;
        let mut next_address = address;
        let mut offset = 0;
        let mut prev_info: Option<AddressInfo> = None;

        while remaining != 0 {
            let bytes = remaining.min(burst_bytes);
            let info = self.extract_address_info(next_address);

            let extends = prev_info.map_or(false, |prev| {
                info.channel == prev.channel && info.bank == prev.bank && info.row == prev.row
            });
            if extends {
                pieces.last_mut().unwrap().bytes += bytes;
            } else {
                self.geometry().check_piece(info);
                pieces.push(SplitPiece {
                    info,
                    bytes,
                    offset,
                });
                prev_info = Some(info);
            }

            next_address += bytes;
            offset += bytes;
            remaining -= bytes;
        }

        pieces
    }

    /// Renders the decomposition of an address, for diagnostics
    pub fn describe_address(&self, address: u32) -> String {
        let info = self.extract_address_info(address);
        let mut out = String::new();
        let _ = write!(
            out,
            "{:#010x} -> channel={} bank={} row={} col={}",
            address, info.channel, info.bank, info.row, info.start_col
        );
        out
    }
}
