//! GDDR timing parameter sets

/// GDDR timing parameters structure definition
///
/// All values are expressed in memory clock cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GddrTiming {
    /// Delay between two ACTIVATE commands to different banks
    pub t_rrd: u32,
    /// Delay between an ACTIVATE command and a READ/WRITE command
    pub t_rcd: u32,
    /// Delay between the end of a write burst and the next READ command
    pub t_wtr: u32,
    /// Data-pin cycles that must stay idle between read data and write data
    pub t_rtw: u32,
    /// Write recovery time before a PRECHARGE on the same bank
    pub t_wr: u32,
    /// Row precharge duration
    pub t_rp: u32,
    /// Delay from a READ command to the first data word on the pins
    pub cas_latency: u32,
    /// Delay from a WRITE command to the first data word on the pins
    pub write_latency: u32,
}

impl GddrTiming {
    /// Timing set with every constraint set to zero. Useful to isolate
    /// scheduling behaviour from protocol delays.
    pub const ZERO_DELAY: GddrTiming = GddrTiming {
        t_rrd: 0,
        t_rcd: 0,
        t_wtr: 0,
        t_rtw: 0,
        t_wr: 0,
        t_rp: 0,
        cas_latency: 0,
        write_latency: 0,
    };

    /// Fully custom timing set taken from configuration
    #[allow(clippy::too_many_arguments)]
    pub const fn custom(
        t_rrd: u32,
        t_rcd: u32,
        t_wtr: u32,
        t_rtw: u32,
        t_wr: u32,
        t_rp: u32,
        cas_latency: u32,
        write_latency: u32,
    ) -> GddrTiming {
        GddrTiming {
            t_rrd,
            t_rcd,
            t_wtr,
            t_rtw,
            t_wr,
            t_rp,
            cas_latency,
            write_latency,
        }
    }
}

/// A simulated GDDR device. Implement this to add a new named timing
/// profile under [`crate::devices`].
pub trait GddrChip {
    /// Timing parameters of the device
    const TIMING: GddrTiming;
}
