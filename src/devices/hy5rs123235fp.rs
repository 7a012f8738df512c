/// Hynix HY5RS123235FP GDDR3 SGRAM

/// Speed grade -16 (about 600 MHz)
pub mod hy5rs123235fp_16 {
    use crate::timing::{GddrChip, GddrTiming};

    /// HY5RS123235FP with speed grade -16
    ///
    /// Values taken from the Rev 1.3 (Feb 2006) data sheet, speed column
    /// -16, expressed in memory clock cycles.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Hy5rs123235fp {}

    impl GddrChip for Hy5rs123235fp {
        /// Timing parameters
        const TIMING: GddrTiming = GddrTiming {
            t_rrd: 9,
            t_rcd: 13,
            t_wtr: 5,
            t_rtw: 2,
            t_wr: 10,
            t_rp: 14,
            cas_latency: 10,
            write_latency: 5,
        };
    }
}
