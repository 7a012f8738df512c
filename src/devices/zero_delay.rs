/// GDDR3 profile without timing constraints

pub mod gddr3_zero_delay {
    use crate::timing::{GddrChip, GddrTiming};

    /// Every protocol delay set to zero. Useful to validate scheduling
    /// behaviour in isolation from the timing rules.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Gddr3ZeroDelay {}

    impl GddrChip for Gddr3ZeroDelay {
        const TIMING: GddrTiming = GddrTiming::ZERO_DELAY;
    }
}
