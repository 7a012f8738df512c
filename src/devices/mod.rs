//! Named GDDR timing profiles

mod hy5rs123235fp;
mod zero_delay;

pub use hy5rs123235fp::*;
pub use zero_delay::*;
