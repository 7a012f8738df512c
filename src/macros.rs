#[cfg(feature = "log")]
#[macro_use]
mod log {
    macro_rules! mc_log {
        (trace, $($arg:expr),*) => { log::trace!($($arg),*); };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod log {
    macro_rules! mc_log {
        ($level:ident, $($arg:expr),*) => { $( let _ = &$arg; )* }
    }
}

macro_rules! mc_trace {
    ($($arg:expr),*) => (mc_log!(trace, $($arg),*));
}
