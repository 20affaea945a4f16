// Logging goes through these so call sites compile to nothing when the
// `logging` feature is off.

macro_rules! log_debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "logging")]
        {
            log::debug!($($arg)+);
        }
    };
}

macro_rules! log_trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "logging")]
        {
            log::trace!($($arg)+);
        }
    };
}

macro_rules! log_warn {
    ($($arg:tt)+) => {
        #[cfg(feature = "logging")]
        {
            log::warn!($($arg)+);
        }
    };
}
