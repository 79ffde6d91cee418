//! Small helpers shared across the crate: logging activation and error
//! logging extensions.

use log::{error, LevelFilter};

// -------------------------------------------------------------------------------------------------
// Logging.

/// Set up the global logger.
///
/// Only the first call has any effect, later calls are ignored so that tests
/// and library users can both call it freely.
pub fn activate_logging(log_level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .try_init();
}

/// Trait for logging errors before they are propagated.
///
/// Useful at API boundaries where the caller may drop the error without
/// reporting it.
pub trait LogOnErr {
    fn log_on_err(self) -> Self;
}

impl<T, E: std::fmt::Debug> LogOnErr for Result<T, E> {
    fn log_on_err(self) -> Self {
        if let Err(ref err) = self {
            error!("{:?}", err);
        }
        self
    }
}

/// Trait for logging an error and then panicking.
///
/// Only meant for binaries & demos where there is nothing left to do with the
/// error other than exit.
pub trait LogOnErrUnwrap<T> {
    fn log_on_err_unwrap(self) -> T;
}

impl<T, E: std::fmt::Debug> LogOnErrUnwrap<T> for Result<T, E> {
    fn log_on_err_unwrap(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                error!("{:?}", err);
                panic!("{:?}", err);
            }
        }
    }
}

/// Hex string for a byte slice, without a `0x` prefix.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// -------------------------------------------------------------------------------------------------
// Testing utils.

#[cfg(test)]
pub mod test_utils {
    /// Check that the result matches the given error pattern.
    macro_rules! assert_err {
        ($expression:expr, $($pattern:tt)+) => {
            match $expression {
                $($pattern)+ => (),
                ref e => panic!("expected `{}` but got `{:?}`", stringify!($($pattern)+), e),
            }
        }
    }

    pub(crate) use assert_err;
}
