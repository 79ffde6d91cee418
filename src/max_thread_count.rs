use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use std::str::FromStr;

/// Parallelism of the underlying machine, determined once on first use.
///
/// Falls back to 1 if the machine's parallelism cannot be determined.
pub static MACHINE_PARALLELISM: Lazy<u8> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| u8::try_from(n.get()).unwrap_or(u8::MAX))
        .unwrap_or_else(|err| {
            warn!(
                "Machine parallelism could not be determined, defaulting to 1: {:?}",
                err
            );
            1
        })
});

/// Force the machine parallelism to be determined now rather than lazily on
/// the first parallel build.
pub fn initialize_machine_parallelism() {
    Lazy::force(&MACHINE_PARALLELISM);
}

/// Abstraction for the max number of threads.
///
/// Student term trees are built on a [rayon] pool of this size. The default
/// is the parallelism of the underlying machine.
///
/// Example:
/// ```
/// use credacc::MaxThreadCount;
/// use std::str::FromStr;
///
/// let max_thread_count = MaxThreadCount::default();
/// let max_thread_count = MaxThreadCount::from(4u8);
/// let max_thread_count = MaxThreadCount::from_str("4").unwrap();
/// ```
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaxThreadCount(u8);

impl MaxThreadCount {
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl From<u8> for MaxThreadCount {
    fn from(max_thread_count: u8) -> Self {
        Self(max_thread_count.max(1))
    }
}

impl Default for MaxThreadCount {
    fn default() -> Self {
        Self(*MACHINE_PARALLELISM)
    }
}

impl FromStr for MaxThreadCount {
    type Err = MaxThreadCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MaxThreadCount::from(u8::from_str(s)?))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MaxThreadCountError {
    #[error("Malformed string input for u8 type")]
    MalformedString(#[from] std::num::ParseIntError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_raised_to_one() {
        assert_eq!(MaxThreadCount::from(0u8).as_u8(), 1);
    }

    #[test]
    fn default_is_machine_parallelism() {
        assert_eq!(MaxThreadCount::default().as_u8(), *MACHINE_PARALLELISM);
    }

    #[test]
    fn parse_from_str() {
        assert_eq!(MaxThreadCount::from_str("3").unwrap().as_u8(), 3);
        assert!(MaxThreadCount::from_str("x").is_err());
    }
}
