//! Purpose: Port configuration: execution threshold, write delay, segment bounds.
//! Exports: `PortConfig`, `SEGMENT_READ`, `SEGMENT_WRITE`, env var names.
//! Role: Explicit value handed to each port at construction; no global state.
//! Invariants: Segment sizes are non-zero.
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};

pub const SEGMENT_READ: usize = 256 * 1024;
pub const SEGMENT_WRITE: usize = 256 * 1024;

pub const ENV_SHORT_CIRCUIT: &str = "FILEPORT_THREAD_SHORT_CIRCUIT";
pub const ENV_WRITE_DELAY_MS: &str = "FILEPORT_WRITE_DELAY_MS";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortConfig {
    /// Tasks whose level is at or below this run inline on the owner context.
    pub short_circuit: i32,
    /// Delay before buffered writes are force-flushed.
    pub write_delay: Duration,
    pub segment_read: usize,
    pub segment_write: usize,
    /// Chunk large writes even when they run on the worker pool.
    pub segment_writes: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            short_circuit: 0,
            write_delay: Duration::ZERO,
            segment_read: SEGMENT_READ,
            segment_write: SEGMENT_WRITE,
            segment_writes: false,
        }
    }
}

impl PortConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_SHORT_CIRCUIT) {
            config.short_circuit = raw.trim().parse().map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("{ENV_SHORT_CIRCUIT} must be an integer, got {raw:?}"))
                    .with_source(err)
            })?;
        }
        if let Some(raw) = lookup(ENV_WRITE_DELAY_MS) {
            let millis: u64 = raw.trim().parse().map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("{ENV_WRITE_DELAY_MS} must be milliseconds, got {raw:?}"))
                    .with_source(err)
            })?;
            config.write_delay = Duration::from_millis(millis);
        }
        Ok(config)
    }

    pub fn with_short_circuit(mut self, level: i32) -> Self {
        self.short_circuit = level;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_segments(mut self, read: usize, write: usize) -> Result<Self, Error> {
        if read == 0 || write == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("segment sizes must be non-zero"));
        }
        self.segment_read = read;
        self.segment_write = write;
        Ok(self)
    }

    pub fn with_segment_writes(mut self, enabled: bool) -> Self {
        self.segment_writes = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{PortConfig, ENV_SHORT_CIRCUIT, ENV_WRITE_DELAY_MS, SEGMENT_READ};
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn defaults_use_the_pool_for_everything() {
        let config = PortConfig::from_lookup(|_| None).expect("config");
        assert_eq!(config.short_circuit, 0);
        assert_eq!(config.segment_read, SEGMENT_READ);
        assert!(!config.segment_writes);
    }

    #[test]
    fn env_values_are_parsed() {
        let config = PortConfig::from_lookup(|key| match key {
            ENV_SHORT_CIRCUIT => Some("2".to_string()),
            ENV_WRITE_DELAY_MS => Some(" 15 ".to_string()),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.short_circuit, 2);
        assert_eq!(config.write_delay, Duration::from_millis(15));
    }

    #[test]
    fn bad_env_values_are_usage_errors() {
        let err = PortConfig::from_lookup(|key| (key == ENV_SHORT_CIRCUIT).then(|| "lots".to_string()))
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn zero_segments_are_rejected() {
        assert!(PortConfig::default().with_segments(0, 4).is_err());
        let config = PortConfig::default().with_segments(4, 8).expect("segments");
        assert_eq!((config.segment_read, config.segment_write), (4, 8));
    }
}
