//! Operational modes for simulated consoles.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Console-like delays for integration tests
//! - **Chaos**: Realistic delays plus random failures for resilience testing

use serde::Deserialize;

/// Operational modes for simulated consoles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic
    #[default]
    Instant,
    /// Console-like delays
    Realistic,
    /// Console-like delays and random failures
    Chaos,
}

impl MockMode {
    /// Whether operations should sleep for their configured duration
    pub fn simulates_delays(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
        assert!(!MockMode::Instant.simulates_delays());
        assert!(MockMode::Chaos.simulates_delays());
    }

    #[test]
    fn test_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: MockMode,
        }
        let parsed: Wrapper = toml::from_str("mode = \"realistic\"").unwrap();
        assert_eq!(parsed.mode, MockMode::Realistic);
    }
}
