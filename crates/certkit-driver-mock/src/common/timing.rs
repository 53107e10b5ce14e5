//! Timing configuration for realistic mode.

use std::time::Duration;

/// Console-like delays, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Full content-package install
    pub install_ms: u64,
    /// Title launch
    pub launch_ms: u64,
    /// One automation script
    pub script_ms: u64,
    /// Profile store operations (enumerate, create, sign in)
    pub profile_ms: u64,
    /// Round trip for any other request
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// Delays resembling a development console on a local network
    pub fn console() -> Self {
        Self {
            install_ms: 4_000,
            launch_ms: 1_500,
            script_ms: 800,
            profile_ms: 300,
            communication_delay_ms: 20,
        }
    }

    /// Same delays for every operation; handy for concurrency tests
    pub fn uniform(ms: u64) -> Self {
        Self {
            install_ms: ms,
            launch_ms: ms,
            script_ms: ms,
            profile_ms: ms,
            communication_delay_ms: ms,
        }
    }

    pub(crate) fn install(&self) -> Duration {
        Duration::from_millis(self.install_ms)
    }

    pub(crate) fn launch(&self) -> Duration {
        Duration::from_millis(self.launch_ms)
    }

    pub(crate) fn script(&self) -> Duration {
        Duration::from_millis(self.script_ms)
    }

    pub(crate) fn profile(&self) -> Duration {
        Duration::from_millis(self.profile_ms)
    }

    pub(crate) fn communication(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }
}
