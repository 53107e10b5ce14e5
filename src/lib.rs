//! certkit: console certification harness.
//!
//! The orchestration itself lives in `certkit-setup`; this crate owns the
//! application surface around it: configuration, tracing, a terminal
//! operator host and a simulated bench built from configuration.

pub mod config;
pub mod host;
pub mod tracing_setup;

use certkit_core::capabilities::ConsoleDevice;
use certkit_driver_mock::{FriendService, MockConsole};
use std::sync::Arc;

/// Simulated consoles for every `[[consoles]]` entry, sharing one friend
/// service, in configuration order.
pub fn simulated_bench(config: &config::HarnessConfig) -> Vec<Arc<dyn ConsoleDevice>> {
    let service = Arc::new(FriendService::new());
    config
        .consoles
        .iter()
        .map(|console| {
            Arc::new(MockConsole::from_config(console, service.clone())) as Arc<dyn ConsoleDevice>
        })
        .collect()
}
