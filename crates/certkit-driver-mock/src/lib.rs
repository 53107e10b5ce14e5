//! Mock Consoles for certkit
//!
//! This crate provides simulated consoles for exercising setup sessions without
//! hardware. All mocks use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep) so tests can run on a paused clock.
//!
//! # Available Mocks
//!
//! - [`MockConsole`] - Simulated console with drives, title install/launch and scripts
//! - [`MockProfileManager`] / [`MockProfile`] - Profile store and profiles of one console
//! - [`FriendService`] - Friend graph shared by all consoles of a test
//! - [`MockOperatorHost`] / [`MockProgress`] - Recording host application
//!
//! Failures are injected through [`ErrorConfig`] scenarios keyed by the
//! operation names in [`ops`].

pub mod common;
mod friend_service;
mod host;
mod mock_console;
mod mock_profile;

pub use common::{ops, ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};
pub use friend_service::FriendService;
pub use host::{MockOperatorHost, MockProgress};
pub use mock_console::{MockConsole, MockConsoleBuilder, MockConsoleConfig};
pub use mock_profile::{MockProfile, MockProfileManager};
