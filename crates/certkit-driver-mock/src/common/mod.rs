//! Common infrastructure for simulated consoles.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Console-like delays for realistic mode
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ops, ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
