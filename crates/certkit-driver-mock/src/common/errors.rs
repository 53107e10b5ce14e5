//! Error injection framework for simulated consoles.
//!
//! Every console, profile store and profile consults the same [`ErrorConfig`]
//! before doing work, keyed by the operation names in [`ops`].

use super::rng::MockRng;
use certkit_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Operation names checked by the simulated drivers
#[allow(missing_docs)]
pub mod ops {
    pub const CONNECT: &str = "connect";
    pub const LIST_DRIVES: &str = "list_drives";
    pub const IS_TITLE_INSTALLED: &str = "is_title_installed";
    pub const INSTALL_TITLE: &str = "install_title";
    pub const LAUNCH_TITLE: &str = "launch_title";
    pub const RUN_SCRIPT: &str = "run_script";
    pub const LAUNCH_DASHBOARD: &str = "launch_dashboard";
    pub const ENUMERATE_PROFILES: &str = "enumerate_profiles";
    pub const CREATE_PROFILE: &str = "create_profile";
    pub const SET_DEFAULT_PROFILE: &str = "set_default_profile";
    pub const SIGN_OUT_ALL: &str = "sign_out_all";
    pub const DELETE_PROFILE: &str = "delete_profile";
    pub const SIGN_IN: &str = "sign_in";
    pub const SIGN_OUT: &str = "sign_out";
    pub const ENUMERATE_FRIENDS: &str = "enumerate_friends";
    pub const SEND_FRIEND_REQUEST: &str = "send_friend_request";
    pub const ACCEPT_FRIEND_REQUEST: &str = "accept_friend_request";
}

/// Error injection configuration for simulated consoles
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0); `"*"` applies to all
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

/// A deterministic failure pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// The first `count` calls of `operation` fail, later calls succeed
    FailTimes {
        operation: &'static str,
        count: u32,
    },
    /// `count` calls of `operation` succeed, every later call fails
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Every call of `operation` fails with a timeout error
    Timeout { operation: &'static str },
    /// Every call of `operation` never returns
    Hang { operation: &'static str },
    /// The first call of any operation loses the connection; all later calls fail
    CommunicationLoss,
    /// Only the named automation script fails
    ScriptFails { script: &'static str },
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Calls seen per operation
    operation_counts: HashMap<String, u32>,
    /// Whether communication is lost
    communication_lost: bool,
}

impl ErrorConfig {
    /// No injected errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Custom failure rates per operation
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Whether calls of `operation` should never complete
    pub fn should_hang(&self, operation: &str) -> bool {
        self.scenarios
            .iter()
            .any(|s| matches!(s, ErrorScenario::Hang { operation: op } if *op == operation))
    }

    /// Check a script run; fails for scripts named by `ScriptFails`
    pub fn check_script(&self, driver_type: &str, script: &str) -> Result<(), DriverError> {
        self.check_operation(driver_type, ops::RUN_SCRIPT)?;
        let fails = self
            .scenarios
            .iter()
            .any(|s| matches!(s, ErrorScenario::ScriptFails { script: name } if *name == script));
        if fails {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Script '{}' failed", script),
            ));
        }
        Ok(())
    }

    /// Check if an operation should fail and return the injected error
    pub fn check_operation(&self, driver_type: &str, operation: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }

        let calls = {
            let current = state
                .operation_counts
                .entry(operation.to_string())
                .or_insert(0);
            *current += 1;
            *current
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailTimes {
                    operation: op,
                    count,
                } if *op == operation && calls <= *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure {} of {} on '{}'", calls, count, operation),
                    ));
                }
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && calls > *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure after {} operations", count),
                    ));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Number of times `operation` has been checked
    pub fn calls(&self, operation: &str) -> u32 {
        self.state
            .lock()
            .operation_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Reset error state (clear counters and lost communication)
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
