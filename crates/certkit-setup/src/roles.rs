//! Role assignment: mapping the operator's console selection onto plan roles.
//!
//! Rules, applied in order:
//!
//! 1. The selection must contain exactly `layout.roles.len()` consoles
//!    (`WrongCount`), none twice (`DuplicateDevice`), all connected
//!    (`Disconnected`, reported for the first offline console in selection order).
//! 2. If the layout names a `default_role` and a selected console is flagged
//!    default, the first such console (selection order) is bound to that role.
//! 3. Every other console fills the remaining roles, in layout order, taking
//!    consoles in selection order.
//!
//! With no default console, rule 3 alone applies, so the first selected
//! console takes the first role of the layout.

use certkit_core::capabilities::ConsoleDevice;
use certkit_core::error::SelectionError;
use certkit_core::model::Role;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Per-role map in canonical role order.
pub type RoleMap<T> = BTreeMap<Role, T>;

/// Roles a plan needs and which of them the default console takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLayout {
    /// Roles in fill order
    pub roles: Vec<Role>,
    /// Role bound to the console flagged default, if any
    #[serde(default)]
    pub default_role: Option<Role>,
}

impl RoleLayout {
    /// Number of consoles the operator must select
    pub fn required_count(&self) -> usize {
        self.roles.len()
    }

    /// Check that roles are non-empty and unique and that the default role is one of them
    pub fn validate(&self) -> Result<(), String> {
        if self.roles.is_empty() {
            return Err("layout defines no roles".to_string());
        }
        let mut seen = HashSet::new();
        for role in &self.roles {
            if !seen.insert(*role) {
                return Err(format!("role {} appears twice in layout", role));
            }
        }
        if let Some(default_role) = self.default_role {
            if !seen.contains(&default_role) {
                return Err(format!("default role {} is not in layout", default_role));
            }
        }
        Ok(())
    }
}

/// Bind each selected console to one role of `layout`.
pub fn assign_roles(
    selected: &[Arc<dyn ConsoleDevice>],
    layout: &RoleLayout,
) -> Result<RoleMap<Arc<dyn ConsoleDevice>>, SelectionError> {
    if selected.len() != layout.required_count() {
        return Err(SelectionError::WrongCount {
            selected: selected.len(),
            required: layout.required_count(),
        });
    }

    let mut ids = HashSet::new();
    for device in selected {
        if !ids.insert(device.id()) {
            return Err(SelectionError::DuplicateDevice(device.name().to_string()));
        }
    }

    if let Some(offline) = selected.iter().find(|d| !d.is_connected()) {
        return Err(SelectionError::Disconnected(offline.name().to_string()));
    }

    let mut assigned = RoleMap::new();
    let mut default_index = None;
    if let Some(default_role) = layout.default_role {
        if let Some(index) = selected.iter().position(|d| d.is_default()) {
            assigned.insert(default_role, selected[index].clone());
            default_index = Some(index);
        }
    }

    let mut remaining = selected
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != default_index)
        .map(|(_, device)| device.clone());

    for role in &layout.roles {
        if assigned.contains_key(role) {
            continue;
        }
        if let Some(device) = remaining.next() {
            assigned.insert(*role, device);
        }
    }

    for (role, device) in &assigned {
        tracing::debug!(role = %role, device = %device.id(), "Role assigned");
    }
    Ok(assigned)
}
