//! Setup plans: what one certification module needs from the orchestrator.
//!
//! A plan is data, not code. The session engine runs the same phase sequence
//! for every plan; the plan only says which roles exist, who friends whom,
//! which scripts run in which wave and which manual checks the operator
//! records at the end.
//!
//! # Example
//!
//! ```toml
//! name = "communication-privacy"
//! summary = "Blocked communications on a three-console setup"
//! progress_role = "primary"
//!
//! [layout]
//! roles = ["primary", "secondary", "tertiary"]
//! default_role = "primary"
//!
//! [[relationships]]
//! requester = "secondary"
//! accepter = "primary"
//! policy = "required"
//!
//! [[configuration]]
//! role = "primary"
//! script = "Communications_Set_Blocked"
//! restore_script = "Communications_Set_Everyone"
//! wave = 2
//!
//! [[manual_checks]]
//! id = "blocked-voice"
//! description = "Voice chat from blocked profiles is not heard"
//! ```

use crate::roles::{RoleLayout, RoleMap};
use anyhow::{bail, Context, Result};
use certkit_core::model::{Role, UserSlot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Whether a failed relationship aborts the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipPolicy {
    /// Failure aborts the session
    #[default]
    Required,
    /// Failure marks dependent checks as not verifiable
    BestEffort,
}

/// A friendship the plan needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    /// Role whose profile sends the request
    pub requester: Role,
    /// Role whose profile accepts it
    pub accepter: Role,
    /// What happens if it cannot be confirmed
    #[serde(default)]
    pub policy: RelationshipPolicy,
}

/// One automation script run on one role during configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStep {
    /// Role to run on
    pub role: Role,
    /// Script name
    pub script: String,
    /// Script that undoes this one at teardown
    #[serde(default)]
    pub restore_script: Option<String>,
    /// Skip when the role's profile was created by this session
    #[serde(default)]
    pub skip_if_new_profile: bool,
    /// Steps of one wave run together; waves run in ascending order
    #[serde(default)]
    pub wave: u8,
}

/// A behaviour the operator verifies by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualCheck {
    /// Stable id used to record the verdict
    pub id: String,
    /// Text logged with the verdict
    pub description: String,
    /// Cannot be verified unless every relationship was confirmed
    #[serde(default)]
    pub requires_relationship: bool,
}

/// Declarative description of one certification module's setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupPlan {
    /// Plan name
    pub name: String,
    /// One-line description
    #[serde(default)]
    pub summary: String,
    /// Roles and default-console handling
    pub layout: RoleLayout,
    /// Sign-in slot per role (`zero` when absent)
    #[serde(default)]
    pub sign_in: BTreeMap<Role, UserSlot>,
    /// Friendships to establish
    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
    /// Configuration scripts
    #[serde(default)]
    pub configuration: Vec<ConfigStep>,
    /// Return every console to its dashboard before configuring
    #[serde(default)]
    pub launch_dashboard_before_configuration: bool,
    /// Role whose install preferably carries the progress indicator
    pub progress_role: Role,
    /// Checks recorded by the operator
    #[serde(default)]
    pub manual_checks: Vec<ManualCheck>,
}

impl SetupPlan {
    /// Parse and validate a plan from TOML
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let plan: SetupPlan = toml::from_str(text).context("parsing setup plan")?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("plan name must not be empty");
        }
        if let Err(msg) = self.layout.validate() {
            bail!("plan '{}': {}", self.name, msg);
        }
        let roles: HashSet<Role> = self.layout.roles.iter().copied().collect();
        let check_role = |role: &Role, what: &str| -> Result<()> {
            if !roles.contains(role) {
                bail!("plan '{}': {} role {} is not in layout", self.name, what, role);
            }
            Ok(())
        };

        check_role(&self.progress_role, "progress")?;
        for role in self.sign_in.keys() {
            check_role(role, "sign-in")?;
        }
        for rel in &self.relationships {
            check_role(&rel.requester, "requester")?;
            check_role(&rel.accepter, "accepter")?;
            if rel.requester == rel.accepter {
                bail!(
                    "plan '{}': role {} cannot friend itself",
                    self.name,
                    rel.requester
                );
            }
        }
        for step in &self.configuration {
            check_role(&step.role, "configuration")?;
            if step.script.trim().is_empty() {
                bail!("plan '{}': configuration step on {} has no script", self.name, step.role);
            }
        }
        let mut ids = HashSet::new();
        for check in &self.manual_checks {
            if !ids.insert(check.id.as_str()) {
                bail!("plan '{}': manual check '{}' defined twice", self.name, check.id);
            }
        }
        Ok(())
    }

    /// Number of consoles this plan needs
    pub fn required_count(&self) -> usize {
        self.layout.required_count()
    }

    /// Sign-in slot of every role
    pub fn slots(&self) -> RoleMap<UserSlot> {
        self.layout
            .roles
            .iter()
            .map(|role| (*role, self.sign_in.get(role).copied().unwrap_or_default()))
            .collect()
    }

    /// Configuration steps grouped by wave, in wave order
    pub fn waves(&self) -> Vec<(u8, Vec<&ConfigStep>)> {
        let mut waves: BTreeMap<u8, Vec<&ConfigStep>> = BTreeMap::new();
        for step in &self.configuration {
            waves.entry(step.wave).or_default().push(step);
        }
        waves.into_iter().collect()
    }

    /// Check by id
    pub fn check(&self, id: &str) -> Option<&ManualCheck> {
        self.manual_checks.iter().find(|c| c.id == id)
    }

    /// Built-in plan by name
    pub fn builtin(name: &str) -> Option<SetupPlan> {
        Self::builtins().into_iter().find(|plan| plan.name == name)
    }

    /// Every built-in plan
    pub fn builtins() -> Vec<SetupPlan> {
        vec![multiplayer_privilege(), communication_privacy()]
    }
}

const DISABLE_MULTIPLAYER: &str = "Scripts\\Disable_Xbox_Live_Game_Play_Privileges.xboxautomation";
const ENABLE_MULTIPLAYER: &str = "Scripts\\Enable_Xbox_Live_Game_Play_Privileges.xboxautomation";

/// Two consoles: a profile without multiplayer privileges receives invites.
fn multiplayer_privilege() -> SetupPlan {
    SetupPlan {
        name: "multiplayer-privilege".into(),
        summary: "A profile without online multiplayer privileges cannot join or be invited".into(),
        layout: RoleLayout {
            roles: vec![Role::Child, Role::Inviting],
            default_role: Some(Role::Child),
        },
        sign_in: BTreeMap::new(),
        relationships: vec![RelationshipSpec {
            requester: Role::Inviting,
            accepter: Role::Child,
            policy: RelationshipPolicy::BestEffort,
        }],
        configuration: vec![
            ConfigStep {
                role: Role::Child,
                script: DISABLE_MULTIPLAYER.into(),
                restore_script: Some(ENABLE_MULTIPLAYER.into()),
                skip_if_new_profile: false,
                wave: 0,
            },
            ConfigStep {
                role: Role::Inviting,
                script: ENABLE_MULTIPLAYER.into(),
                restore_script: None,
                skip_if_new_profile: true,
                wave: 0,
            },
        ],
        launch_dashboard_before_configuration: true,
        progress_role: Role::Child,
        manual_checks: vec![
            ManualCheck {
                id: "access-multiplayer".into(),
                description: "The restricted profile cannot access online multiplayer".into(),
                requires_relationship: false,
            },
            ManualCheck {
                id: "invite-no-multiplayer".into(),
                description: "An invite to the restricted profile does not start multiplayer"
                    .into(),
                requires_relationship: true,
            },
        ],
    }
}

/// Three consoles: the primary profile blocks communications.
fn communication_privacy() -> SetupPlan {
    let everyone = |role| ConfigStep {
        role,
        script: "Communications_Set_Everyone".into(),
        restore_script: None,
        skip_if_new_profile: false,
        wave: 1,
    };
    let speakers = |role| ConfigStep {
        role,
        script: "Voice_Output_Set_Speakers".into(),
        restore_script: None,
        skip_if_new_profile: false,
        wave: 0,
    };
    SetupPlan {
        name: "communication-privacy".into(),
        summary: "A profile that blocks communications receives no voice or text".into(),
        layout: RoleLayout {
            roles: vec![Role::Primary, Role::Secondary, Role::Tertiary],
            default_role: Some(Role::Primary),
        },
        sign_in: BTreeMap::new(),
        relationships: vec![RelationshipSpec {
            requester: Role::Secondary,
            accepter: Role::Primary,
            policy: RelationshipPolicy::Required,
        }],
        configuration: vec![
            speakers(Role::Primary),
            speakers(Role::Secondary),
            speakers(Role::Tertiary),
            everyone(Role::Secondary),
            everyone(Role::Tertiary),
            ConfigStep {
                role: Role::Primary,
                script: "Communications_Set_Blocked".into(),
                restore_script: Some("Communications_Set_Everyone".into()),
                skip_if_new_profile: false,
                wave: 2,
            },
        ],
        launch_dashboard_before_configuration: false,
        progress_role: Role::Primary,
        manual_checks: vec![
            ManualCheck {
                id: "blocked-voice".into(),
                description: "Voice from other profiles is not heard by the blocking profile"
                    .into(),
                requires_relationship: false,
            },
            ManualCheck {
                id: "blocked-text".into(),
                description: "Text and game invites do not reach the blocking profile".into(),
                requires_relationship: false,
            },
            ManualCheck {
                id: "friend-unaffected".into(),
                description: "The blocking profile's friend is blocked as well".into(),
                requires_relationship: true,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_validate() {
        for plan in SetupPlan::builtins() {
            plan.validate().unwrap();
        }
        assert_eq!(SetupPlan::builtin("multiplayer-privilege").unwrap().required_count(), 2);
        assert_eq!(SetupPlan::builtin("communication-privacy").unwrap().required_count(), 3);
        assert!(SetupPlan::builtin("nope").is_none());
    }

    #[test]
    fn test_waves_are_ordered() {
        let plan = SetupPlan::builtin("communication-privacy").unwrap();
        let waves = plan.waves();
        let order: Vec<u8> = waves.iter().map(|(wave, _)| *wave).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(waves[0].1.len(), 3);
        assert_eq!(waves[2].1[0].script, "Communications_Set_Blocked");
    }

    #[test]
    fn test_plan_round_trips_through_toml() {
        let plan = SetupPlan::builtin("multiplayer-privilege").unwrap();
        let text = toml::to_string(&plan).unwrap();
        let parsed = SetupPlan::from_toml_str(&text).unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_from_toml_minimal() {
        let plan = SetupPlan::from_toml_str(
            r#"
            name = "pair"
            progress_role = "primary"

            [layout]
            roles = ["primary", "secondary"]

            [[manual_checks]]
            id = "visible"
            description = "Both profiles see each other"
            "#,
        )
        .unwrap();
        assert_eq!(plan.layout.default_role, None);
        assert_eq!(plan.slots()[&Role::Secondary], UserSlot::Zero);
        assert!(plan.check("visible").is_some());
    }

    #[test]
    fn test_validation_rejects_bad_plans() {
        let mut plan = SetupPlan::builtin("communication-privacy").unwrap();
        plan.relationships[0].accepter = Role::Child;
        assert!(plan.validate().is_err());

        let mut plan = SetupPlan::builtin("communication-privacy").unwrap();
        plan.relationships[0].accepter = plan.relationships[0].requester;
        assert!(plan.validate().is_err());

        let mut plan = SetupPlan::builtin("multiplayer-privilege").unwrap();
        let dup = plan.manual_checks[0].clone();
        plan.manual_checks.push(dup);
        assert!(plan.validate().is_err());
    }
}
