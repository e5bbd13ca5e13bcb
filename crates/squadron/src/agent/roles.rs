//! Role and level configuration exposed to the UI.

use serde::Serialize;
use std::collections::BTreeMap;

use super::models::AgentLevel;

/// Role keys the UI offers by default. Custom role strings are accepted
/// everywhere; this list only seeds the picker.
pub const KNOWN_ROLES: &[&str] = &["planner", "engineer", "reviewer", "generalist"];

const LEVELS: &[AgentLevel] = &[
    AgentLevel::Junior,
    AgentLevel::Senior,
    AgentLevel::Principal,
];

/// Roles config payload for the `roles` endpoint.
#[derive(Debug, Serialize)]
pub struct RolesConfig {
    pub roles: Vec<String>,
    pub levels: Vec<String>,
    pub defaults: Defaults,
    /// role -> level -> instruction
    pub system_instructions: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct Defaults {
    pub role: String,
    pub level: String,
}

impl RolesConfig {
    pub fn current() -> Self {
        let mut system_instructions = BTreeMap::new();
        for role in KNOWN_ROLES {
            let mut by_level = BTreeMap::new();
            for level in LEVELS {
                by_level.insert(
                    level.to_string(),
                    default_system_instruction(role, *level),
                );
            }
            system_instructions.insert((*role).to_string(), by_level);
        }

        Self {
            roles: KNOWN_ROLES.iter().map(|r| (*r).to_string()).collect(),
            levels: LEVELS.iter().map(|l| l.to_string()).collect(),
            defaults: Defaults {
                role: "engineer".to_string(),
                level: AgentLevel::Senior.to_string(),
            },
            system_instructions,
        }
    }
}

/// Default system instruction for a role/level pair. Used when an agent is
/// created without an explicit instruction.
pub fn default_system_instruction(role: &str, level: AgentLevel) -> String {
    let seniority = match level {
        AgentLevel::Junior => {
            "Ask before making decisions with wide blast radius. Prefer small, reviewable steps."
        }
        AgentLevel::Senior => {
            "Work autonomously within the task scope. Flag risks instead of silently absorbing them."
        }
        AgentLevel::Principal => {
            "Own the outcome end to end. Challenge the task framing when the evidence warrants it."
        }
    };

    let focus = match role {
        "planner" => "You turn work items into concrete, dependency-ordered issue plans.",
        "engineer" => "You implement planned issues in the repository and open pull requests.",
        "reviewer" => "You review pull requests for correctness, scope and risk.",
        _ => "You take on whatever stage of the pipeline needs an agent.",
    };

    format!("{} {}", focus, seniority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_config_covers_all_pairs() {
        let config = RolesConfig::current();
        assert_eq!(config.roles.len(), KNOWN_ROLES.len());
        for role in &config.roles {
            let by_level = config.system_instructions.get(role).unwrap();
            assert_eq!(by_level.len(), 3);
        }
        assert_eq!(config.defaults.role, "engineer");
    }

    #[test]
    fn test_unknown_role_gets_generalist_instruction() {
        let text = default_system_instruction("cartographer", AgentLevel::Junior);
        assert!(text.contains("pipeline"));
    }
}
