use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use thiserror::Error;
use log::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    #[error("role configuration not found")]
    ConfigurationMissing,
    #[error("role '{0}' not found")]
    NotFound(String),
}

/// A named perspective with the prompt fragment describing what it cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConfig {
    pub id: String,
    pub display_name: String,
    pub perspective_text: String,
}

#[derive(Deserialize, Debug, Clone)]
struct RoleEntry {
    name: String,
    prompt: String,
}

#[derive(Deserialize, Debug, Clone)]
struct RolesFile {
    roles: BTreeMap<String, RoleEntry>,
}

/// The configured role mapping, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct RoleSet {
    roles: BTreeMap<String, RoleConfig>,
}

impl RoleSet {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: RolesFile = serde_json::from_str(json)?;
        let roles = file.roles
            .into_iter()
            .map(|(id, entry)| {
                let role = RoleConfig {
                    id: id.clone(),
                    display_name: entry.name,
                    perspective_text: entry.prompt,
                };
                (id, role)
            })
            .collect();
        Ok(Self { roles })
    }
}

pub fn load_roles(path: &str) -> Result<RoleSet, Box<dyn Error + Send + Sync>> {
    let file_content = fs
        ::read_to_string(path)
        .map_err(|e| format!("Failed to read roles file '{}': {}", path, e))?;
    let roles = RoleSet
        ::from_json(&file_content)
        .map_err(|e| format!("Failed to parse roles file '{}': {}", path, e))?;
    info!("Loaded {} roles from '{}'", roles.roles.len(), path);
    Ok(roles)
}

/// Read-only lookup of role ids.
///
/// A registry built without a role set reports `ConfigurationMissing` on every
/// lookup, which is distinct from an id that is absent from a loaded set.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: Option<RoleSet>,
}

impl RoleRegistry {
    pub fn new(roles: Option<RoleSet>) -> Self {
        Self { roles }
    }

    pub fn is_configured(&self) -> bool {
        self.roles.is_some()
    }

    pub fn resolve(&self, id: &str) -> Result<&RoleConfig, RoleError> {
        let roles = self.roles.as_ref().ok_or(RoleError::ConfigurationMissing)?;
        roles.roles.get(id).ok_or_else(|| RoleError::NotFound(id.to_string()))
    }

    /// Configured ids in sorted order; empty when the configuration is missing.
    pub fn ids(&self) -> Vec<&str> {
        self.roles
            .as_ref()
            .map(|set| set.roles.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
