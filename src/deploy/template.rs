//! DAO templates and user-supplied deployment settings

use std::fs;
use std::path::Path;

use alloy_primitives::{Address, address};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::encoder::ModuleConfig;
use crate::encoder::registry::{
    ANNOUNCEMENT_MODULE, CLAIM_VOTING_MODULE, EVENT_MODULE, MEMBER_MODULE, PROPOSAL_VOTING_MODULE,
    TASK_MODULE, TREASURY_MODULE,
};

const TREASURY_LOGIC: Address = address!("a513e6e4b8f2a923d98304ec87f64353c4d5c853");
const GOVERNANCE_TOKEN: Address = address!("2279b7a0a67db372996a5fab50d91eaa73d2ebe6");

/// Ordered module list plus the shared contracts a DAO is created with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaoTemplate {
    pub name: String,
    pub modules: Vec<String>,
    pub treasury_logic_address: Address,
    pub token_address: Address,
}

impl DaoTemplate {
    pub const BASIC: &'static str = "basic";
    pub const COMMUNITY: &'static str = "community";

    /// Built-in template by name
    pub fn builtin(name: &str) -> Option<Self> {
        let modules: &[&str] = match name {
            Self::BASIC => &[MEMBER_MODULE, PROPOSAL_VOTING_MODULE, TREASURY_MODULE],
            Self::COMMUNITY => &[
                MEMBER_MODULE,
                PROPOSAL_VOTING_MODULE,
                CLAIM_VOTING_MODULE,
                TREASURY_MODULE,
                TASK_MODULE,
                EVENT_MODULE,
                ANNOUNCEMENT_MODULE,
            ],
            _ => return None,
        };

        Some(Self {
            name: name.to_string(),
            modules: modules.iter().map(|m| m.to_string()).collect(),
            treasury_logic_address: TREASURY_LOGIC,
            token_address: GOVERNANCE_TOKEN,
        })
    }

    pub fn builtin_names() -> [&'static str; 2] {
        [Self::BASIC, Self::COMMUNITY]
    }

    /// Load a template from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read template file: {}", path.display()))?;
        let template: DaoTemplate = toml::from_str(&content)
            .with_context(|| format!("Failed to parse template file: {}", path.display()))?;

        if template.modules.is_empty() {
            anyhow::bail!("Template {} lists no modules", template.name);
        }
        Ok(template)
    }

    /// A built-in name, or a path to a TOML template
    pub fn resolve(name_or_path: &str) -> Result<Self> {
        match Self::builtin(name_or_path) {
            Some(template) => Ok(template),
            None => Self::load_from_file(name_or_path),
        }
    }
}

/// Form values describing the DAO to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
    #[serde(default)]
    pub brief_description: String,
    #[serde(default)]
    pub mandate: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub is_public: bool,
    /// Module parameters keyed `<ModuleName>_<paramName>`
    #[serde(flatten)]
    pub params: ModuleConfig,
}

impl DeploymentConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            brief_description: String::new(),
            mandate: String::new(),
            audience: String::new(),
            is_public: false,
            params: ModuleConfig::new(),
        }
    }

    /// Load from a JSON or TOML file, chosen by extension
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment file: {}", path.display()))?;

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_templates() {
        for name in DaoTemplate::builtin_names() {
            let template = DaoTemplate::builtin(name).unwrap();
            assert_eq!(template.modules.first().map(String::as_str), Some(MEMBER_MODULE));
        }
        assert_eq!(DaoTemplate::builtin("community").unwrap().modules.len(), 7);
        assert!(DaoTemplate::builtin("nope").is_none());
    }

    #[test]
    fn test_template_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
name = "custom"
modules = ["MemberModule", "TaskModule"]
treasury_logic_address = "0x0000000000000000000000000000000000000011"
token_address = "0x0000000000000000000000000000000000000022"
"#,
        )
        .unwrap();

        let template = DaoTemplate::resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(template.name, "custom");
        assert_eq!(template.modules, vec!["MemberModule", "TaskModule"]);
        assert_eq!(template.token_address, Address::with_last_byte(0x22));
    }

    #[test]
    fn test_empty_template_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.toml");
        fs::write(
            &path,
            r#"
name = "empty"
modules = []
treasury_logic_address = "0x0000000000000000000000000000000000000011"
token_address = "0x0000000000000000000000000000000000000022"
"#,
        )
        .unwrap();
        assert!(DaoTemplate::load_from_file(&path).is_err());
    }

    #[test]
    fn test_deployment_config_flattens_params() {
        let config: DeploymentConfig = serde_json::from_value(json!({
            "name": "Garden Club",
            "brief_description": "Neighbourhood gardening",
            "is_public": true,
            "ProposalVotingModule_approvalThreshold": 60
        }))
        .unwrap();

        assert_eq!(config.name, "Garden Club");
        assert!(config.is_public);
        assert_eq!(config.mandate, "");
        assert_eq!(
            config.params.get("ProposalVotingModule_approvalThreshold"),
            Some(&json!(60))
        );
    }

    #[test]
    fn test_deployment_config_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dao.toml");
        fs::write(
            &path,
            "name = \"Chess Club\"\naudience = \"players\"\nClaimVotingModule_approvalThreshold = \"70\"\n",
        )
        .unwrap();

        let config = DeploymentConfig::load_from_file(&path).unwrap();
        assert_eq!(config.audience, "players");
        assert_eq!(
            config.params.get("ClaimVotingModule_approvalThreshold"),
            Some(&json!("70"))
        );
    }
}
