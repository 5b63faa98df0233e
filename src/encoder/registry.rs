//! Static registry of deployable DAO modules

use std::collections::BTreeMap;

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// How a module's initialization bytes are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    /// `abi.encode(address admin)`, schema ignored
    Membership,
    /// `abi.encode(uint256 approvalThreshold)`
    ApprovalVoting,
    /// No initialization data
    Unparameterized,
}

/// One declared init parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Solidity type name, e.g. `uint256`
    pub ty: String,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl ParamSpec {
    pub fn new(name: &str, ty: &str, default: Option<serde_json::Value>) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            default,
        }
    }
}

/// A deployable module's logic contract and init schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub address: Address,
    pub kind: ModuleKind,
    pub init_params: Vec<ParamSpec>,
}

/// Module descriptors keyed by name
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleDescriptor>,
}

pub const MEMBER_MODULE: &str = "MemberModule";
pub const PROPOSAL_VOTING_MODULE: &str = "ProposalVotingModule";
pub const CLAIM_VOTING_MODULE: &str = "ClaimVotingModule";
pub const TREASURY_MODULE: &str = "TreasuryModule";
pub const TASK_MODULE: &str = "TaskModule";
pub const EVENT_MODULE: &str = "EventModule";
pub const ANNOUNCEMENT_MODULE: &str = "AnnouncementModule";

impl ModuleRegistry {
    /// Logic contracts deployed on the canonical chain
    pub fn builtin() -> Self {
        let threshold = || vec![ParamSpec::new("approvalThreshold", "uint256", None)];

        Self::from_descriptors([
            ModuleDescriptor {
                name: MEMBER_MODULE.to_string(),
                address: address!("5fbdb2315678afecb367f032d93f642f64180aa3"),
                kind: ModuleKind::Membership,
                init_params: vec![ParamSpec::new("admin", "address", None)],
            },
            ModuleDescriptor {
                name: PROPOSAL_VOTING_MODULE.to_string(),
                address: address!("e7f1725e7734ce288f8367e1bb143e90bb3f0512"),
                kind: ModuleKind::ApprovalVoting,
                init_params: threshold(),
            },
            ModuleDescriptor {
                name: CLAIM_VOTING_MODULE.to_string(),
                address: address!("9fe46736679d2d9a65f0992f2272de9f3c7fa6e0"),
                kind: ModuleKind::ApprovalVoting,
                init_params: vec![ParamSpec::new(
                    "approvalThreshold",
                    "uint256",
                    Some(serde_json::json!(66)),
                )],
            },
            ModuleDescriptor {
                name: TREASURY_MODULE.to_string(),
                address: address!("cf7ed3acca5a467e9e704c703e8d87f634fb0fc9"),
                kind: ModuleKind::Unparameterized,
                init_params: Vec::new(),
            },
            ModuleDescriptor {
                name: TASK_MODULE.to_string(),
                address: address!("dc64a140aa3e981100a9beca4e685f962f0cf6c9"),
                kind: ModuleKind::Unparameterized,
                init_params: Vec::new(),
            },
            ModuleDescriptor {
                name: EVENT_MODULE.to_string(),
                address: address!("5fc8d32690cc91d4c39d9d3abcbd16989f875707"),
                kind: ModuleKind::Unparameterized,
                init_params: Vec::new(),
            },
            ModuleDescriptor {
                name: ANNOUNCEMENT_MODULE.to_string(),
                address: address!("0165878a594ca255338adfa4d48449f69242eb8f"),
                kind: ModuleKind::Unparameterized,
                init_params: Vec::new(),
            },
        ])
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModuleDescriptor>) -> Self {
        Self {
            modules: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    /// Replace logic addresses with configured ones; unknown names are an error
    pub fn with_address_overrides(mut self, overrides: &BTreeMap<String, Address>) -> Result<Self> {
        for (name, address) in overrides {
            let descriptor = self
                .modules
                .get_mut(name)
                .ok_or_else(|| Error::UnknownModule(name.clone()))?;
            debug!("Overriding {} address with {}", name, address);
            descriptor.address = *address;
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.modules
            .get(name)
            .ok_or_else(|| Error::UnknownModule(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = ModuleRegistry::builtin();
        let member = registry.get(MEMBER_MODULE).unwrap();
        assert_eq!(member.kind, ModuleKind::Membership);
        assert!(registry.contains(TREASURY_MODULE));
        assert!(matches!(
            registry.get("GhostModule"),
            Err(Error::UnknownModule(name)) if name == "GhostModule"
        ));
    }

    #[test]
    fn test_address_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert(TASK_MODULE.to_string(), Address::repeat_byte(0x42));

        let registry = ModuleRegistry::builtin()
            .with_address_overrides(&overrides)
            .unwrap();
        assert_eq!(
            registry.get(TASK_MODULE).unwrap().address,
            Address::repeat_byte(0x42)
        );
    }

    #[test]
    fn test_override_for_unknown_module() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Nope".to_string(), Address::ZERO);
        assert!(matches!(
            ModuleRegistry::builtin().with_address_overrides(&overrides),
            Err(Error::UnknownModule(_))
        ));
    }

    #[test]
    fn test_unparameterized_modules_have_empty_schema() {
        for descriptor in ModuleRegistry::builtin().iter() {
            if descriptor.kind == ModuleKind::Unparameterized {
                assert!(descriptor.init_params.is_empty(), "{}", descriptor.name);
            }
        }
    }
}
