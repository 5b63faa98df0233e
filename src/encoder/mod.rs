pub mod function_call;
pub mod module_init;
pub mod registry;

pub use function_call::encode_function_call;
pub use module_init::{DEFAULT_APPROVAL_THRESHOLD, ModuleConfig};
pub use registry::{ModuleDescriptor, ModuleKind, ModuleRegistry, ParamSpec};

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes};
use tracing::debug;

use crate::error::Result;

/// Pure, I/O-free calldata builder over a module registry
#[derive(Debug, Clone, Default)]
pub struct TransactionEncoder {
    registry: ModuleRegistry,
}

impl TransactionEncoder {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Initialization bytes for `module_name`, or `UnknownModule`
    pub fn encode_module_init(
        &self,
        module_name: &str,
        config: &ModuleConfig,
        admin: Address,
    ) -> Result<Bytes> {
        let descriptor = self.registry.get(module_name)?;
        let data = module_init::encode_module_init(descriptor, config, admin)?;
        debug!("Encoded {} init data ({} bytes)", module_name, data.len());
        Ok(data)
    }

    /// Decode bytes produced by `encode_module_init` for the same module
    pub fn decode_module_init(&self, module_name: &str, data: &[u8]) -> Result<Vec<DynSolValue>> {
        let descriptor = self.registry.get(module_name)?;
        module_init::decode_module_init(descriptor, data)
    }

    pub fn encode_function_call(
        &self,
        abi: &JsonAbi,
        function_name: &str,
        args: &[DynSolValue],
    ) -> Result<Bytes> {
        encode_function_call(abi, function_name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use alloy_primitives::{U256, address};
    use serde_json::json;

    const ADMIN: Address = address!("abcdef0000000000000000000000000000000001");

    #[test]
    fn test_member_module_encodes_admin() {
        let encoder = TransactionEncoder::default();
        let bytes = encoder
            .encode_module_init(registry::MEMBER_MODULE, &ModuleConfig::new(), ADMIN)
            .unwrap();

        let mut expected = vec![0u8; 12];
        expected.extend_from_slice(ADMIN.as_slice());
        assert_eq!(bytes.to_vec(), expected);
    }

    #[test]
    fn test_proposal_voting_threshold() {
        let encoder = TransactionEncoder::default();
        let mut config = ModuleConfig::new();
        config.insert(
            "ProposalVotingModule_approvalThreshold".to_string(),
            json!(60),
        );

        let bytes = encoder
            .encode_module_init(registry::PROPOSAL_VOTING_MODULE, &config, ADMIN)
            .unwrap();
        assert_eq!(U256::from_be_slice(&bytes), U256::from(60));

        let fallback = encoder
            .encode_module_init(registry::PROPOSAL_VOTING_MODULE, &ModuleConfig::new(), ADMIN)
            .unwrap();
        assert_eq!(U256::from_be_slice(&fallback), U256::from(51));
    }

    #[test]
    fn test_claim_voting_schema_default() {
        let encoder = TransactionEncoder::default();
        let bytes = encoder
            .encode_module_init(registry::CLAIM_VOTING_MODULE, &ModuleConfig::new(), ADMIN)
            .unwrap();
        assert_eq!(U256::from_be_slice(&bytes), U256::from(66));
    }

    #[test]
    fn test_unparameterized_modules_encode_empty() {
        let encoder = TransactionEncoder::default();
        for name in [
            registry::TREASURY_MODULE,
            registry::TASK_MODULE,
            registry::EVENT_MODULE,
            registry::ANNOUNCEMENT_MODULE,
        ] {
            let bytes = encoder
                .encode_module_init(name, &ModuleConfig::new(), ADMIN)
                .unwrap();
            assert!(bytes.is_empty(), "{} produced {} bytes", name, bytes.len());
        }
    }

    #[test]
    fn test_unknown_module() {
        let encoder = TransactionEncoder::default();
        assert!(matches!(
            encoder.encode_module_init("UnknownModule", &ModuleConfig::new(), ADMIN),
            Err(Error::UnknownModule(name)) if name == "UnknownModule"
        ));
    }

    #[test]
    fn test_every_registered_module_decodes() {
        let encoder = TransactionEncoder::default();
        let uint = |v: u64| DynSolValue::Uint(U256::from(v), 256);
        let expected = [
            (registry::MEMBER_MODULE, vec![DynSolValue::Address(ADMIN)]),
            (registry::PROPOSAL_VOTING_MODULE, vec![uint(51)]),
            (registry::CLAIM_VOTING_MODULE, vec![uint(66)]),
            (registry::TREASURY_MODULE, vec![]),
            (registry::TASK_MODULE, vec![]),
            (registry::EVENT_MODULE, vec![]),
            (registry::ANNOUNCEMENT_MODULE, vec![]),
        ];

        let mut names: Vec<&str> = encoder.registry().names().collect();
        names.sort_unstable();
        let mut covered: Vec<&str> = expected.iter().map(|(name, _)| *name).collect();
        covered.sort_unstable();
        assert_eq!(names, covered);

        for (name, values) in expected {
            let bytes = encoder
                .encode_module_init(name, &ModuleConfig::new(), ADMIN)
                .unwrap();
            assert_eq!(encoder.decode_module_init(name, &bytes).unwrap(), values, "{}", name);
        }
    }

    #[test]
    fn test_configured_threshold_decodes() {
        let encoder = TransactionEncoder::default();
        let mut config = ModuleConfig::new();
        config.insert("ClaimVotingModule_approvalThreshold".to_string(), json!(75));

        let bytes = encoder
            .encode_module_init(registry::CLAIM_VOTING_MODULE, &config, ADMIN)
            .unwrap();
        assert_eq!(
            encoder
                .decode_module_init(registry::CLAIM_VOTING_MODULE, &bytes)
                .unwrap(),
            vec![DynSolValue::Uint(U256::from(75), 256)]
        );
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let encoder = TransactionEncoder::default();
        let config = ModuleConfig::new();
        let first = encoder
            .encode_module_init(registry::CLAIM_VOTING_MODULE, &config, ADMIN)
            .unwrap();
        let second = encoder
            .encode_module_init(registry::CLAIM_VOTING_MODULE, &config, ADMIN)
            .unwrap();
        assert_eq!(first, second);
    }
}
