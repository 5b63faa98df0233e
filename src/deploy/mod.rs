//! DAO deployment orchestration
//!
//! Turns a template and the user's form values into a `createDAO` call on the
//! factory contract and submits it through the connected signer.

pub mod template;

pub use template::{DaoTemplate, DeploymentConfig};

use std::sync::Arc;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::{Address, B256, Bytes};
use tracing::{debug, info};

use crate::dispatch::TransactionDispatcher;
use crate::encoder::{TransactionEncoder, encode_function_call};
use crate::error::{Error, Result};

pub const CREATE_DAO: &str = "createDAO";

/// Factory entry point
pub const FACTORY_ABI: &str = r#"[
  {
    "type": "function",
    "name": "createDAO",
    "stateMutability": "nonpayable",
    "inputs": [
      { "name": "moduleAddresses", "type": "address[]" },
      { "name": "initData", "type": "bytes[]" },
      {
        "name": "metadata",
        "type": "tuple",
        "components": [
          { "name": "name", "type": "string" },
          { "name": "briefDescription", "type": "string" },
          { "name": "mandate", "type": "string" },
          { "name": "audience", "type": "string" },
          { "name": "isPublic", "type": "bool" }
        ]
      },
      { "name": "treasuryLogic", "type": "address" },
      { "name": "token", "type": "address" }
    ],
    "outputs": [{ "name": "dao", "type": "address" }]
  }
]"#;

fn factory_abi() -> Result<JsonAbi> {
    serde_json::from_str(FACTORY_ABI)
        .map_err(|e| Error::AbiEncoding(format!("Invalid factory ABI: {}", e)))
}

fn create_dao_function(abi: &JsonAbi) -> Result<&Function> {
    abi.function(CREATE_DAO)
        .and_then(|overloads| overloads.first())
        .ok_or_else(|| Error::AbiEncoding(format!("{} missing from factory ABI", CREATE_DAO)))
}

/// DAO descriptive fields passed to the factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaoMetadata {
    pub name: String,
    pub brief_description: String,
    pub mandate: String,
    pub audience: String,
    pub is_public: bool,
}

impl DaoMetadata {
    fn to_sol_value(&self) -> DynSolValue {
        DynSolValue::Tuple(vec![
            DynSolValue::String(self.name.clone()),
            DynSolValue::String(self.brief_description.clone()),
            DynSolValue::String(self.mandate.clone()),
            DynSolValue::String(self.audience.clone()),
            DynSolValue::Bool(self.is_public),
        ])
    }

    fn from_sol_value(value: &DynSolValue) -> Option<Self> {
        match value.as_tuple()? {
            [
                DynSolValue::String(name),
                DynSolValue::String(brief_description),
                DynSolValue::String(mandate),
                DynSolValue::String(audience),
                DynSolValue::Bool(is_public),
            ] => Some(Self {
                name: name.clone(),
                brief_description: brief_description.clone(),
                mandate: mandate.clone(),
                audience: audience.clone(),
                is_public: *is_public,
            }),
            _ => None,
        }
    }
}

impl From<&DeploymentConfig> for DaoMetadata {
    fn from(config: &DeploymentConfig) -> Self {
        Self {
            name: config.name.clone(),
            brief_description: config.brief_description.clone(),
            mandate: config.mandate.clone(),
            audience: config.audience.clone(),
            is_public: config.is_public,
        }
    }
}

/// Index-aligned module addresses and init data, ready for the factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub module_addresses: Vec<Address>,
    pub init_data: Vec<Bytes>,
    pub metadata: DaoMetadata,
    pub treasury_logic_address: Address,
    pub token_address: Address,
}

impl DeploymentPlan {
    /// `createDAO` calldata
    pub fn encode_call(&self) -> Result<Bytes> {
        let args = [
            DynSolValue::Array(
                self.module_addresses
                    .iter()
                    .copied()
                    .map(DynSolValue::Address)
                    .collect(),
            ),
            DynSolValue::Array(
                self.init_data
                    .iter()
                    .map(|data| DynSolValue::Bytes(data.to_vec()))
                    .collect(),
            ),
            self.metadata.to_sol_value(),
            DynSolValue::Address(self.treasury_logic_address),
            DynSolValue::Address(self.token_address),
        ];
        encode_function_call(&factory_abi()?, CREATE_DAO, &args)
    }

    /// Parse `createDAO` calldata back into a plan
    pub fn decode_call(data: &[u8]) -> Result<Self> {
        let abi = factory_abi()?;
        let function = create_dao_function(&abi)?;

        let (selector, params) = data.split_at_checked(4).ok_or_else(|| {
            Error::AbiEncoding(format!("calldata too short: {} bytes", data.len()))
        })?;
        if selector != function.selector().as_slice() {
            return Err(Error::AbiEncoding(format!(
                "calldata is not a {} call",
                function.signature()
            )));
        }

        let types = function
            .inputs
            .iter()
            .map(|param| param.resolve())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::AbiEncoding(e.to_string()))?;
        let decoded = DynSolType::Tuple(types)
            .abi_decode_params(params)
            .map_err(|e| Error::AbiEncoding(format!("Failed to decode createDAO call: {}", e)))?;

        let malformed = || Error::AbiEncoding("unexpected createDAO argument layout".to_string());
        match decoded.as_tuple().ok_or_else(malformed)? {
            [addresses, init_data, metadata, treasury, token] => Ok(Self {
                module_addresses: addresses
                    .as_array()
                    .ok_or_else(malformed)?
                    .iter()
                    .map(|value| value.as_address().ok_or_else(malformed))
                    .collect::<Result<_>>()?,
                init_data: init_data
                    .as_array()
                    .ok_or_else(malformed)?
                    .iter()
                    .map(|value| {
                        value
                            .as_bytes()
                            .map(|b| Bytes::copy_from_slice(b))
                            .ok_or_else(malformed)
                    })
                    .collect::<Result<_>>()?,
                metadata: DaoMetadata::from_sol_value(metadata).ok_or_else(malformed)?,
                treasury_logic_address: treasury.as_address().ok_or_else(malformed)?,
                token_address: token.as_address().ok_or_else(malformed)?,
            }),
            _ => Err(malformed()),
        }
    }
}

/// Builds and submits DAO deployments
pub struct DeploymentOrchestrator {
    encoder: TransactionEncoder,
    dispatcher: Arc<TransactionDispatcher>,
}

impl DeploymentOrchestrator {
    pub fn new(encoder: TransactionEncoder, dispatcher: Arc<TransactionDispatcher>) -> Self {
        Self {
            encoder,
            dispatcher,
        }
    }

    pub fn encoder(&self) -> &TransactionEncoder {
        &self.encoder
    }

    /// Resolve every template module and encode its init data; no network access
    pub fn build_deployment(
        &self,
        template: &DaoTemplate,
        config: &DeploymentConfig,
        signer: Address,
    ) -> Result<DeploymentPlan> {
        let registry = self.encoder.registry();
        let mut module_addresses = Vec::with_capacity(template.modules.len());
        let mut init_data = Vec::with_capacity(template.modules.len());

        for module in &template.modules {
            let descriptor = registry.get(module)?;
            let data = self
                .encoder
                .encode_module_init(module, &config.params, signer)?;
            module_addresses.push(descriptor.address);
            init_data.push(data);
        }

        debug!(
            "Built deployment for {} with {} modules",
            config.name,
            module_addresses.len()
        );

        Ok(DeploymentPlan {
            module_addresses,
            init_data,
            metadata: DaoMetadata::from(config),
            treasury_logic_address: template.treasury_logic_address,
            token_address: template.token_address,
        })
    }

    /// Send the factory call for `plan`; resolves to the transaction hash
    pub async fn submit_deployment(&self, plan: &DeploymentPlan, factory: Address) -> Result<B256> {
        let data = plan.encode_call()?;
        let tx = self.dispatcher.request_for(factory, data)?;

        info!(
            "Submitting deployment of {} ({} modules) to factory {}",
            plan.metadata.name,
            plan.module_addresses.len(),
            factory
        );
        self.dispatcher.send_transaction(&tx).await
    }

    /// Build with the session's primary account as admin, then submit
    pub async fn deploy(
        &self,
        template: &DaoTemplate,
        config: &DeploymentConfig,
        factory: Address,
    ) -> Result<B256> {
        let signer = self.dispatcher.session_manager().primary_account()?;
        let plan = self.build_deployment(template, config, signer.address)?;
        self.submit_deployment(&plan, factory).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::encoder::registry::{MEMBER_MODULE, PROPOSAL_VOTING_MODULE, TREASURY_MODULE};
    use crate::relay::MockRelay;
    use crate::session::{MemorySessionStore, SessionManager};
    use alloy_primitives::{U256, keccak256};
    use serde_json::json;

    fn orchestrator() -> DeploymentOrchestrator {
        let manager = Arc::new(SessionManager::new(
            &Config::default(),
            Arc::new(MockRelay::new()),
            Arc::new(MemorySessionStore::new()),
        ));
        DeploymentOrchestrator::new(
            TransactionEncoder::default(),
            Arc::new(TransactionDispatcher::new(manager)),
        )
    }

    fn deployment_config() -> DeploymentConfig {
        let mut config = DeploymentConfig::new("Garden Club");
        config.brief_description = "Neighbourhood gardening".to_string();
        config.is_public = true;
        config.params.insert(
            "ProposalVotingModule_approvalThreshold".to_string(),
            json!(60),
        );
        config
    }

    #[test]
    fn test_factory_signature() {
        let abi = factory_abi().unwrap();
        let function = create_dao_function(&abi).unwrap();
        let signature =
            "createDAO(address[],bytes[],(string,string,string,string,bool),address,address)";
        assert_eq!(function.signature(), signature);
        assert_eq!(
            function.selector().as_slice(),
            &keccak256(signature.as_bytes())[..4]
        );
    }

    #[test]
    fn test_plan_is_index_aligned() {
        let orchestrator = orchestrator();
        let template = DaoTemplate::builtin(DaoTemplate::BASIC).unwrap();
        let signer = Address::repeat_byte(0xab);

        let plan = orchestrator
            .build_deployment(&template, &deployment_config(), signer)
            .unwrap();

        let registry = orchestrator.encoder().registry();
        assert_eq!(plan.module_addresses.len(), 3);
        assert_eq!(plan.init_data.len(), 3);
        assert_eq!(
            plan.module_addresses,
            vec![
                registry.get(MEMBER_MODULE).unwrap().address,
                registry.get(PROPOSAL_VOTING_MODULE).unwrap().address,
                registry.get(TREASURY_MODULE).unwrap().address,
            ]
        );
        assert_eq!(&plan.init_data[0][12..], signer.as_slice());
        assert_eq!(U256::from_be_slice(&plan.init_data[1]), U256::from(60));
        assert!(plan.init_data[2].is_empty());
        assert_eq!(plan.metadata.name, "Garden Club");
        assert!(plan.metadata.is_public);
    }

    #[test]
    fn test_unknown_module_fails_build() {
        let orchestrator = orchestrator();
        let mut template = DaoTemplate::builtin(DaoTemplate::BASIC).unwrap();
        template.modules.push("GhostModule".to_string());

        assert!(matches!(
            orchestrator.build_deployment(&template, &deployment_config(), Address::ZERO),
            Err(Error::UnknownModule(name)) if name == "GhostModule"
        ));
    }

    #[test]
    fn test_call_decodes_back_to_plan() {
        let orchestrator = orchestrator();
        let template = DaoTemplate::builtin(DaoTemplate::COMMUNITY).unwrap();
        let plan = orchestrator
            .build_deployment(&template, &deployment_config(), Address::repeat_byte(1))
            .unwrap();

        let data = plan.encode_call().unwrap();
        assert_eq!(DeploymentPlan::decode_call(&data).unwrap(), plan);
    }

    #[test]
    fn test_decode_rejects_foreign_calldata() {
        assert!(DeploymentPlan::decode_call(&[0xa9, 0x05, 0x9c, 0xbb, 0, 0]).is_err());
        assert!(DeploymentPlan::decode_call(&[0x01]).is_err());
    }

    #[tokio::test]
    async fn test_submit_without_session() {
        let orchestrator = orchestrator();
        let plan = orchestrator
            .build_deployment(
                &DaoTemplate::builtin(DaoTemplate::BASIC).unwrap(),
                &deployment_config(),
                Address::ZERO,
            )
            .unwrap();
        assert!(matches!(
            orchestrator.submit_deployment(&plan, Address::ZERO).await,
            Err(Error::ClientNotInitialized)
        ));
    }
}
