//! Per-module initialization data encoding

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, Bytes, U256};
use serde_json::Value;

use super::registry::{ModuleDescriptor, ModuleKind};
use crate::error::{Error, Result};

/// User configuration keyed by `<ModuleName>_<paramName>`
pub type ModuleConfig = serde_json::Map<String, Value>;

/// Threshold used when neither the config nor the schema provides one
pub const DEFAULT_APPROVAL_THRESHOLD: u64 = 51;

type InitEncoder = fn(&ModuleDescriptor, &ModuleConfig, Address) -> Result<Bytes>;

const INIT_ENCODERS: &[(ModuleKind, InitEncoder)] = &[
    (ModuleKind::Membership, encode_membership),
    (ModuleKind::ApprovalVoting, encode_approval_voting),
    (ModuleKind::Unparameterized, encode_empty),
];

impl ModuleKind {
    fn init_encoder(self) -> InitEncoder {
        INIT_ENCODERS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, encoder)| *encoder)
            .unwrap_or(encode_empty)
    }

    /// Parameter tuple the module's `initialize` expects
    pub fn init_types(self, descriptor: &ModuleDescriptor) -> Vec<DynSolType> {
        match self {
            ModuleKind::Membership => vec![DynSolType::Address],
            _ if descriptor.init_params.is_empty() => Vec::new(),
            ModuleKind::ApprovalVoting => vec![DynSolType::Uint(256)],
            ModuleKind::Unparameterized => Vec::new(),
        }
    }
}

/// Encode a module's initialization bytes
pub fn encode_module_init(
    descriptor: &ModuleDescriptor,
    config: &ModuleConfig,
    admin: Address,
) -> Result<Bytes> {
    // Membership ignores its declared schema
    if descriptor.kind != ModuleKind::Membership && descriptor.init_params.is_empty() {
        return Ok(Bytes::new());
    }
    (descriptor.kind.init_encoder())(descriptor, config, admin)
}

/// Decode initialization bytes back into the module's parameter tuple
pub fn decode_module_init(descriptor: &ModuleDescriptor, data: &[u8]) -> Result<Vec<DynSolValue>> {
    let types = descriptor.kind.init_types(descriptor);
    if types.is_empty() {
        return if data.is_empty() {
            Ok(Vec::new())
        } else {
            Err(Error::AbiEncoding(format!(
                "{} takes no init data, got {} bytes",
                descriptor.name,
                data.len()
            )))
        };
    }

    match DynSolType::Tuple(types).abi_decode_params(data) {
        Ok(DynSolValue::Tuple(values)) => Ok(values),
        Ok(other) => Ok(vec![other]),
        Err(e) => Err(Error::AbiEncoding(format!(
            "Failed to decode {} init data: {}",
            descriptor.name, e
        ))),
    }
}

fn encode_membership(_: &ModuleDescriptor, _: &ModuleConfig, admin: Address) -> Result<Bytes> {
    Ok(DynSolValue::Tuple(vec![DynSolValue::Address(admin)])
        .abi_encode_params()
        .into())
}

fn encode_approval_voting(
    descriptor: &ModuleDescriptor,
    config: &ModuleConfig,
    _: Address,
) -> Result<Bytes> {
    let param = descriptor.init_params.first().ok_or_else(|| {
        Error::AbiEncoding(format!("{} declares no threshold parameter", descriptor.name))
    })?;
    if param.ty != "uint256" {
        return Err(Error::AbiEncoding(format!(
            "{}.{} is declared as {}, expected uint256",
            descriptor.name, param.name, param.ty
        )));
    }

    let key = format!("{}_{}", descriptor.name, param.name);
    let threshold = match config.get(&key).filter(|v| !v.is_null()) {
        Some(value) => parse_uint(value).ok_or_else(|| {
            Error::AbiEncoding(format!("{} must be an unsigned integer, got {}", key, value))
        })?,
        None => match &param.default {
            Some(default) => parse_uint(default).ok_or_else(|| {
                Error::AbiEncoding(format!(
                    "{}.{} has a non-integer default {}",
                    descriptor.name, param.name, default
                ))
            })?,
            None => U256::from(DEFAULT_APPROVAL_THRESHOLD),
        },
    };

    Ok(DynSolValue::Tuple(vec![DynSolValue::Uint(threshold, 256)])
        .abi_encode_params()
        .into())
}

fn encode_empty(_: &ModuleDescriptor, _: &ModuleConfig, _: Address) -> Result<Bytes> {
    Ok(Bytes::new())
}

/// Accept JSON integers and decimal strings, as form fields deliver either
fn parse_uint(value: &Value) -> Option<U256> {
    match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => U256::from_str_radix(s.trim(), 10).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::registry::ParamSpec;
    use serde_json::json;

    fn voting(default: Option<Value>) -> ModuleDescriptor {
        ModuleDescriptor {
            name: "ProposalVotingModule".to_string(),
            address: Address::repeat_byte(1),
            kind: ModuleKind::ApprovalVoting,
            init_params: vec![ParamSpec::new("approvalThreshold", "uint256", default)],
        }
    }

    fn config(value: Value) -> ModuleConfig {
        let mut config = ModuleConfig::new();
        config.insert("ProposalVotingModule_approvalThreshold".to_string(), value);
        config
    }

    fn decoded_threshold(bytes: &[u8]) -> U256 {
        match decode_module_init(&voting(None), bytes).unwrap().as_slice() {
            [DynSolValue::Uint(value, 256)] => *value,
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_threshold_from_config() {
        let bytes = encode_module_init(&voting(None), &config(json!(60)), Address::ZERO).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(decoded_threshold(&bytes), U256::from(60));
    }

    #[test]
    fn test_threshold_from_decimal_string() {
        let bytes =
            encode_module_init(&voting(None), &config(json!("75")), Address::ZERO).unwrap();
        assert_eq!(decoded_threshold(&bytes), U256::from(75));
    }

    #[test]
    fn test_threshold_schema_default_then_fallback() {
        let with_default =
            encode_module_init(&voting(Some(json!(70))), &ModuleConfig::new(), Address::ZERO)
                .unwrap();
        assert_eq!(decoded_threshold(&with_default), U256::from(70));

        let fallback =
            encode_module_init(&voting(None), &ModuleConfig::new(), Address::ZERO).unwrap();
        assert_eq!(decoded_threshold(&fallback), U256::from(DEFAULT_APPROVAL_THRESHOLD));
    }

    #[test]
    fn test_null_threshold_falls_back() {
        let bytes = encode_module_init(&voting(None), &config(Value::Null), Address::ZERO).unwrap();
        assert_eq!(decoded_threshold(&bytes), U256::from(51));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        for bad in [json!(-1), json!(1.5), json!("sixty"), json!(true)] {
            let result = encode_module_init(&voting(None), &config(bad.clone()), Address::ZERO);
            assert!(
                matches!(result, Err(Error::AbiEncoding(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_voting_schema_type_mismatch() {
        let mut descriptor = voting(None);
        descriptor.init_params[0].ty = "uint8".to_string();
        assert!(matches!(
            encode_module_init(&descriptor, &ModuleConfig::new(), Address::ZERO),
            Err(Error::AbiEncoding(_))
        ));
    }

    #[test]
    fn test_empty_schema_encodes_nothing() {
        let mut descriptor = voting(None);
        descriptor.init_params.clear();
        let bytes =
            encode_module_init(&descriptor, &config(json!(60)), Address::ZERO).unwrap();
        assert!(bytes.is_empty());
        assert!(decode_module_init(&descriptor, &bytes).unwrap().is_empty());
        assert!(decode_module_init(&descriptor, &[0u8; 32]).is_err());
    }

    #[test]
    fn test_membership_ignores_schema() {
        let descriptor = ModuleDescriptor {
            name: "MemberModule".to_string(),
            address: Address::repeat_byte(2),
            kind: ModuleKind::Membership,
            init_params: Vec::new(),
        };
        let admin = Address::repeat_byte(0xab);
        let bytes = encode_module_init(&descriptor, &ModuleConfig::new(), admin).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[12..], admin.as_slice());
        assert_eq!(
            decode_module_init(&descriptor, &bytes).unwrap(),
            vec![DynSolValue::Address(admin)]
        );
    }
}
