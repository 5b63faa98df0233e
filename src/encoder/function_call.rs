//! Contract call data from a JSON ABI

use alloy_dyn_abi::{DynSolValue, JsonAbiExt, Specifier};
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::{Bytes, I256, U256};
use tracing::trace;

use crate::error::{Error, Result};

/// Encode `function_name(args...)` as selector plus ABI-encoded arguments.
///
/// Overloads are resolved by arity and argument types. Values are never
/// coerced: a `Uint(_, 8)` does not satisfy a `uint256` parameter.
pub fn encode_function_call(
    abi: &JsonAbi,
    function_name: &str,
    args: &[DynSolValue],
) -> Result<Bytes> {
    let overloads = abi.function(function_name).ok_or_else(|| {
        Error::AbiEncoding(format!("Function {} not found in ABI", function_name))
    })?;

    let mut mismatch = None;
    for function in overloads {
        match check_arguments(function, args) {
            Ok(()) => {
                trace!("Encoding call to {}", function.signature());
                let data = function.abi_encode_input(args).map_err(|e| {
                    Error::AbiEncoding(format!("{}: {}", function.signature(), e))
                })?;
                return Ok(data.into());
            }
            Err(e) => mismatch = Some(e),
        }
    }

    Err(mismatch.unwrap_or_else(|| {
        Error::AbiEncoding(format!("Function {} has no definitions", function_name))
    }))
}

fn check_arguments(function: &Function, args: &[DynSolValue]) -> Result<()> {
    if function.inputs.len() != args.len() {
        return Err(Error::AbiEncoding(format!(
            "{} expects {} arguments, got {}",
            function.signature(),
            function.inputs.len(),
            args.len()
        )));
    }

    for (index, (param, arg)) in function.inputs.iter().zip(args).enumerate() {
        let expected = param.resolve().map_err(|e| {
            Error::AbiEncoding(format!(
                "{}: cannot resolve parameter {}: {}",
                function.signature(),
                index,
                e
            ))
        })?;
        if !arg.matches(&expected) {
            let actual = arg
                .as_type()
                .map(|ty| ty.sol_type_name().into_owned())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::AbiEncoding(format!(
                "{} argument {} ({}) expects {}, got {}",
                function.signature(),
                index,
                param.name,
                expected.sol_type_name(),
                actual
            )));
        }
        check_range(arg).map_err(|reason| {
            Error::AbiEncoding(format!(
                "{} argument {} ({}): {}",
                function.signature(),
                index,
                param.name,
                reason
            ))
        })?;
    }
    Ok(())
}

/// Values must fit the width they declare
fn check_range(value: &DynSolValue) -> std::result::Result<(), String> {
    match value {
        DynSolValue::Uint(v, bits) if *bits < 256 && v.bit_len() > *bits => {
            Err(format!("{} does not fit in uint{}", v, bits))
        }
        DynSolValue::Int(v, bits) if *bits > 0 && *bits < 256 => {
            let max = I256::from_raw((U256::from(1) << (*bits - 1)) - U256::from(1));
            let min = -max - I256::ONE;
            if *v > max || *v < min {
                Err(format!("{} does not fit in int{}", v, bits))
            } else {
                Ok(())
            }
        }
        DynSolValue::FixedBytes(word, size) => {
            if *size > 32 || word[*size..].iter().any(|b| *b != 0) {
                Err(format!("value does not fit in bytes{}", size))
            } else {
                Ok(())
            }
        }
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            values.iter().try_for_each(check_range)
        }
        _ => Ok(()),
    }
}
