//! Struct and field encoding for EIP-712.

use std::collections::BTreeSet;
use std::str::FromStr;

use alloy_primitives::{Address, B256, U256, keccak256};
use serde_json::Value;

use crate::eip712::{TypedDataField, Types};
use crate::error::TypedDataError;

/// Render the canonical type string of `primary_type`.
///
/// The primary type comes first, followed by every struct it references
/// (transitively, through arrays too) sorted by name.
pub fn encode_type(types: &Types, primary_type: &str) -> Result<String, TypedDataError> {
    let fields = lookup(types, primary_type)?;

    let mut found = BTreeSet::new();
    found.insert(primary_type.to_string());
    collect_dependencies(types, fields, &mut found);
    found.remove(primary_type);

    let mut out = render_struct(primary_type, fields);
    for dep in &found {
        out.push_str(&render_struct(dep, lookup(types, dep)?));
    }
    Ok(out)
}

/// `keccak256(encode_type(types, type_name))`.
pub fn type_hash(types: &Types, type_name: &str) -> Result<B256, TypedDataError> {
    Ok(keccak256(encode_type(types, type_name)?.as_bytes()))
}

/// `keccak256(typeHash || encodeData(value))` for a struct value.
pub fn hash_struct(types: &Types, type_name: &str, value: &Value) -> Result<B256, TypedDataError> {
    let fields = lookup(types, type_name)?;
    let object = value.as_object().ok_or_else(|| {
        TypedDataError::invalid(type_name, format!("expected an object, got {value}"))
    })?;

    let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
    encoded.extend_from_slice(type_hash(types, type_name)?.as_slice());
    for field in fields {
        let field_value = object.get(&field.name).ok_or_else(|| TypedDataError::MissingField {
            type_name: type_name.to_string(),
            field: field.name.clone(),
        })?;
        encoded.extend_from_slice(encode_value(types, &field.r#type, field_value)?.as_slice());
    }
    Ok(keccak256(encoded))
}

/// Encode one value of the declared type into its 32-byte word.
pub fn encode_value(types: &Types, field_type: &str, value: &Value) -> Result<B256, TypedDataError> {
    if let Some((element_type, fixed_len)) = split_array(field_type)? {
        let items = value.as_array().ok_or_else(|| {
            TypedDataError::invalid(field_type, format!("expected an array, got {value}"))
        })?;
        if let Some(len) = fixed_len {
            if items.len() != len {
                return Err(TypedDataError::invalid(
                    field_type,
                    format!("expected {len} elements, got {}", items.len()),
                ));
            }
        }

        let mut concatenated = Vec::with_capacity(32 * items.len());
        for item in items {
            concatenated.extend_from_slice(encode_value(types, element_type, item)?.as_slice());
        }
        return Ok(keccak256(concatenated));
    }

    if types.contains_key(field_type) {
        return hash_struct(types, field_type, value);
    }

    match field_type {
        "string" => {
            let s = value.as_str().ok_or_else(|| {
                TypedDataError::invalid(field_type, format!("expected a string, got {value}"))
            })?;
            Ok(keccak256(s.as_bytes()))
        }
        "bytes" => Ok(keccak256(decode_hex(field_type, value)?)),
        "bytes32" => {
            let raw = decode_hex(field_type, value)?;
            if raw.len() > 32 {
                return Err(TypedDataError::invalid(
                    field_type,
                    format!("{} bytes do not fit in 32", raw.len()),
                ));
            }
            let mut word = [0u8; 32];
            word[32 - raw.len()..].copy_from_slice(&raw);
            Ok(B256::from(word))
        }
        "address" => {
            let s = value.as_str().ok_or_else(|| {
                TypedDataError::invalid(field_type, format!("expected a hex string, got {value}"))
            })?;
            let address = Address::from_str(s)
                .map_err(|e| TypedDataError::invalid(field_type, format!("{s}: {e}")))?;
            Ok(address.into_word())
        }
        "bool" => {
            let flag = value.as_bool().ok_or_else(|| {
                TypedDataError::invalid(field_type, format!("expected a boolean, got {value}"))
            })?;
            let mut word = [0u8; 32];
            word[31] = u8::from(flag);
            Ok(B256::from(word))
        }
        _ => {
            if let Some(bits) = field_type.strip_prefix("uint") {
                encode_integer(field_type, parse_bits(field_type, bits)?, false, value)
            } else if let Some(bits) = field_type.strip_prefix("int") {
                encode_integer(field_type, parse_bits(field_type, bits)?, true, value)
            } else {
                Err(TypedDataError::UnsupportedType(field_type.to_string()))
            }
        }
    }
}

fn lookup<'a>(types: &'a Types, name: &str) -> Result<&'a [TypedDataField], TypedDataError> {
    types
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| TypedDataError::UnknownType(name.to_string()))
}

fn collect_dependencies(types: &Types, fields: &[TypedDataField], found: &mut BTreeSet<String>) {
    for field in fields {
        let base = base_type(&field.r#type);
        if let Some(nested) = types.get(base) {
            if found.insert(base.to_string()) {
                collect_dependencies(types, nested, found);
            }
        }
    }
}

fn render_struct(name: &str, fields: &[TypedDataField]) -> String {
    let members: Vec<String> = fields
        .iter()
        .map(|f| format!("{} {}", f.r#type, f.name))
        .collect();
    format!("{}({})", name, members.join(","))
}

/// `Person[][3]` -> `Person`.
fn base_type(field_type: &str) -> &str {
    field_type.split('[').next().unwrap_or(field_type)
}

/// Split the outermost array suffix: `uint8[][2]` -> (`uint8[]`, Some(2)).
fn split_array(field_type: &str) -> Result<Option<(&str, Option<usize>)>, TypedDataError> {
    if !field_type.ends_with(']') {
        return Ok(None);
    }
    let open = field_type
        .rfind('[')
        .ok_or_else(|| TypedDataError::UnsupportedType(field_type.to_string()))?;
    let element = &field_type[..open];
    let len = &field_type[open + 1..field_type.len() - 1];
    if element.is_empty() {
        return Err(TypedDataError::UnsupportedType(field_type.to_string()));
    }
    if len.is_empty() {
        return Ok(Some((element, None)));
    }
    let len = len
        .parse::<usize>()
        .map_err(|_| TypedDataError::UnsupportedType(field_type.to_string()))?;
    Ok(Some((element, Some(len))))
}

fn parse_bits(field_type: &str, suffix: &str) -> Result<usize, TypedDataError> {
    if suffix.is_empty() {
        return Ok(256);
    }
    match suffix.parse::<usize>() {
        Ok(bits) if bits > 0 && bits <= 256 && bits % 8 == 0 => Ok(bits),
        _ => Err(TypedDataError::UnsupportedType(field_type.to_string())),
    }
}

fn decode_hex(field_type: &str, value: &Value) -> Result<Vec<u8>, TypedDataError> {
    let s = value.as_str().ok_or_else(|| {
        TypedDataError::invalid(field_type, format!("expected a hex string, got {value}"))
    })?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| TypedDataError::invalid(field_type, format!("{s}: {e}")))
}

/// Reduce an integer modulo 2^bits and lay it out as a big-endian word;
/// signed values are sign-extended from bit `bits - 1`.
fn encode_integer(
    field_type: &str,
    bits: usize,
    signed: bool,
    value: &Value,
) -> Result<B256, TypedDataError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(TypedDataError::invalid(
                field_type,
                format!("expected a number or numeric string, got {other}"),
            ));
        }
    };

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };
    let (radix, digits) = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => (16, hex),
        None => (10, digits),
    };
    if digits.is_empty() {
        return Err(TypedDataError::invalid(field_type, format!("`{text}` is not an integer")));
    }
    let magnitude = U256::from_str_radix(digits, radix)
        .map_err(|e| TypedDataError::invalid(field_type, format!("`{text}`: {e}")))?;

    let raw = if negative { magnitude.wrapping_neg() } else { magnitude };
    let word = if bits == 256 {
        raw
    } else {
        let mask = (U256::from(1u8) << bits) - U256::from(1u8);
        let reduced = raw & mask;
        if signed && reduced.bit(bits - 1) {
            reduced | (U256::MAX ^ mask)
        } else {
            reduced
        }
    };
    Ok(B256::from(word.to_be_bytes::<32>()))
}
