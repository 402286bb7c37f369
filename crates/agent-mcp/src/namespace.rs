//! Model-facing tool names.
//!
//! A tool is exposed as `"{len}_{provider}_{tool}"` where `len` is the byte
//! length of the provider id in decimal. The length prefix makes decoding
//! exact no matter which characters either part contains.

use crate::error::MalformedToolNameError;

/// Encode a provider id and tool name into one model-facing name.
pub fn encode(provider_id: &str, tool_name: &str) -> String {
    format!("{}_{}_{}", provider_id.len(), provider_id, tool_name)
}

/// Like [`encode`], but refuses parts that could never decode back.
pub fn try_encode(provider_id: &str, tool_name: &str) -> Result<String, MalformedToolNameError> {
    if provider_id.is_empty() {
        return Err(MalformedToolNameError::new(tool_name, "empty provider id"));
    }
    if tool_name.is_empty() {
        return Err(MalformedToolNameError::new(provider_id, "empty tool name"));
    }
    Ok(encode(provider_id, tool_name))
}

/// Longest function name chat-completion APIs accept.
pub const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Whether `name` is a valid function name for chat-completion APIs:
/// 1 to 64 ASCII letters, digits, `_` or `-`.
pub fn is_function_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FUNCTION_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Split a model-facing name back into `(provider_id, tool_name)`.
pub fn decode(name: &str) -> Result<(&str, &str), MalformedToolNameError> {
    let err = |reason| MalformedToolNameError::new(name, reason);

    let (prefix, rest) = name.split_once('_').ok_or_else(|| err("missing length prefix"))?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err("length prefix is not a decimal number"));
    }
    if prefix.len() > 1 && prefix.starts_with('0') {
        return Err(err("length prefix has leading zeros"));
    }
    let len: usize = prefix.parse().map_err(|_| err("length prefix out of range"))?;
    if len == 0 {
        return Err(err("empty provider id"));
    }
    if len > rest.len() || !rest.is_char_boundary(len) {
        return Err(err("length prefix does not match provider id"));
    }

    let (provider_id, tail) = rest.split_at(len);
    let tool_name = tail
        .strip_prefix('_')
        .ok_or_else(|| err("missing separator after provider id"))?;
    if tool_name.is_empty() {
        return Err(err("empty tool name"));
    }
    Ok((provider_id, tool_name))
}
