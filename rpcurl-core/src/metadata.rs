//! # Request Metadata
//!
//! Headers are given on the command line as `name: value` strings. This module parses them,
//! optionally expands `${NAME}` environment variable references, and turns them into a
//! tonic `MetadataMap`.
//!
//! Keys ending in `-bin` carry binary values. Their values are base64 decoded when they can
//! be, and sent as the raw bytes otherwise.
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use std::str::FromStr;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue, MetadataMap,
};

/// Name of the header carrying the original URL path for routing intermediaries.
pub const ROUTING_PATH_HEADER: &str = "x-grpc-path";

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("Header '{0}' has no name")]
    EmptyName(String),
    #[error("Header '{header}' references undefined environment variable '{name}'")]
    UndefinedVariable { header: String, name: String },
    #[error("Header '{0}' has an unterminated '${{' reference")]
    UnterminatedVariable(String),
    #[error("Invalid metadata (header) key '{0}'")]
    InvalidKey(String),
    #[error("Invalid metadata (header) value for key '{0}'")]
    InvalidValue(String),
}

/// Splits a `name: value` header into a trimmed pair. A header without `:` has an empty value.
pub fn parse_header(header: &str) -> Result<(String, String), HeaderError> {
    let (name, value) = header.split_once(':').unwrap_or((header, ""));
    let name = name.trim();

    if name.is_empty() {
        return Err(HeaderError::EmptyName(header.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Expands `${NAME}` references using the given lookup.
///
/// Nothing else is interpreted: no escaping, no default values.
pub fn expand_header(
    header: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, HeaderError> {
    let mut out = String::with_capacity(header.len());
    let mut rest = header;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| HeaderError::UnterminatedVariable(header.to_string()))?;
        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| HeaderError::UndefinedVariable {
            header: header.to_string(),
            name: name.to_string(),
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Expands every header against the process environment.
pub fn expand_headers(headers: &[String]) -> Result<Vec<String>, HeaderError> {
    headers
        .iter()
        .map(|header| expand_header(header, |name| std::env::var(name).ok()))
        .collect()
}

/// Builds a `MetadataMap` from `(name, value)` pairs. Repeated names are appended.
pub fn metadata_from_pairs(pairs: &[(String, String)]) -> Result<MetadataMap, HeaderError> {
    let mut metadata = MetadataMap::new();

    for (key, value) in pairs {
        let lowercase = key.to_ascii_lowercase();

        if lowercase.ends_with("-bin") {
            let key = BinaryMetadataKey::from_str(&lowercase)
                .map_err(|_| HeaderError::InvalidKey(key.clone()))?;
            let bytes = decode_binary(value).unwrap_or_else(|_| value.as_bytes().to_vec());
            metadata.append_bin(key, BinaryMetadataValue::from_bytes(&bytes));
        } else {
            let key = AsciiMetadataKey::from_str(&lowercase)
                .map_err(|_| HeaderError::InvalidKey(key.clone()))?;
            let value = AsciiMetadataValue::from_str(value)
                .map_err(|_| HeaderError::InvalidValue(lowercase.clone()))?;
            metadata.append(key, value);
        }
    }

    Ok(metadata)
}

/// Parses raw `name: value` strings into a `MetadataMap`.
pub fn metadata_from_headers(headers: &[String]) -> Result<MetadataMap, HeaderError> {
    let pairs = headers
        .iter()
        .map(|header| parse_header(header))
        .collect::<Result<Vec<_>, _>>()?;

    metadata_from_pairs(&pairs)
}

fn decode_binary(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD
        .decode(value)
        .or_else(|_| STANDARD_NO_PAD.decode(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_value_pairs() {
        assert_eq!(
            parse_header("authorization:  Bearer abc ").unwrap(),
            ("authorization".to_string(), "Bearer abc".to_string())
        );
        assert_eq!(
            parse_header("x-url: http://example.com").unwrap(),
            ("x-url".to_string(), "http://example.com".to_string())
        );
        assert!(matches!(
            parse_header(" : value"),
            Err(HeaderError::EmptyName(_))
        ));
    }

    #[test]
    fn expands_environment_references() {
        let lookup = |name: &str| (name == "TOKEN").then(|| "s3cr3t".to_string());

        assert_eq!(
            expand_header("authorization: Bearer ${TOKEN}", lookup).unwrap(),
            "authorization: Bearer s3cr3t"
        );
        assert_eq!(expand_header("plain: value", lookup).unwrap(), "plain: value");
        assert!(matches!(
            expand_header("x: ${MISSING}", lookup),
            Err(HeaderError::UndefinedVariable { name, .. }) if name == "MISSING"
        ));
        assert!(matches!(
            expand_header("x: ${TOKEN", lookup),
            Err(HeaderError::UnterminatedVariable(_))
        ));
    }

    #[test]
    fn binary_headers_are_base64_decoded() {
        let metadata = metadata_from_headers(&["trace-bin: AAEC".to_string()]).unwrap();
        let value = metadata.get_bin("trace-bin").unwrap();

        assert_eq!(value.to_bytes().unwrap().as_ref(), &[0u8, 1, 2]);
    }

    #[test]
    fn header_without_separator_has_an_empty_value() {
        assert_eq!(
            parse_header(" x-flag ").unwrap(),
            ("x-flag".to_string(), String::new())
        );

        let metadata = metadata_from_headers(&["x-flag".to_string()]).unwrap();
        assert_eq!(metadata.get("x-flag").unwrap().to_str().unwrap(), "");
    }

    #[test]
    fn undecodable_binary_values_are_sent_raw() {
        let metadata = metadata_from_headers(&["trace-bin: not*base64".to_string()]).unwrap();
        let value = metadata.get_bin("trace-bin").unwrap();

        assert_eq!(value.to_bytes().unwrap().as_ref(), b"not*base64");
    }

    #[test]
    fn repeated_headers_are_kept() {
        let metadata = metadata_from_headers(&[
            "x-tag: one".to_string(),
            "X-Tag: two".to_string(),
        ])
        .unwrap();

        let values: Vec<_> = metadata
            .get_all("x-tag")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["one", "two"]);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        assert!(matches!(
            metadata_from_headers(&["bad key: v".to_string()]),
            Err(HeaderError::InvalidKey(_))
        ));
    }
}
