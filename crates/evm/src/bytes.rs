use alloy::primitives::{Address, B256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("invalid hex: {0}")]
    Invalid(String),

    #[error("expected {expected} bytes, found {found}")]
    WrongLength { expected: usize, found: usize },
}

/// Normalize a hex byte string to lower case with a `0x` prefix.
///
/// The prefix is optional on input. With `expected_len`, the decoded value must be
/// exactly that many bytes; addresses and 32-byte hashes go through the alloy
/// fixed-size types so they print the same way the rest of the chain tooling does.
pub fn normalize_hex(raw: &str, expected_len: Option<usize>) -> Result<String, HexError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);

    let bytes = hex::decode(digits).map_err(|e| HexError::Invalid(e.to_string()))?;

    if let Some(expected) = expected_len {
        if bytes.len() != expected {
            return Err(HexError::WrongLength {
                expected,
                found: bytes.len(),
            });
        }
    }

    Ok(match bytes.len() {
        20 if expected_len == Some(20) => format!("{:#x}", Address::from_slice(&bytes)),
        32 if expected_len == Some(32) => format!("{:#x}", B256::from_slice(&bytes)),
        _ => format!("0x{}", hex::encode(&bytes)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_prefixes_addresses() {
        let got = normalize_hex("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", Some(20)).unwrap();
        assert_eq!(got, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

        let bare = normalize_hex("A0B86991C6218B36C1D19D4A2E9EB0CE3606EB48", Some(20)).unwrap();
        assert_eq!(bare, got);
    }

    #[test]
    fn rejects_wrong_length_and_bad_digits() {
        assert_eq!(
            normalize_hex("0xdeadbeef", Some(32)),
            Err(HexError::WrongLength {
                expected: 32,
                found: 4
            })
        );
        assert!(matches!(
            normalize_hex("0xzz", None),
            Err(HexError::Invalid(_))
        ));
        assert!(matches!(normalize_hex("0xabc", None), Err(HexError::Invalid(_))));
    }

    #[test]
    fn variable_length_blobs_allow_empty_payloads() {
        assert_eq!(normalize_hex("0x", None).unwrap(), "0x");
        assert_eq!(normalize_hex("0xA9059CBB", None).unwrap(), "0xa9059cbb");
    }
}
