use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// 20-byte protocol address.
///
/// The canonical string form everywhere in the gateway is 40 lowercase hex
/// characters without a `0x` prefix; `normalize` produces it and every map
/// key goes through it, so a `0x`-prefixed wallet address and its normalized
/// form always designate the same session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

/// Normalizes an address string: strips an optional `0x`/`0X` prefix and
/// lowercases the rest.
pub fn normalize(input: &str) -> String {
    let stripped = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    stripped.to_lowercase()
}

impl Address {
    /// Parses a hex wallet address, with or without `0x` prefix, any case.
    pub fn parse(input: &str) -> AppResult<Self> {
        let normalized = normalize(input);
        if normalized.len() != 40 {
            return Err(AppError::bad_request(format!(
                "invalid address length: {} (expected 40 hex chars)",
                normalized.len()
            )));
        }

        let bytes = hex::decode(&normalized)
            .map_err(|_| AppError::bad_request("address contains invalid hex"))?;

        let mut addr = [0u8; 20];
        addr.copy_from_slice(&bytes);
        Ok(Address(addr))
    }

    /// Canonical hex form: 40 lowercase chars, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

/// Returns true when the input plausibly names a username rather than an
/// address: shorter than 40 chars and no hex prefix.
pub fn looks_like_username(input: &str) -> bool {
    input.len() < 40 && !input.starts_with("0x") && !input.starts_with("0X")
}

/// Short display name + handle derived from a bare address, for peers that
/// have no profile yet.
pub fn display_name_from_address(addr: &str) -> (String, String) {
    let prefix_len = addr.len().min(8);
    let display = if prefix_len == addr.len() {
        addr.to_string()
    } else {
        format!("{}...", &addr[..prefix_len])
    };
    let username = format!("@{}", &addr[..prefix_len]);
    (display, username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_prefix_and_lowercases() {
        assert_eq!(
            normalize("0xAAbbCCdd00112233445566778899aabbccddeeff"),
            "aabbccdd00112233445566778899aabbccddeeff"
        );
        assert_eq!(normalize("0XFF"), "ff");
        assert_eq!(normalize("abcdef"), "abcdef");
    }

    #[test]
    fn parse_accepts_all_variants_of_same_address() {
        let canonical = "aabbccdd00112233445566778899aabbccddeeff";
        let variants = [
            canonical.to_string(),
            format!("0x{canonical}"),
            canonical.to_uppercase(),
            format!("0x{}", canonical.to_uppercase()),
        ];
        for v in &variants {
            let addr = Address::parse(v).unwrap();
            assert_eq!(addr.to_hex(), canonical);
            assert_eq!(normalize(v), canonical);
        }
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(Address::parse("abcd").is_err());
        assert!(Address::parse("zzbbccdd00112233445566778899aabbccddeeff").is_err());
        assert!(Address::parse("").is_err());
    }

    #[test]
    fn username_heuristic() {
        assert!(looks_like_username("alice"));
        assert!(!looks_like_username("0xaabbccdd00112233445566778899aabbccddeeff"));
        assert!(!looks_like_username(
            "aabbccdd00112233445566778899aabbccddeeff"
        ));
    }
}
