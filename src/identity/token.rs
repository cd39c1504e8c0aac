//! Anonymous session token format.
//!
//! Tokens are `anon_<hex millis>_<12 hex chars>`: a fixed prefix for cheap
//! shape validation, a millisecond timestamp, and a random suffix wide
//! enough to make collisions astronomically unlikely.

use uuid::Uuid;

/// Fixed prefix carried by every anonymous session token.
pub const SESSION_TOKEN_PREFIX: &str = "anon";

/// Length of the random hex suffix.
const SUFFIX_LEN: usize = 12;

/// Longest accepted timestamp field (16 hex chars covers any i64).
const MAX_TIMESTAMP_LEN: usize = 16;

/// Mint a fresh anonymous session token.
pub fn mint_session_token() -> String {
    let millis = crate::sessions::now_millis();
    let hex = Uuid::new_v4().simple().to_string();
    format!("{SESSION_TOKEN_PREFIX}_{millis:x}_{}", &hex[..SUFFIX_LEN])
}

/// Cheap shape validation: prefix, three fields, lowercase hex timestamp,
/// fixed-width lowercase hex suffix.
pub fn is_valid_session_token(token: &str) -> bool {
    let mut parts = token.split('_');
    let (Some(prefix), Some(timestamp), Some(suffix), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    prefix == SESSION_TOKEN_PREFIX
        && !timestamp.is_empty()
        && timestamp.len() <= MAX_TIMESTAMP_LEN
        && is_lower_hex(timestamp)
        && suffix.len() == SUFFIX_LEN
        && is_lower_hex(suffix)
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_token_is_valid() {
        let token = mint_session_token();
        assert!(token.starts_with("anon_"));
        assert!(is_valid_session_token(&token));
    }

    #[test]
    fn test_minted_tokens_differ() {
        assert_ne!(mint_session_token(), mint_session_token());
    }

    #[test]
    fn test_valid_literal() {
        assert!(is_valid_session_token("anon_18f2a3b4c5d_0123456789ab"));
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        // wrong prefix
        assert!(!is_valid_session_token("sess_18f2a3b4c5d_0123456789ab"));
        // missing fields
        assert!(!is_valid_session_token("anon_18f2a3b4c5d"));
        assert!(!is_valid_session_token("anon"));
        assert!(!is_valid_session_token(""));
        // too many fields
        assert!(!is_valid_session_token("anon_18f_0123456789ab_x"));
        // non-hex timestamp
        assert!(!is_valid_session_token("anon_18g2a3b4c5d_0123456789ab"));
        // empty or oversized timestamp
        assert!(!is_valid_session_token("anon__0123456789ab"));
        assert!(!is_valid_session_token(
            "anon_00000000000000000_0123456789ab"
        ));
        // wrong suffix width
        assert!(!is_valid_session_token("anon_18f2a3b4c5d_0123456789"));
        assert!(!is_valid_session_token("anon_18f2a3b4c5d_0123456789abcd"));
        // uppercase hex is not the minted shape
        assert!(!is_valid_session_token("anon_18F2A3B4C5D_0123456789AB"));
    }
}
