//! Sponsorship code generation and validation.
//!
//! A sponsorship code is the human-readable handle members share in
//! referral links. Codes are uppercase alphanumeric; lookups are
//! case-insensitive.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length of generated codes.
pub const CODE_LENGTH: usize = 8;

/// Characters used for generated codes. Omits `0`, `O`, `1` and `I`, which
/// are easy to confuse when read aloud or copied by hand.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Accepted shape of a code after normalisation.
pub const CODE_PATTERN: &str = r"^[A-Z0-9]{6,16}$";

static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CODE_PATTERN).expect("valid regex"));

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// Generate a fresh random code. Uniqueness is enforced by the store.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Trim and uppercase a code as typed or pasted by a user.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Normalise and validate a code, returning the canonical form.
pub fn validate_code(raw: &str) -> Result<String, CoreError> {
    let code = normalize_code(raw);
    if !CODE_RE.is_match(&code) {
        return Err(CoreError::Validation(format!(
            "Invalid sponsorship code '{}': expected 6-16 letters or digits",
            raw.trim()
        )));
    }
    Ok(code)
}
