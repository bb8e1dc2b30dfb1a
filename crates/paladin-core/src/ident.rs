//! Identifier types for changes and their dependencies.
//!
//! Two deliberately distinct identifier families exist:
//!
//! * [`ChangeId`] — the review tool's stable `I<40 hex>` identifier, parsed
//!   from commit-message footers and `CQ-DEPEND` lines. Only meaningful
//!   *before* a change is admitted to a pool.
//! * [`PoolLocalId`] — an opaque per-pool sequence id assigned at admission.
//!   Once dependency resolution begins it is the only key used for graph
//!   lookups; the type system keeps the two from being confused.

use std::fmt;

const CHANGE_ID_PREFIX: char = 'I';
const CHANGE_ID_HEX_LEN: usize = 40;
const MAX_GERRIT_NUMBER_LEN: usize = 6;

/// A review-tool Change-Id: `I` followed by 40 hex characters.
///
/// Stored in canonical form (`I` + lowercase hex) regardless of the case
/// the footer used.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ChangeId(String);

impl ChangeId {
    /// Parse the strict review-tool form. Returns `None` for anything that
    /// is not exactly `I` + 40 hex characters.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix(CHANGE_ID_PREFIX)?;
        if rest.len() != CHANGE_ID_HEX_LEN || !rest.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(ChangeId(format!("{}{}", CHANGE_ID_PREFIX, rest.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque pool-local id, unique within one [`crate::pool::ValidationPool`]
/// run. Assigned in admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolLocalId(usize);

impl PoolLocalId {
    pub fn new(seq: usize) -> Self {
        PoolLocalId(seq)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for PoolLocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool:{}", self.0)
    }
}

/// One parsed `CQ-DEPEND` token: either a full Change-Id or a bare review
/// number. Numeric tokens pass through unchanged; id tokens are stored in
/// canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatchDep {
    ChangeId(ChangeId),
    GerritNumber(String),
}

impl PatchDep {
    /// Parse a single dependency token. `None` means the token is neither a
    /// well-formed Change-Id nor a review number.
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(id) = ChangeId::parse(token) {
            return Some(PatchDep::ChangeId(id));
        }
        parse_gerrit_number(token).map(|n| PatchDep::GerritNumber(n.to_string()))
    }
}

impl fmt::Display for PatchDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchDep::ChangeId(id) => f.write_str(id.as_str()),
            PatchDep::GerritNumber(n) => f.write_str(n),
        }
    }
}

/// Validate a review ("gerrit") number: all digits, at most 6 characters.
pub fn parse_gerrit_number(text: &str) -> Option<&str> {
    if !text.is_empty()
        && text.len() <= MAX_GERRIT_NUMBER_LEN
        && text.chars().all(|c| c.is_ascii_digit())
    {
        Some(text)
    } else {
        None
    }
}

/// Validate a full commit SHA-1: exactly 40 hex characters.
pub fn parse_sha1(text: &str) -> Option<&str> {
    if text.len() == CHANGE_ID_HEX_LEN && text.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(text)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_ID: &str = "I47ea30385af60ae4cc2acc5d1a283a46423bc6e1";

    #[test]
    fn change_id_parses_strict_form() {
        let id = ChangeId::parse(VALID_ID).unwrap();
        assert_eq!(id.as_str(), VALID_ID);
    }

    #[test]
    fn change_id_canonicalizes_hex_case() {
        let upper = format!("I{}", "ABCDEF0123456789ABCDEF0123456789ABCDEF01");
        let id = ChangeId::parse(&upper).unwrap();
        assert_eq!(id.as_str(), "Iabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn change_id_rejects_bad_input() {
        assert!(ChangeId::parse("I123").is_none());
        assert!(ChangeId::parse("47ea30385af60ae4cc2acc5d1a283a46423bc6e1").is_none());
        assert!(ChangeId::parse("Izzzz30385af60ae4cc2acc5d1a283a46423bc6e1").is_none());
        assert!(ChangeId::parse("").is_none());
    }

    #[test]
    fn gerrit_number_accepts_up_to_six_digits() {
        assert_eq!(parse_gerrit_number("1"), Some("1"));
        assert_eq!(parse_gerrit_number("123456"), Some("123456"));
        assert!(parse_gerrit_number("1234567").is_none());
        assert!(parse_gerrit_number("12a4").is_none());
        assert!(parse_gerrit_number("").is_none());
    }

    #[test]
    fn patch_dep_numeric_token_passes_through_unchanged() {
        match PatchDep::parse("10042").unwrap() {
            PatchDep::GerritNumber(n) => assert_eq!(n, "10042"),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn patch_dep_rejects_garbage() {
        assert!(PatchDep::parse("monkeys").is_none());
        assert!(PatchDep::parse("I-not-hex").is_none());
    }

    #[test]
    fn sha1_validation() {
        assert!(parse_sha1("47ea30385af60ae4cc2acc5d1a283a46423bc6e1").is_some());
        assert!(parse_sha1("47ea").is_none());
    }
}
