//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`NodeId`] - Identity of a content node, shared by draft and published stores
//! - [`EntityType`] - Enumerated content kind (stable numeric ids)
//! - [`EntityOrder`] - Position of a node among its siblings
//! - [`Language`] - Validated translation language code
//! - [`HolderId`] - Identity of a lease holder
//! - [`UtcTimestamp`] - RFC3339 timestamp
//! - [`Fingerprint`] - Content hash used for diffing and idempotency
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use casework::core::types::{EntityType, HolderId, Language};
//!
//! let lang = Language::new("pt-br").unwrap();
//! let holder = HolderId::new("moderator-1").unwrap();
//! assert_eq!(EntityType::from_id(4), Some(EntityType::Content));
//!
//! assert!(Language::new("PL!").is_err());
//! assert!(HolderId::new("   ").is_err());
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid language code: {0}")]
    InvalidLanguage(String),

    #[error("invalid holder id: {0}")]
    InvalidHolder(String),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
}

/// Identity of a node.
///
/// Ids are allocated by the draft store and reused verbatim by the
/// published store, so the same logical node has the same id on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(NodeId)
            .map_err(|_| TypeError::InvalidNodeId(s.to_string()))
    }
}

/// Enumerated content kind.
///
/// The numeric ids are part of the stored format and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum EntityType {
    Navigation,
    Content,
    Question,
    ContentContainer,
    Glossary,
    GlossaryEntry,
    Test,
    TestQuestion,
    QuestionContainer,
}

impl EntityType {
    /// Every kind, in catalogue order.
    pub const ALL: [EntityType; 9] = [
        EntityType::Navigation,
        EntityType::Content,
        EntityType::Question,
        EntityType::ContentContainer,
        EntityType::Glossary,
        EntityType::GlossaryEntry,
        EntityType::Test,
        EntityType::TestQuestion,
        EntityType::QuestionContainer,
    ];

    /// Stable numeric id of this kind.
    pub fn id(self) -> u16 {
        match self {
            EntityType::Navigation => 3,
            EntityType::Content => 4,
            EntityType::Question => 5,
            EntityType::ContentContainer => 6,
            EntityType::Glossary => 11,
            EntityType::GlossaryEntry => 12,
            EntityType::Test => 13,
            EntityType::TestQuestion => 14,
            EntityType::QuestionContainer => 15,
        }
    }

    /// Look up a kind by numeric id.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }

    /// Snake-case name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Navigation => "navigation",
            EntityType::Content => "content",
            EntityType::Question => "question",
            EntityType::ContentContainer => "content_container",
            EntityType::Glossary => "glossary",
            EntityType::GlossaryEntry => "glossary_entry",
            EntityType::Test => "test",
            EntityType::TestQuestion => "test_question",
            EntityType::QuestionContainer => "question_container",
        }
    }

    /// Whether published nodes of this kind get a generated voice track.
    pub fn is_voiced(self) -> bool {
        matches!(
            self,
            EntityType::Content | EntityType::Question | EntityType::GlossaryEntry
        )
    }
}

impl TryFrom<u16> for EntityType {
    type Error = TypeError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or_else(|| TypeError::UnknownEntityType(id.to_string()))
    }
}

impl From<EntityType> for u16 {
    fn from(t: EntityType) -> Self {
        t.id()
    }
}

impl FromStr for EntityType {
    type Err = TypeError;

    /// Accepts either the snake-case name or the numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u16>() {
            return Self::try_from(id);
        }
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypeError::UnknownEntityType(s.to_string()))
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a node among its siblings. Lower sorts first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityOrder(pub i32);

impl std::fmt::Display for EntityOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated language code such as `en`, `pl` or `pt-br`.
///
/// Codes are 2 to 8 characters of lowercase ASCII letters and `-`, and may
/// not start or end with `-`. Input is lowercased before validation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// Create a new validated language code.
    pub fn new(code: impl Into<String>) -> Result<Self, TypeError> {
        let code = code.into().to_ascii_lowercase();
        let valid_len = (2..=8).contains(&code.len());
        let valid_chars = code.chars().all(|c| c.is_ascii_lowercase() || c == '-');
        if !valid_len || !valid_chars || code.starts_with('-') || code.ends_with('-') {
            return Err(TypeError::InvalidLanguage(code));
        }
        Ok(Self(code))
    }

    /// The built-in fallback language, `en`.
    pub fn english() -> Self {
        Self("en".to_string())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Language {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.0
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a lease holder (a moderator session, a service account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HolderId(String);

impl HolderId {
    /// Create a new holder id. Surrounding whitespace is trimmed; the
    /// result must be non-empty and free of control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(TypeError::InvalidHolder("holder id cannot be empty".into()));
        }
        if trimmed.chars().any(|c| c.is_control()) {
            return Err(TypeError::InvalidHolder(format!(
                "holder id contains control characters: {:?}",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HolderId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<HolderId> for String {
    fn from(h: HolderId) -> Self {
        h.0
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A UTC timestamp in RFC3339 format.
///
/// # Example
///
/// ```
/// use casework::core::types::UtcTimestamp;
///
/// let now = UtcTimestamp::now();
/// println!("Current time: {}", now);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Create a timestamp from a chrono DateTime.
    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self(dt)
    }

    /// Get the underlying datetime.
    pub fn as_datetime(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.0
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A stable SHA-256 hash over node content.
///
/// Fingerprints are built incrementally with [`FingerprintBuilder`] so that
/// callers decide which fields participate. Every field is length-delimited,
/// so adjacent fields cannot run together.
///
/// # Example
///
/// ```
/// use casework::core::types::Fingerprint;
///
/// let a = Fingerprint::builder().field("type").field("4").finish();
/// let b = Fingerprint::builder().field("type").field("4").finish();
/// let c = Fingerprint::builder().field("type4").finish();
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Start building a fingerprint.
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder {
            hasher: Sha256::new(),
        }
    }

    /// Wrap an existing hex digest (used when reading persisted records).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Get the fingerprint as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and CLI output.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental fingerprint computation.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Append one length-delimited field.
    pub fn field(mut self, value: impl AsRef<[u8]>) -> Self {
        let bytes = value.as_ref();
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Append a nested fingerprint.
    pub fn child(self, fp: &Fingerprint) -> Self {
        self.field(fp.as_str())
    }

    /// Finish and hex-encode the digest.
    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod language {
        use super::*;

        #[test]
        fn valid_codes() {
            assert!(Language::new("en").is_ok());
            assert!(Language::new("pl").is_ok());
            assert!(Language::new("pt-br").is_ok());
            assert!(Language::new("zh-hant").is_ok());
        }

        #[test]
        fn uppercase_is_normalized() {
            assert_eq!(Language::new("EN").unwrap().as_str(), "en");
        }

        #[test]
        fn invalid_codes_rejected() {
            assert!(Language::new("e").is_err());
            assert!(Language::new("").is_err());
            assert!(Language::new("-en").is_err());
            assert!(Language::new("en-").is_err());
            assert!(Language::new("en_us").is_err());
            assert!(Language::new("toolonglang").is_err());
        }

        #[test]
        fn serde_rejects_invalid() {
            let parsed: Result<Language, _> = serde_json::from_str("\"x\"");
            assert!(parsed.is_err());
        }
    }

    mod entity_type {
        use super::*;

        #[test]
        fn ids_are_stable() {
            assert_eq!(EntityType::Navigation.id(), 3);
            assert_eq!(EntityType::Content.id(), 4);
            assert_eq!(EntityType::QuestionContainer.id(), 15);
        }

        #[test]
        fn parse_by_name_or_id() {
            assert_eq!("glossary_entry".parse(), Ok(EntityType::GlossaryEntry));
            assert_eq!("13".parse(), Ok(EntityType::Test));
            assert!("7".parse::<EntityType>().is_err());
            assert!("video".parse::<EntityType>().is_err());
        }

        #[test]
        fn serializes_as_number() {
            let json = serde_json::to_string(&EntityType::TestQuestion).unwrap();
            assert_eq!(json, "14");
            let back: EntityType = serde_json::from_str("6").unwrap();
            assert_eq!(back, EntityType::ContentContainer);
        }

        #[test]
        fn voiced_kinds() {
            assert!(EntityType::Content.is_voiced());
            assert!(!EntityType::Navigation.is_voiced());
        }
    }

    mod holder {
        use super::*;

        #[test]
        fn trims_whitespace() {
            assert_eq!(HolderId::new("  user1 ").unwrap().as_str(), "user1");
        }

        #[test]
        fn rejects_control_chars() {
            assert!(HolderId::new("us\ner").is_err());
        }
    }

    mod fingerprint {
        use super::*;

        #[test]
        fn deterministic() {
            let a = Fingerprint::builder().field("x").field("y").finish();
            let b = Fingerprint::builder().field("x").field("y").finish();
            assert_eq!(a, b);
            assert_eq!(a.as_str().len(), 64);
        }

        #[test]
        fn field_boundaries_matter() {
            let a = Fingerprint::builder().field("ab").field("c").finish();
            let b = Fingerprint::builder().field("a").field("bc").finish();
            assert_ne!(a, b);
        }

        #[test]
        fn short_prefix() {
            let fp = Fingerprint::builder().field("x").finish();
            assert_eq!(fp.short().len(), 12);
            assert!(fp.as_str().starts_with(fp.short()));
        }
    }

    #[test]
    fn node_id_parse() {
        assert_eq!("42".parse::<NodeId>(), Ok(NodeId::new(42)));
        assert!("abc".parse::<NodeId>().is_err());
    }
}
