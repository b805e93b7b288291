//! Draft/published identity convention

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Literal prefix that turns a published id into its draft id
pub const DRAFTS_PREFIX: &str = "drafts.";

/// Maximum length of a document id in bytes
pub const MAX_ID_LENGTH: usize = 128;

/// Returns true if `id` addresses a draft
pub fn is_draft_id(id: &str) -> bool {
    id.starts_with(DRAFTS_PREFIX)
}

/// Draft id for any id. Idempotent on draft ids.
pub fn to_draft_id(id: &str) -> String {
    if is_draft_id(id) {
        id.to_string()
    } else {
        format!("{DRAFTS_PREFIX}{id}")
    }
}

/// Published id for any id. Idempotent on published ids.
pub fn to_published_id(id: &str) -> String {
    id.strip_prefix(DRAFTS_PREFIX).unwrap_or(id).to_string()
}

/// Which of the two addressable versions of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentVariant {
    Draft,
    Published,
}

impl std::fmt::Display for DocumentVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentVariant::Draft => write!(f, "draft"),
            DocumentVariant::Published => write!(f, "published"),
        }
    }
}

/// The two ids sharing one logical document identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdPair {
    pub published_id: String,
    pub draft_id: String,
}

impl IdPair {
    /// Build a pair from either the draft or the published id, validating the format
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let published_id = to_published_id(id.as_ref());
        validate_id(&published_id)?;

        Ok(Self {
            draft_id: to_draft_id(&published_id),
            published_id,
        })
    }

    /// Id of the given variant
    pub fn id_for(&self, variant: DocumentVariant) -> &str {
        match variant {
            DocumentVariant::Draft => &self.draft_id,
            DocumentVariant::Published => &self.published_id,
        }
    }

    /// Which variant `id` addresses, if it belongs to this pair
    pub fn variant_of(&self, id: &str) -> Option<DocumentVariant> {
        if id == self.draft_id {
            Some(DocumentVariant::Draft)
        } else if id == self.published_id {
            Some(DocumentVariant::Published)
        } else {
            None
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.variant_of(id).is_some()
    }
}

impl std::fmt::Display for IdPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.published_id)
    }
}

/// Validate a published id: [A-Za-z0-9._-]+, no leading dash, no draft
/// prefix, at most 128 bytes
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidDocumentId("Document ID cannot be empty".into()));
    }

    if is_draft_id(id) {
        return Err(Error::InvalidDocumentId(format!(
            "Published ID cannot start with `{DRAFTS_PREFIX}`"
        )));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(Error::InvalidDocumentId(format!(
            "Document ID exceeds {} bytes",
            MAX_ID_LENGTH
        )));
    }

    if id.starts_with('-') {
        return Err(Error::InvalidDocumentId(
            "Document ID cannot start with a dash".into(),
        ));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(Error::InvalidDocumentId(
            "Document ID must match pattern [a-zA-Z0-9._-]+".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_published_roundtrip() {
        assert_eq!(to_draft_id("movie-1"), "drafts.movie-1");
        assert_eq!(to_published_id("drafts.movie-1"), "movie-1");
        assert_eq!(to_published_id(&to_draft_id("movie-1")), "movie-1");
        assert_eq!(to_draft_id(&to_published_id("drafts.movie-1")), "drafts.movie-1");
    }

    #[test]
    fn test_conversions_are_idempotent() {
        assert_eq!(to_draft_id("drafts.x"), "drafts.x");
        assert_eq!(to_published_id("x"), "x");
    }

    #[test]
    fn test_id_pair_from_either_form() {
        let a = IdPair::new("movie-1").unwrap();
        let b = IdPair::new("drafts.movie-1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.draft_id, "drafts.movie-1");
        assert_eq!(a.variant_of("drafts.movie-1"), Some(DocumentVariant::Draft));
        assert_eq!(a.variant_of("movie-1"), Some(DocumentVariant::Published));
        assert_eq!(a.variant_of("other"), None);
    }

    #[test]
    fn test_id_pair_invalid() {
        assert!(IdPair::new("").is_err());
        assert!(IdPair::new("drafts.").is_err());
        assert!(IdPair::new("drafts.drafts.x").is_err());
        assert!(IdPair::new("has space").is_err());
        assert!(IdPair::new("-leading").is_err());
        assert!(IdPair::new("a".repeat(129)).is_err());
    }
}
