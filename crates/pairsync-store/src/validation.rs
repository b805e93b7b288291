//! Validation collaborator seam

use crate::schema::SchemaType;
use async_trait::async_trait;
use pairsync_core::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a validation marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerLevel {
    Error,
    Warning,
    Info,
}

/// One validation finding, attached to a path in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub level: MarkerLevel,
    pub path: String,
    pub message: String,
}

impl Marker {
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: MarkerLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validation state shown alongside a document
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationStatus {
    pub is_validating: bool,
    pub markers: Vec<Marker>,
}

impl ValidationStatus {
    pub fn has_errors(&self) -> bool {
        self.markers.iter().any(|m| m.level == MarkerLevel::Error)
    }
}

/// Validates a document against its schema type
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, document: &Document, schema_type: &SchemaType) -> Vec<Marker>;
}

/// Accepts every document
pub struct NoopValidator;

#[async_trait]
impl Validator for NoopValidator {
    async fn validate(&self, _document: &Document, _schema_type: &SchemaType) -> Vec<Marker> {
        Vec::new()
    }
}

/// Checks the required fields declared on the schema type
pub struct RequiredFieldsValidator;

#[async_trait]
impl Validator for RequiredFieldsValidator {
    async fn validate(&self, document: &Document, schema_type: &SchemaType) -> Vec<Marker> {
        schema_type
            .required
            .iter()
            .filter(|field| document.get(field).map_or(true, Value::is_null))
            .map(|field| Marker::error(field.clone(), "Required"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_required_fields() {
        let schema_type = SchemaType::new("movie").required("title").required("year");
        let doc = Document::from_value(json!({"_id": "m", "_type": "movie", "year": null})).unwrap();

        let markers = RequiredFieldsValidator.validate(&doc, &schema_type).await;
        let paths: Vec<_> = markers.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["title", "year"]);

        let status = ValidationStatus {
            is_validating: false,
            markers,
        };
        assert!(status.has_errors());
        assert!(NoopValidator.validate(&doc, &schema_type).await.is_empty());
    }
}
