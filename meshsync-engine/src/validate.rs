//! Payload validation seam.
//!
//! The engine never interprets payloads itself. A [`Validator`] is consulted
//! once per upserted entry; a rejection discards that entry only.

use serde_json::Value;
use thiserror::Error;

use meshsync_core::CollectionDescriptor;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload is not an object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("{0}")]
    Invalid(String),
}

pub trait Validator: Send + Sync {
    fn validate(
        &self,
        descriptor: &CollectionDescriptor,
        name: &str,
        namespace: &str,
        payload: &Value,
    ) -> Result<(), ValidationError>;
}

/// Default validator: the payload must be a JSON object carrying every field
/// listed in [`CollectionDescriptor::required_fields`], and the entry must
/// have a non-empty name.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredFields;

impl Validator for RequiredFields {
    fn validate(
        &self,
        descriptor: &CollectionDescriptor,
        name: &str,
        _namespace: &str,
        payload: &Value,
    ) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::Invalid("empty resource name".to_string()));
        }
        let Some(object) = payload.as_object() else {
            return Err(ValidationError::NotAnObject);
        };
        for field in &descriptor.required_fields {
            if !object.contains_key(field) {
                return Err(ValidationError::MissingField(field.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn gateway() -> CollectionDescriptor {
        CollectionDescriptor::new("istio/networking/v1alpha3/gateways", "gateway")
            .with_required_fields(&["servers"])
    }

    #[rstest]
    #[case(json!({"servers": []}), None)]
    #[case(json!({"selector": {}}), Some(ValidationError::MissingField("servers".into())))]
    #[case(json!("servers"), Some(ValidationError::NotAnObject))]
    #[case(json!(null), Some(ValidationError::NotAnObject))]
    fn required_fields(#[case] payload: Value, #[case] expected: Option<ValidationError>) {
        let got = RequiredFields
            .validate(&gateway(), "gw", "default", &payload)
            .err();
        assert_eq!(got, expected);
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = RequiredFields
            .validate(&gateway(), "", "default", &json!({"servers": []}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(_)));
    }
}
