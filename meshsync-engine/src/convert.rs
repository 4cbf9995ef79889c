//! Incoming resource → [`ConfigRecord`] conversion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use meshsync_core::{split_name, CollectionDescriptor, ConfigRecord, Resource};

use crate::validate::{ValidationError, Validator};

/// Why a single entry of a batch was discarded.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("invalid resource timestamp ({namespace}/{name}): {source}")]
    Timestamp {
        namespace: String,
        name: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("validation failed ({namespace}/{name}): {source}")]
    Validation {
        namespace: String,
        name: String,
        #[source]
        source: ValidationError,
    },
}

pub struct Converter<'a> {
    pub descriptor: &'a CollectionDescriptor,
    pub domain_suffix: &'a str,
    pub validator: &'a dyn Validator,
}

impl Converter<'_> {
    pub fn convert(&self, resource: &Resource) -> Result<ConfigRecord, EntryError> {
        let (namespace, name) = split_name(&resource.metadata.name);

        let creation_timestamp = match resource.metadata.create_time.as_deref() {
            None => Utc::now(),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|source| EntryError::Timestamp {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    source,
                })?,
        };

        if let Err(source) =
            self.validator
                .validate(self.descriptor, &name, &namespace, &resource.body)
        {
            return Err(EntryError::Validation {
                namespace,
                name,
                source,
            });
        }

        Ok(ConfigRecord {
            type_name: self.descriptor.type_name.clone(),
            group: self.descriptor.group.clone(),
            version: self.descriptor.version.clone(),
            name,
            namespace,
            resource_version: resource.metadata.version.clone(),
            creation_timestamp,
            labels: resource.metadata.labels.clone(),
            annotations: resource.metadata.annotations.clone(),
            domain: self.domain_suffix.to_string(),
            spec: resource.body.clone(),
        })
    }

    /// Convert every resource, discarding (and logging) the ones that fail.
    /// Returns the survivors in batch order and the number discarded.
    pub fn convert_all(&self, resources: &[Resource]) -> (Vec<Arc<ConfigRecord>>, usize) {
        let mut survivors = Vec::with_capacity(resources.len());
        let mut discarded = 0;
        for resource in resources {
            match self.convert(resource) {
                Ok(record) => survivors.push(Arc::new(record)),
                Err(e) => {
                    tracing::warn!(
                        collection = %self.descriptor.collection,
                        error = %e,
                        "discarding incoming resource"
                    );
                    discarded += 1;
                }
            }
        }
        (survivors, discarded)
    }
}
