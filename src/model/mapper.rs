//! Bidirectional field transforms between the in-memory, document, and
//! wire-payload representations of an entity.

use super::{DocumentId, Model};
use crate::error::ModelError;
use crate::metadata::{self, ClassMetadata, FieldRule};
use crate::store::Document;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Repr {
    Document,
    Payload,
}

/// Computes the document and payload projections of a model from its
/// registered field rules.
pub struct FieldMapper<T: Model> {
    meta: Arc<ClassMetadata>,
    rules: Vec<FieldRule>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> FieldMapper<T> {
    pub fn for_model() -> Result<Self, ModelError> {
        let meta = metadata::metadata_of::<T>().ok_or_else(|| ModelError::NotRegistered {
            type_name: std::any::type_name::<T>().to_string(),
        })?;
        let rules = meta.effective_rules();
        Ok(Self {
            meta,
            rules,
            _marker: PhantomData,
        })
    }

    fn promiscuous(&self) -> bool {
        self.meta.db.as_ref().map(|db| db.promiscuous).unwrap_or(false)
    }

    fn source_fields(&self, instance: &T) -> Result<Document, ModelError> {
        match serde_json::to_value(instance) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Document::new()),
            Err(source) => Err(self.mapping_err(source)),
        }
    }

    fn mapping_err(&self, source: serde_json::Error) -> ModelError {
        ModelError::Mapping {
            type_name: self.meta.type_name.to_string(),
            source,
        }
    }

    fn covered(&self, field: &str) -> bool {
        self.rules.iter().any(|r| r.source == field)
    }

    fn convert_out(&self, instance: &T, repr: Repr) -> Result<Document, ModelError> {
        let source = self.source_fields(instance)?;
        let mut out = Document::new();

        for rule in &self.rules {
            let mapped = match repr {
                Repr::Document => rule.visibility.maps_document(),
                Repr::Payload => rule.visibility.maps_payload(),
            };
            if !mapped {
                continue;
            }
            let Some(value) = source.get(&rule.source) else {
                continue;
            };
            let mut value = value.clone();
            if let Some(transform) = &rule.transform {
                if let Some(forward) = &transform.forward {
                    value = forward(value);
                }
            }
            let target = match repr {
                Repr::Document => rule.doc_target(),
                Repr::Payload => rule.payload_target(),
            };
            out.insert(target.to_string(), value);
        }

        // Unruled fields: carried in the payload representation always, in
        // the document representation only under promiscuous mode.
        let passthrough = match repr {
            Repr::Document => self.promiscuous(),
            Repr::Payload => true,
        };
        if passthrough {
            for (key, value) in &source {
                if !self.covered(key) && !out.contains_key(key) {
                    out.insert(key.clone(), value.clone());
                }
            }
        }

        match repr {
            Repr::Document => {
                if let Some(id) = instance.id() {
                    out.insert("_id".to_string(), id.to_value());
                }
            }
            Repr::Payload => {
                if let (Some(name), Some(id)) = (&self.meta.payload_id, instance.id()) {
                    out.insert(name.clone(), id.to_value());
                }
            }
        }

        Ok(out)
    }

    fn convert_in(&self, record: &Document, repr: Repr) -> Result<T, ModelError> {
        // No-argument-safe construction path: start from the class defaults
        // and overlay only the fields present in the input record.
        let mut fields = self.source_fields(&T::default())?;

        for rule in &self.rules {
            let mapped = match repr {
                Repr::Document => rule.visibility.maps_document(),
                Repr::Payload => rule.visibility.maps_payload(),
            };
            if !mapped {
                continue;
            }
            let target = match repr {
                Repr::Document => rule.doc_target(),
                Repr::Payload => rule.payload_target(),
            };
            let Some(value) = record.get(target) else {
                continue;
            };
            let mut value = value.clone();
            if let Some(transform) = &rule.transform {
                if let Some(backward) = &transform.backward {
                    value = backward(value);
                }
            }
            fields.insert(rule.source.clone(), value);
        }

        let id_key = match repr {
            Repr::Document => Some("_id"),
            Repr::Payload => self.meta.payload_id.as_deref(),
        };
        let passthrough = match repr {
            Repr::Document => self.promiscuous(),
            Repr::Payload => true,
        };
        if passthrough {
            for (key, value) in record {
                if Some(key.as_str()) == id_key {
                    continue;
                }
                let is_target = self.rules.iter().any(|r| match repr {
                    Repr::Document => r.visibility.maps_document() && r.doc_target() == key,
                    Repr::Payload => r.visibility.maps_payload() && r.payload_target() == key,
                });
                if !is_target && fields.contains_key(key) {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }

        let mut instance: T =
            serde_json::from_value(Value::Object(fields)).map_err(|e| self.mapping_err(e))?;

        if let Some(id_key) = id_key {
            if let Some(raw) = record.get(id_key) {
                let id = match raw {
                    Value::String(s) => DocumentId::from(s.as_str()),
                    other => DocumentId::from(other.to_string()),
                };
                instance.set_id(id);
            }
        }

        Ok(instance)
    }

    /// Project an instance into its persisted document shape.
    pub fn to_document(&self, instance: &T) -> Result<Document, ModelError> {
        self.convert_out(instance, Repr::Document)
    }

    /// Build an instance from a persisted document. Fields absent from the
    /// record keep their class defaults.
    pub fn from_document(&self, record: &Document) -> Result<T, ModelError> {
        self.convert_in(record, Repr::Document)
    }

    /// Project an instance into its wire-payload shape.
    pub fn to_payload(&self, instance: &T) -> Result<Document, ModelError> {
        self.convert_out(instance, Repr::Payload)
    }

    /// Build an instance from a wire payload.
    pub fn from_payload(&self, record: &Document) -> Result<T, ModelError> {
        self.convert_in(record, Repr::Payload)
    }

    pub(crate) fn metadata(&self) -> &ClassMetadata {
        &self.meta
    }
}
