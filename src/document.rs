//! Documents flowing into the builder.
//!
//! A [`Document`] is an operation type plus named field values, a timestamp,
//! an optional upstream [`Locator`] and, for tables with a sub schema, a list
//! of sub documents. Primary keys are hashed with xxh3 into 64 or 128 bits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_64, xxh3_128};

use crate::config::{PkHashType, Schema};
use crate::index_base::version::Locator;

/// Primary key hash; 64-bit hashes occupy the low half.
pub type PkHash = u128;

/// Hash a primary key string.
pub fn hash_primary_key(key: &str, hash_type: PkHashType) -> PkHash {
    match hash_type {
        PkHashType::Hash64 => xxh3_64(key.as_bytes()) as u128,
        PkHashType::Hash128 => xxh3_128(key.as_bytes()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocOperateType {
    #[default]
    AddDoc,
    DeleteDoc,
    UpdateField,
    DeleteSubDoc,
    SkipDoc,
}

/// A field value as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Elements of a multi value, or the value itself.
    pub fn elements(&self) -> Vec<&FieldValue> {
        match self {
            FieldValue::List(values) => values.iter().collect(),
            other => vec![other],
        }
    }

    /// Render a scalar as the text used for primary keys and index terms.
    pub fn as_term(&self) -> Option<String> {
        match self {
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::UInt(v) => Some(v.to_string()),
            FieldValue::Double(v) => Some(v.to_string()),
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::List(_) => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> Self {
        FieldValue::List(v.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub op_type: DocOperateType,

    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,

    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub locator: Option<Locator>,

    #[serde(default)]
    pub sub_docs: Vec<Document>,
}

impl Document {
    pub fn new(op_type: DocOperateType, timestamp: i64) -> Self {
        Document {
            op_type,
            timestamp,
            ..Default::default()
        }
    }

    pub fn add(timestamp: i64) -> Self {
        Self::new(DocOperateType::AddDoc, timestamp)
    }

    pub fn update(timestamp: i64) -> Self {
        Self::new(DocOperateType::UpdateField, timestamp)
    }

    pub fn delete(timestamp: i64) -> Self {
        Self::new(DocOperateType::DeleteDoc, timestamp)
    }

    pub fn delete_sub(timestamp: i64) -> Self {
        Self::new(DocOperateType::DeleteSubDoc, timestamp)
    }

    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn with_sub_doc(mut self, sub: Document) -> Self {
        self.sub_docs.push(sub);
        self
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// The primary key string of this document under `schema`.
    pub fn primary_key(&self, schema: &Schema) -> Option<String> {
        let pk = schema.primary_key.as_ref()?;
        self.field(&pk.field).and_then(FieldValue::as_term)
    }

    /// The hashed primary key of this document under `schema`.
    pub fn pk_hash(&self, schema: &Schema) -> Option<PkHash> {
        let key = self.primary_key(schema)?;
        Some(hash_primary_key(&key, schema.pk_hash_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrimaryKeyConfig;

    #[test]
    fn test_pk_hash_widths() {
        let h64 = hash_primary_key("doc-1", PkHashType::Hash64);
        let h128 = hash_primary_key("doc-1", PkHashType::Hash128);
        assert!(h64 <= u64::MAX as u128);
        assert_ne!(h64, h128);
        assert_eq!(h64, hash_primary_key("doc-1", PkHashType::Hash64));
    }

    #[test]
    fn test_document_primary_key() {
        let schema = Schema::new("s").with_primary_key(PrimaryKeyConfig::new("id"));
        let doc = Document::add(10).with_field("id", 42i64).with_field("title", "a b");
        assert_eq!(doc.primary_key(&schema), Some("42".to_string()));
        assert!(doc.pk_hash(&schema).is_some());
        assert_eq!(Document::add(1).primary_key(&schema), None);
    }

    #[test]
    fn test_document_json() {
        let doc: Document = serde_json::from_str(
            r#"{"op_type": "update_field", "fields": {"id": "x", "price": 12, "tags": ["a", "b"]}, "timestamp": 5}"#,
        )
        .unwrap();
        assert_eq!(doc.op_type, DocOperateType::UpdateField);
        assert_eq!(doc.field("price"), Some(&FieldValue::Int(12)));
        assert_eq!(
            doc.field("tags"),
            Some(&FieldValue::List(vec!["a".into(), "b".into()]))
        );
    }
}
