//! Turning document mutations into operations.

use std::sync::Arc;

use log::debug;

use crate::attribute::codec::encode_value;
use crate::config::Schema;
use crate::document::{DocOperateType, Document};
use crate::error::{IndexlibError, Result};
use crate::index_base::SegmentId;
use crate::operation::{FieldUpdates, Operation, OperationMeta, SubDocUpdate};

#[derive(Debug, Clone)]
pub struct OperationFactory {
    schema: Arc<Schema>,
}

fn updatable_fields(schema: &Schema, doc: &Document) -> Result<FieldUpdates> {
    let mut fields = Vec::new();
    for (field_id, attr) in schema.attributes.iter().enumerate() {
        if !attr.updatable {
            continue;
        }
        if let Some(value) = doc.field(&attr.name) {
            fields.push((field_id, encode_value(attr, value)?));
        }
    }
    Ok(fields)
}

impl OperationFactory {
    pub fn new(schema: Arc<Schema>) -> Self {
        OperationFactory { schema }
    }

    /// The operation recording `doc`, or `None` when it changes nothing that
    /// can be replayed.
    pub fn create_operation(
        &self,
        doc: &Document,
        segment_id_before_modified: Option<SegmentId>,
    ) -> Result<Option<Operation>> {
        let Some(pk_hash) = doc.pk_hash(&self.schema) else {
            debug!("document without primary key produces no operation");
            return Ok(None);
        };
        let meta = OperationMeta::new(pk_hash, doc.timestamp).with_segment(segment_id_before_modified);

        match doc.op_type {
            DocOperateType::AddDoc | DocOperateType::DeleteDoc => Ok(Some(Operation::Remove { meta })),
            DocOperateType::UpdateField => self.create_update(doc, meta),
            DocOperateType::DeleteSubDoc => self.create_sub_doc_remove(doc, meta),
            DocOperateType::SkipDoc => Ok(None),
        }
    }

    fn create_update(&self, doc: &Document, meta: OperationMeta) -> Result<Option<Operation>> {
        let fields = updatable_fields(&self.schema, doc)?;
        let mut sub_updates = Vec::new();
        if let Some(sub_schema) = self.schema.sub_schema.as_deref() {
            for sub in &doc.sub_docs {
                let Some(sub_pk) = sub.pk_hash(sub_schema) else {
                    continue;
                };
                let sub_fields = updatable_fields(sub_schema, sub)?;
                if !sub_fields.is_empty() {
                    sub_updates.push(SubDocUpdate {
                        pk_hash: sub_pk,
                        fields: sub_fields,
                    });
                }
            }
        }
        if fields.is_empty() && sub_updates.is_empty() {
            debug!("update without updatable fields produces no operation");
            return Ok(None);
        }
        Ok(Some(Operation::UpdateField {
            meta,
            fields,
            sub_updates,
        }))
    }

    fn create_sub_doc_remove(&self, doc: &Document, meta: OperationMeta) -> Result<Option<Operation>> {
        let sub_schema = self.schema.sub_schema.as_deref().ok_or_else(|| {
            IndexlibError::schema(format!(
                "sub document delete on schema [{}] without sub schema",
                self.schema.name
            ))
        })?;
        let sub_pk_hashes: Vec<_> = doc
            .sub_docs
            .iter()
            .filter_map(|sub| sub.pk_hash(sub_schema))
            .collect();
        if sub_pk_hashes.is_empty() {
            return Ok(None);
        }
        Ok(Some(Operation::SubDocRemove {
            meta,
            sub_pk_hashes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeConfig, FieldType, PrimaryKeyConfig};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new("s")
                .with_attribute(AttributeConfig::new("id", FieldType::String))
                .with_attribute(AttributeConfig::new("price", FieldType::Int32).updatable())
                .with_attribute(AttributeConfig::new("title", FieldType::String))
                .with_primary_key(PrimaryKeyConfig::new("id")),
        )
    }

    #[test]
    fn test_add_and_delete_become_remove() {
        let factory = OperationFactory::new(schema());
        for doc in [Document::add(5), Document::delete(6)] {
            let op = factory
                .create_operation(&doc.with_field("id", "a"), Some(2))
                .unwrap()
                .unwrap();
            assert!(matches!(op, Operation::Remove { .. }));
            assert_eq!(op.meta().segment_id_before_modified, Some(2));
        }
    }

    #[test]
    fn test_update_keeps_only_updatable_fields() {
        let factory = OperationFactory::new(schema());
        let doc = Document::update(9)
            .with_field("id", "a")
            .with_field("price", 12i64)
            .with_field("title", "ignored");
        let Some(Operation::UpdateField { fields, meta, .. }) =
            factory.create_operation(&doc, None).unwrap()
        else {
            panic!("expected update");
        };
        assert_eq!(meta.timestamp, 9);
        assert_eq!(fields, vec![(1, 12i32.to_le_bytes().to_vec())]);

        let only_title = Document::update(9).with_field("id", "a").with_field("title", "x");
        assert!(factory.create_operation(&only_title, None).unwrap().is_none());
    }

    #[test]
    fn test_sub_doc_delete_requires_sub_schema() {
        let factory = OperationFactory::new(schema());
        let doc = Document::delete_sub(1).with_field("id", "a");
        let err = factory.create_operation(&doc, None).unwrap_err();
        assert!(matches!(err, IndexlibError::Schema(_)));
    }

    #[test]
    fn test_missing_pk_is_no_op() {
        let factory = OperationFactory::new(schema());
        assert!(factory.create_operation(&Document::delete(1), None).unwrap().is_none());
    }
}
