//! Index schema definition.

use std::path::Path;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
}

impl FieldType {
    /// Width in bytes of one element, `None` for strings.
    pub fn element_width(self) -> Option<usize> {
        match self {
            FieldType::Int8 | FieldType::UInt8 => Some(1),
            FieldType::Int16 | FieldType::UInt16 => Some(2),
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => Some(4),
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double => Some(8),
            FieldType::String => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }
}

/// A single attribute (forward index column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Attribute name, also the document field it is filled from.
    pub name: String,

    pub field_type: FieldType,

    /// Whether each document holds a list of values.
    #[serde(default)]
    pub multi_value: bool,

    /// Whether the attribute accepts field updates after build.
    #[serde(default)]
    pub updatable: bool,

    /// Whether var-len offsets are stored with equal-value compression.
    #[serde(default)]
    pub compress_offset: bool,
}

impl AttributeConfig {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        AttributeConfig {
            name: name.into(),
            field_type,
            multi_value: false,
            updatable: false,
            compress_offset: false,
        }
    }

    pub fn multi_value(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub fn compress_offset(mut self) -> Self {
        self.compress_offset = true;
        self
    }

    /// Single-value attributes of fixed width are stored without offsets.
    pub fn is_single_value(&self) -> bool {
        !self.multi_value && self.field_type.element_width().is_some()
    }

    /// Fixed record width of a single-value attribute.
    pub fn fixed_width(&self) -> Option<usize> {
        if self.multi_value {
            None
        } else {
            self.field_type.element_width()
        }
    }
}

/// Several attributes stored together in one blob per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackAttributeConfig {
    pub name: String,

    /// Member attributes, encoded in this order.
    pub sub_attributes: Vec<AttributeConfig>,

    #[serde(default)]
    pub compress_offset: bool,
}

/// How an inverted index turns field values into terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// Whitespace-tokenized, lowercased text.
    Text,
    /// The whole value is one term.
    String,
    /// Numeric values, one term per value.
    Number,
}

/// An inverted index over one or more document fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub fields: Vec<String>,
    pub index_type: IndexType,
}

/// Width of the primary-key hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkHashType {
    #[default]
    Hash64,
    Hash128,
}

impl PkHashType {
    pub fn byte_width(self) -> usize {
        match self {
            PkHashType::Hash64 => 8,
            PkHashType::Hash128 => 16,
        }
    }
}

/// Primary key index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyConfig {
    /// Name of the index directory below `index/`.
    #[serde(default = "default_pk_index_name")]
    pub index_name: String,

    /// Document field holding the key.
    pub field: String,

    #[serde(default)]
    pub hash_type: PkHashType,
}

fn default_pk_index_name() -> String {
    "pk".to_string()
}

impl PrimaryKeyConfig {
    pub fn new(field: impl Into<String>) -> Self {
        PrimaryKeyConfig {
            index_name: default_pk_index_name(),
            field: field.into(),
            hash_type: PkHashType::Hash64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPattern {
    #[default]
    Ascending,
    Descending,
}

/// One key of the sort-by-attribute order applied when merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDescription {
    pub attribute: String,
    #[serde(default)]
    pub sort_pattern: SortPattern,
}

impl SortDescription {
    pub fn new(attribute: impl Into<String>, sort_pattern: SortPattern) -> Self {
        SortDescription {
            attribute: attribute.into(),
            sort_pattern,
        }
    }
}

/// The schema of an index partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,

    #[serde(default)]
    pub pack_attributes: Vec<PackAttributeConfig>,

    #[serde(default)]
    pub indexes: Vec<IndexConfig>,

    #[serde(default)]
    pub primary_key: Option<PrimaryKeyConfig>,

    #[serde(default)]
    pub sort_descriptions: Vec<SortDescription>,

    /// Schema of the sub-document table, if documents carry sub documents.
    #[serde(default)]
    pub sub_schema: Option<Box<Schema>>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a schema from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let schema: Schema = serde_json::from_str(json)
            .map_err(|e| IndexlibError::schema(format!("invalid schema json: {e}")))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Read, parse and validate a schema file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| IndexlibError::file_io(path.display().to_string(), e.to_string()))?;
        Self::from_json_str(&json)
    }

    /// Check the structural invariants every component relies on.
    pub fn validate(&self) -> Result<()> {
        let mut names = AHashSet::new();
        let all_attributes = self
            .attributes
            .iter()
            .chain(self.pack_attributes.iter().flat_map(|p| p.sub_attributes.iter()));
        for attr in all_attributes {
            if attr.name.is_empty() {
                return Err(IndexlibError::schema("attribute name cannot be empty"));
            }
            if !names.insert(attr.name.as_str()) {
                return Err(IndexlibError::schema(format!(
                    "duplicate attribute [{}]",
                    attr.name
                )));
            }
        }
        for pack in &self.pack_attributes {
            if pack.sub_attributes.is_empty() {
                return Err(IndexlibError::schema(format!(
                    "pack attribute [{}] has no sub attributes",
                    pack.name
                )));
            }
            if !names.insert(pack.name.as_str()) {
                return Err(IndexlibError::schema(format!(
                    "pack attribute [{}] clashes with another attribute",
                    pack.name
                )));
            }
        }

        let mut index_names = AHashSet::new();
        for index in &self.indexes {
            if index.fields.is_empty() {
                return Err(IndexlibError::schema(format!(
                    "index [{}] has no fields",
                    index.name
                )));
            }
            if !index_names.insert(index.name.as_str()) {
                return Err(IndexlibError::schema(format!(
                    "duplicate index [{}]",
                    index.name
                )));
            }
        }
        if let Some(pk) = &self.primary_key {
            if !index_names.insert(pk.index_name.as_str()) {
                return Err(IndexlibError::schema(format!(
                    "primary key index [{}] clashes with another index",
                    pk.index_name
                )));
            }
        }

        self.check_sort_descriptions(&self.sort_descriptions)?;

        if let Some(sub) = &self.sub_schema {
            if self.primary_key.is_none() || sub.primary_key.is_none() {
                return Err(IndexlibError::schema(
                    "sub schema requires primary keys on both tables",
                ));
            }
            if sub.sub_schema.is_some() {
                return Err(IndexlibError::schema("sub schema cannot nest"));
            }
            if !sub.sort_descriptions.is_empty() {
                return Err(IndexlibError::schema(
                    "sub schema cannot declare its own sort order",
                ));
            }
            sub.validate()?;
        }
        Ok(())
    }

    /// Sort keys must be existing single-value numeric attributes.
    pub fn check_sort_descriptions(&self, descs: &[SortDescription]) -> Result<()> {
        for desc in descs {
            let attr = self.attribute(&desc.attribute).ok_or_else(|| {
                IndexlibError::schema(format!(
                    "sort attribute [{}] does not exist",
                    desc.attribute
                ))
            })?;
            if !attr.is_single_value() {
                return Err(IndexlibError::schema(format!(
                    "sort attribute [{}] must be single value",
                    desc.attribute
                )));
            }
        }
        Ok(())
    }

    /// Look up a stand-alone attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeConfig> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Field id of an attribute, as carried by update operations.
    pub fn attribute_id(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn attribute_by_id(&self, id: usize) -> Option<&AttributeConfig> {
        self.attributes.get(id)
    }

    pub fn pack_attribute(&self, name: &str) -> Option<&PackAttributeConfig> {
        self.pack_attributes.iter().find(|p| p.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn has_sub_schema(&self) -> bool {
        self.sub_schema.is_some()
    }

    pub fn pk_hash_type(&self) -> PkHashType {
        self.primary_key
            .as_ref()
            .map(|pk| pk.hash_type)
            .unwrap_or_default()
    }

    pub fn with_attribute(mut self, attr: AttributeConfig) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_pack_attribute(mut self, pack: PackAttributeConfig) -> Self {
        self.pack_attributes.push(pack);
        self
    }

    pub fn with_index(mut self, name: &str, fields: &[&str], index_type: IndexType) -> Self {
        self.indexes.push(IndexConfig {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            index_type,
        });
        self
    }

    pub fn with_primary_key(mut self, pk: PrimaryKeyConfig) -> Self {
        self.primary_key = Some(pk);
        self
    }

    pub fn with_sort(mut self, desc: SortDescription) -> Self {
        self.sort_descriptions.push(desc);
        self
    }

    pub fn with_sub_schema(mut self, sub: Schema) -> Self {
        self.sub_schema = Some(Box::new(sub));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_schema() -> Schema {
        Schema::new("products")
            .with_attribute(AttributeConfig::new("price", FieldType::Int64).updatable())
            .with_attribute(AttributeConfig::new("tags", FieldType::String).multi_value())
            .with_primary_key(PrimaryKeyConfig::new("id"))
    }

    #[test]
    fn test_valid_schema() {
        let schema = base_schema().with_sort(SortDescription::new("price", SortPattern::Descending));
        schema.validate().unwrap();
        assert_eq!(schema.attribute_id("tags"), Some(1));
        assert!(schema.attribute("price").unwrap().is_single_value());
        assert!(!schema.attribute("tags").unwrap().is_single_value());
    }

    #[test]
    fn test_sort_on_multi_value_rejected() {
        let schema = base_schema().with_sort(SortDescription::new("tags", SortPattern::Ascending));
        let err = schema.validate().unwrap_err();
        assert!(matches!(err, IndexlibError::Schema(_)));
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let schema = base_schema().with_attribute(AttributeConfig::new("price", FieldType::Int32));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_sub_schema_requires_primary_keys() {
        let sub = Schema::new("sub").with_attribute(AttributeConfig::new("color", FieldType::String));
        let schema = base_schema().with_sub_schema(sub);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "name": "products",
            "attributes": [
                {"name": "price", "field_type": "int64", "updatable": true},
                {"name": "title", "field_type": "string", "compress_offset": true}
            ],
            "indexes": [{"name": "title_index", "fields": ["title"], "index_type": "text"}],
            "primary_key": {"field": "id", "hash_type": "hash128"}
        }"#;
        let schema = Schema::from_json_str(json).unwrap();
        assert_eq!(schema.pk_hash_type(), PkHashType::Hash128);
        assert_eq!(schema.primary_key.as_ref().unwrap().index_name, "pk");
        assert!(schema.attribute("title").unwrap().compress_offset);
    }
}
