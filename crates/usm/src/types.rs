use serde::{Deserialize, Serialize};

/// Broad classification of a column's data type, used by dialect helpers to
/// select an emission strategy when the concrete native name differs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    #[default]
    Basic,
    String,
    Numeric,
    Datetime,
    Boolean,
    Binary,
    Json,
    Enum,
    Domain,
    Composite,
    Range,
    Array,
    Vector,
    Custom,
}

/// A backend-neutral column type. `name` is the normalized type name
/// (e.g. "varchar", "bigint"); backend-specific spellings are resolved by
/// each dialect's type map. Composite, domain, and range types nest their
/// component types recursively.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DataType {
    pub name: String,
    #[serde(default)]
    pub type_category: TypeCategory,
    /// The underlying scalar name, with any length/precision suffix removed.
    pub base_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_dimensions: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_enum: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_composite: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub composite_fields: Vec<CompositeField>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_domain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_base: Option<Box<DataType>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_range: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_subtype: Option<Box<DataType>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    /// Set when the type refers to a named user-defined type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompositeField {
    pub name: String,
    pub data_type: DataType,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl DataType {
    /// A scalar type with the given normalized name and category.
    pub fn scalar(name: &str, category: TypeCategory) -> DataType {
        DataType {
            name: name.to_string(),
            type_category: category,
            base_type: name.to_string(),
            ..Default::default()
        }
    }

    pub fn varchar(length: u32) -> DataType {
        DataType {
            length: Some(length),
            ..DataType::scalar("varchar", TypeCategory::String)
        }
    }

    pub fn decimal(precision: u32, scale: u32) -> DataType {
        DataType {
            precision: Some(precision),
            scale: Some(scale),
            ..DataType::scalar("decimal", TypeCategory::Numeric)
        }
    }

    /// The catch-all mapping for native types no dialect recognizes.
    /// Such columns round-trip as unbounded text.
    pub fn string_fallback() -> DataType {
        DataType::scalar("text", TypeCategory::String)
    }
}
