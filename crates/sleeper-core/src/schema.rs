use serde::{Deserialize, Serialize};

use crate::{Error, KeyType};

/// A row-key field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
}

impl Field {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }
}

/// The part of a table schema the state store needs: the ordered row-key
/// fields which define the dimensions of the partitioned key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaFields")]
pub struct Schema {
    row_keys: Vec<Field>,
}

/// The serialized form of a [Schema], checked on the way in.
#[derive(Deserialize)]
struct SchemaFields {
    row_keys: Vec<Field>,
}

impl TryFrom<SchemaFields> for Schema {
    type Error = error_stack::Report<Error>;

    fn try_from(fields: SchemaFields) -> Result<Self, Self::Error> {
        Self::try_new(fields.row_keys)
    }
}

impl Schema {
    pub fn try_new(row_keys: Vec<Field>) -> error_stack::Result<Self, Error> {
        error_stack::ensure!(!row_keys.is_empty(), Error::NoRowKeys);
        Ok(Self { row_keys })
    }

    /// A schema with a single row key of the given type.
    pub fn single_key(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            row_keys: vec![Field::new(name, key_type)],
        }
    }

    pub fn row_keys(&self) -> &[Field] {
        &self.row_keys
    }

    pub fn row_key(&self, dimension: usize) -> error_stack::Result<&Field, Error> {
        self.row_keys
            .get(dimension)
            .ok_or_else(|| error_stack::report!(Error::NoSuchDimension(dimension)))
    }

    pub fn num_dimensions(&self) -> usize {
        self.row_keys.len()
    }
}
