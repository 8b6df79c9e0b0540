use rusqlite::types::ValueRef;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use super::SqlTable;
use crate::db::Value;
use crate::Id;

/// The kind of value an attribute holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeType {
    /// Row id of the instance
    Id,
    /// Discriminator column holding the concrete type id
    Type,
    /// Id of another instance
    Link,
    String,
    Integer,
    Boolean,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot read '{value}' as {attribute_type}")]
pub struct ValueError {
    attribute_type: AttributeType,
    value: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown attribute type '{0}'")]
pub struct UnknownAttributeType(String);

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Id => "Id",
            AttributeType::Type => "Type",
            AttributeType::Link => "Link",
            AttributeType::String => "String",
            AttributeType::Integer => "Integer",
            AttributeType::Boolean => "Boolean",
        }
    }

    /// Parse the textual form of a value of this type, as found in update files
    pub fn parse(&self, raw: &str) -> Result<Value, ValueError> {
        let raw = raw.trim();
        match self {
            AttributeType::String => Ok(Value::Text(raw.to_string())),
            _ if raw.is_empty() => Ok(Value::Null),
            AttributeType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Boolean(true)),
                "false" | "0" | "no" => Ok(Value::Boolean(false)),
                _ => Err(self.invalid(raw)),
            },
            _ => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| self.invalid(raw)),
        }
    }

    /// Convert a column value read from the store
    pub fn read(&self, raw: ValueRef<'_>) -> Result<Value, ValueError> {
        match (self, raw) {
            (_, ValueRef::Null) => Ok(Value::Null),
            (AttributeType::String, ValueRef::Text(t)) => {
                Ok(Value::Text(String::from_utf8_lossy(t).into_owned()))
            }
            (AttributeType::String, ValueRef::Integer(i)) => Ok(Value::Text(i.to_string())),
            (AttributeType::Boolean, ValueRef::Integer(i)) => Ok(Value::Boolean(i != 0)),
            (AttributeType::Boolean, ValueRef::Text(t)) => {
                self.parse(&String::from_utf8_lossy(t))
            }
            (AttributeType::String | AttributeType::Boolean, other) => {
                Err(self.invalid(format!("{other:?}")))
            }
            (_, ValueRef::Integer(i)) => Ok(Value::Integer(i)),
            (_, ValueRef::Text(t)) => self.parse(&String::from_utf8_lossy(t)),
            (_, other) => Err(self.invalid(format!("{other:?}"))),
        }
    }

    fn invalid(&self, value: impl Into<String>) -> ValueError {
        ValueError {
            attribute_type: *self,
            value: value.into(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = UnknownAttributeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Id" => Ok(AttributeType::Id),
            "Type" => Ok(AttributeType::Type),
            "Link" | "LinkWithRanges" => Ok(AttributeType::Link),
            "String" => Ok(AttributeType::String),
            "Integer" | "Long" => Ok(AttributeType::Integer),
            "Boolean" => Ok(AttributeType::Boolean),
            other => Err(UnknownAttributeType(other.to_string())),
        }
    }
}

/// A named, typed property of a type, mapped to a SQL table column
///
/// Attributes are declared on one type and copied to every descendant of that type. Each copy
/// records the type that exposes it next to the type that declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub(crate) id: Id,
    pub(crate) name: String,
    pub(crate) type_id: Id,
    pub(crate) declared_by: Id,
    pub(crate) table: Option<Arc<SqlTable>>,
    pub(crate) column: Option<String>,
    pub(crate) attribute_type: AttributeType,
    pub(crate) link: Option<Id>,
}

impl Attribute {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the type exposing this copy of the attribute
    pub fn type_id(&self) -> Id {
        self.type_id
    }

    /// Id of the type that declared the attribute
    pub fn declared_by(&self) -> Id {
        self.declared_by
    }

    pub fn table(&self) -> Option<&Arc<SqlTable>> {
        self.table.as_ref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    /// Target type of a link attribute
    pub fn link(&self) -> Option<Id> {
        self.link
    }

    pub fn is_inherited(&self) -> bool {
        self.type_id != self.declared_by
    }

    /// Table and column the attribute is stored in, if mapped
    pub fn storage(&self) -> Option<(&Arc<SqlTable>, &str)> {
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => Some((table, column)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_parses_update_file_values() {
        assert_eq!(
            AttributeType::Integer.parse(" 42 ").unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            AttributeType::Boolean.parse("TRUE").unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(AttributeType::Link.parse("").unwrap(), Value::Null);
        assert_eq!(
            AttributeType::String.parse("").unwrap(),
            Value::Text(String::new())
        );
        assert!(AttributeType::Integer.parse("forty").is_err());
        assert!(AttributeType::Boolean.parse("maybe").is_err());
    }

    #[test]
    fn it_reads_store_values() {
        assert_eq!(
            AttributeType::Boolean.read(ValueRef::Integer(0)).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            AttributeType::String.read(ValueRef::Integer(7)).unwrap(),
            Value::Text("7".to_string())
        );
        assert_eq!(
            AttributeType::Link.read(ValueRef::Text(b"12")).unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            AttributeType::Integer.read(ValueRef::Null).unwrap(),
            Value::Null
        );
        assert!(AttributeType::Integer.read(ValueRef::Real(1.5)).is_err());
    }

    #[test]
    fn it_parses_attribute_type_names() {
        assert_eq!(
            "Link".parse::<AttributeType>().unwrap(),
            AttributeType::Link
        );
        assert_eq!(
            "Long".parse::<AttributeType>().unwrap(),
            AttributeType::Integer
        );
        assert!("Decimal".parse::<AttributeType>().is_err());
    }
}
