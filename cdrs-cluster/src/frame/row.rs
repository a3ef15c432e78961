use fxhash::FxHashMap;
use std::net::IpAddr;
use uuid::Uuid;

/// Decoded value of a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Text(String),
    Inet(IpAddr),
    Uuid(Uuid),
    TextSet(Vec<String>),
    TextMap(FxHashMap<String, String>),
}

/// A single decoded row, addressed by column name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: FxHashMap<String, ColumnValue>,
}

impl Row {
    pub fn new(columns: FxHashMap<String, ColumnValue>) -> Self {
        Row { columns }
    }

    /// Adds or replaces a column value.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, value: ColumnValue) -> Self {
        self.columns.insert(name.into(), value);
        self
    }

    #[inline]
    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns.get(name)
    }

    /// Checks if given column is either missing or null.
    #[inline]
    pub fn is_empty_by_name(&self, name: &str) -> bool {
        matches!(self.get(name), None | Some(ColumnValue::Null))
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ColumnValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ColumnValue::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(ColumnValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_inet(&self, name: &str) -> Option<IpAddr> {
        match self.get(name) {
            Some(ColumnValue::Inet(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_uuid(&self, name: &str) -> Option<Uuid> {
        match self.get(name) {
            Some(ColumnValue::Uuid(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_text_set(&self, name: &str) -> Option<&[String]> {
        match self.get(name) {
            Some(ColumnValue::TextSet(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_text_map(&self, name: &str) -> Option<&FxHashMap<String, String>> {
        match self.get(name) {
            Some(ColumnValue::TextMap(value)) => Some(value),
            _ => None,
        }
    }
}
