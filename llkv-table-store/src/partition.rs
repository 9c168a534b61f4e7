//! Partition values and the partition predicate engine.
//!
//! Predicates are evaluated against partition metadata recorded in manifests,
//! never against rows.

use crate::schema::TableSchema;
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Int8Type, Int16Type, Int32Type, Int64Type, UInt8Type, UInt16Type, UInt32Type,
    UInt64Type,
};
use llkv_result::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// A single partition key value.
///
/// Signed and unsigned integers of every width fold into [`PartitionValue::Int`] and
/// [`PartitionValue::UInt`]; the declared width lives in the table schema.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, bitcode::Encode, bitcode::Decode,
)]
pub enum PartitionValue {
    Null,
    Boolean(bool),
    Int(i64),
    UInt(u64),
    Utf8(String),
}

impl PartitionValue {
    /// Whether a column of `data_type` can be used as a partition key.
    pub fn supports(data_type: &DataType) -> bool {
        matches!(
            data_type,
            DataType::Boolean
                | DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Utf8
                | DataType::LargeUtf8
        )
    }

    /// Read the value at `row` of a partition column.
    pub fn from_array(array: &ArrayRef, row: usize) -> Result<Self> {
        if array.is_null(row) {
            return Ok(PartitionValue::Null);
        }
        let value = match array.data_type() {
            DataType::Boolean => PartitionValue::Boolean(array.as_boolean().value(row)),
            DataType::Int8 => PartitionValue::Int(array.as_primitive::<Int8Type>().value(row) as i64),
            DataType::Int16 => {
                PartitionValue::Int(array.as_primitive::<Int16Type>().value(row) as i64)
            }
            DataType::Int32 => {
                PartitionValue::Int(array.as_primitive::<Int32Type>().value(row) as i64)
            }
            DataType::Int64 => PartitionValue::Int(array.as_primitive::<Int64Type>().value(row)),
            DataType::UInt8 => {
                PartitionValue::UInt(array.as_primitive::<UInt8Type>().value(row) as u64)
            }
            DataType::UInt16 => {
                PartitionValue::UInt(array.as_primitive::<UInt16Type>().value(row) as u64)
            }
            DataType::UInt32 => {
                PartitionValue::UInt(array.as_primitive::<UInt32Type>().value(row) as u64)
            }
            DataType::UInt64 => PartitionValue::UInt(array.as_primitive::<UInt64Type>().value(row)),
            DataType::Utf8 => PartitionValue::Utf8(array.as_string::<i32>().value(row).to_string()),
            DataType::LargeUtf8 => {
                PartitionValue::Utf8(array.as_string::<i64>().value(row).to_string())
            }
            other => {
                return Err(Error::InvalidArgumentError(format!(
                    "unsupported partition key type {other}"
                )));
            }
        };
        Ok(value)
    }

    /// Coerce the string form of a value to `data_type`.
    ///
    /// `default_name` denotes null.
    pub fn parse(text: &str, data_type: &DataType, default_name: &str) -> Result<Self> {
        if text == default_name {
            return Ok(PartitionValue::Null);
        }
        let invalid = || {
            Error::InvalidPartitionSpec(format!("cannot coerce '{text}' to {data_type}"))
        };
        let trimmed = text.trim();
        let value = match data_type {
            DataType::Boolean => {
                PartitionValue::Boolean(trimmed.to_ascii_lowercase().parse().map_err(|_| invalid())?)
            }
            DataType::Int8 => PartitionValue::Int(trimmed.parse::<i8>().map_err(|_| invalid())? as i64),
            DataType::Int16 => {
                PartitionValue::Int(trimmed.parse::<i16>().map_err(|_| invalid())? as i64)
            }
            DataType::Int32 => {
                PartitionValue::Int(trimmed.parse::<i32>().map_err(|_| invalid())? as i64)
            }
            DataType::Int64 => PartitionValue::Int(trimmed.parse::<i64>().map_err(|_| invalid())?),
            DataType::UInt8 => {
                PartitionValue::UInt(trimmed.parse::<u8>().map_err(|_| invalid())? as u64)
            }
            DataType::UInt16 => {
                PartitionValue::UInt(trimmed.parse::<u16>().map_err(|_| invalid())? as u64)
            }
            DataType::UInt32 => {
                PartitionValue::UInt(trimmed.parse::<u32>().map_err(|_| invalid())? as u64)
            }
            DataType::UInt64 => PartitionValue::UInt(trimmed.parse::<u64>().map_err(|_| invalid())?),
            DataType::Utf8 | DataType::LargeUtf8 => PartitionValue::Utf8(text.to_string()),
            _ => return Err(invalid()),
        };
        Ok(value)
    }

    /// Path segment value, with null rendered as `default_name`.
    pub fn to_path_string(&self, default_name: &str) -> String {
        match self {
            PartitionValue::Null => default_name.to_string(),
            other => escape_path_name(&other.to_string()),
        }
    }
}

impl fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionValue::Null => f.write_str("null"),
            PartitionValue::Boolean(v) => write!(f, "{v}"),
            PartitionValue::Int(v) => write!(f, "{v}"),
            PartitionValue::UInt(v) => write!(f, "{v}"),
            PartitionValue::Utf8(v) => f.write_str(v),
        }
    }
}

/// Concrete values for every partition key, in partition-key order.
///
/// Tables without partition keys have a single empty partition.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, bitcode::Encode, bitcode::Decode,
)]
pub struct Partition {
    values: Vec<PartitionValue>,
}

impl Partition {
    pub fn new(values: Vec<PartitionValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[PartitionValue] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read the partition of `row` from the partition columns.
    pub fn from_columns(columns: &[ArrayRef], row: usize) -> Result<Self> {
        let values = columns
            .iter()
            .map(|column| PartitionValue::from_array(column, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { values })
    }

    /// `key=value` directory segments for this partition.
    pub fn path_segments(&self, keys: &[String], default_name: &str) -> Vec<String> {
        keys.iter()
            .zip(&self.values)
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    escape_path_name(key),
                    value.to_path_string(default_name)
                )
            })
            .collect()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, value) in self.values.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("}")
    }
}

/// Percent-escape characters that would break a `key=value` path segment.
pub fn escape_path_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_control() || matches!(ch, '/' | '=' | '%' | '\\' | ':' | '#' | '?' | '*') {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Predicate over partitions built from user partition specifications.
///
/// Each specification is a conjunction of equality tests on the keys it names;
/// the specifications are OR-combined. An empty specification list, or an empty
/// specification, matches every partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPredicate {
    alternatives: Vec<Vec<(usize, PartitionValue)>>,
}

impl PartitionPredicate {
    /// Matches every partition.
    pub fn all() -> Self {
        Self {
            alternatives: vec![Vec::new()],
        }
    }

    /// Matches exactly the given partitions.
    pub fn exact(partitions: impl IntoIterator<Item = Partition>) -> Self {
        Self {
            alternatives: partitions
                .into_iter()
                .map(|p| p.values.into_iter().enumerate().collect())
                .collect(),
        }
    }

    /// Build a predicate from key → string-value specifications.
    ///
    /// Fails with [`Error::InvalidPartitionSpec`] if a specification names a key that
    /// is not a partition key, or a value does not coerce to the key's type.
    pub fn from_specs(schema: &TableSchema, specs: &[HashMap<String, String>]) -> Result<Self> {
        if specs.is_empty() {
            return Ok(Self::all());
        }

        let keys = schema.partition_keys();
        let fields = schema.partition_fields();
        let default_name = &schema.options().partition_default_name;

        let mut alternatives = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut conjunction = Vec::with_capacity(spec.len());
            for (name, text) in spec {
                let idx = keys.iter().position(|k| k == name).ok_or_else(|| {
                    Error::InvalidPartitionSpec(format!(
                        "'{name}' is not a partition key; partition keys are [{}]",
                        keys.join(", ")
                    ))
                })?;
                let value = PartitionValue::parse(text, fields[idx].data_type(), default_name)
                    .map_err(|e| match e {
                        Error::InvalidPartitionSpec(msg) => {
                            Error::InvalidPartitionSpec(format!("key '{name}': {msg}"))
                        }
                        other => other,
                    })?;
                conjunction.push((idx, value));
            }
            conjunction.sort();
            alternatives.push(conjunction);
        }
        Ok(Self { alternatives })
    }

    /// Whether the predicate matches every partition.
    pub fn is_match_all(&self) -> bool {
        self.alternatives.iter().any(|c| c.is_empty())
    }

    pub fn matches(&self, partition: &Partition) -> bool {
        self.alternatives.iter().any(|conjunction| {
            conjunction
                .iter()
                .all(|(idx, value)| partition.values.get(*idx) == Some(value))
        })
    }
}
