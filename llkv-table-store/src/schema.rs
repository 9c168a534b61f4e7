//! Table schema: user fields, partition keys, primary keys, and options.

use crate::layout::{FileLayout, SCHEMA_PREFIX, parse_id_suffix};
use crate::options::TableOptions;
use crate::partition::PartitionValue;
use crate::types::{ROW_KIND_COLUMN, SEQUENCE_NUMBER_COLUMN, SchemaId};
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use std::sync::Arc;

/// Validated table schema.
///
/// The primary key, when present, must contain every partition key. Buckets are
/// chosen from the bucket key: the primary key minus the partition keys (or the
/// whole primary key if nothing remains), or every non-partition field of an
/// append-only table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    id: SchemaId,
    arrow_schema: SchemaRef,
    file_schema: SchemaRef,
    partition_keys: Vec<String>,
    primary_keys: Vec<String>,
    options: TableOptions,
    partition_indices: Vec<usize>,
    partition_fields: Vec<FieldRef>,
    primary_key_indices: Vec<usize>,
    bucket_key_indices: Vec<usize>,
}

impl PartialEq for TableSchema {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.arrow_schema == other.arrow_schema
            && self.partition_keys == other.partition_keys
            && self.primary_keys == other.primary_keys
            && self.options == other.options
    }
}

impl TableSchema {
    pub fn new(
        arrow_schema: SchemaRef,
        partition_keys: Vec<String>,
        primary_keys: Vec<String>,
        options: TableOptions,
    ) -> Result<Self> {
        Self::with_id(0, arrow_schema, partition_keys, primary_keys, options)
    }

    fn with_id(
        id: SchemaId,
        arrow_schema: SchemaRef,
        partition_keys: Vec<String>,
        primary_keys: Vec<String>,
        options: TableOptions,
    ) -> Result<Self> {
        options.validate()?;

        if arrow_schema.fields().is_empty() {
            return Err(Error::InvalidArgumentError(
                "table schema must have at least one field".into(),
            ));
        }
        for field in arrow_schema.fields() {
            let name = field.name();
            if name == SEQUENCE_NUMBER_COLUMN || name == ROW_KIND_COLUMN {
                return Err(Error::InvalidArgumentError(format!(
                    "field name '{name}' is reserved for system columns"
                )));
            }
        }

        let resolve = |keys: &[String], what: &str| -> Result<Vec<usize>> {
            let mut indices = Vec::with_capacity(keys.len());
            for key in keys {
                let idx = arrow_schema.index_of(key).map_err(|_| {
                    Error::InvalidArgumentError(format!("{what} '{key}' is not a table field"))
                })?;
                if indices.contains(&idx) {
                    return Err(Error::InvalidArgumentError(format!(
                        "{what} '{key}' is listed twice"
                    )));
                }
                indices.push(idx);
            }
            Ok(indices)
        };
        let partition_indices = resolve(&partition_keys, "partition key")?;
        let primary_key_indices = resolve(&primary_keys, "primary key")?;

        let partition_fields: Vec<FieldRef> = partition_indices
            .iter()
            .map(|&idx| arrow_schema.fields()[idx].clone())
            .collect();
        for field in &partition_fields {
            if !PartitionValue::supports(field.data_type()) {
                return Err(Error::InvalidArgumentError(format!(
                    "partition key '{}' has unsupported type {}",
                    field.name(),
                    field.data_type()
                )));
            }
        }

        if !primary_keys.is_empty() {
            if let Some(missing) = partition_keys.iter().find(|k| !primary_keys.contains(k)) {
                return Err(Error::InvalidArgumentError(format!(
                    "primary key must contain partition key '{missing}'"
                )));
            }
            for &idx in &primary_key_indices {
                let field = &arrow_schema.fields()[idx];
                if !is_orderable(field.data_type()) {
                    return Err(Error::InvalidArgumentError(format!(
                        "primary key '{}' has unsupported type {}",
                        field.name(),
                        field.data_type()
                    )));
                }
            }
        }

        // Partition columns are constant within a partition, so they are left out
        // of the bucket key unless nothing else remains.
        let candidates: Vec<usize> = if primary_keys.is_empty() {
            (0..arrow_schema.fields().len()).collect()
        } else {
            primary_key_indices.clone()
        };
        let trimmed: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|idx| !partition_indices.contains(idx))
            .collect();
        let bucket_key_indices = if trimmed.is_empty() {
            candidates
        } else {
            trimmed
        };

        let mut file_fields: Vec<FieldRef> = arrow_schema.fields().iter().cloned().collect();
        file_fields.push(Arc::new(Field::new(
            SEQUENCE_NUMBER_COLUMN,
            DataType::UInt64,
            false,
        )));
        file_fields.push(Arc::new(Field::new(ROW_KIND_COLUMN, DataType::Int8, false)));
        let file_schema = Arc::new(Schema::new(file_fields));

        Ok(Self {
            id,
            arrow_schema,
            file_schema,
            partition_keys,
            primary_keys,
            options,
            partition_indices,
            partition_fields,
            primary_key_indices,
            bucket_key_indices,
        })
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    /// User-visible fields.
    pub fn arrow_schema(&self) -> &SchemaRef {
        &self.arrow_schema
    }

    /// Fields of every data file: user fields followed by the system columns.
    pub fn file_schema(&self) -> &SchemaRef {
        &self.file_schema
    }

    pub fn partition_keys(&self) -> &[String] {
        &self.partition_keys
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    pub fn partition_indices(&self) -> &[usize] {
        &self.partition_indices
    }

    pub fn partition_fields(&self) -> &[FieldRef] {
        &self.partition_fields
    }

    pub fn primary_key_indices(&self) -> &[usize] {
        &self.primary_key_indices
    }

    pub fn bucket_key_indices(&self) -> &[usize] {
        &self.bucket_key_indices
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let persisted = PersistedSchema {
            id: self.id,
            fields_ipc: encode_arrow_schema(&self.arrow_schema)?,
            partition_keys: self.partition_keys.clone(),
            primary_keys: self.primary_keys.clone(),
            options: self.options.clone(),
        };
        Ok(bitcode::encode(&persisted))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let persisted: PersistedSchema =
            bitcode::decode(bytes).map_err(|e| Error::internal("decode table schema", e))?;
        let arrow_schema = decode_arrow_schema(&persisted.fields_ipc)?;
        Self::with_id(
            persisted.id,
            arrow_schema,
            persisted.partition_keys,
            persisted.primary_keys,
            persisted.options,
        )
    }
}

fn is_orderable(data_type: &DataType) -> bool {
    data_type.is_primitive()
        || matches!(
            data_type,
            DataType::Boolean
                | DataType::Utf8
                | DataType::LargeUtf8
                | DataType::Binary
                | DataType::LargeBinary
                | DataType::FixedSizeBinary(_)
        )
}

#[derive(bitcode::Encode, bitcode::Decode)]
struct PersistedSchema {
    id: SchemaId,
    fields_ipc: Vec<u8>,
    partition_keys: Vec<String>,
    primary_keys: Vec<String>,
    options: TableOptions,
}

fn encode_arrow_schema(schema: &Schema) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut writer = arrow::ipc::writer::FileWriter::try_new(&mut buffer, schema)
        .map_err(|e| Error::Internal(format!("failed to create IPC writer: {}", e)))?;
    writer
        .finish()
        .map_err(|e| Error::Internal(format!("failed to finish IPC writer: {}", e)))?;
    drop(writer);
    Ok(buffer)
}

fn decode_arrow_schema(bytes: &[u8]) -> Result<SchemaRef> {
    let reader = arrow::ipc::reader::FileReader::try_new(std::io::Cursor::new(bytes), None)
        .map_err(|e| Error::Internal(format!("failed to create IPC reader: {}", e)))?;
    Ok(reader.schema())
}

/// Loads and creates persisted schema versions of a table.
pub struct SchemaManager<P: Pager> {
    pager: Arc<P>,
    layout: FileLayout,
}

impl<P: Pager> SchemaManager<P> {
    pub fn new(pager: Arc<P>, layout: FileLayout) -> Self {
        Self { pager, layout }
    }

    /// Persist the first schema version of a new table.
    ///
    /// Fails if the table path already holds a schema.
    pub fn create(&self, schema: &TableSchema) -> Result<()> {
        if !self.list_ids()?.is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "table already exists at '{}'",
                self.layout.root()
            )));
        }
        let key = self.layout.schema_key(schema.id());
        if !self.pager.put_if_absent(&key, schema.to_bytes()?)? {
            return Err(Error::InvalidArgumentError(format!(
                "table already exists at '{}'",
                self.layout.root()
            )));
        }
        tracing::debug!(table = self.layout.root(), schema_id = schema.id(), "created table schema");
        Ok(())
    }

    pub fn schema(&self, id: SchemaId) -> Result<TableSchema> {
        let key = self.layout.schema_key(id);
        let blob = self
            .pager
            .get(&key)?
            .ok_or_else(|| Error::NotFound(format!("schema {id} at '{key}'")))?;
        TableSchema::from_bytes(blob.as_ref())
    }

    /// The newest schema version, `NotFound` if the table does not exist.
    pub fn latest(&self) -> Result<TableSchema> {
        let latest = self.list_ids()?.into_iter().max().ok_or_else(|| {
            Error::NotFound(format!("no table at '{}'", self.layout.root()))
        })?;
        self.schema(latest)
    }

    fn list_ids(&self) -> Result<Vec<SchemaId>> {
        Ok(self
            .pager
            .enumerate_keys(&self.layout.schema_prefix())?
            .iter()
            .filter_map(|key| parse_id_suffix(key, SCHEMA_PREFIX))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llkv_storage::pager::MemPager;

    fn fields() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("partKey0", DataType::Int32, false),
            Field::new("partKey1", DataType::Int32, false),
            Field::new("dt", DataType::Utf8, false),
            Field::new("value", DataType::Int32, true),
        ]))
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bucket_key_selection() {
        let pk = TableSchema::new(
            fields(),
            keys(&["partKey0", "partKey1"]),
            keys(&["partKey0", "partKey1", "dt"]),
            TableOptions::default(),
        )
        .unwrap();
        assert_eq!(pk.bucket_key_indices(), &[2]);
        assert_eq!(pk.file_schema().fields().len(), 6);

        let pk_only_partitions = TableSchema::new(
            fields(),
            keys(&["partKey0"]),
            keys(&["partKey0"]),
            TableOptions::default(),
        )
        .unwrap();
        assert_eq!(pk_only_partitions.bucket_key_indices(), &[0]);

        let append = TableSchema::new(
            fields(),
            keys(&["partKey0", "partKey1"]),
            vec![],
            TableOptions::default(),
        )
        .unwrap();
        assert_eq!(append.bucket_key_indices(), &[2, 3]);
        assert!(!append.has_primary_key());
    }

    #[test]
    fn test_validation_errors() {
        let missing = TableSchema::new(fields(), keys(&["nope"]), vec![], TableOptions::default());
        assert!(matches!(missing, Err(Error::InvalidArgumentError(_))));

        let pk_without_partition = TableSchema::new(
            fields(),
            keys(&["partKey0"]),
            keys(&["dt"]),
            TableOptions::default(),
        );
        assert!(pk_without_partition.is_err());

        let reserved = Arc::new(Schema::new(vec![Field::new(
            SEQUENCE_NUMBER_COLUMN,
            DataType::UInt64,
            false,
        )]));
        assert!(TableSchema::new(reserved, vec![], vec![], TableOptions::default()).is_err());

        let float_partition = Arc::new(Schema::new(vec![Field::new("f", DataType::Float64, false)]));
        assert!(
            TableSchema::new(float_partition, keys(&["f"]), vec![], TableOptions::default())
                .is_err()
        );
    }

    #[test]
    fn test_schema_manager_create_and_load() {
        let pager = Arc::new(MemPager::new());
        let manager = SchemaManager::new(Arc::clone(&pager), FileLayout::new("db/t"));
        assert!(matches!(manager.latest(), Err(Error::NotFound(_))));

        let schema = TableSchema::new(
            fields(),
            keys(&["partKey0"]),
            vec![],
            TableOptions::default().with_bucket(2),
        )
        .unwrap();
        manager.create(&schema).unwrap();

        let loaded = manager.latest().unwrap();
        assert_eq!(loaded, schema);
        assert_eq!(loaded.options().bucket, 2);

        assert!(manager.create(&schema).is_err());
    }
}
