//! Table options.
//!
//! Options are fixed at table creation and persisted with the schema. They can be
//! built programmatically with the `with_*` methods or parsed from string pairs
//! (the form a connector layer passes through).

use llkv_result::{Error, Result};
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::collections::{BTreeMap, HashMap};

pub const BUCKET: &str = "bucket";
pub const WRITE_BUFFER_ROWS: &str = "write-buffer-rows";
pub const READ_BATCH_ROWS: &str = "read-batch-rows";
pub const COMMIT_MAX_RETRIES: &str = "commit.max-retries";
pub const MANIFEST_MERGE_MIN_COUNT: &str = "manifest.merge-min-count";
pub const PARTITION_DEFAULT_NAME: &str = "partition.default-name";
pub const FILE_COMPRESSION: &str = "file.compression";
pub const PARQUET_ROW_GROUP_SIZE: &str = "parquet.row-group-size";

/// Path segment used for null partition values.
pub const DEFAULT_PARTITION_NAME: &str = "__DEFAULT_PARTITION__";

/// Compression codec for data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub enum FileCompression {
    Uncompressed,
    Snappy,
    Zstd,
}

impl FileCompression {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(Self::Uncompressed),
            "snappy" => Ok(Self::Snappy),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::InvalidArgumentError(format!(
                "unsupported {FILE_COMPRESSION} '{other}'"
            ))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Uncompressed => "uncompressed",
            Self::Snappy => "snappy",
            Self::Zstd => "zstd",
        }
    }
}

/// Per-table configuration.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct TableOptions {
    /// Number of buckets per partition.
    pub bucket: u32,

    /// Buffered rows per (partition, bucket) before a writer spills a data file.
    pub write_buffer_rows: u64,

    /// Maximum rows per batch emitted by readers.
    pub read_batch_rows: u64,

    /// How many times a commit is re-attempted after losing a race.
    pub commit_max_retries: u32,

    /// Once a snapshot's manifest chain reaches this many files, the next commit
    /// rewrites the live file set into a single manifest.
    pub manifest_merge_min_count: u32,

    /// Path segment written for null partition values.
    pub partition_default_name: String,

    pub file_compression: FileCompression,

    pub parquet_row_group_size: u64,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            bucket: 1,
            write_buffer_rows: 100_000,
            read_batch_rows: 8192,
            commit_max_retries: 10,
            manifest_merge_min_count: 30,
            partition_default_name: DEFAULT_PARTITION_NAME.to_string(),
            file_compression: FileCompression::Snappy,
            parquet_row_group_size: 8192,
        }
    }
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from string pairs, starting from defaults.
    ///
    /// Unknown keys and unparsable values are rejected.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                BUCKET => options.bucket = parse_number(key, value)?,
                WRITE_BUFFER_ROWS => options.write_buffer_rows = parse_number(key, value)?,
                READ_BATCH_ROWS => options.read_batch_rows = parse_number(key, value)?,
                COMMIT_MAX_RETRIES => options.commit_max_retries = parse_number(key, value)?,
                MANIFEST_MERGE_MIN_COUNT => {
                    options.manifest_merge_min_count = parse_number(key, value)?
                }
                PARTITION_DEFAULT_NAME => options.partition_default_name = value.clone(),
                FILE_COMPRESSION => options.file_compression = FileCompression::parse(value)?,
                PARQUET_ROW_GROUP_SIZE => {
                    options.parquet_row_group_size = parse_number(key, value)?
                }
                other => {
                    return Err(Error::InvalidArgumentError(format!(
                        "unknown table option '{other}'"
                    )));
                }
            }
        }
        options.validate()?;
        Ok(options)
    }

    /// Render every option as a string pair.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (BUCKET.to_string(), self.bucket.to_string()),
            (WRITE_BUFFER_ROWS.to_string(), self.write_buffer_rows.to_string()),
            (READ_BATCH_ROWS.to_string(), self.read_batch_rows.to_string()),
            (COMMIT_MAX_RETRIES.to_string(), self.commit_max_retries.to_string()),
            (
                MANIFEST_MERGE_MIN_COUNT.to_string(),
                self.manifest_merge_min_count.to_string(),
            ),
            (
                PARTITION_DEFAULT_NAME.to_string(),
                self.partition_default_name.clone(),
            ),
            (
                FILE_COMPRESSION.to_string(),
                self.file_compression.as_str().to_string(),
            ),
            (
                PARQUET_ROW_GROUP_SIZE.to_string(),
                self.parquet_row_group_size.to_string(),
            ),
        ])
    }

    pub fn with_bucket(mut self, bucket: u32) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn with_write_buffer_rows(mut self, rows: u64) -> Self {
        self.write_buffer_rows = rows;
        self
    }

    pub fn with_read_batch_rows(mut self, rows: u64) -> Self {
        self.read_batch_rows = rows;
        self
    }

    pub fn with_commit_max_retries(mut self, retries: u32) -> Self {
        self.commit_max_retries = retries;
        self
    }

    pub fn with_manifest_merge_min_count(mut self, count: u32) -> Self {
        self.manifest_merge_min_count = count;
        self
    }

    pub fn with_partition_default_name(mut self, name: impl Into<String>) -> Self {
        self.partition_default_name = name.into();
        self
    }

    pub fn with_file_compression(mut self, compression: FileCompression) -> Self {
        self.file_compression = compression;
        self
    }

    pub fn with_parquet_row_group_size(mut self, rows: u64) -> Self {
        self.parquet_row_group_size = rows;
        self
    }

    /// Check value ranges. Called on create and after parsing.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            (BUCKET, self.bucket as u64),
            (WRITE_BUFFER_ROWS, self.write_buffer_rows),
            (READ_BATCH_ROWS, self.read_batch_rows),
            (MANIFEST_MERGE_MIN_COUNT, self.manifest_merge_min_count as u64),
            (PARQUET_ROW_GROUP_SIZE, self.parquet_row_group_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::InvalidArgumentError(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        if self.partition_default_name.is_empty() || self.partition_default_name.contains('/')
        {
            return Err(Error::InvalidArgumentError(format!(
                "{PARTITION_DEFAULT_NAME} must be a non-empty path segment"
            )));
        }
        Ok(())
    }

    /// Parquet writer properties for data files.
    pub fn writer_properties(&self) -> WriterProperties {
        let compression = match self.file_compression {
            FileCompression::Uncompressed => Compression::UNCOMPRESSED,
            FileCompression::Snappy => Compression::SNAPPY,
            FileCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        };
        WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.parquet_row_group_size as usize)
            .build()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        Error::InvalidArgumentError(format!("option '{key}' expects a number, got '{value}'"))
    })
}
