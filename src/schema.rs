//! Table schema
//!
//! The shape of the versioned table: its key attributes, the
//! `ingest-job-index` secondary index, and the provisioned capacity of each.
//! Provisioning itself is done by an external tool; this is the core's view.

/// Attribute type of a key component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
}

/// Role of a key component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Partition key
    Hash,
    /// Sort key within a partition
    Range,
}

/// One key attribute (name + type + role)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
    pub role: KeyRole,
}

impl KeyAttribute {
    fn new(name: &str, attribute_type: AttributeType, role: KeyRole) -> Self {
        Self {
            name: name.to_string(),
            attribute_type,
            role,
        }
    }
}

/// Provisioned read/write capacity, in units per second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    pub read_units: u64,
    pub write_units: u64,
}

impl Default for Throughput {
    fn default() -> Self {
        Self {
            read_units: 15,
            write_units: 15,
        }
    }
}

/// Which attributes an index projects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Only the index key and the primary key
    KeysOnly,
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub hash_key: KeyAttribute,
    pub range_key: KeyAttribute,
    pub projection: Projection,
    pub throughput: Throughput,
}

/// Full table definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub hash_key: KeyAttribute,
    pub range_key: KeyAttribute,
    pub throughput: Throughput,
    pub job_index: IndexSchema,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            table_name: "object-versions".to_string(),
            hash_key: KeyAttribute::new("object-key", AttributeType::String, KeyRole::Hash),
            range_key: KeyAttribute::new("version-node", AttributeType::Number, KeyRole::Range),
            throughput: Throughput::default(),
            job_index: IndexSchema {
                name: "ingest-job-index".to_string(),
                hash_key: KeyAttribute::new("ingest-job-hash", AttributeType::String, KeyRole::Hash),
                range_key: KeyAttribute::new(
                    "ingest-job-range",
                    AttributeType::String,
                    KeyRole::Range,
                ),
                projection: Projection::KeysOnly,
                throughput: Throughput::default(),
            },
        }
    }
}

impl TableSchema {
    /// Replace the table's provisioned capacity
    pub fn with_table_throughput(mut self, throughput: Throughput) -> Self {
        self.throughput = throughput;
        self
    }

    /// Replace the index's provisioned capacity
    pub fn with_index_throughput(mut self, throughput: Throughput) -> Self {
        self.job_index.throughput = throughput;
        self
    }
}
