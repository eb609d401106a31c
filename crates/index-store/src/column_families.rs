//! Column family definitions for RocksDB.
//!
//! - activities: activity records keyed by id (default compaction)
//! - meta: id counter and other singletons

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for activity records
pub const CF_ACTIVITIES: &str = "activities";

/// Column family name for store metadata
pub const CF_META: &str = "meta";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_ACTIVITIES, CF_META];

/// Activities carry JSON documents; compress them
fn activities_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ACTIVITIES, activities_options()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ]
}
