//! redb table definitions for the LoadGrid state store.
//!
//! JSON-serialized domain types live in `&[u8]` value columns keyed by
//! `&str`. The `meta` table holds plain integers.

use redb::TableDefinition;

/// Instances keyed by instance id.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Host utilization samples. Only `LATEST_SAMPLE_KEY` is written.
pub const HOST_SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("host_samples");

/// Counters and other bookkeeping values.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const LATEST_SAMPLE_KEY: &str = "latest";

/// Last allocated instance sequence number.
pub const INSTANCE_SEQ_KEY: &str = "instance_seq";
