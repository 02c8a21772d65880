//! loadgrid-state — domain types and the instance registry for LoadGrid.
//!
//! Defines the `Instance` / `SystemMetrics` model shared by every other
//! crate, the two collaborator contracts the control loop consumes
//! (`InstanceRegistry`, `MetricsSource`), and a [redb](https://docs.rs/redb)
//! backed `StateStore` that implements both.
//!
//! # Architecture
//!
//! ```text
//! StateStore (Clone, Arc<Database>)
//!   ├── instances     id → Instance (JSON)
//!   ├── host_samples  "latest" → HostSample (JSON)
//!   └── meta          "instance_seq" → u64
//! ```
//!
//! Creation and removal each run inside a single write transaction, so a
//! failed call never leaves a half-applied pool change behind.

pub mod clock;
pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, RegistryError, RegistryResult, StateError, StateResult};
pub use registry::{InstanceRegistry, MetricsSource};
pub use store::StateStore;
pub use types::*;
