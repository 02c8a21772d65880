//! StateStore — redb-backed instance registry and metrics source.
//!
//! Persists the instance pool and the latest host utilization sample. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{RegistryError, RegistryResult, StateError, StateResult};
use crate::registry::{InstanceRegistry, MetricsSource};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Status assigned to freshly created instances.
    initial_status: InstanceStatus,
    /// Host samples older than this are ignored by `latest_snapshot`.
    sample_max_age: Option<Duration>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            initial_status: InstanceStatus::Healthy,
            sample_max_age: None,
        }
    }

    /// Set the status new instances start in.
    ///
    /// Defaults to `Healthy`. Use `Initializing` when an external health
    /// checker promotes instances once they pass their first probe.
    pub fn with_initial_status(mut self, status: InstanceStatus) -> Self {
        self.initial_status = status;
        self
    }

    /// Ignore host samples older than `max_age` when building snapshots,
    /// falling back to the instance-load estimate. Unset, a sample of any
    /// age is used.
    pub fn with_sample_max_age(mut self, max_age: Duration) -> Self {
        self.sample_max_age = Some(max_age);
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(HOST_SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, instance: &Instance) -> StateResult<()> {
        let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(instance.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get an instance by id.
    pub fn get_instance(&self, id: &str) -> StateResult<Option<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let instance: Instance =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    /// List every instance regardless of status, ordered by id.
    pub fn list_instances(&self) -> StateResult<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let instance: Instance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(instance);
        }
        Ok(results)
    }

    /// Allocate an id and insert a new instance in one transaction.
    pub fn create_instance(&self, region: Region) -> StateResult<Instance> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let instance;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let seq = meta
                .get(INSTANCE_SEQ_KEY)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0)
                + 1;

            instance = Instance {
                id: format!("i-{seq:08}"),
                region,
                status: self.initial_status,
                load: 0.0,
            };
            let value = serde_json::to_vec(&instance).map_err(map_err!(Serialize))?;

            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(instance.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            meta.insert(INSTANCE_SEQ_KEY, seq).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %instance.id, %region, "instance created");
        Ok(instance)
    }

    /// Delete an instance by id. Returns true if it existed.
    pub fn delete_instance(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "instance deleted");
        Ok(existed)
    }

    /// Apply an external health report. Returns the updated instance, or
    /// `None` if the id is unknown.
    pub fn report_health(
        &self,
        id: &str,
        status: InstanceStatus,
        load: f64,
    ) -> StateResult<Option<Instance>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let current: Option<Instance> = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            let Some(mut instance) = current else {
                return Ok(None);
            };
            instance.status = status;
            instance.load = clamp_load(load);
            let value = serde_json::to_vec(&instance).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = instance;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some(updated))
    }

    // ── Host samples ───────────────────────────────────────────────

    /// Replace the latest host utilization sample.
    pub fn put_host_sample(&self, sample: &HostSample) -> StateResult<()> {
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HOST_SAMPLES).map_err(map_err!(Table))?;
            table
                .insert(LATEST_SAMPLE_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The most recently reported host sample, if any.
    pub fn latest_host_sample(&self) -> StateResult<Option<HostSample>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOST_SAMPLES).map_err(map_err!(Table))?;
        match table.get(LATEST_SAMPLE_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let sample: HostSample =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(sample))
            }
            None => Ok(None),
        }
    }
}

impl StateStore {
    /// Run synchronous store work on the blocking pool. redb commits fsync,
    /// and a caller's timeout can only fire while this future is pending.
    async fn blocking<T, F>(&self, work: F) -> RegistryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StateStore) -> RegistryResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| RegistryError::Unavailable(format!("store task failed: {e}")))?
    }
}

fn healthy_only(instances: Vec<Instance>) -> Vec<Instance> {
    instances.into_iter().filter(Instance::is_healthy).collect()
}

#[async_trait]
impl InstanceRegistry for StateStore {
    async fn list_healthy(&self) -> RegistryResult<Vec<Instance>> {
        self.blocking(|store| Ok(healthy_only(store.list_instances()?)))
            .await
    }

    async fn create(&self, region: Region) -> RegistryResult<Instance> {
        self.blocking(move |store| Ok(store.create_instance(region)?))
            .await
    }

    async fn remove(&self, id: &InstanceId) -> RegistryResult<()> {
        let id = id.clone();
        self.blocking(move |store| {
            if store.delete_instance(&id)? {
                Ok(())
            } else {
                Err(RegistryError::NotFound(id))
            }
        })
        .await
    }
}

#[async_trait]
impl MetricsSource for StateStore {
    async fn latest_snapshot(&self) -> RegistryResult<SystemMetrics> {
        self.blocking(|store| {
            let now = epoch_millis();
            let sample = store.latest_host_sample()?.filter(|s| match store.sample_max_age {
                Some(max_age) if !s.is_fresh(now, max_age) => {
                    debug!(reported_at = s.reported_at, "ignoring stale host sample");
                    false
                }
                _ => true,
            });
            let healthy = healthy_only(store.list_instances()?);
            Ok(SystemMetrics::from_parts(sample.as_ref(), healthy, now))
        })
        .await
    }
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
