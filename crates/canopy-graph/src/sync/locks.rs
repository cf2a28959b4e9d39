//! In-process mutual exclusion per reconciliation partition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Whether a partition holds nodes or edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    Node,
    Edge,
}

impl PartitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(site, kind, type)`: the unit reconciliation works on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub site_id: String,
    pub kind: PartitionKind,
    pub type_name: String,
}

impl PartitionKey {
    pub fn new(site_id: &str, kind: PartitionKind, type_name: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            kind,
            type_name: type_name.to_string(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.site_id, self.kind, self.type_name)
    }
}

/// One async mutex per partition. Runs for the same partition inside this
/// process queue up; different partitions proceed independently. Other
/// processes writing the same database are not fenced.
#[derive(Debug, Clone, Default)]
pub struct PartitionLocks {
    inner: Arc<Mutex<HashMap<PartitionKey, Arc<Mutex<()>>>>>,
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`. Released when the guard drops.
    pub async fn acquire(&self, key: &PartitionKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.inner.lock().await;
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}
