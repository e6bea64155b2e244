use anyhow::Result;
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::DaemonError;
use crate::instance::{DecompilerInstance, InstanceSummary};

pub const DEFAULT_MAX_INSTANCES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The id was already loaded; nothing was read.
    Existing,
    Loaded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredInstance {
    pub instance_id: String,
    #[serde(flatten)]
    pub summary: InstanceSummary,
}

/// Loaded instances by id, bounded by a runtime-adjustable maximum.
#[derive(Debug)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Arc<DecompilerInstance>>>,
    max: AtomicUsize,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INSTANCES)
    }
}

impl InstanceRegistry {
    pub fn new(max: usize) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            max: AtomicUsize::new(max.max(1)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<DecompilerInstance>>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<DecompilerInstance>>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<Arc<DecompilerInstance>, DaemonError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| DaemonError::InstanceNotFound(id.to_string()))
    }

    /// Loads `id` with `loader` unless it is already present. The loader runs
    /// without holding the lock; capacity is checked before and after it.
    pub fn load_with<F>(&self, id: &str, path: &str, loader: F) -> Result<LoadOutcome, DaemonError>
    where
        F: FnOnce() -> Result<DecompilerInstance>,
    {
        {
            let instances = self.read();
            if instances.contains_key(id) {
                return Ok(LoadOutcome::Existing);
            }
            if instances.len() >= self.max() {
                return Err(DaemonError::CapacityReached);
            }
        }

        let instance = loader().map_err(|source| DaemonError::LoadFailed {
            path: path.to_string(),
            source,
        })?;
        let classes = instance.class_count();

        let mut instances = self.write();
        if instances.contains_key(id) {
            return Ok(LoadOutcome::Existing);
        }
        if instances.len() >= self.max() {
            return Err(DaemonError::CapacityReached);
        }
        instances.insert(id.to_string(), Arc::new(instance));
        info!("Loaded instance {id} from {path} ({classes} classes)");
        Ok(LoadOutcome::Loaded)
    }

    pub fn unload(&self, id: &str) -> Result<(), DaemonError> {
        match self.write().remove(id) {
            Some(_) => {
                info!("Unloaded instance {id}");
                Ok(())
            }
            None => Err(DaemonError::InstanceNotFound(id.to_string())),
        }
    }

    pub fn unload_all(&self) -> usize {
        let mut instances = self.write();
        let count = instances.len();
        instances.clear();
        info!("Unloaded all instances ({count})");
        count
    }

    /// Lowering the maximum below the current size keeps existing instances.
    pub fn set_max(&self, count: usize) -> Result<usize, DaemonError> {
        if count == 0 {
            return Err(DaemonError::InvalidCount);
        }
        self.max.store(count, Ordering::SeqCst);
        info!("Max instance count set to {count}");
        Ok(count)
    }

    pub fn summaries(&self) -> Vec<RegisteredInstance> {
        let mut out: Vec<RegisteredInstance> = self
            .read()
            .iter()
            .map(|(id, instance)| RegisteredInstance {
                instance_id: id.clone(),
                summary: instance.summary(),
            })
            .collect();
        out.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        out
    }
}
