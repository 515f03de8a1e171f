//! Thing records and their attached certificate ids, backed by the runtime
//! store (§4.4)

use crate::error::Result;
use crate::traits::{Clock, RuntimeStore, SystemClock};
use crate::types::{InvalidThingName, Thing};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

fn thing_key(name: &str) -> String {
    format!("things/v1/{name}")
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredThing {
    version: u64,
    attached_certificate_ids: BTreeMap<String, DateTime<Utc>>,
}

/// Thing CRUD with version/modified write-back semantics (§4.4).
pub struct ThingRegistry {
    store: Arc<dyn RuntimeStore>,
    #[allow(dead_code)]
    clock: Arc<dyn Clock>,
}

impl ThingRegistry {
    /// Build a registry over `store`, using the system clock.
    pub fn new(store: Arc<dyn RuntimeStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// `getOrCreate`: returns the persisted Thing, or creates and persists a
    /// fresh one if `name` is new.
    pub async fn get_or_create(&self, name: &str) -> Result<Thing> {
        if let Some(thing) = self.get(name).await? {
            return Ok(thing);
        }
        let thing = Thing::new(name).map_err(|InvalidThingName(n)| {
            crate::error::CdaError::InvalidArgument(format!("invalid thing name: {n}"))
        })?;
        self.update(&thing).await?;
        Ok(thing)
    }

    /// `get`: the persisted Thing, if any.
    pub async fn get(&self, name: &str) -> Result<Option<Thing>> {
        let Some(bytes) = self.store.get(&thing_key(name)).await? else {
            return Ok(None);
        };
        let stored: StoredThing = serde_json::from_slice(&bytes)?;
        Ok(Some(Thing {
            name: name.to_string(),
            version: stored.version,
            attached_certificate_ids: stored.attached_certificate_ids,
            modified: false,
        }))
    }

    /// `update`: persists `thing` only if it is `modified` or the persisted
    /// version is older than `thing.version` (§4.4's `updateThing` rule).
    pub async fn update(&self, thing: &Thing) -> Result<()> {
        if !thing.modified {
            if let Some(existing) = self.get(&thing.name).await? {
                if existing.version >= thing.version {
                    return Ok(());
                }
            }
        }

        let stored = StoredThing {
            version: thing.version,
            attached_certificate_ids: thing.attached_certificate_ids.clone(),
        };
        let bytes = serde_json::to_vec(&stored)?;
        self.store.put(&thing_key(&thing.name), &bytes).await
    }

    /// `delete`: removes the Thing record.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(&thing_key(name)).await
    }

    /// `all`: every persisted Thing.
    pub async fn all(&self) -> Result<Vec<Thing>> {
        let mut things = Vec::new();
        for key in self.store.list("things/v1").await? {
            let Some(name) = key.strip_prefix("things/v1/") else {
                continue;
            };
            if let Some(thing) = self.get(name).await? {
                things.push(thing);
            }
        }
        Ok(things)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_store::MemoryRuntimeStore;

    fn registry() -> ThingRegistry {
        ThingRegistry::new(Arc::new(MemoryRuntimeStore::new()))
    }

    #[tokio::test]
    async fn get_or_create_persists_a_new_thing() {
        let registry = registry();
        let thing = registry.get_or_create("camera-01").await.unwrap();
        assert_eq!(thing.version, 0);
        assert!(registry.get("camera-01").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn attach_and_persist_round_trips() {
        let registry = registry();
        let mut thing = registry.get_or_create("camera-01").await.unwrap();
        thing.attach_certificate("abc123", Utc::now());
        registry.update(&thing).await.unwrap();

        let reloaded = registry.get("camera-01").await.unwrap().unwrap();
        assert_eq!(reloaded.version, 1);
        assert!(reloaded.attached_certificate_ids.contains_key("abc123"));
    }

    #[tokio::test]
    async fn update_skips_stale_unmodified_writes() {
        let registry = registry();
        let mut thing = registry.get_or_create("camera-01").await.unwrap();
        thing.attach_certificate("abc123", Utc::now());
        registry.update(&thing).await.unwrap();

        let mut stale = thing.clone();
        stale.modified = false;
        stale.version = 0;
        registry.update(&stale).await.unwrap();

        let reloaded = registry.get("camera-01").await.unwrap().unwrap();
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    async fn delete_removes_the_thing() {
        let registry = registry();
        registry.get_or_create("camera-01").await.unwrap();
        registry.delete("camera-01").await.unwrap();
        assert!(registry.get("camera-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_name_is_rejected() {
        let registry = registry();
        let err = registry.get_or_create("bad name!").await.unwrap_err();
        assert_eq!(err.external_code(), "InvalidArgument");
    }
}
