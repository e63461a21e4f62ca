use crate::datamodel::ArtifactLocator;
use crate::storage::ArtifactStore;
use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<String, StoredObject>,
    failing_puts: u32,
    always_fail: bool,
    put_calls: usize,
}

#[derive(Debug)]
pub struct MemoryStore {
    bucket: String,
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// A store that rejects every write.
    pub fn failing(bucket: &str) -> Self {
        let store = Self::new(bucket);
        store.state.lock().unwrap().always_fail = true;
        store
    }

    pub fn fail_next_puts(&self, count: u32) {
        self.state.lock().unwrap().failing_puts = count;
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn put_calls(&self) -> usize {
        self.state.lock().unwrap().put_calls
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().objects.contains_key(key))
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<ArtifactLocator> {
        let mut state = self.state.lock().unwrap();
        state.put_calls += 1;
        if state.always_fail {
            bail!("bucket {} unavailable", self.bucket);
        }
        if state.failing_puts > 0 {
            state.failing_puts -= 1;
            bail!("transient store failure");
        }
        if state.objects.contains_key(key) {
            bail!("object {} already exists", key);
        }
        state.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(ArtifactLocator {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            resource_id: format!("memory:{}", self.bucket),
            uri: format!("memory://{}/{}", self.bucket, key),
        })
    }
}
