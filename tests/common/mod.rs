//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use keep_client::{
    BlockTransport, Collection, CollectionStore, KeepError, KeepService, KeepServiceList,
    KeepServicesSource, Locator, Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// Signature every mock endpoint stamps onto stored blocks
pub const TEST_SIGNATURE: &str = "Adeadbeef@7fffffff";

/// `n` disk services, `zzzzz-bi6l4-00000000000000<i>` on `keep<i>.example`
pub fn disk_services(n: usize) -> Vec<KeepService> {
    (0..n).map(|i| service(i, "disk")).collect()
}

pub fn service(i: usize, service_type: &str) -> KeepService {
    KeepService {
        uuid: format!("zzzzz-bi6l4-{:015}", i),
        service_host: format!("keep{}.example", i),
        service_port: 25107,
        service_ssl_flag: false,
        service_type: service_type.to_string(),
        read_only: false,
    }
}

// =============================================================================
// Accessible services
// =============================================================================

pub struct MockServices {
    services: Mutex<Vec<KeepService>>,
    available: AtomicBool,
    call_count: AtomicU32,
}

impl MockServices {
    pub fn new(services: Vec<KeepService>) -> Self {
        Self {
            services: Mutex::new(services),
            available: AtomicBool::new(true),
            call_count: AtomicU32::new(0),
        }
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Replace the listing returned by later calls
    pub fn set_services(&self, services: Vec<KeepService>) {
        *self.services.lock().unwrap() = services;
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeepServicesSource for MockServices {
    async fn accessible(&self) -> Result<KeepServiceList> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(KeepError::Server {
                status: 503,
                message: "api server down".into(),
            });
        }
        let items = self.services.lock().unwrap().clone();
        Ok(KeepServiceList {
            items_available: Some(items.len() as u64),
            items,
        })
    }
}

// =============================================================================
// Block storage
// =============================================================================

/// Per-root in-memory block stores with failure switches
#[derive(Default)]
pub struct MockTransport {
    stores: Mutex<HashMap<String, HashMap<String, Bytes>>>,
    failing: Mutex<HashSet<String>>,
    transient_failures: AtomicU32,
    put_calls: AtomicU32,
    get_calls: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request to `root` fails with a 500
    pub fn fail_root(&self, root: &str) {
        self.failing.lock().unwrap().insert(root.to_string());
    }

    /// The next `n` requests fail with a 503, wherever they go
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Seed `root` with arbitrary bytes under `locator`
    pub fn insert_block(&self, root: &str, locator: &Locator, data: &[u8]) {
        self.stores
            .lock()
            .unwrap()
            .entry(root.to_string())
            .or_default()
            .insert(locator.stripped(), Bytes::copy_from_slice(data));
    }

    /// Roots currently holding the block
    pub fn roots_holding(&self, locator: &Locator) -> Vec<String> {
        let mut roots: Vec<String> = self
            .stores
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, blocks)| blocks.contains_key(&locator.stripped()))
            .map(|(root, _)| root.clone())
            .collect();
        roots.sort();
        roots
    }

    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_root(&self, root: &str) -> Result<()> {
        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(KeepError::Server {
                status: 503,
                message: "try again".into(),
            });
        }
        if self.failing.lock().unwrap().contains(root) {
            return Err(KeepError::Server {
                status: 500,
                message: format!("{} is broken", root),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlockTransport for MockTransport {
    async fn put_block(&self, root: &str, hash: &str, data: Bytes, _copies: u32) -> Result<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_root(root)?;

        let stripped = format!("{}+{}", hash, data.len());
        self.stores
            .lock()
            .unwrap()
            .entry(root.to_string())
            .or_default()
            .insert(stripped.clone(), data);
        Ok(format!("{}+{}", stripped, TEST_SIGNATURE))
    }

    async fn get_block(&self, root: &str, locator: &Locator) -> Result<Bytes> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_root(root)?;

        self.stores
            .lock()
            .unwrap()
            .get(root)
            .and_then(|blocks| blocks.get(&locator.stripped()))
            .cloned()
            .ok_or_else(|| KeepError::NotFound(format!("{}{}", root, locator)))
    }
}

// =============================================================================
// Collections
// =============================================================================

#[derive(Default)]
pub struct MockCollections {
    collections: Mutex<HashMap<String, Collection>>,
    next_id: AtomicU32,
}

impl MockCollections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a collection directly, bypassing `create`
    pub fn insert(&self, uuid: &str, manifest_text: &str) {
        let collection = Collection {
            uuid: Some(uuid.to_string()),
            manifest_text: Some(manifest_text.to_string()),
            ..Default::default()
        };
        self.collections
            .lock()
            .unwrap()
            .insert(uuid.to_string(), collection);
    }

    /// Store a collection as given, manifest text included or not
    pub fn insert_collection(&self, collection: Collection) {
        let uuid = collection.uuid.clone().unwrap_or_default();
        self.collections.lock().unwrap().insert(uuid, collection);
    }

    pub fn manifest_text(&self, uuid: &str) -> Option<String> {
        self.collections
            .lock()
            .unwrap()
            .get(uuid)
            .and_then(|c| c.manifest_text.clone())
    }
}

#[async_trait]
impl CollectionStore for MockCollections {
    async fn get(&self, uuid: &str) -> Result<Collection> {
        self.collections
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| KeepError::NotFound(format!("collection {}", uuid)))
    }

    async fn create(&self, collection: &Collection) -> Result<Collection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let uuid = format!("zzzzz-4zz18-{:015}", id);
        let mut created = collection.clone();
        created.uuid = Some(uuid.clone());
        self.collections
            .lock()
            .unwrap()
            .insert(uuid, created.clone());
        Ok(created)
    }

    async fn update(&self, uuid: &str, collection: &Collection) -> Result<Collection> {
        let mut collections = self.collections.lock().unwrap();
        let existing = collections
            .get_mut(uuid)
            .ok_or_else(|| KeepError::NotFound(format!("collection {}", uuid)))?;
        if let Some(name) = &collection.name {
            existing.name = Some(name.clone());
        }
        if let Some(text) = &collection.manifest_text {
            existing.manifest_text = Some(text.clone());
        }
        Ok(existing.clone())
    }
}

/// Deterministic test bytes: `len` bytes cycling from `seed`
pub fn test_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
}
