//! Asset worker lifecycle: install, activate, and cache-first fetch.
//!
//! ## Lifecycle
//!
//! ```text
//! Parsed -> Installing -> Installed -> Activating -> Activated
//!               \-> Redundant (install failed)
//! ```
//!
//! A successful install skips the waiting phase, so `activate()` may follow
//! immediately. Only an activated worker answers fetches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::network::Network;
use super::storage::{lock_error, CacheStorage};
use super::types::{Method, Request, Response};
use crate::error::CacheError;
use crate::events::Event;
use crate::storage::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerState {
    fn as_str(self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServedFrom {
    Cache,
    Network,
    /// Offline page served for a failed navigation.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Not handled; the caller goes to the network itself.
    Passthrough,
    Served {
        response: Response,
        source: ServedFrom,
    },
}

/// An open page.
pub type ClientId = Uuid;

/// Open pages and the generation controlling each.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Option<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uncontrolled page.
    pub fn open(&self) -> Result<ClientId, CacheError> {
        let id = Uuid::new_v4();
        self.clients.lock().map_err(lock_error)?.insert(id, None);
        Ok(id)
    }

    /// Forget a page. Returns false if it was not open.
    pub fn close(&self, id: ClientId) -> Result<bool, CacheError> {
        Ok(self.clients.lock().map_err(lock_error)?.remove(&id).is_some())
    }

    pub fn controller(&self, id: ClientId) -> Option<String> {
        self.clients
            .lock()
            .ok()
            .and_then(|clients| clients.get(&id).cloned().flatten())
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put every open page under `generation`. Returns how many changed
    /// controller.
    fn claim(&self, generation: &str) -> Result<usize, CacheError> {
        let mut clients = self.clients.lock().map_err(lock_error)?;
        let mut changed = 0;
        for controller in clients.values_mut() {
            if controller.as_deref() != Some(generation) {
                *controller = Some(generation.to_string());
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// One deployed generation of the offline asset cache.
pub struct AssetWorker<S, N> {
    generation: String,
    origin: Url,
    assets: Vec<String>,
    fallback: String,
    state: WorkerState,
    storage: Arc<S>,
    network: N,
    clients: Arc<ClientRegistry>,
}

impl<S: CacheStorage, N: Network> AssetWorker<S, N> {
    pub fn new(
        config: &CacheConfig,
        storage: Arc<S>,
        network: N,
        clients: Arc<ClientRegistry>,
    ) -> Result<Self, CacheError> {
        let origin = Url::parse(&config.origin).map_err(|source| CacheError::InvalidUrl {
            input: config.origin.clone(),
            source,
        })?;
        Ok(Self {
            generation: config.generation.clone(),
            origin,
            assets: config.assets.clone(),
            fallback: config.fallback.clone(),
            state: WorkerState::Parsed,
            storage,
            network,
            clients,
        })
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, CacheError> {
        self.origin
            .join(path)
            .map_err(|source| CacheError::InvalidUrl {
                input: path.to_string(),
                source,
            })
    }

    /// Pick up a generation installed by an earlier process. Returns true if
    /// its store exists and the worker is now active.
    pub fn restore(&mut self) -> Result<bool, CacheError> {
        if self.storage.has_generation(&self.generation)? {
            self.state = WorkerState::Activated;
            return Ok(true);
        }
        Ok(false)
    }

    /// Fetch every asset and store them as one batch.
    ///
    /// Any failed fetch or non-2xx status aborts the install with nothing
    /// written; the worker becomes redundant and older generations keep
    /// serving.
    pub async fn install(&mut self) -> Result<Event, CacheError> {
        self.expect_state(WorkerState::Parsed, "install")?;
        self.state = WorkerState::Installing;
        tracing::info!(generation = %self.generation, "installing asset cache");

        match self.collect_assets().await {
            Ok(entries) => {
                let count = entries.len();
                if let Err(e) = self.storage.put_all(&self.generation, entries) {
                    self.state = WorkerState::Redundant;
                    return Err(e);
                }
                self.state = WorkerState::Installed;
                tracing::debug!(generation = %self.generation, "skipping waiting");
                Ok(Event::CacheInstalled {
                    generation: self.generation.clone(),
                    assets: count,
                    at: Utc::now(),
                })
            }
            Err(e) => {
                tracing::error!(generation = %self.generation, error = %e, "caching failed");
                self.state = WorkerState::Redundant;
                Err(e)
            }
        }
    }

    /// Delete every other generation and take control of open pages.
    pub async fn activate(&mut self) -> Result<Event, CacheError> {
        self.expect_state(WorkerState::Installed, "activate")?;
        self.state = WorkerState::Activating;

        let mut deleted = Vec::new();
        for name in self.storage.generations()? {
            if name != self.generation {
                tracing::info!(generation = %name, "deleting old cache");
                self.storage.delete(&name)?;
                deleted.push(name);
            }
        }

        let clients_claimed = self.clients.claim(&self.generation)?;
        self.state = WorkerState::Activated;
        tracing::info!(
            generation = %self.generation,
            deleted = deleted.len(),
            clients_claimed,
            "asset cache activated"
        );
        Ok(Event::CacheActivated {
            generation: self.generation.clone(),
            deleted,
            clients_claimed,
            at: Utc::now(),
        })
    }

    /// Serve a request cache-first.
    ///
    /// Misses go to the network and cacheable answers are stored. When the
    /// network fails, navigations get the cached fallback page and every
    /// other request gets the error.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, CacheError> {
        if request.method != Method::Get || self.state != WorkerState::Activated {
            return Ok(FetchOutcome::Passthrough);
        }

        let key = request.cache_key();
        if let Some(entry) = self.storage.get(&self.generation, &key)? {
            tracing::trace!(url = %request.url, "serving from cache");
            return Ok(FetchOutcome::Served {
                response: entry.response,
                source: ServedFrom::Cache,
            });
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    if let Err(e) = self.storage.put(&self.generation, &key, &response) {
                        tracing::warn!(url = %request.url, error = %e, "failed to cache response");
                    }
                }
                Ok(FetchOutcome::Served {
                    response,
                    source: ServedFrom::Network,
                })
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "network request failed");
                if !request.is_navigation() {
                    return Err(e);
                }
                let fallback = Request::get(self.resolve(&self.fallback)?);
                match self.storage.get(&self.generation, &fallback.cache_key())? {
                    Some(entry) => {
                        tracing::info!(fallback = %self.fallback, "serving offline fallback");
                        Ok(FetchOutcome::Served {
                            response: entry.response,
                            source: ServedFrom::Fallback,
                        })
                    }
                    None => Err(CacheError::FallbackMissing(self.fallback.clone())),
                }
            }
        }
    }

    async fn collect_assets(&self) -> Result<Vec<(String, Response)>, CacheError> {
        let mut entries = Vec::with_capacity(self.assets.len());
        for path in &self.assets {
            let request = Request::get(self.resolve(path)?);
            let install_error = |message: String| CacheError::InstallFailed {
                generation: self.generation.clone(),
                asset: path.clone(),
                message,
            };
            let response = self
                .network
                .fetch(&request)
                .await
                .map_err(|e| install_error(e.to_string()))?;
            if !response.ok() {
                return Err(install_error(format!("status {}", response.status)));
            }
            entries.push((request.cache_key(), response));
        }
        Ok(entries)
    }

    fn expect_state(&self, expected: WorkerState, action: &str) -> Result<(), CacheError> {
        if self.state != expected {
            return Err(CacheError::Lifecycle {
                state: self.state.as_str().to_string(),
                action: action.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use crate::cache::types::{RequestMode, ResponseType};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Serves fixed bodies by path; can go offline or fail chosen paths.
    #[derive(Default)]
    struct FakeNetwork {
        offline: AtomicBool,
        broken: HashSet<String>,
        calls: AtomicUsize,
    }

    impl FakeNetwork {
        fn broken(paths: &[&str]) -> Self {
            Self {
                broken: paths.iter().map(|p| p.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = request.url.path().to_string();
            if self.offline.load(Ordering::SeqCst) || self.broken.contains(&path) {
                return Err(CacheError::Network {
                    url: request.url.to_string(),
                    message: "offline".into(),
                });
            }
            match path.as_str() {
                "/missing.png" => Ok(Response::new(404, ResponseType::Basic, "")),
                "/cdn.js" => Ok(Response::new(0, ResponseType::Opaque, Vec::new())),
                _ => Ok(Response::new(200, ResponseType::Basic, format!("body of {path}"))),
            }
        }
    }

    fn config(generation: &str) -> CacheConfig {
        CacheConfig {
            generation: generation.to_string(),
            ..CacheConfig::default()
        }
    }

    fn worker(
        generation: &str,
        storage: &Arc<MemoryStorage>,
        network: FakeNetwork,
    ) -> AssetWorker<MemoryStorage, FakeNetwork> {
        AssetWorker::new(
            &config(generation),
            Arc::clone(storage),
            network,
            Arc::new(ClientRegistry::new()),
        )
        .unwrap()
    }

    async fn active(storage: &Arc<MemoryStorage>) -> AssetWorker<MemoryStorage, FakeNetwork> {
        let mut w = worker("v1", storage, FakeNetwork::default());
        w.install().await.unwrap();
        w.activate().await.unwrap();
        w
    }

    fn get(w: &AssetWorker<MemoryStorage, FakeNetwork>, path: &str) -> Request {
        Request::get(w.resolve(path).unwrap())
    }

    #[tokio::test]
    async fn install_stores_exactly_the_asset_list() {
        let storage = Arc::new(MemoryStorage::new());
        let mut w = worker("v1", &storage, FakeNetwork::default());
        let event = w.install().await.unwrap();
        assert!(matches!(event, Event::CacheInstalled { assets: 4, .. }));
        assert_eq!(w.state(), WorkerState::Installed);

        let mut keys = storage.keys("v1").unwrap();
        keys.sort();
        let mut expected: Vec<String> = CacheConfig::default()
            .assets
            .iter()
            .map(|p| get(&w, p).cache_key())
            .collect();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let mut w = worker("v1", &storage, FakeNetwork::broken(&["/app.js"]));
        let err = w.install().await.unwrap_err();
        assert!(matches!(err, CacheError::InstallFailed { ref asset, .. } if asset == "/app.js"));
        assert_eq!(w.state(), WorkerState::Redundant);
        assert!(!storage.has_generation("v1").unwrap());
    }

    #[tokio::test]
    async fn install_rejects_error_status() {
        let storage = Arc::new(MemoryStorage::new());
        let mut cfg = config("v1");
        cfg.assets.push("/missing.png".into());
        let mut w = AssetWorker::new(
            &cfg,
            Arc::clone(&storage),
            FakeNetwork::default(),
            Arc::new(ClientRegistry::new()),
        )
        .unwrap();
        assert!(w.install().await.is_err());
        assert!(storage.generations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_previous_generation() {
        let storage = Arc::new(MemoryStorage::new());
        let _v1 = active(&storage).await;
        let mut v2 = worker("v2", &storage, FakeNetwork::broken(&["/manifest.json"]));
        assert!(v2.install().await.is_err());
        assert_eq!(storage.generations().unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn activate_deletes_older_generations() {
        let storage = Arc::new(MemoryStorage::new());
        let _v1 = active(&storage).await;
        let mut v2 = worker("v2", &storage, FakeNetwork::default());
        v2.install().await.unwrap();
        assert_eq!(storage.generations().unwrap(), vec!["v1", "v2"]);

        let event = v2.activate().await.unwrap();
        match event {
            Event::CacheActivated { deleted, .. } => assert_eq!(deleted, vec!["v1"]),
            other => panic!("Expected CacheActivated, got {other:?}"),
        }
        assert_eq!(storage.generations().unwrap(), vec!["v2"]);
        assert_eq!(storage.keys("v2").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn activate_claims_open_clients() {
        let storage = Arc::new(MemoryStorage::new());
        let clients = Arc::new(ClientRegistry::new());
        let page = clients.open().unwrap();
        let mut w = AssetWorker::new(
            &config("v1"),
            Arc::clone(&storage),
            FakeNetwork::default(),
            Arc::clone(&clients),
        )
        .unwrap();
        assert_eq!(clients.controller(page), None);
        w.install().await.unwrap();
        match w.activate().await.unwrap() {
            Event::CacheActivated { clients_claimed, .. } => assert_eq!(clients_claimed, 1),
            other => panic!("Expected CacheActivated, got {other:?}"),
        }
        assert_eq!(clients.controller(page).as_deref(), Some("v1"));
    }

    #[test]
    fn registry_tracks_open_pages() {
        let clients = ClientRegistry::new();
        let a = clients.open().unwrap();
        let b = clients.open().unwrap();
        assert_ne!(a, b);
        assert_eq!(clients.len(), 2);
        assert!(clients.close(a).unwrap());
        assert!(!clients.close(a).unwrap());
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.controller(b), None);
    }

    #[test]
    fn poisoned_registry_reports_an_error() {
        let clients = Arc::new(ClientRegistry::new());
        let poisoner = Arc::clone(&clients);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.clients.lock().unwrap();
            panic!("poison the registry lock");
        })
        .join();
        assert!(matches!(clients.open(), Err(CacheError::Storage(_))));
        assert!(clients.close(Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn lifecycle_steps_must_be_in_order() {
        let storage = Arc::new(MemoryStorage::new());
        let mut w = worker("v1", &storage, FakeNetwork::default());
        assert!(matches!(
            w.activate().await,
            Err(CacheError::Lifecycle { .. })
        ));
        w.install().await.unwrap();
        assert!(w.install().await.is_err());
    }

    #[tokio::test]
    async fn cache_hit_skips_network() {
        let storage = Arc::new(MemoryStorage::new());
        let w = active(&storage).await;
        let before = w.network.calls.load(Ordering::SeqCst);
        let outcome = w.handle_fetch(&get(&w, "/app.js")).await.unwrap();
        match outcome {
            FetchOutcome::Served { response, source } => {
                assert_eq!(source, ServedFrom::Cache);
                assert_eq!(response.text(), "body of /app.js");
            }
            other => panic!("Expected Served, got {other:?}"),
        }
        assert_eq!(w.network.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn miss_populates_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let w = active(&storage).await;
        let req = get(&w, "/style.css");
        let first = w.handle_fetch(&req).await.unwrap();
        assert!(matches!(first, FetchOutcome::Served { source: ServedFrom::Network, .. }));
        assert!(storage.get("v1", &req.cache_key()).unwrap().is_some());

        w.network.offline.store(true, Ordering::SeqCst);
        let second = w.handle_fetch(&req).await.unwrap();
        assert!(matches!(second, FetchOutcome::Served { source: ServedFrom::Cache, .. }));
    }

    #[tokio::test]
    async fn uncacheable_responses_pass_through_unstored() {
        let storage = Arc::new(MemoryStorage::new());
        let w = active(&storage).await;
        for path in ["/missing.png", "/cdn.js"] {
            let req = get(&w, path);
            let outcome = w.handle_fetch(&req).await.unwrap();
            assert!(matches!(outcome, FetchOutcome::Served { source: ServedFrom::Network, .. }));
            assert!(storage.get("v1", &req.cache_key()).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn non_get_passes_through() {
        let storage = Arc::new(MemoryStorage::new());
        let w = active(&storage).await;
        let req = get(&w, "/app.js").with_method(Method::Post);
        assert_eq!(w.handle_fetch(&req).await.unwrap(), FetchOutcome::Passthrough);
    }

    #[tokio::test]
    async fn inactive_worker_passes_through() {
        let storage = Arc::new(MemoryStorage::new());
        let w = worker("v1", &storage, FakeNetwork::default());
        let req = get(&w, "/app.js");
        assert_eq!(w.handle_fetch(&req).await.unwrap(), FetchOutcome::Passthrough);
    }

    #[tokio::test]
    async fn offline_navigation_falls_back_to_index() {
        let storage = Arc::new(MemoryStorage::new());
        let w = active(&storage).await;
        w.network.offline.store(true, Ordering::SeqCst);
        let req = Request::navigate(w.resolve("/settings").unwrap());
        match w.handle_fetch(&req).await.unwrap() {
            FetchOutcome::Served { response, source } => {
                assert_eq!(source, ServedFrom::Fallback);
                assert_eq!(response.text(), "body of /index.html");
            }
            other => panic!("Expected Served, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_subresource_propagates_error() {
        let storage = Arc::new(MemoryStorage::new());
        let w = active(&storage).await;
        w.network.offline.store(true, Ordering::SeqCst);
        let req = get(&w, "/extra.js").with_mode(RequestMode::NoCors);
        assert!(matches!(
            w.handle_fetch(&req).await,
            Err(CacheError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn restore_activates_existing_generation() {
        let storage = Arc::new(MemoryStorage::new());
        let _v1 = active(&storage).await;
        let mut again = worker("v1", &storage, FakeNetwork::default());
        assert!(again.restore().unwrap());
        assert_eq!(again.state(), WorkerState::Activated);

        let mut other = worker("v9", &storage, FakeNetwork::default());
        assert!(!other.restore().unwrap());
        assert_eq!(other.state(), WorkerState::Parsed);
    }
}
