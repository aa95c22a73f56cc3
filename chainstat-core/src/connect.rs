//! Server handles and the per-server connection cache.
//!
//! A [`ServerHandle`] bundles everything one upstream server needs: the
//! authenticated fetch client, the per-server string interner, and the build
//! store. Handles are expensive to construct (they open an authenticated
//! session), so the [`ConnectionCache`] deduplicates them by
//! `user:server` key with a single-flight guarantee: concurrent requests for
//! an unseen key share one construction, and construction failures reach
//! every waiter without poisoning the slot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::creds::CredentialsProvider;
use crate::error::{ChainstatError, ConnectError, UpstreamError};
use crate::interner::StringInterner;
use crate::store::{BuildStore, MemoryBuildStore, SqliteBuildStore};
use crate::types::{BuildId, BuildRecord, KnownCodes};
use crate::upstream::{RestClient, UpstreamClient};

// ── Server handle ──────────────────────────────────────────────────

/// One live, authenticated session to one upstream server for one effective
/// identity. Owned by the [`ConnectionCache`]; shared by all callers with
/// the same cache key.
pub struct ServerHandle {
    server_code: String,
    interner: Arc<StringInterner>,
    codes: KnownCodes,
    store: Arc<dyn BuildStore>,
    client: Arc<dyn UpstreamClient>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("server_code", &self.server_code)
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    pub fn new(
        server_code: impl Into<String>,
        client: Arc<dyn UpstreamClient>,
        store: Arc<dyn BuildStore>,
        interner: Arc<StringInterner>,
    ) -> Self {
        let codes = KnownCodes::intern(&interner);
        Self {
            server_code: server_code.into(),
            interner,
            codes,
            store,
            client,
        }
    }

    pub fn server_code(&self) -> &str {
        &self.server_code
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    pub fn codes(&self) -> &KnownCodes {
        &self.codes
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    /// Cached fetch-through for one full build record.
    ///
    /// A cached finished build is never re-fetched. `Ok(None)` means the
    /// build does not exist upstream (or the retry budget was exhausted) —
    /// the caller records it as missing and carries on. Authentication
    /// failures and store integrity violations propagate.
    pub async fn fat_build(&self, id: BuildId) -> crate::error::Result<Option<BuildRecord>> {
        if let Some(record) = self.store.get(id).await? {
            return Ok(Some(record));
        }

        let raw = match self.client.fetch_build(id).await {
            Ok(raw) => raw,
            Err(UpstreamError::NotFound(_)) => {
                debug!(server = %self.server_code, build = %id, "build not found upstream");
                return Ok(None);
            }
            Err(UpstreamError::Transient(msg)) => {
                warn!(server = %self.server_code, build = %id, error = %msg,
                      "upstream unavailable, treating build as missing");
                return Ok(None);
            }
            Err(e) => return Err(ChainstatError::Upstream(e)),
        };

        let mut record = raw.compact(&self.interner);

        // The record is only complete with its tests and problems. A failed
        // auxiliary fetch makes the whole build missing for this request:
        // persisting a partial record would cache wrong counts forever,
        // since finished builds are never re-fetched.
        match self.client.fetch_tests(id).await {
            Ok(tests) => {
                record.add_tests(tests.iter().map(|t| t.compact(&self.interner)));
            }
            Err(e @ UpstreamError::Auth(_)) => return Err(ChainstatError::Upstream(e)),
            Err(e) => {
                warn!(build = %id, error = %e,
                      "failed to fetch test occurrences, treating build as missing");
                return Ok(None);
            }
        }
        match self.client.fetch_problems(id).await {
            Ok(problems) => {
                record.add_problems(
                    problems.iter().map(|p| self.interner.intern(&p.problem_type)),
                );
            }
            Err(e @ UpstreamError::Auth(_)) => return Err(ChainstatError::Upstream(e)),
            Err(e) => {
                warn!(build = %id, error = %e,
                      "failed to fetch problem occurrences, treating build as missing");
                return Ok(None);
            }
        }

        // Only finished builds are immutable; running builds stay uncached.
        if record.state == self.codes.finished {
            self.store.put(record.clone()).await?;
        }
        Ok(Some(record))
    }
}

// ── Handle factory ─────────────────────────────────────────────────

/// Opens an authenticated [`ServerHandle`]. The cache calls this at most
/// once per key concurrently.
#[async_trait::async_trait]
pub trait HandleFactory: Send + Sync {
    async fn open(
        &self,
        server_code: &str,
        creds: Arc<dyn CredentialsProvider>,
    ) -> crate::error::Result<ServerHandle>;
}

/// Default factory: REST client from the server config, sqlite store under
/// `data_dir` when set, in-memory store otherwise.
#[derive(Debug)]
pub struct ConfigHandleFactory {
    config: BotConfig,
    data_dir: Option<PathBuf>,
}

impl ConfigHandleFactory {
    pub fn new(config: BotConfig, data_dir: Option<PathBuf>) -> Self {
        Self { config, data_dir }
    }
}

#[async_trait::async_trait]
impl HandleFactory for ConfigHandleFactory {
    async fn open(
        &self,
        server_code: &str,
        creds: Arc<dyn CredentialsProvider>,
    ) -> crate::error::Result<ServerHandle> {
        let entry = self.config.server(server_code)?;
        let client = RestClient::new(
            entry.code.clone(),
            entry.url.clone(),
            creds.token(server_code),
        );

        let interner = Arc::new(StringInterner::new());
        let store: Arc<dyn BuildStore> = match &self.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    ChainstatError::Connect(ConnectError::Construction(format!(
                        "create data dir {}: {e}",
                        dir.display()
                    )))
                })?;
                Arc::new(SqliteBuildStore::open(
                    &dir.join(format!("{server_code}.db")),
                    Arc::clone(&interner),
                )?)
            }
            None => Arc::new(MemoryBuildStore::new()),
        };

        info!(server = %server_code, "opened upstream server handle");
        Ok(ServerHandle::new(
            server_code,
            Arc::new(client),
            store,
            interner,
        ))
    }
}

// ── Connection cache ───────────────────────────────────────────────

type SlotResult = Result<Arc<ServerHandle>, String>;

/// A cache slot is either a live handle or an in-flight construction whose
/// completion every waiter observes through the watch channel.
enum Slot {
    Ready {
        handle: Arc<ServerHandle>,
        last_access: Instant,
    },
    Building(watch::Receiver<Option<SlotResult>>),
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready { .. } => f.write_str("Ready"),
            Self::Building(_) => f.write_str("Building"),
        }
    }
}

/// Deduplicating cache of server handles, keyed by effective user identity
/// and effective (alias-resolved) server code.
///
/// Idle handles are evicted after a bounded window; total entries are
/// bounded with least-recently-used eviction as backstop. In-flight
/// constructions are never evicted and never cancelled by a caller
/// abandoning its request.
pub struct ConnectionCache {
    config: BotConfig,
    factory: Arc<dyn HandleFactory>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    idle_after: Duration,
    max_entries: usize,
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("idle_after", &self.idle_after)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl ConnectionCache {
    pub fn new(config: BotConfig, factory: Arc<dyn HandleFactory>) -> Self {
        let idle_after = Duration::from_secs(config.cache.idle_minutes * 60);
        let max_entries = config.cache.max_entries;
        Self {
            config,
            factory,
            slots: Arc::new(Mutex::new(HashMap::new())),
            idle_after,
            max_entries,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Whether the caller may use a server, evaluated against the configured
    /// access reference. Pure function of credentials and configuration —
    /// never constructs a handle.
    pub fn has_access(
        &self,
        server_code: &str,
        creds: &dyn CredentialsProvider,
    ) -> crate::error::Result<bool> {
        let access_key = self.config.access_reference(server_code)?;
        Ok(creds.has_access(access_key))
    }

    /// Get or construct the handle for a server and caller identity.
    pub async fn handle(
        &self,
        server_code: &str,
        creds: Arc<dyn CredentialsProvider>,
    ) -> crate::error::Result<Arc<ServerHandle>> {
        let real_code = self.config.resolve_alias(server_code)?.to_string();
        let user = creds.user(&real_code).unwrap_or_default();
        let key = format!("{user}:{real_code}");

        loop {
            let mut rx = {
                let mut slots = self.slots.lock().expect("connection cache lock poisoned");
                self.evict_locked(&mut slots);
                match slots.get_mut(&key) {
                    Some(Slot::Ready {
                        handle,
                        last_access,
                    }) => {
                        *last_access = Instant::now();
                        return Ok(Arc::clone(handle));
                    }
                    Some(Slot::Building(rx)) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(key.clone(), Slot::Building(rx.clone()));
                        self.spawn_builder(key.clone(), real_code.clone(), &creds, tx);
                        rx
                    }
                }
            };

            // Await the shared construction outcome.
            loop {
                let published = rx.borrow_and_update().clone();
                if let Some(result) = published {
                    return result.map_err(|msg| {
                        ChainstatError::Connect(ConnectError::Construction(msg))
                    });
                }
                if rx.changed().await.is_err() {
                    // Builder vanished without publishing. Clear the dead
                    // slot (if it is still ours) and retry from scratch.
                    let mut slots =
                        self.slots.lock().expect("connection cache lock poisoned");
                    if matches!(slots.get(&key), Some(Slot::Building(slot_rx))
                        if slot_rx.same_channel(&rx))
                    {
                        slots.remove(&key);
                    }
                    break;
                }
            }
        }
    }

    /// Launch construction on a detached task: a caller abandoning its
    /// request must not cancel an in-flight construction other waiters
    /// share.
    fn spawn_builder(
        &self,
        key: String,
        real_code: String,
        creds: &Arc<dyn CredentialsProvider>,
        tx: watch::Sender<Option<SlotResult>>,
    ) {
        let factory = Arc::clone(&self.factory);
        let slots = Arc::clone(&self.slots);
        let creds = Arc::clone(creds);
        let idle_after = self.idle_after;
        let max_entries = self.max_entries;
        tokio::spawn(async move {
            let result: SlotResult = factory
                .open(&real_code, creds)
                .await
                .map(Arc::new)
                .map_err(|e| e.to_string());

            {
                let mut slots = slots.lock().expect("connection cache lock poisoned");
                match &result {
                    Ok(handle) => {
                        slots.insert(
                            key,
                            Slot::Ready {
                                handle: Arc::clone(handle),
                                last_access: Instant::now(),
                            },
                        );
                        // The entry bound holds the moment a slot turns
                        // Ready; the freshest entry survives the backstop.
                        evict(&mut slots, idle_after, max_entries);
                    }
                    // Failure collapses the slot back to absent: the next
                    // caller retries construction from scratch.
                    Err(msg) => {
                        warn!(error = %msg, "server handle construction failed");
                        slots.remove(&key);
                    }
                }
            }
            let _ = tx.send(Some(result));
        });
    }

    fn evict_locked(&self, slots: &mut HashMap<String, Slot>) {
        evict(slots, self.idle_after, self.max_entries);
    }

    /// Number of live cache entries (ready or building).
    pub fn len(&self) -> usize {
        self.slots.lock().expect("connection cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop idle handles, then enforce the entry bound LRU-wise. In-flight
/// constructions are exempt. Called on every cache access and whenever a
/// builder publishes a ready slot.
fn evict(slots: &mut HashMap<String, Slot>, idle_after: Duration, max_entries: usize) {
    let now = Instant::now();
    slots.retain(|key, slot| match slot {
        Slot::Ready { last_access, .. } => {
            let keep = now.duration_since(*last_access) < idle_after;
            if !keep {
                debug!(key = %key, "evicting idle server handle");
            }
            keep
        }
        Slot::Building(_) => true,
    });

    while slots.len() > max_entries {
        let oldest = slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready { last_access, .. } => Some((key.clone(), *last_access)),
                Slot::Building(_) => None,
            })
            .min_by_key(|(_, at)| *at);
        match oldest {
            Some((key, _)) => {
                debug!(key = %key, "evicting server handle (LRU backstop)");
                slots.remove(&key);
            }
            None => break,
        }
    }
}
