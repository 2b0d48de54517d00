//! Session factory, sessions and the persistence context.
//!
//! A [`SessionFactory`] bundles the collaborators shared by every unit of work
//! (driver, translator, dialect, query cache, statistics sink and
//! configuration). A [`Session`] is one unit of work: it owns the identity map,
//! the registered subselect fetches and the non-lazy collections waiting to be
//! initialized after a batch finishes streaming.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ormbatch_proto::{SqlCommand, Value};
use parking_lot::Mutex;

use crate::cache::{InMemoryQueryCache, QueryCache};
use crate::config::BatchConfig;
use crate::driver::{CursorGuard, Driver};
use crate::entity::{Entity, EntityKey, EntityRef};
use crate::error::Error;
use crate::loader::CollectionLoader;
use crate::metrics::{QueryStatistics, StatisticsSink};
use crate::translator::QueryTranslator;

/// Capabilities of the backing store's SQL dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    /// Dialect name.
    pub name: String,
    /// Whether row offsets and limits can be pushed into the command.
    pub supports_limit_offset: bool,
}

impl Dialect {
    /// Create a dialect with LIMIT/OFFSET support.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supports_limit_offset: true,
        }
    }

    /// Set LIMIT/OFFSET support.
    pub fn with_limit_offset(mut self, supported: bool) -> Self {
        self.supports_limit_offset = supported;
        self
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::new("generic")
    }
}

/// Shared collaborators for all sessions.
pub struct SessionFactory {
    driver: Arc<dyn Driver>,
    translator: Arc<dyn QueryTranslator>,
    dialect: Dialect,
    query_cache: Option<Arc<dyn QueryCache>>,
    statistics: Option<Arc<dyn StatisticsSink>>,
    config: BatchConfig,
}

impl SessionFactory {
    /// Start building a factory.
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder::default()
    }

    /// Open a new unit of work.
    pub fn open_session(self: &Arc<Self>) -> Arc<Session> {
        Arc::new(Session::new(self.clone()))
    }

    /// The driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// The mapping collaborator.
    pub fn translator(&self) -> &Arc<dyn QueryTranslator> {
        &self.translator
    }

    /// The SQL dialect.
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// The configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The query cache, when caching is enabled.
    pub fn query_cache(&self) -> Option<&Arc<dyn QueryCache>> {
        if self.config.query_cache_enabled {
            self.query_cache.as_ref()
        } else {
            None
        }
    }

    /// The statistics sink, when statistics are enabled.
    pub fn statistics(&self) -> Option<&Arc<dyn StatisticsSink>> {
        if self.config.statistics_enabled {
            self.statistics.as_ref()
        } else {
            None
        }
    }

    /// Whether batches may be combined into one request.
    pub fn supports_multiple_queries(&self) -> bool {
        self.config.use_multiple_queries && self.driver.supports_multiple_queries()
    }
}

/// Builder for [`SessionFactory`].
#[derive(Default)]
pub struct SessionFactoryBuilder {
    driver: Option<Arc<dyn Driver>>,
    translator: Option<Arc<dyn QueryTranslator>>,
    dialect: Dialect,
    query_cache: Option<Arc<dyn QueryCache>>,
    statistics: Option<Arc<dyn StatisticsSink>>,
    config: BatchConfig,
}

impl SessionFactoryBuilder {
    /// Set the driver.
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Set the mapping collaborator.
    pub fn with_translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Set the dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Use a specific query cache.
    pub fn with_query_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    /// Use a specific statistics sink.
    pub fn with_statistics(mut self, sink: Arc<dyn StatisticsSink>) -> Self {
        self.statistics = Some(sink);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the factory.
    ///
    /// Enabled features without an explicit collaborator get in-process
    /// defaults.
    pub fn build(self) -> Result<Arc<SessionFactory>, Error> {
        self.config.validate()?;
        let driver = self
            .driver
            .ok_or_else(|| Error::Config("session factory requires a driver".into()))?;
        let translator = self
            .translator
            .ok_or_else(|| Error::Config("session factory requires a translator".into()))?;

        let query_cache = match self.query_cache {
            Some(cache) => Some(cache),
            None if self.config.query_cache_enabled => Some(Arc::new(InMemoryQueryCache::new(
                self.config.query_cache_capacity,
            )) as Arc<dyn QueryCache>),
            None => None,
        };
        let statistics = match self.statistics {
            Some(sink) => Some(sink),
            None if self.config.statistics_enabled => {
                Some(Arc::new(QueryStatistics::new()) as Arc<dyn StatisticsSink>)
            }
            None => None,
        };

        tracing::debug!(
            driver = driver.name(),
            dialect = %self.dialect.name,
            query_cache = query_cache.is_some(),
            statistics = statistics.is_some(),
            "built session factory"
        );

        Ok(Arc::new(SessionFactory {
            driver,
            translator,
            dialect: self.dialect,
            query_cache,
            statistics,
            config: self.config,
        }))
    }
}

/// A subselect definition: the command that loaded a set of owners, reused to
/// load a lazy collection for all of them at once.
#[derive(Debug, Clone)]
pub struct SubselectFetch {
    /// Command that produced the owners.
    pub command: SqlCommand,
    /// Every owner read by that command.
    pub owner_keys: Vec<EntityKey>,
    /// Tables the owner command depends on.
    pub query_spaces: BTreeSet<String>,
}

impl SubselectFetch {
    /// Create a subselect definition.
    pub fn new(
        command: SqlCommand,
        owner_keys: Vec<EntityKey>,
        query_spaces: BTreeSet<String>,
    ) -> Self {
        Self {
            command,
            owner_keys,
            query_spaces,
        }
    }

    /// Owner identifiers as bindable values.
    pub fn owner_ids(&self) -> Vec<Value> {
        self.owner_keys.iter().map(EntityKey::id_value).collect()
    }
}

/// A collection that must be loaded once the current batch completes.
pub struct PendingCollection {
    /// Owning entity.
    pub owner: EntityRef,
    /// Collection role on the owner.
    pub role: String,
    /// How to load it.
    pub loader: Arc<dyn CollectionLoader>,
}

/// Per-session bookkeeping.
#[derive(Default)]
struct PersistenceContext {
    entities: HashMap<EntityKey, EntityRef>,
    subselects: HashMap<EntityKey, Arc<SubselectFetch>>,
    non_lazy: Vec<PendingCollection>,
    default_read_only: bool,
}

/// One unit of work.
pub struct Session {
    factory: Arc<SessionFactory>,
    context: Mutex<PersistenceContext>,
    cancelled: AtomicBool,
}

impl Session {
    fn new(factory: Arc<SessionFactory>) -> Self {
        Self {
            factory,
            context: Mutex::new(PersistenceContext::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The owning factory.
    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    /// The driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        self.factory.driver()
    }

    /// The mapping collaborator.
    pub fn translator(&self) -> &Arc<dyn QueryTranslator> {
        self.factory.translator()
    }

    /// The dialect.
    pub fn dialect(&self) -> &Dialect {
        self.factory.dialect()
    }

    /// The query cache, when enabled.
    pub fn query_cache(&self) -> Option<&Arc<dyn QueryCache>> {
        self.factory.query_cache()
    }

    /// The statistics sink, when enabled.
    pub fn statistics(&self) -> Option<&Arc<dyn StatisticsSink>> {
        self.factory.statistics()
    }

    /// Whether batches may be combined into one request.
    pub fn supports_multiple_queries(&self) -> bool {
        self.factory.supports_multiple_queries()
    }

    /// Timeout applied when a batch sets none.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.factory
            .config()
            .default_timeout_secs
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }

    /// Request cancellation of the batch currently executing, or of the next
    /// one when none is. The request lapses when that execution returns.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested and not yet observed.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Observe a pending cancellation request, clearing it.
    pub fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancelled.swap(false, Ordering::SeqCst) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Drop a cancellation request nobody observed.
    pub(crate) fn clear_cancellation(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Execute a single command and return its cursor.
    pub fn execute_reader(
        &self,
        command: &SqlCommand,
        timeout: Option<Duration>,
    ) -> Result<CursorGuard, Error> {
        let cursor = self.driver().execute_reader(command, timeout)?;
        Ok(CursorGuard::new(cursor))
    }

    /// Default read-only mode for entities loaded by this session.
    pub fn default_read_only(&self) -> bool {
        self.context.lock().default_read_only
    }

    /// Set the default read-only mode.
    pub fn set_default_read_only(&self, read_only: bool) {
        self.context.lock().default_read_only = read_only;
    }

    /// Entity from the identity map.
    pub fn get_entity(&self, key: &EntityKey) -> Option<EntityRef> {
        self.context.lock().entities.get(key).cloned()
    }

    /// Resolve an entity through the identity map.
    ///
    /// Returns the existing instance if the key is already known, otherwise
    /// registers a new one built from `properties`. The flag tells whether the
    /// entity was created by this call.
    pub fn load_entity(
        &self,
        key: EntityKey,
        properties: BTreeMap<String, Value>,
    ) -> (EntityRef, bool) {
        let mut ctx = self.context.lock();
        if let Some(existing) = ctx.entities.get(&key) {
            return (existing.clone(), false);
        }
        let entity = Arc::new(Entity::new(key.clone(), properties));
        ctx.entities.insert(key, entity.clone());
        (entity, true)
    }

    /// Number of entities in the identity map.
    pub fn entity_count(&self) -> usize {
        self.context.lock().entities.len()
    }

    /// Register a subselect definition for an owner.
    pub fn register_subselect(&self, owner: EntityKey, fetch: Arc<SubselectFetch>) {
        self.context.lock().subselects.insert(owner, fetch);
    }

    /// Subselect definition registered for an owner.
    pub fn subselect_for(&self, owner: &EntityKey) -> Option<Arc<SubselectFetch>> {
        self.context.lock().subselects.get(owner).cloned()
    }

    /// Forget the subselect definitions of the given owners.
    pub fn remove_subselects(&self, owners: &[EntityKey]) {
        let mut ctx = self.context.lock();
        for owner in owners {
            ctx.subselects.remove(owner);
        }
    }

    /// Queue a collection to be loaded after the current batch.
    pub fn add_non_lazy_collection(&self, pending: PendingCollection) {
        self.context.lock().non_lazy.push(pending);
    }

    /// Load every queued non-lazy collection.
    ///
    /// Loading may queue further collections; the loop runs until the queue
    /// stays empty. The context lock is never held while a loader runs. When a
    /// loader fails, the collections not yet loaded go back on the queue.
    pub fn initialize_non_lazy_collections(&self) -> Result<(), Error> {
        loop {
            let mut pending: Vec<PendingCollection> =
                std::mem::take(&mut self.context.lock().non_lazy);
            if pending.is_empty() {
                return Ok(());
            }
            for i in 0..pending.len() {
                let p = &pending[i];
                if p.owner.is_collection_initialized(&p.role) {
                    continue;
                }
                tracing::trace!(owner = %p.owner.key(), role = %p.role, "initializing collection");
                if let Err(e) = p.loader.initialize(&p.owner, &p.role, self) {
                    let mut ctx = self.context.lock();
                    let mut unloaded = pending.split_off(i);
                    unloaded.append(&mut ctx.non_lazy);
                    ctx.non_lazy = unloaded;
                    return Err(e);
                }
            }
        }
    }

    /// Forget every queued non-lazy collection.
    pub(crate) fn discard_non_lazy_collections(&self) {
        self.context.lock().non_lazy.clear();
    }

    /// Drop all per-session state.
    pub fn clear(&self) {
        let mut ctx = self.context.lock();
        ctx.entities.clear();
        ctx.subselects.clear();
        ctx.non_lazy.clear();
    }
}
