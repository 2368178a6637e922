//! engine::workspace
//!
//! The boundary every caller goes through.
//!
//! # Architecture
//!
//! A [`Workspace`] owns both stores, the lock manager, the sync engine, the
//! ledger, and the retention job, all sharing one clock. It is either
//! in-memory (tests, embedding) or backed by a data directory:
//!
//! ```text
//! <data_dir>/
//!   draft.json        draft store snapshot
//!   published.json    published store snapshot
//!   ledger.jsonl      transaction ledger
//!   sync-state.json   pending retries and review flags
//!   config.toml       workspace config
//!   lock              process lock, held while the workspace is open
//! ```
//!
//! Draft mutations check the caller's lease and mutate inside one draft
//! write lock, so a lease cannot lapse between the check and the write.
//!
//! # Example
//!
//! ```
//! use casework::core::clock::SystemClock;
//! use casework::core::types::{EntityOrder, EntityType, HolderId};
//! use casework::engine::workspace::{DraftOp, DraftOutcome, Workspace, WorkspaceOptions};
//! use std::sync::Arc;
//!
//! let ws = Workspace::in_memory(WorkspaceOptions::default(), Arc::new(SystemClock));
//! let holder = HolderId::new("alice").unwrap();
//! let outcome = ws
//!     .mutate_draft(&holder, DraftOp::Create {
//!         parent: None,
//!         entity_type: EntityType::Navigation,
//!         order: EntityOrder(0),
//!     })
//!     .unwrap();
//! assert!(matches!(outcome, DraftOutcome::Created(_)));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::ledger::{LedgerError, TransactionLedger, TransactionRecord};
use super::plan::SyncPlan;
use super::retention::{RetentionJob, RetentionReport};
use super::scheduler::{ScheduleConfig, ScheduledJob, Scheduler, SchedulerHandle};
use super::sync::{ReviewFlag, SyncEngine, SyncError, SyncReport, SyncState, SyncTarget};
use crate::assets::{dispatch, AssetGenerator, NoopGenerator};
use crate::core::clock::SharedClock;
use crate::core::config::{Config, SyncPolicy};
use crate::core::graph::{
    shared, GraphError, GraphStore, SharedStore, StoreKind, Translation,
};
use crate::core::ops::lease::{
    check_free_for, check_held_by, lease_is_held, LeaseConfig, LeaseError, LeaseToken, LockManager,
};
use crate::core::ops::lock::{DataDirLock, LockError};
use crate::core::paths::DataPaths;
use crate::core::persist::{self, PersistError};
use crate::core::types::{EntityOrder, EntityType, HolderId, Language, NodeId};
use crate::projection::{self, Depth, LanguagePreference, ProjectionNode};

/// Errors at the workspace boundary.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// A descendant of the node to delete is locked by someone else.
    #[error("cannot delete: node {node} is locked by {holder}")]
    DescendantLocked { node: NodeId, holder: HolderId },

    /// The language is not in the configured language list.
    #[error("language '{0}' is not configured for this workspace")]
    UnsupportedLanguage(Language),

    #[error("workspace at '{0}' is not initialized (run `cw init`)")]
    NotInitialized(String),

    #[error("failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunables for a workspace, normally taken from [`Config`].
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub lease: LeaseConfig,
    pub policy: SyncPolicy,
    pub retention_window: Duration,
    pub default_language: Language,
    /// Allowed languages; empty allows any.
    pub languages: Vec<Language>,
    pub schedule: ScheduleConfig,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl WorkspaceOptions {
    pub fn from_config(config: &Config) -> Self {
        let policy = config.sync_policy();
        Self {
            lease: config.lease_config(),
            retention_window: config.retention_window(),
            default_language: config.default_language(),
            languages: config.languages(),
            schedule: ScheduleConfig {
                daily_at: config.daily_at(),
                run_at_startup: config.run_at_startup(),
                retry_interval: policy.retry_interval,
            },
            policy,
        }
    }
}

/// A draft mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftOp {
    /// Needs a lease on `parent`; a forest root needs none.
    Create {
        parent: Option<NodeId>,
        entity_type: EntityType,
        order: EntityOrder,
    },
    /// Needs a lease on `parent`; `child` must not be leased by another
    /// holder.
    Attach {
        parent: NodeId,
        child: NodeId,
    },
    /// Same lease rules as [`DraftOp::Attach`].
    Detach {
        parent: NodeId,
        child: NodeId,
    },
    Reorder {
        parent: NodeId,
        children: Vec<NodeId>,
    },
    SetTranslation {
        node: NodeId,
        language: Language,
        translation: Translation,
    },
    RemoveTranslation {
        node: NodeId,
        language: Language,
    },
    /// Needs a lease on `node` and no foreign lease below it.
    Delete {
        node: NodeId,
    },
}

impl DraftOp {
    /// The node whose lease authorizes this op.
    pub fn guarded_node(&self) -> Option<NodeId> {
        match self {
            DraftOp::Create { parent, .. } => *parent,
            DraftOp::Attach { parent, .. }
            | DraftOp::Detach { parent, .. }
            | DraftOp::Reorder { parent, .. } => Some(*parent),
            DraftOp::SetTranslation { node, .. }
            | DraftOp::RemoveTranslation { node, .. }
            | DraftOp::Delete { node } => Some(*node),
        }
    }

    /// The node this op re-parents, which must not be leased by anyone else.
    pub fn moved_node(&self) -> Option<NodeId> {
        match self {
            DraftOp::Attach { child, .. } | DraftOp::Detach { child, .. } => Some(*child),
            _ => None,
        }
    }
}

/// What a draft mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftOutcome {
    Created(NodeId),
    Updated,
    /// Ids tombstoned, root first.
    Deleted(Vec<NodeId>),
}

struct Storage {
    paths: DataPaths,
    _lock: DataDirLock,
}

/// Draft and published content with leases, sync, and retention.
pub struct Workspace {
    draft: SharedStore,
    published: SharedStore,
    clock: SharedClock,
    locks: LockManager,
    engine: SyncEngine,
    retention: RetentionJob,
    generator: Arc<dyn AssetGenerator>,
    options: WorkspaceOptions,
    storage: Option<Storage>,
}

impl Workspace {
    fn assemble(
        draft: GraphStore,
        published: GraphStore,
        ledger: TransactionLedger,
        state: SyncState,
        options: WorkspaceOptions,
        clock: SharedClock,
        storage: Option<Storage>,
    ) -> Self {
        let draft = shared(draft);
        let published = shared(published);
        let locks = LockManager::new(draft.clone(), clock.clone(), options.lease);
        let engine = SyncEngine::new(
            draft.clone(),
            published.clone(),
            Arc::new(ledger),
            clock.clone(),
            options.lease.grace,
            options.policy,
        )
        .with_state(state);
        let retention = RetentionJob::new(
            draft.clone(),
            published.clone(),
            locks.clone(),
            options.retention_window,
        );
        Self {
            draft,
            published,
            clock,
            locks,
            engine,
            retention,
            generator: Arc::new(NoopGenerator),
            options,
            storage,
        }
    }

    /// A workspace that lives only in memory.
    pub fn in_memory(options: WorkspaceOptions, clock: SharedClock) -> Self {
        Self::assemble(
            GraphStore::new(StoreKind::Draft),
            GraphStore::new(StoreKind::Published),
            TransactionLedger::in_memory(),
            SyncState::default(),
            options,
            clock,
            None,
        )
    }

    /// Create an empty data directory.
    ///
    /// Existing snapshots are left untouched.
    pub fn init(paths: &DataPaths) -> Result<(), WorkspaceError> {
        paths.ensure_dirs()?;
        let _lock = DataDirLock::acquire(paths)?;
        if !paths.draft_path().exists() {
            persist::save_store(&paths.draft_path(), &GraphStore::new(StoreKind::Draft))?;
        }
        if !paths.published_path().exists() {
            persist::save_store(
                &paths.published_path(),
                &GraphStore::new(StoreKind::Published),
            )?;
        }
        info!(root = %paths.root().display(), "workspace initialized");
        Ok(())
    }

    /// Open a data directory, holding its process lock until drop.
    pub fn open(
        paths: &DataPaths,
        options: WorkspaceOptions,
        clock: SharedClock,
    ) -> Result<Self, WorkspaceError> {
        if !paths.is_initialized() {
            return Err(WorkspaceError::NotInitialized(
                paths.root().display().to_string(),
            ));
        }
        let lock = DataDirLock::acquire(paths)?;
        let draft = persist::load_store(&paths.draft_path(), StoreKind::Draft)?;
        let published = persist::load_store(&paths.published_path(), StoreKind::Published)?;
        let ledger = TransactionLedger::open(&paths.ledger_path())?;
        let state = persist::read_json::<SyncState>(&paths.sync_state_path())?.unwrap_or_default();
        debug!(
            draft = draft.len(),
            published = published.len(),
            ledger = ledger.len(),
            "workspace loaded"
        );

        Ok(Self::assemble(
            draft,
            published,
            ledger,
            state,
            options,
            clock,
            Some(Storage {
                paths: paths.clone(),
                _lock: lock,
            }),
        ))
    }

    /// Builder-style asset generator.
    pub fn with_generator(mut self, generator: Arc<dyn AssetGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Write snapshots and sync state. A no-op in memory.
    pub fn persist(&self) -> Result<(), WorkspaceError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        persist::save_store(&storage.paths.published_path(), &self.published.read())?;
        persist::save_store(&storage.paths.draft_path(), &self.draft.read())?;
        persist::write_json_atomic(&storage.paths.sync_state_path(), &self.engine.state())?;
        debug!("workspace persisted");
        Ok(())
    }

    pub fn options(&self) -> &WorkspaceOptions {
        &self.options
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn draft(&self) -> &SharedStore {
        &self.draft
    }

    pub fn published(&self) -> &SharedStore {
        &self.published
    }

    pub fn store(&self, kind: StoreKind) -> &SharedStore {
        match kind {
            StoreKind::Draft => &self.draft,
            StoreKind::Published => &self.published,
        }
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Leases
    // ------------------------------------------------------------------

    /// Acquire a lease; `ttl: None` uses the configured default.
    pub fn acquire_lock(
        &self,
        node: NodeId,
        holder: &HolderId,
        ttl: Option<Duration>,
    ) -> Result<LeaseToken, WorkspaceError> {
        let ttl = ttl.unwrap_or(self.options.lease.default_ttl);
        Ok(self.locks.acquire(node, holder, ttl)?)
    }

    pub fn renew_lock(
        &self,
        node: NodeId,
        holder: &HolderId,
        ttl: Option<Duration>,
    ) -> Result<LeaseToken, WorkspaceError> {
        let ttl = ttl.unwrap_or(self.options.lease.default_ttl);
        Ok(self.locks.renew(node, holder, ttl)?)
    }

    pub fn release_lock(&self, node: NodeId, holder: &HolderId) -> Result<(), WorkspaceError> {
        Ok(self.locks.release(node, holder)?)
    }

    // ------------------------------------------------------------------
    // Draft edits
    // ------------------------------------------------------------------

    /// Apply one draft mutation on behalf of `holder`.
    ///
    /// # Errors
    ///
    /// - [`WorkspaceError::Lease`] if `holder` lacks a valid lease on the
    ///   guarded node
    /// - [`WorkspaceError::DescendantLocked`] for a delete over a foreign lease
    /// - [`WorkspaceError::Graph`] for structural violations
    pub fn mutate_draft(
        &self,
        holder: &HolderId,
        op: DraftOp,
    ) -> Result<DraftOutcome, WorkspaceError> {
        if let DraftOp::SetTranslation { language, .. } = &op {
            self.check_language(language)?;
        }

        let now = self.clock.now();
        let grace = self.options.lease.grace;
        let mut draft = self.draft.write();

        if let Some(node) = op.guarded_node() {
            check_held_by(&draft, node, holder, now, grace)?;
        }
        if let Some(node) = op.moved_node() {
            check_free_for(&draft, node, holder, now, grace)?;
        }

        let outcome = match op {
            DraftOp::Create {
                parent,
                entity_type,
                order,
            } => DraftOutcome::Created(draft.create_node(parent, entity_type, order, now)?),
            DraftOp::Attach { parent, child } => {
                draft.attach_child(parent, child)?;
                DraftOutcome::Updated
            }
            DraftOp::Detach { parent, child } => {
                draft.detach_child(parent, child)?;
                DraftOutcome::Updated
            }
            DraftOp::Reorder { parent, children } => {
                draft.reorder(parent, &children)?;
                DraftOutcome::Updated
            }
            DraftOp::SetTranslation {
                node,
                language,
                translation,
            } => {
                draft.set_translation(node, language, translation, now)?;
                DraftOutcome::Updated
            }
            DraftOp::RemoveTranslation { node, language } => {
                draft.remove_translation(node, &language, now)?;
                DraftOutcome::Updated
            }
            DraftOp::Delete { node } => {
                let foreign = draft.descendants(node).into_iter().find_map(|id| {
                    let lease = draft.get(id)?.lease.as_ref()?;
                    (lease_is_held(Some(lease), now, grace) && &lease.holder != holder)
                        .then(|| (id, lease.holder.clone()))
                });
                if let Some((node, holder)) = foreign {
                    return Err(WorkspaceError::DescendantLocked { node, holder });
                }
                DraftOutcome::Deleted(draft.delete_subtree(node, now)?)
            }
        };
        debug!(holder = %holder, ?outcome, "draft mutated");
        Ok(outcome)
    }

    fn check_language(&self, language: &Language) -> Result<(), WorkspaceError> {
        if self.options.languages.is_empty() || self.options.languages.contains(language) {
            Ok(())
        } else {
            Err(WorkspaceError::UnsupportedLanguage(language.clone()))
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Project a node from either store.
    ///
    /// `language: None` uses the configured default.
    pub fn get_projection(
        &self,
        store: StoreKind,
        node: NodeId,
        language: Option<Language>,
        depth: Depth,
    ) -> Result<ProjectionNode, WorkspaceError> {
        let default = self.options.default_language.clone();
        let prefs = LanguagePreference::new(language.unwrap_or_else(|| default.clone()), default);
        let guard = self.store(store).read();
        Ok(projection::project(
            &guard,
            node,
            &prefs,
            depth,
            self.clock.now(),
            self.options.lease.grace,
        )?)
    }

    /// Live forest roots of a store.
    pub fn roots(&self, store: StoreKind) -> Vec<NodeId> {
        self.store(store).read().roots()
    }

    pub fn query_ledger(&self, root: NodeId) -> Vec<TransactionRecord> {
        self.engine.ledger().query(root)
    }

    pub fn ledger(&self) -> Vec<TransactionRecord> {
        self.engine.ledger().all()
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// Synchronize and hand the resulting asset requests to the generator.
    ///
    /// Runs the engine on the calling task; the engine never blocks on a
    /// lease or a claim.
    pub async fn trigger_synchronization(&self, target: SyncTarget) -> SyncReport {
        let report = self.engine.sync(target);
        self.dispatch_assets(&report).await;
        report
    }

    /// Retry every pending root whose backoff has elapsed.
    pub async fn retry_pending(&self) -> SyncReport {
        let report = self.engine.retry_pending();
        self.dispatch_assets(&report).await;
        report
    }

    /// Plans for `target` without applying them.
    pub fn plan_sync(&self, target: SyncTarget) -> Result<Vec<SyncPlan>, WorkspaceError> {
        Ok(self.engine.plan_only(target)?)
    }

    async fn dispatch_assets(&self, report: &SyncReport) {
        let requests = report.assets();
        if requests.is_empty() {
            return;
        }
        let failures = dispatch(self.generator.as_ref(), &requests).await;
        if failures > 0 {
            warn!(
                failures,
                total = requests.len(),
                generator = self.generator.name(),
                "some asset requests failed"
            );
        }
    }

    pub fn review_flags(&self) -> Vec<(NodeId, ReviewFlag)> {
        self.engine.review_flags()
    }

    pub fn clear_review(&self, root: NodeId) -> bool {
        self.engine.clear_review(root)
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    pub fn run_retention(&self) -> RetentionReport {
        self.retention.run(self.clock.now())
    }

    /// Start the daily maintenance job and the retry cycle on this
    /// workspace.
    ///
    /// The workspace stays open, with its process lock, for as long as the
    /// scheduler holds it. Long-running hosts over a data directory use
    /// [`Workspace::start_data_dir_scheduler`] instead.
    pub fn start_scheduler(self: &Arc<Self>) -> SchedulerHandle {
        let target = JobTarget::Shared(self.clone());
        Scheduler::new(
            Arc::new(DailyMaintenance(target.clone())),
            self.options.schedule,
            self.clock.clone(),
        )
        .with_retry(Arc::new(RetryCycle(target)))
        .spawn()
    }

    /// Start the scheduler over a data directory without keeping it open.
    ///
    /// Every job run opens the workspace, does its work, persists, and
    /// closes it again. The process lock is free between runs, and each run
    /// starts from what other processes last persisted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_data_dir_scheduler(
        paths: &DataPaths,
        options: WorkspaceOptions,
        clock: SharedClock,
        generator: Arc<dyn AssetGenerator>,
    ) -> Result<SchedulerHandle, WorkspaceError> {
        if !paths.is_initialized() {
            return Err(WorkspaceError::NotInitialized(
                paths.root().display().to_string(),
            ));
        }
        let schedule = options.schedule;
        let target = JobTarget::DataDir(Arc::new(DataDirTarget {
            paths: paths.clone(),
            options,
            clock: clock.clone(),
            generator,
        }));
        info!(root = %paths.root().display(), "scheduler started over data directory");
        Ok(Scheduler::new(Arc::new(DailyMaintenance(target.clone())), schedule, clock)
            .with_retry(Arc::new(RetryCycle(target)))
            .spawn())
    }
}

/// Attempts to take a busy data directory before a run is skipped.
const OPEN_ATTEMPTS: u32 = 20;
const OPEN_BACKOFF: std::time::Duration = std::time::Duration::from_millis(250);

struct DataDirTarget {
    paths: DataPaths,
    options: WorkspaceOptions,
    clock: SharedClock,
    generator: Arc<dyn AssetGenerator>,
}

/// Where a scheduled job finds its workspace.
#[derive(Clone)]
enum JobTarget {
    /// One workspace kept open by the caller.
    Shared(Arc<Workspace>),
    /// A data directory opened for each run.
    DataDir(Arc<DataDirTarget>),
}

impl JobTarget {
    /// The workspace for one run, or `None` if it could not be opened.
    ///
    /// A data directory held by another command is retried briefly; CLI
    /// commands hold the lock only for the length of one operation.
    async fn open(&self, job: &'static str) -> Option<Arc<Workspace>> {
        let target = match self {
            JobTarget::Shared(ws) => return Some(ws.clone()),
            JobTarget::DataDir(target) => target,
        };

        for attempt in 1..=OPEN_ATTEMPTS {
            match Workspace::open(&target.paths, target.options.clone(), target.clock.clone()) {
                Ok(ws) => return Some(Arc::new(ws.with_generator(target.generator.clone()))),
                Err(WorkspaceError::Lock(LockError::AlreadyLocked)) => {
                    debug!(job, attempt, "data directory busy");
                    tokio::time::sleep(OPEN_BACKOFF).await;
                }
                Err(e) => {
                    warn!(job, error = %e, "failed to open workspace; skipping run");
                    return None;
                }
            }
        }
        warn!(job, attempts = OPEN_ATTEMPTS, "data directory stayed busy; skipping run");
        None
    }
}

/// Retention, then a full sync, then persist.
struct DailyMaintenance(JobTarget);

#[async_trait]
impl ScheduledJob for DailyMaintenance {
    fn name(&self) -> &'static str {
        "daily-maintenance"
    }

    async fn run(&self) {
        let Some(ws) = self.0.open(self.name()).await else {
            return;
        };
        let retention = ws.run_retention();
        let report = ws.trigger_synchronization(SyncTarget::All).await;
        info!(
            purged = retention.draft_purged + retention.published_purged,
            applied = report.applied(),
            deferred = report.deferred(),
            failed = report.failed(),
            "daily maintenance complete"
        );
        if let Err(e) = ws.persist() {
            warn!(error = %e, "failed to persist after daily maintenance");
        }
    }
}

struct RetryCycle(JobTarget);

#[async_trait]
impl ScheduledJob for RetryCycle {
    fn name(&self) -> &'static str {
        "sync-retry"
    }

    async fn run(&self) {
        let Some(ws) = self.0.open(self.name()).await else {
            return;
        };
        let report = ws.retry_pending().await;
        if report.outcomes.is_empty() {
            return;
        }
        if let Err(e) = ws.persist() {
            warn!(error = %e, "failed to persist after sync retry");
        }
    }
}
