//! Prefetch subsystem: a task queue plus a pool of worker threads that
//! populate the relation cache ahead of the foreground traversal.
//!
//! Each worker opens its own store connection and shares the one cache.
//! Prefetching is strictly speculative: a wrong guess costs a wasted query,
//! nothing else. Task failures are logged and skipped — prefetching is
//! best-effort, and a dead worker would silently shrink the pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::cache::RelationCache;
use crate::config::{AnalysisConfig, PrefetchSettings};
use crate::error::Result;
use crate::session::AnalysisSession;
use crate::store::StoreConnector;
use crate::types::{Direction, GraphNode, Relation};

/// How often an idle worker re-checks the stop flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// PrefetchTask
// ---------------------------------------------------------------------------

/// A unit of prefetch work bound to one node and a strategy.
///
/// `run` returns `Ok(true)` when the task actually fetched something,
/// `Ok(false)` when the strategy declined (gate not passed, already
/// cached). Only `Ok(true)` counts toward the pool's completion counter.
pub trait PrefetchTask: Send {
    fn run(&self, session: &AnalysisSession) -> Result<bool>;

    /// Short description used when a failed task is logged.
    fn describe(&self) -> String {
        "prefetch task".into()
    }
}

// ---------------------------------------------------------------------------
// RelationPrefetchTask
// ---------------------------------------------------------------------------

/// The shipped strategy: with probability `drop_out`, fetch both directions
/// of the configured relations for a statement-root node.
pub struct RelationPrefetchTask {
    node: Arc<GraphNode>,
    relations: Vec<Relation>,
    drop_out: f64,
}

impl RelationPrefetchTask {
    pub fn new(node: Arc<GraphNode>, relations: Vec<Relation>, drop_out: f64) -> Self {
        Self {
            node,
            relations,
            drop_out,
        }
    }

    /// A task following the configured relations and drop-out rate.
    pub fn from_settings(node: Arc<GraphNode>, settings: &PrefetchSettings) -> Self {
        Self::new(node, settings.relations.clone(), settings.drop_out)
    }
}

impl PrefetchTask for RelationPrefetchTask {
    fn run(&self, session: &AnalysisSession) -> Result<bool> {
        if rand::random::<f64>() >= self.drop_out {
            return Ok(false);
        }
        if !self.node.kind.is_statement_root() {
            return Ok(false);
        }
        let mut fetched_any = false;
        for relation in &self.relations {
            for direction in [Direction::Inbound, Direction::Outbound] {
                if !session.cache().fetched(*relation, self.node.id, direction) {
                    session.relation_neighbors(&self.node, *relation, direction)?;
                    fetched_any = true;
                }
            }
        }
        Ok(fetched_any)
    }

    fn describe(&self) -> String {
        format!("relation prefetch for node {}", self.node.id)
    }
}

// ---------------------------------------------------------------------------
// PrefetchPool
// ---------------------------------------------------------------------------

struct Worker {
    handle: JoinHandle<()>,
    completed: Arc<AtomicU64>,
}

/// Owns the worker threads. Workers start at construction and stop
/// cooperatively: [`stop_all`](Self::stop_all) lets each finish its current
/// task and exit. Workers are detached — dropping the pool does not block
/// on them, and neither does process exit.
pub struct PrefetchPool {
    sender: Sender<Box<dyn PrefetchTask>>,
    workers: Vec<Worker>,
    running: Arc<AtomicBool>,
}

impl PrefetchPool {
    /// Spawn `worker_count` workers immediately, each with an independent
    /// store connection, all sharing `cache`.
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        cache: Arc<RelationCache>,
        worker_count: usize,
    ) -> Result<Self> {
        let (sender, receiver) = unbounded::<Box<dyn PrefetchTask>>();
        let running = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let completed = Arc::new(AtomicU64::new(0));
            let handle = thread::Builder::new()
                .name(format!("prefetch-{i}"))
                .spawn({
                    let receiver = receiver.clone();
                    let running = Arc::clone(&running);
                    let connector = Arc::clone(&connector);
                    let cache = Arc::clone(&cache);
                    let completed = Arc::clone(&completed);
                    move || worker_loop(receiver, running, connector, cache, completed)
                })?;
            workers.push(Worker { handle, completed });
        }
        Ok(Self {
            sender,
            workers,
            running,
        })
    }

    /// A pool attached to an existing session: same cache, fresh
    /// connections from the session's connector.
    pub fn from_session(session: &AnalysisSession, worker_count: usize) -> Result<Self> {
        Self::new(
            Arc::clone(session.connector()),
            Arc::clone(session.cache()),
            worker_count,
        )
    }

    /// A pool sized by the config, or `None` when the config disables
    /// prefetching (the default).
    pub fn from_config(session: &AnalysisSession, config: &AnalysisConfig) -> Result<Option<Self>> {
        if config.prefetch.workers == 0 {
            return Ok(None);
        }
        Self::from_session(session, config.prefetch.workers).map(Some)
    }

    /// Enqueue a task. A task enqueued after the workers exited is dropped.
    pub fn put_task(&self, task: Box<dyn PrefetchTask>) {
        if self.sender.send(task).is_err() {
            debug!("prefetch queue closed; task dropped");
        }
    }

    /// Signal all workers to exit after their current task.
    pub fn stop_all(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Stop and wait for the workers to exit. Queued tasks that no worker
    /// picked up before the stop are abandoned.
    pub fn shutdown(self) {
        self.stop_all();
        for worker in self.workers {
            let _ = worker.handle.join();
        }
    }

    /// Sum of per-worker completed-task counters. A coarse diagnostic —
    /// counts may lag while workers are mid-task.
    pub fn completed_tasks(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.completed.load(Ordering::Relaxed))
            .sum()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(
    receiver: Receiver<Box<dyn PrefetchTask>>,
    running: Arc<AtomicBool>,
    connector: Arc<dyn StoreConnector>,
    cache: Arc<RelationCache>,
    completed: Arc<AtomicU64>,
) {
    let session = match AnalysisSession::prefetch_peer(connector, cache) {
        Ok(session) => session,
        Err(e) => {
            warn!("prefetch worker could not connect to the store: {e}");
            return;
        }
    };
    while running.load(Ordering::Relaxed) {
        match receiver.recv_timeout(IDLE_POLL) {
            Ok(task) => match task.run(&session) {
                Ok(true) => {
                    completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {}
                // log-and-skip: prefetching is best-effort
                Err(e) => warn!("{} failed, skipping: {e}", task.describe()),
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaintGraphError;
    use crate::testutil::{node, pdg_edge, seeded_store};
    use crate::types::NodeKind;

    /// Poll until `predicate` holds or two seconds pass.
    fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn pdg_fixture() -> (Arc<dyn StoreConnector>, tempfile::TempDir) {
        let (connector, dir) = seeded_store(
            &[
                node(1, NodeKind::Assign, 1),
                node(2, NodeKind::Assign, 2),
                node(3, NodeKind::Echo, 3),
            ],
            &[
                (1, 3, Relation::Pdg, pdg_edge("a")),
                (2, 3, Relation::Pdg, pdg_edge("b")),
            ],
        );
        (Arc::new(connector), dir)
    }

    #[test]
    fn pool_prefetches_into_shared_cache() {
        let (connector, _dir) = pdg_fixture();
        let cache = Arc::new(RelationCache::new());
        let pool = PrefetchPool::new(Arc::clone(&connector), Arc::clone(&cache), 2).unwrap();

        let session = AnalysisSession::with_connector(connector, Arc::clone(&cache), true).unwrap();
        for id in [1, 2] {
            let target = session.node(id).unwrap().unwrap();
            pool.put_task(Box::new(RelationPrefetchTask::new(
                target,
                vec![Relation::Pdg],
                1.0,
            )));
        }

        assert!(wait_for(|| pool.completed_tasks() == 2));
        assert!(cache.fetched(Relation::Pdg, 1, Direction::Outbound));
        assert!(cache.fetched(Relation::Pdg, 1, Direction::Inbound));
        assert!(cache.fetched(Relation::Pdg, 2, Direction::Outbound));
        pool.shutdown();

        // a foreground query over the prefetched slice is a prefetch hit
        let anchor = session.node(1).unwrap().unwrap();
        session.pdg_use_nodes(&anchor).unwrap();
        assert_eq!(session.prefetch_hits(), 1);
    }

    #[test]
    fn drop_out_zero_declines_everything() {
        let (connector, _dir) = pdg_fixture();
        let cache = Arc::new(RelationCache::new());
        let session =
            AnalysisSession::with_connector(Arc::clone(&connector), Arc::clone(&cache), true)
                .unwrap();
        let target = session.node(1).unwrap().unwrap();

        let task = RelationPrefetchTask::new(target, vec![Relation::Pdg], 0.0);
        assert!(!task.run(&session).unwrap());
        assert!(!cache.fetched(Relation::Pdg, 1, Direction::Outbound));
    }

    #[test]
    fn non_statement_roots_are_skipped() {
        let (connector, _dir) = seeded_store(&[node(1, NodeKind::Var, 1)], &[]);
        let cache = Arc::new(RelationCache::new());
        let session =
            AnalysisSession::with_connector(Arc::new(connector), Arc::clone(&cache), true).unwrap();
        let target = session.node(1).unwrap().unwrap();

        let task = RelationPrefetchTask::new(target, vec![Relation::Pdg], 1.0);
        assert!(!task.run(&session).unwrap());
    }

    #[test]
    fn failing_task_does_not_kill_the_worker() {
        struct FailingTask;
        impl PrefetchTask for FailingTask {
            fn run(&self, _session: &AnalysisSession) -> Result<bool> {
                Err(TaintGraphError::Other("synthetic failure".into()))
            }
        }

        let (connector, _dir) = pdg_fixture();
        let cache = Arc::new(RelationCache::new());
        let pool = PrefetchPool::new(Arc::clone(&connector), Arc::clone(&cache), 1).unwrap();

        pool.put_task(Box::new(FailingTask));
        let session = AnalysisSession::with_connector(connector, cache, true).unwrap();
        let target = session.node(1).unwrap().unwrap();
        pool.put_task(Box::new(RelationPrefetchTask::new(
            target,
            vec![Relation::Pdg],
            1.0,
        )));

        // the worker survived the failure and completed the second task
        assert!(wait_for(|| pool.completed_tasks() == 1));
        pool.shutdown();
    }

    #[test]
    fn stop_is_cooperative() {
        let (connector, _dir) = pdg_fixture();
        let cache = Arc::new(RelationCache::new());
        let pool = PrefetchPool::new(connector, cache, 2).unwrap();
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown(); // must not hang
    }

    #[test]
    fn config_defaults_disable_the_pool() {
        let (connector, _dir) = pdg_fixture();
        let config = AnalysisConfig::new(crate::config::StoreProfile::new("graph.db"));
        let session =
            AnalysisSession::with_connector(connector, Arc::new(RelationCache::new()), true)
                .unwrap();
        assert!(PrefetchPool::from_config(&session, &config)
            .unwrap()
            .is_none());
    }

    #[test]
    fn task_from_settings_uses_configured_relations() {
        let (connector, _dir) = pdg_fixture();
        let cache = Arc::new(RelationCache::new());
        let session =
            AnalysisSession::with_connector(connector, Arc::clone(&cache), true).unwrap();
        let target = session.node(1).unwrap().unwrap();

        let settings = PrefetchSettings {
            drop_out: 1.0,
            ..Default::default()
        };
        let task = RelationPrefetchTask::from_settings(target, &settings);
        assert!(task.run(&session).unwrap());
        // default settings prefetch the data-flow relation only
        assert!(cache.fetched(Relation::Pdg, 1, Direction::Outbound));
        assert!(!cache.fetched(Relation::Cfg, 1, Direction::Outbound));
    }

    #[test]
    fn already_cached_slices_count_as_declined() {
        let (connector, _dir) = pdg_fixture();
        let cache = Arc::new(RelationCache::new());
        let session =
            AnalysisSession::with_connector(Arc::clone(&connector), Arc::clone(&cache), true)
                .unwrap();
        let target = session.node(1).unwrap().unwrap();

        let task = RelationPrefetchTask::new(Arc::clone(&target), vec![Relation::Pdg], 1.0);
        assert!(task.run(&session).unwrap());
        // second run finds both directions fetched and declines
        assert!(!task.run(&session).unwrap());
    }
}
