//! Model pools: bounded concurrency per downstream model.
//!
//! Each [`ModelPool`] owns a fixed set of worker tasks pulling from a bounded
//! admission queue. Admission never waits: a full queue rejects the request
//! immediately. The [`PoolManager`] indexes pools by model name and tag and
//! routes each request to the least loaded eligible pool.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use super::queue::{request_key, RequestKey};
use super::request::{CompletionRequest, RequestSummary, ResponseReceiver};
use crate::config::ModelConfig;
use crate::error::PoolError;
use crate::llm::Llm;
use crate::metrics;
use crate::types::{CompletionResponse, CompletionStatus};

/// Admission queue slots per unit of concurrency
const QUEUE_FACTOR: usize = 2;

/// Metric label for a requested model that names no pool and no tag
pub const UNKNOWN_MODEL_LABEL: &str = "unknown";

/// Lifetime counters of one pool
#[derive(Debug, Default)]
pub struct PoolCounters {
    /// Requests accepted onto the admission queue
    pub admitted: AtomicU64,
    /// Requests refused because the queue was full
    pub rejected: AtomicU64,
    /// Requests dropped by a worker because they were canceled while queued
    pub skipped: AtomicU64,
    /// Requests that went through the downstream model
    pub completed: AtomicU64,
}

impl PoolCounters {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between a pool handle and its workers
struct PoolShared {
    name: String,
    cfg: ModelConfig,
    llm: Arc<dyn Llm>,
    /// Requests currently executing, keyed like the client registry
    runnings: Mutex<HashMap<RequestKey, Arc<CompletionRequest>>>,
    counters: PoolCounters,
}

/// Removes a request from the running-set when the worker is done with it,
/// including when the downstream future is dropped mid-call.
struct RunningGuard<'a> {
    shared: &'a PoolShared,
    req: &'a Arc<CompletionRequest>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let running = {
            let mut runnings = self.shared.runnings.lock();
            let key = request_key(self.req);
            if runnings.get(&key).is_some_and(|r| Arc::ptr_eq(r, self.req)) {
                runnings.remove(&key);
            }
            runnings.len()
        };
        metrics::set_concurrent_by_model(&self.shared.name, running);
    }
}

impl PoolShared {
    /// Run one dequeued request to completion and hand back its outcome
    async fn execute(&self, req: Arc<CompletionRequest>) {
        if req.is_canceled() {
            PoolCounters::incr(&self.counters.skipped);
            debug!(
                model = %self.name,
                client_id = %req.client_id(),
                completion_id = %req.completion_id(),
                "Skipping canceled request"
            );
            return;
        }

        req.with_perf(|perf| perf.finish_queue());
        let running = {
            let mut runnings = self.runnings.lock();
            runnings.insert(request_key(&req), Arc::clone(&req));
            runnings.len()
        };
        metrics::set_concurrent_by_model(&self.name, running);
        let _guard = RunningGuard { shared: self, req: &req };

        let Some(rsp) = self.call(&req).await else {
            debug!(
                model = %self.name,
                completion_id = %req.completion_id(),
                "Downstream call abandoned"
            );
            return;
        };
        PoolCounters::incr(&self.counters.completed);

        if !req.deliver(rsp) {
            warn!(
                model = %self.name,
                client_id = %req.client_id(),
                completion_id = %req.completion_id(),
                "Failed to send response to client, waiter is gone"
            );
        }
    }

    /// Call the model, bounded by the request's token and deadline.
    ///
    /// Returns `None` when the request was canceled or timed out first; the
    /// waiter produces that outcome itself.
    async fn call(&self, req: &CompletionRequest) -> Option<CompletionResponse> {
        let para = req.parameter();
        let started = Instant::now();
        let completion = AssertUnwindSafe(self.llm.completions(&para)).catch_unwind();

        let result = tokio::select! {
            biased;
            _ = req.token().cancelled() => return None,
            _ = tokio::time::sleep_until(req.deadline()) => return None,
            result = completion => result,
        };
        let llm_duration = started.elapsed().as_millis() as u64;

        let rsp = req.with_perf(|perf| {
            perf.llm_duration = llm_duration;
            match result {
                Ok(Ok(completion)) => {
                    perf.prompt_tokens = completion.usage.prompt_tokens;
                    perf.completion_tokens = completion.usage.completion_tokens;
                    perf.total_tokens = perf.prompt_tokens + perf.completion_tokens;
                    if completion.text.is_empty() {
                        CompletionResponse::failure(
                            &para.completion_id,
                            &para.model,
                            CompletionStatus::Empty,
                            perf,
                            completion.verbose,
                            "empty",
                        )
                    } else {
                        CompletionResponse::success(
                            &para.completion_id,
                            &para.model,
                            completion.text,
                            perf,
                            completion.verbose,
                        )
                    }
                }
                Ok(Err(err)) => {
                    let status = err.status();
                    CompletionResponse::failure(
                        &para.completion_id,
                        &para.model,
                        status,
                        perf,
                        err.verbose,
                        err.message,
                    )
                }
                Err(_) => {
                    error!(
                        model = %self.name,
                        completion_id = %para.completion_id,
                        "Downstream model call panicked"
                    );
                    CompletionResponse::failure(
                        &para.completion_id,
                        &para.model,
                        CompletionStatus::ServerError,
                        perf,
                        None,
                        "internal error while calling model",
                    )
                }
            }
        });
        Some(rsp)
    }
}

/// Bounded-concurrency execution unit for one downstream model
pub struct ModelPool {
    shared: Arc<PoolShared>,
    waits: mpsc::Sender<Arc<CompletionRequest>>,
}

impl ModelPool {
    /// Create the pool and spawn `max_concurrent` workers on the current runtime
    pub fn new(cfg: ModelConfig, llm: Arc<dyn Llm>) -> Result<Self, PoolError> {
        let name = cfg.pool_name().to_string();
        if cfg.max_concurrent == 0 {
            return Err(PoolError::invalid_concurrency(name, cfg.max_concurrent));
        }
        let (tx, rx) = mpsc::channel(cfg.max_concurrent * QUEUE_FACTOR);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(PoolShared {
            name,
            cfg,
            llm,
            runnings: Mutex::new(HashMap::new()),
            counters: PoolCounters::default(),
        });

        for index in 0..shared.cfg.max_concurrent {
            let shared = Arc::clone(&shared);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(req) = next else {
                        break;
                    };
                    shared.execute(req).await;
                }
                debug!(model = %shared.name, worker = index, "Pool worker stopped");
            });
        }

        info!(
            model = %shared.name,
            max_concurrent = shared.cfg.max_concurrent,
            tags = ?shared.cfg.tags,
            "Initialized model pool"
        );
        Ok(Self { shared, waits: tx })
    }

    /// Pool name (the model name sent downstream)
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &ModelConfig {
        &self.shared.cfg
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.cfg.max_concurrent
    }

    /// Capacity of the admission queue
    pub fn capacity(&self) -> usize {
        self.waits.max_capacity()
    }

    /// Number of requests currently executing
    pub fn running(&self) -> usize {
        self.shared.runnings.lock().len()
    }

    /// Number of requests waiting in the admission queue
    pub fn waiting(&self) -> usize {
        self.waits.max_capacity() - self.waits.capacity()
    }

    /// `running / max_concurrent`, or `None` when the pool is saturated
    pub fn load_rate(&self) -> Option<f64> {
        let max = self.max_concurrent();
        let running = self.running();
        if max == 0 || running >= max {
            return None;
        }
        Some(running as f64 / max as f64)
    }

    /// Place a request on the admission queue without waiting
    pub fn submit(&self, req: Arc<CompletionRequest>) -> Result<(), PoolError> {
        req.resolve_model(&self.shared.name);
        match self.waits.try_send(req) {
            Ok(()) => {
                PoolCounters::incr(&self.shared.counters.admitted);
                Ok(())
            }
            Err(TrySendError::Full(req)) => {
                PoolCounters::incr(&self.shared.counters.rejected);
                metrics::record_rejected(&self.shared.name);
                debug!(
                    model = %self.shared.name,
                    client_id = %req.client_id(),
                    completion_id = %req.completion_id(),
                    "Model pool busy, failed to enqueue request"
                );
                Err(PoolError::busy(&self.shared.name, self.capacity()))
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::closed(&self.shared.name)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            name: self.shared.name.clone(),
            tags: self.shared.cfg.tags.clone(),
            max_concurrent: self.max_concurrent(),
            capacity: self.capacity(),
            running: self.running(),
            waiting: self.waiting(),
            admitted: counters.admitted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
        }
    }

    pub fn details(&self) -> PoolDetails {
        let runnings = {
            let runnings = self.shared.runnings.lock();
            runnings.values().cloned().collect::<Vec<_>>()
        };
        PoolDetails {
            stats: self.stats(),
            runnings: runnings.iter().map(|r| r.summary()).collect(),
        }
    }
}

impl std::fmt::Debug for ModelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPool")
            .field("name", &self.shared.name)
            .field("max_concurrent", &self.max_concurrent())
            .finish()
    }
}

/// Snapshot of one pool's load
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub tags: Vec<String>,
    pub max_concurrent: usize,
    pub capacity: usize,
    pub running: usize,
    pub waiting: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub completed: u64,
}

/// Pool snapshot including the requests currently executing
#[derive(Debug, Clone, Serialize)]
pub struct PoolDetails {
    #[serde(flatten)]
    pub stats: PoolStats,
    pub runnings: Vec<RequestSummary>,
}

/// Index of all model pools. Built once; read-only afterwards.
#[derive(Debug, Default)]
pub struct PoolManager {
    all: Vec<Arc<ModelPool>>,
    by_name: HashMap<String, Vec<Arc<ModelPool>>>,
    by_tag: HashMap<String, Vec<Arc<ModelPool>>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool for every model, in configuration order
    pub fn from_models<I>(models: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = Arc<dyn Llm>>,
    {
        let mut manager = Self::new();
        for llm in models {
            let cfg = llm.config().clone();
            manager.add_pool(ModelPool::new(cfg, llm)?);
        }
        Ok(manager)
    }

    /// Register a pool under its name and each of its tags
    pub fn add_pool(&mut self, pool: ModelPool) -> Arc<ModelPool> {
        let pool = Arc::new(pool);
        self.by_name
            .entry(pool.name().to_string())
            .or_default()
            .push(Arc::clone(&pool));
        for tag in &pool.config().tags {
            self.by_tag.entry(tag.clone()).or_default().push(Arc::clone(&pool));
        }
        self.all.push(Arc::clone(&pool));
        pool
    }

    pub fn pools(&self) -> &[Arc<ModelPool>] {
        &self.all
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Pools able to serve `model_or_tag`: exact model name first, then
    /// tag, then every pool.
    fn candidates(&self, model_or_tag: &str) -> &[Arc<ModelPool>] {
        if let Some(pools) = self.by_name.get(model_or_tag).filter(|p| !p.is_empty()) {
            return pools;
        }
        if let Some(pools) = self.by_tag.get(model_or_tag).filter(|p| !p.is_empty()) {
            return pools;
        }
        &self.all
    }

    /// Metric label for a requested model or tag. Only configured pool
    /// names and tags are used as labels, so callers cannot grow the set of
    /// series.
    pub fn metric_label<'a>(&'a self, model_or_tag: &str) -> &'a str {
        if let Some((name, _)) = self.by_name.get_key_value(model_or_tag) {
            return name;
        }
        if let Some((tag, _)) = self.by_tag.get_key_value(model_or_tag) {
            return tag;
        }
        UNKNOWN_MODEL_LABEL
    }

    /// Least loaded non-saturated pool among the candidates; the first
    /// registered pool wins ties.
    pub fn select_idlest_pool(&self, model_or_tag: &str) -> Option<Arc<ModelPool>> {
        let mut selected: Option<(&Arc<ModelPool>, f64)> = None;
        for pool in self.candidates(model_or_tag) {
            let Some(rate) = pool.load_rate() else {
                continue;
            };
            if selected.map_or(true, |(_, lowest)| rate < lowest) {
                selected = Some((pool, rate));
            }
        }
        selected.map(|(pool, _)| Arc::clone(pool))
    }

    /// Pick a pool for the request, enqueue it and wait for its outcome
    pub async fn wait_do_request(
        &self,
        req: &Arc<CompletionRequest>,
        rx: ResponseReceiver,
    ) -> CompletionResponse {
        let requested = req.model();
        match self.select_idlest_pool(&requested) {
            Some(pool) => self.dispatch(&pool, req, rx).await,
            None => {
                metrics::record_rejected(self.metric_label(&requested));
                req.mark_canceled();
                req.fail(CompletionStatus::Busy, "model pool busy, request rejected")
            }
        }
    }

    /// Enqueue the request on `pool` and wait for the first of: the
    /// worker's result, cancellation, or the deadline.
    pub async fn dispatch(
        &self,
        pool: &ModelPool,
        req: &Arc<CompletionRequest>,
        rx: ResponseReceiver,
    ) -> CompletionResponse {
        if let Err(err) = pool.submit(Arc::clone(req)) {
            req.with_perf(|perf| perf.finish_queue());
            req.mark_canceled();
            return req.fail(CompletionStatus::Busy, err);
        }

        tokio::select! {
            biased;
            rsp = rx => match rsp {
                Ok(rsp) => rsp,
                Err(_) => {
                    req.mark_canceled();
                    req.fail(CompletionStatus::ServerError, "worker dropped the request")
                }
            },
            status = req.done() => {
                req.mark_canceled();
                let reason = match status {
                    CompletionStatus::Timeout => "deadline exceeded",
                    _ => "context canceled",
                };
                req.fail(status, reason)
            }
        }
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.all.iter().map(|p| p.stats()).collect()
    }

    pub fn details(&self) -> Vec<PoolDetails> {
        self.all.iter().map(|p| p.details()).collect()
    }
}
