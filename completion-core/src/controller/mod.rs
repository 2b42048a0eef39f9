//! Stream controller: the scheduling façade.
//!
//! Composes the [`QueueManager`] (single-flight per client) with the
//! [`PoolManager`] (bounded concurrency per model). Every entry point returns
//! a typed [`CompletionResponse`]; nothing escapes as an error.

pub mod pool;
pub mod queue;
pub mod request;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use pool::{ModelPool, PoolDetails, PoolManager, PoolStats};
pub use queue::{ClientDetails, CompletionClient, QueueDetails, QueueManager, QueueStats};
pub use request::{CompletionRequest, RequestDetails, RequestSummary, ResponseReceiver};

use crate::config::{ModelConfig, StreamControllerConfig};
use crate::metrics;
use crate::types::{CompletionParameter, CompletionPerformance, CompletionResponse, CompletionStatus};

/// Deregisters a request when the caller is done with it, on every exit
/// path. Also cancels the request so a worker that still holds it skips or
/// abandons it.
struct RegistrationGuard<'a> {
    queues: &'a QueueManager,
    req: Arc<CompletionRequest>,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.req.cancel();
        self.queues.remove_request(&self.req);
    }
}

/// Aggregate view for `/api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    pub queue: QueueStats,
    pub pools: Vec<PoolStats>,
    pub config: StreamControllerConfig,
}

/// Detailed view for `/api/details`
#[derive(Debug, Clone, Serialize)]
pub struct ControllerDetails {
    pub queue: QueueDetails,
    pub pools: Vec<PoolDetails>,
}

/// Admission control and scheduling for completion requests
pub struct StreamController {
    queues: QueueManager,
    pools: PoolManager,
    config: StreamControllerConfig,
    shutdown: CancellationToken,
}

impl StreamController {
    pub fn new(config: StreamControllerConfig, pools: PoolManager) -> Self {
        info!(
            pools = pools.pools().len(),
            completion_timeout_ms = config.completion_timeout_ms,
            clean_older_than_ms = config.clean_older_than_ms,
            "Initialized stream controller"
        );
        Self {
            queues: QueueManager::new(config.completion_timeout(), config.clean_older_than()),
            pools,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    pub fn config(&self) -> &StreamControllerConfig {
        &self.config
    }

    /// A fresh request context, canceled when the controller shuts down
    pub fn context(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Register the request, then wait for its outcome on whichever pool
    /// serves its model.
    pub async fn process_completion(
        &self,
        ctx: &CancellationToken,
        para: CompletionParameter,
        perf: CompletionPerformance,
    ) -> CompletionResponse {
        let (req, rx) = self.queues.add_request(ctx, para, perf);
        let _guard = RegistrationGuard { queues: &self.queues, req: Arc::clone(&req) };
        let rsp = self.pools.wait_do_request(&req, rx).await;
        self.finish(rsp)
    }

    /// Like [`process_completion`](Self::process_completion), but picks the
    /// pool before registering anything. When no pool is eligible the
    /// request is refused as `busy` without touching any state. `adapt`
    /// fits the parameter to the selected pool's model.
    pub async fn process_preselected<F>(
        &self,
        ctx: &CancellationToken,
        mut para: CompletionParameter,
        mut perf: CompletionPerformance,
        adapt: F,
    ) -> CompletionResponse
    where
        F: FnOnce(&ModelConfig, &mut CompletionParameter),
    {
        if para.client_id.is_empty() || para.completion_id.is_empty() {
            return self.finish(CompletionResponse::failure(
                &para.completion_id,
                &para.model,
                CompletionStatus::Rejected,
                &mut perf,
                None,
                "missing client id or completion id",
            ));
        }

        let Some(pool) = self.pools.select_idlest_pool(&para.model) else {
            metrics::record_rejected(self.pools.metric_label(&para.model));
            return self.finish(CompletionResponse::failure(
                &para.completion_id,
                &para.model,
                CompletionStatus::Busy,
                &mut perf,
                None,
                "model pool busy, request rejected",
            ));
        };

        adapt(pool.config(), &mut para);
        perf.finish_context();

        let (req, rx) = self.queues.add_request(ctx, para, perf);
        let _guard = RegistrationGuard { queues: &self.queues, req: Arc::clone(&req) };
        let rsp = self.pools.dispatch(&pool, &req, rx).await;
        self.finish(rsp)
    }

    /// Entry point for callers without a client identity: no single-flight
    /// bookkeeping, but the pool's concurrency bound still applies.
    pub async fn process_openai(
        &self,
        ctx: &CancellationToken,
        para: CompletionParameter,
        mut perf: CompletionPerformance,
    ) -> CompletionResponse {
        let Some(pool) = self.pools.select_idlest_pool(&para.model) else {
            metrics::record_rejected(self.pools.metric_label(&para.model));
            return self.finish(CompletionResponse::failure(
                &para.completion_id,
                &para.model,
                CompletionStatus::Busy,
                &mut perf,
                None,
                "model pool busy, request rejected",
            ));
        };

        let (req, rx) =
            CompletionRequest::new(ctx, para, perf, self.config.completion_timeout());
        req.with_perf(|perf| perf.mark_enqueued());
        let _cancel = req.token().clone().drop_guard();
        let rsp = self.pools.dispatch(&pool, &req, rx).await;
        self.finish(rsp)
    }

    /// Spawn the maintenance task: evict idle clients and log aggregate
    /// stats every `interval`, until [`shutdown`](Self::shutdown). A zero
    /// interval falls back to the default period.
    pub fn start_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = if interval.is_zero() {
            let fallback = StreamControllerConfig::default().maintain_interval();
            warn!(fallback_ms = fallback.as_millis() as u64, "Zero maintenance interval, using default");
            fallback
        } else {
            interval
        };
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = controller.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let removed = controller.queues.cleanup();
                let stats = controller.stats();
                info!(
                    removed,
                    requests = stats.queue.requests,
                    clients_activated = stats.queue.clients_activated,
                    clients_total = stats.queue.clients_total,
                    "Stream controller maintenance"
                );
                for pool in &stats.pools {
                    debug!(
                        model = %pool.name,
                        running = pool.running,
                        waiting = pool.waiting,
                        rejected = pool.rejected,
                        "Model pool status"
                    );
                }
            }
            debug!("Maintenance task stopped");
        })
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            queue: self.queues.stats(),
            pools: self.pools.stats(),
            config: self.config.clone(),
        }
    }

    pub fn details(&self) -> ControllerDetails {
        ControllerDetails {
            queue: self.queues.details(),
            pools: self.pools.details(),
        }
    }

    /// Cancel every in-flight request and stop maintenance
    pub fn shutdown(&self) {
        info!("Shutting down stream controller");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Log and publish the single outcome returned to the caller
    fn finish(&self, rsp: CompletionResponse) -> CompletionResponse {
        rsp.record_metrics(self.pools.metric_label(&rsp.model));
        if rsp.status.is_success() {
            info!(
                completion_id = %rsp.id,
                model = %rsp.model,
                queue_ms = rsp.usage.queue_duration,
                llm_ms = rsp.usage.llm_duration,
                total_ms = rsp.usage.total_duration,
                "Completion succeeded"
            );
        } else {
            warn!(
                completion_id = %rsp.id,
                model = %rsp.model,
                status = %rsp.status,
                error = rsp.error.as_deref().unwrap_or_default(),
                total_ms = rsp.usage.total_duration,
                "Completion failed"
            );
        }
        rsp
    }
}
