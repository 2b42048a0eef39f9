//! Single-flight bookkeeping per client.
//!
//! The [`QueueManager`] keeps the global registry of outstanding requests and
//! one [`CompletionClient`] record per client id. Registering a new request
//! for a client cancels that client's previous one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::request::{CompletionRequest, RequestDetails, RequestSummary, ResponseReceiver};
use crate::metrics;
use crate::types::{CompletionParameter, CompletionPerformance};

/// Registry key: (client id, completion id)
pub(super) type RequestKey = (String, String);

pub(super) fn request_key(req: &CompletionRequest) -> RequestKey {
    (req.client_id().to_string(), req.completion_id().to_string())
}

/// Per-client record
#[derive(Debug)]
pub struct CompletionClient {
    pub client_id: String,
    /// Most recent request, cleared once it is deregistered
    pub latest: Option<Arc<CompletionRequest>>,
    /// Monotonic time of the last request
    pub last_active: Instant,
    /// Wall-clock time of the last request
    pub last_active_time: DateTime<Utc>,
}

impl CompletionClient {
    fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            latest: None,
            last_active: Instant::now(),
            last_active_time: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
        self.last_active_time = Utc::now();
    }
}

#[derive(Debug, Default)]
struct QueueState {
    clients: HashMap<String, CompletionClient>,
    requests: HashMap<RequestKey, Arc<CompletionRequest>>,
}

/// Front door of the scheduling core
#[derive(Debug)]
pub struct QueueManager {
    state: Mutex<QueueState>,
    completion_timeout: Duration,
    clean_older_than: Duration,
}

impl QueueManager {
    pub fn new(completion_timeout: Duration, clean_older_than: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            completion_timeout,
            clean_older_than,
        }
    }

    /// Build and register a request, superseding the client's previous one.
    ///
    /// The previous request is canceled inside the same critical section that
    /// registers the new one, so a client never has two current requests.
    pub fn add_request(
        &self,
        ctx: &CancellationToken,
        para: CompletionParameter,
        perf: CompletionPerformance,
    ) -> (Arc<CompletionRequest>, ResponseReceiver) {
        let (req, rx) = CompletionRequest::new(ctx, para, perf, self.completion_timeout);
        req.with_perf(|perf| perf.mark_enqueued());

        let (superseded, total) = {
            let mut state = self.state.lock();
            let client = state
                .clients
                .entry(req.client_id().to_string())
                .or_insert_with(|| CompletionClient::new(req.client_id()));
            client.touch();
            let previous = client.latest.replace(Arc::clone(&req));
            if let Some(previous) = &previous {
                previous.cancel();
            }
            state.requests.insert(request_key(&req), Arc::clone(&req));
            (previous, state.requests.len())
        };
        metrics::set_concurrent(total);

        if let Some(previous) = superseded {
            debug!(
                client_id = %req.client_id(),
                canceled = %previous.completion_id(),
                completion_id = %req.completion_id(),
                "Superseded previous request"
            );
        }
        (req, rx)
    }

    /// Deregister a request. Safe to call for a request that is already gone.
    pub fn remove_request(&self, req: &Arc<CompletionRequest>) {
        let total = {
            let mut state = self.state.lock();
            let key = request_key(req);
            if state.requests.get(&key).is_some_and(|r| Arc::ptr_eq(r, req)) {
                state.requests.remove(&key);
            }
            if let Some(client) = state.clients.get_mut(req.client_id()) {
                if client.latest.as_ref().is_some_and(|r| Arc::ptr_eq(r, req)) {
                    client.latest = None;
                }
            }
            state.requests.len()
        };
        metrics::set_concurrent(total);
    }

    /// Drop client records idle for longer than the retention window.
    /// Clients with a request still in flight are kept.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let (removed, remaining) = {
            let mut state = self.state.lock();
            let before = state.clients.len();
            state.clients.retain(|_, client| {
                client.latest.is_some()
                    || now.duration_since(client.last_active) < self.clean_older_than
            });
            (before - state.clients.len(), state.clients.len())
        };
        if removed > 0 {
            info!(removed, remaining, "Cleaned up idle clients");
        }
        removed
    }

    /// Whether the request is in the global registry
    pub fn is_registered(&self, client_id: &str, completion_id: &str) -> bool {
        let key = (client_id.to_string(), completion_id.to_string());
        self.state.lock().requests.contains_key(&key)
    }

    /// Whether a record exists for the client
    pub fn has_client(&self, client_id: &str) -> bool {
        self.state.lock().clients.contains_key(client_id)
    }

    /// Number of registered requests
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            requests: state.requests.len(),
            clients_activated: state.clients.values().filter(|c| c.latest.is_some()).count(),
            clients_total: state.clients.len(),
        }
    }

    pub fn details(&self) -> QueueDetails {
        let (requests, clients) = {
            let state = self.state.lock();
            let requests: Vec<_> = state.requests.values().cloned().collect();
            let clients: Vec<_> = state
                .clients
                .values()
                .map(|c| (c.client_id.clone(), c.last_active_time, c.latest.clone()))
                .collect();
            (requests, clients)
        };
        QueueDetails {
            stats: self.stats(),
            requests: requests.iter().map(|r| r.details()).collect(),
            clients: clients
                .into_iter()
                .map(|(client_id, last_active, latest)| ClientDetails {
                    client_id,
                    last_active,
                    latest: latest.map(|r| r.summary()),
                })
                .collect(),
        }
    }
}

/// Aggregate queue counters
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Registered (outstanding) requests
    pub requests: usize,
    /// Clients with a request in flight
    pub clients_activated: usize,
    pub clients_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientDetails {
    pub client_id: String,
    pub last_active: DateTime<Utc>,
    pub latest: Option<RequestSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDetails {
    pub stats: QueueStats,
    pub requests: Vec<RequestDetails>,
    pub clients: Vec<ClientDetails>,
}
