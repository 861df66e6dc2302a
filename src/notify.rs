use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Outbound call that reports a unique count to a caller-supplied endpoint.
/// Returns the response status on success; non-2xx responses are errors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, endpoint: &str, count: u64) -> Result<u16>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyMethod {
    /// `GET <endpoint>?count=<n>`
    #[default]
    Get,
    /// `POST <endpoint>` with a JSON body.
    Post,
}

impl FromStr for NotifyMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            other => bail!("unsupported notify method '{}' (expected get or post)", other),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotifyPayload {
    pub unique_request_count: u64,
    pub message: &'static str,
}

pub fn notify_url(endpoint: &str, count: u64) -> Result<Url> {
    let mut url =
        Url::parse(endpoint).with_context(|| format!("invalid endpoint URL '{}'", endpoint))?;
    url.query_pairs_mut()
        .append_pair("count", &count.to_string());
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    method: NotifyMethod,
}

impl HttpNotifier {
    pub fn new(method: NotifyMethod, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build notification HTTP client")?;
        Ok(Self { client, method })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, endpoint: &str, count: u64) -> Result<u16> {
        let request = match self.method {
            NotifyMethod::Get => self.client.get(notify_url(endpoint, count)?),
            NotifyMethod::Post => {
                let url = Url::parse(endpoint)
                    .with_context(|| format!("invalid endpoint URL '{}'", endpoint))?;
                self.client.post(url).json(&NotifyPayload {
                    unique_request_count: count,
                    message: "Unique requests logged",
                })
            }
        };

        let res = request.send().await.context("request failed")?;
        let status = res.status();
        if !status.is_success() {
            bail!("{} -> {}", endpoint, status);
        }
        Ok(status.as_u16())
    }
}

#[derive(Debug)]
struct NotifyJob {
    endpoint: String,
    count: u64,
}

/// Enqueues notifications without waiting. At most `queue_capacity` jobs
/// wait behind `workers` in-flight deliveries; anything beyond that is
/// rejected and counted in [`NotificationDispatcher::dropped`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<NotifyJob>,
    dropped: Arc<AtomicU64>,
}

pub struct DispatchWorkers {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NotificationDispatcher {
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        workers: usize,
        queue_capacity: usize,
    ) -> (Self, DispatchWorkers) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (stop, stop_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let task = tokio::spawn(pump(rx, notifier, permits, stop_rx));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            DispatchWorkers { stop, task },
        )
    }

    /// Returns false when the job was rejected (queue full or pool stopped).
    pub fn notify(&self, endpoint: String, count: u64) -> bool {
        match self.tx.try_send(NotifyJob { endpoint, count }) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    endpoint = %job.endpoint,
                    count = job.count,
                    "Notification queue full, dropping request"
                );
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(endpoint = %job.endpoint, "Notification pool stopped, dropping request");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DispatchWorkers {
    /// Stops accepting jobs, delivers what is already queued, then returns.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Notification pool ended abnormally: {}", e);
        }
    }
}

async fn pump(
    mut rx: mpsc::Receiver<NotifyJob>,
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
    mut stop: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();
    let mut closing = false;

    loop {
        // A job leaves the queue only once a delivery slot is free.
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let job = tokio::select! {
            biased;
            changed = stop.changed(), if !closing => {
                if changed.is_err() || *stop.borrow() {
                    debug!("Notification pool closing, draining queue");
                    rx.close();
                    closing = true;
                }
                continue;
            }
            job = rx.recv() => job,
        };
        let Some(job) = job else { break };

        let notifier = notifier.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            deliver(notifier.as_ref(), job).await;
        });
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    info!("Notification pool stopped");
}

async fn deliver(notifier: &dyn Notifier, job: NotifyJob) {
    match notifier.notify(&job.endpoint, job.count).await {
        Ok(status) => info!(
            endpoint = %job.endpoint,
            count = job.count,
            "Request processed successfully: status code {}",
            status
        ),
        Err(e) => error!(
            endpoint = %job.endpoint,
            count = job.count,
            "Failed to send request to endpoint: {:#}",
            e
        ),
    }
}
