//! Queue consumer
//!
//! Keeps one AMQP subscription alive, turns deliveries into submissions and
//! hands each one to the scheduler together with a checked-out slot. Broker
//! failures are retried forever with capped backoff.

pub mod backoff;
pub mod publisher;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::core::Submission;
use crate::pool::WorkerPool;
use crate::scheduler::{self, Acknowledger, Outcome, Scheduler};

pub use backoff::Backoff;
pub use publisher::Publisher;

/// How long a delivery may wait for a free slot before it is requeued
pub const SLOT_WAIT: Duration = Duration::from_secs(5 * 60);

const CONSUMER_TAG: &str = "judge-daemon";

pub(crate) fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

/// Declare the judge queue as a durable quorum queue
pub(crate) async fn declare_queue(channel: &Channel, queue_name: &str) -> Result<()> {
    let mut arguments = FieldTable::default();
    arguments.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));

    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .with_context(|| format!("Failed to declare queue {}", queue_name))?;
    Ok(())
}

/// Resolves once shutdown has been requested (or the sender is gone)
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<()> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .context("Failed to ack delivery")
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        Acker::nack(
            self,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
        .await
        .context("Failed to nack delivery")
    }
}

/// Whether the consume loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Shutdown,
}

/// An open subscription. The channel is held so it stays open while the
/// stream is consumed.
struct Session {
    connection: Connection,
    _channel: Channel,
    deliveries: lapin::Consumer,
}

pub struct Consumer {
    url: String,
    queue_name: String,
    pool: Arc<WorkerPool>,
    scheduler: Arc<Scheduler>,
    slot_wait: Duration,
    backoff: Backoff,
    connect_attempts: usize,
    tasks: JoinSet<Outcome>,
}

impl Consumer {
    pub fn new(
        url: impl Into<String>,
        queue_name: impl Into<String>,
        pool: Arc<WorkerPool>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            url: url.into(),
            queue_name: queue_name.into(),
            pool,
            scheduler,
            slot_wait: SLOT_WAIT,
            backoff: Backoff::default(),
            connect_attempts: 0,
            tasks: JoinSet::new(),
        }
    }

    pub fn with_slot_wait(mut self, slot_wait: Duration) -> Self {
        self.slot_wait = slot_wait;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Broker connections attempted so far
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts
    }

    /// Number of submissions currently being graded
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Consume until shutdown, reconnecting on any broker failure.
    ///
    /// On shutdown the in-flight submissions get `grace` to finish before the
    /// connection is closed.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>, grace: Duration) {
        self.backoff.reset();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                session = self.connect() => session,
                _ = stopped(&mut shutdown) => break,
            };

            match connected {
                Ok(mut session) => {
                    self.backoff.reset();
                    info!(
                        "Consuming from queue {} (prefetch {})",
                        self.queue_name,
                        self.prefetch()
                    );

                    let flow = self.consume(&mut session.deliveries, &mut shutdown).await;
                    if flow == Flow::Shutdown {
                        self.drain(grace).await;
                        if let Err(e) = session.connection.close(200, "shutdown").await {
                            warn!("Error closing broker connection: {}", e);
                        }
                        return;
                    }
                    warn!("Subscription to {} ended", self.queue_name);
                }
                Err(e) => error!("Broker connection failed: {:#}", e),
            }

            let delay = self.backoff.next_delay();
            info!("Reconnecting to broker in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }

        self.drain(grace).await;
    }

    fn prefetch(&self) -> u16 {
        u16::try_from(self.pool.capacity()).unwrap_or(u16::MAX)
    }

    async fn connect(&mut self) -> Result<Session> {
        self.connect_attempts += 1;
        debug!("Connecting to broker (attempt {})", self.connect_attempts);
        let connection = Connection::connect(&self.url, connection_properties())
            .await
            .context("Failed to connect to broker")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open channel")?;
        channel
            .basic_qos(self.prefetch(), BasicQosOptions::default())
            .await
            .context("Failed to set prefetch")?;
        declare_queue(&channel, &self.queue_name).await?;

        let deliveries = channel
            .basic_consume(
                &self.queue_name,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.queue_name))?;

        Ok(Session {
            connection,
            _channel: channel,
            deliveries,
        })
    }

    /// Returns `Flow::Continue` when the stream ended and a reconnect is due
    async fn consume(
        &mut self,
        deliveries: &mut lapin::Consumer,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Flow {
        loop {
            self.reap();

            let next = tokio::select! {
                next = deliveries.next() => next,
                _ = stopped(shutdown) => return Flow::Shutdown,
            };

            match next {
                Some(Ok(Delivery { data, acker, .. })) => {
                    if self.handle_delivery(&data, acker, shutdown).await == Flow::Shutdown {
                        return Flow::Shutdown;
                    }
                }
                Some(Err(e)) => {
                    error!("Delivery stream error: {}", e);
                    return Flow::Continue;
                }
                None => return Flow::Continue,
            }
        }
    }

    /// Decode, pre-check and dispatch a single delivery
    pub(crate) async fn handle_delivery<A: Acknowledger>(
        &mut self,
        data: &[u8],
        acker: A,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Flow {
        let submission: Submission = match serde_json::from_slice(data) {
            Ok(submission) => submission,
            Err(e) => {
                error!("Dropping undecodable message ({} bytes): {}", data.len(), e);
                if let Err(e) = acker.nack(false).await {
                    error!("{:#}", e);
                }
                return Flow::Continue;
            }
        };

        info!(
            "Received submission {} (language: {}, testcases: {})",
            submission.id_for_log(),
            submission.language,
            submission.testcases.len()
        );

        if let Err(verdict) = scheduler::precheck(&submission) {
            self.scheduler.report(&verdict);
            if let Err(e) = acker.ack().await {
                error!("{:#}", e);
            }
            return Flow::Continue;
        }

        let lease = tokio::select! {
            acquired = timeout(self.slot_wait, self.pool.acquire()) => match acquired {
                Ok(Ok(lease)) => lease,
                Ok(Err(e)) => {
                    error!("Cannot acquire slot for submission {}: {}", submission.id_for_log(), e);
                    if let Err(e) = acker.nack(true).await {
                        error!("{:#}", e);
                    }
                    return Flow::Continue;
                }
                Err(_) => {
                    warn!(
                        "No free slot within {:?} for submission {}; requeueing. Consider raising WORKER_COUNT",
                        self.slot_wait,
                        submission.id_for_log()
                    );
                    if let Err(e) = acker.nack(true).await {
                        error!("{:#}", e);
                    }
                    return Flow::Continue;
                }
            },
            _ = stopped(shutdown) => {
                info!(
                    "Shutdown while submission {} waited for a slot; leaving it unacked",
                    submission.id_for_log()
                );
                return Flow::Shutdown;
            }
        };

        self.tasks
            .spawn(Arc::clone(&self.scheduler).work(lease, submission, acker));
        Flow::Continue
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Submission task failed: {}", e);
            }
        }
    }

    /// Wait up to `grace` for in-flight submissions, then abort the rest
    pub async fn drain(&mut self, grace: Duration) {
        if self.in_flight() == 0 {
            return;
        }
        info!(
            "Waiting up to {:?} for {} in-flight submissions",
            grace,
            self.in_flight()
        );

        let tasks = &mut self.tasks;
        let finished = timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Submission task failed: {}", e);
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                "Grace period elapsed, abandoning {} submissions",
                self.tasks.len()
            );
            self.tasks.abort_all();
            // Aborted tasks drop their leases, which reset and return the slots
            while self.tasks.join_next().await.is_some() {}
        }
    }
}
