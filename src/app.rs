//! Shared daemon context handed to the consumer and the HTTP server

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::pool::WorkerPool;
use crate::queue::{Consumer, Publisher};
use crate::reporter::EngineReporter;
use crate::sandbox::IsolateGateway;
use crate::scheduler::Scheduler;

pub struct App {
    pub config: Config,
    pub pool: Arc<WorkerPool>,
    pub scheduler: Arc<Scheduler>,
    pub publisher: Publisher,
}

impl App {
    /// Initialize the sandbox slots and the verdict reporter
    pub async fn init(config: Config) -> Result<Arc<Self>> {
        let gateway = Arc::new(IsolateGateway::new(
            &config.isolate_root,
            config.isolate_use_cgroups,
        ));
        let pool = WorkerPool::init(gateway, config.worker_count)
            .await
            .context("Failed to initialize worker pool")?;
        info!("Worker pool ready with {} slots", pool.capacity());

        let reporter = Arc::new(EngineReporter::new(
            &config.server_endpoint,
            &config.engine_key,
        )?);
        let scheduler = Arc::new(Scheduler::new(reporter));
        let publisher = Publisher::new(&config.rabbitmq_url, &config.queue_name);

        Ok(Arc::new(Self {
            config,
            pool,
            scheduler,
            publisher,
        }))
    }

    pub fn consumer(&self) -> Consumer {
        Consumer::new(
            &self.config.rabbitmq_url,
            &self.config.queue_name,
            Arc::clone(&self.pool),
            Arc::clone(&self.scheduler),
        )
    }
}
