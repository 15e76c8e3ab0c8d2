use std::future::Future;
use std::sync::Arc;

use broccoli_queue::queue::BroccoliQueue;
use tracing::{error, info};

use common::config::MqAppConfig;
use common::messages::{CompileJob, ExecuteJob};
use common::mq::Message;

use crate::{BroccoliError, BrokerMessage, Mq, MqError};

pub async fn init_mq(config: &MqAppConfig) -> Result<Mq, MqError> {
    BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .build()
        .await
        .map_err(MqError::from)
}

/// The two named stage channels: "submission uploaded" flows into the
/// compile channel, a successful compile flows into the execute channel.
///
/// Publishing is fire-and-forget with at-least-once delivery. Ordering is
/// only guaranteed within one submission's compile-then-execute transition,
/// and that by the publisher (the compile stage publishes the execute job
/// after its record is persisted), not by the channel.
#[derive(Clone)]
pub struct StageRouter {
    mq: Arc<Mq>,
    compile_queue: String,
    execute_queue: String,
}

impl StageRouter {
    pub fn new(mq: Arc<Mq>, config: &MqAppConfig) -> Self {
        Self {
            mq,
            compile_queue: config.compile_queue_name.clone(),
            execute_queue: config.execute_queue_name.clone(),
        }
    }

    pub async fn publish_compile(&self, job: &CompileJob) -> Result<(), MqError> {
        self.mq
            .publish(&self.compile_queue, None, job, None)
            .await?;
        info!(
            job_id = %job.message_id(),
            filename = %job.filename,
            queue = %self.compile_queue,
            "Published compile job"
        );
        Ok(())
    }

    pub async fn publish_execute(&self, job: &ExecuteJob) -> Result<(), MqError> {
        self.mq
            .publish(&self.execute_queue, None, job, None)
            .await?;
        info!(
            job_id = %job.message_id(),
            filename = %job.filename,
            queue = %self.execute_queue,
            "Published execute job"
        );
        Ok(())
    }

    pub async fn consume_compile<F, Fut>(
        &self,
        concurrency: Option<usize>,
        handler: F,
    ) -> Result<(), MqError>
    where
        F: Fn(CompileJob) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.consume(self.compile_queue.clone(), concurrency, handler)
            .await
    }

    pub async fn consume_execute<F, Fut>(
        &self,
        concurrency: Option<usize>,
        handler: F,
    ) -> Result<(), MqError>
    where
        F: Fn(ExecuteJob) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.consume(self.execute_queue.clone(), concurrency, handler)
            .await
    }

    /// Run a handler for every message on a channel. A handler failure is
    /// logged and the message acknowledged, so one poisoned job never
    /// unsubscribes the stage from future messages.
    async fn consume<M, F, Fut>(
        &self,
        queue: String,
        concurrency: Option<usize>,
        handler: F,
    ) -> Result<(), MqError>
    where
        M: Message + 'static,
        F: Fn(M) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        info!(
            queue = %queue,
            message_type = M::message_type(),
            "Stage consumer starting"
        );

        self.mq
            .process_messages(&queue, concurrency, None, move |message: BrokerMessage<M>| {
                let handler = handler.clone();
                async move {
                    let job = message.payload;
                    let message_id = job.message_id().to_string();
                    if let Err(e) = handler(job).await {
                        error!(
                            message_id = %message_id,
                            message_type = M::message_type(),
                            error = %e,
                            "Stage handler failed"
                        );
                    }
                    Ok::<(), BroccoliError>(())
                }
            })
            .await
            .map_err(MqError::from)
    }
}
