use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use mq::{StageRouter, init_mq};
use worker::barrier::{CompletionBarrier, RedisListStore};
use worker::config::WorkerAppConfig;
use worker::dispatch::Dispatcher;
use worker::engine::ExecutionEngine;
use worker::sandbox::Sandbox;
use worker::stages::StageContext;
use worker::stages::compile::handle_compile_job;
use worker::stages::execute::handle_execute_job;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!("Worker starting: {}", config.worker.id);

    let db = common::store::init_db(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;

    let mq = Arc::new(init_mq(&config.mq).await.context("Failed to initialize MQ")?);
    let router = StageRouter::new(mq, &config.mq);

    let transient = RedisListStore::connect(&config.transient.url, config.transient.ttl_secs)
        .await
        .context("Failed to connect to transient store")?;
    let barrier = Arc::new(CompletionBarrier::new(Arc::new(transient)));

    let workdir = PathBuf::from(&config.worker.workdir);
    let dispatcher = Dispatcher::new(config.worker.grading.max_concurrent_tasks);
    let engine = Arc::new(ExecutionEngine::new(
        db.clone(),
        Sandbox::new(&config.worker.sandbox_bin),
        config.worker.grading.clone(),
        workdir.clone(),
    ));

    let ctx = Arc::new(StageContext {
        db,
        router: router.clone(),
        engine,
        dispatcher,
        barrier,
        workdir,
    });

    info!(
        compile_queue = %config.mq.compile_queue_name,
        execute_queue = %config.mq.execute_queue_name,
        max_concurrent_tasks = config.worker.grading.max_concurrent_tasks,
        batch_size = config.worker.batch_size,
        "Stages wired"
    );

    let compile_ctx = Arc::clone(&ctx);
    let compile_stage = router.consume_compile(Some(config.worker.batch_size), move |job| {
        let ctx = Arc::clone(&compile_ctx);
        async move { handle_compile_job(ctx, job).await.map_err(Into::into) }
    });

    let execute_ctx = Arc::clone(&ctx);
    let execute_stage = router.consume_execute(Some(config.worker.batch_size), move |job| {
        let ctx = Arc::clone(&execute_ctx);
        async move { handle_execute_job(ctx, job).await.map_err(Into::into) }
    });

    tokio::select! {
        result = compile_stage => {
            if let Err(e) = result {
                error!(error = %e, "Compile stage stopped unexpectedly");
            }
        }
        result = execute_stage => {
            if let Err(e) = result {
                error!(error = %e, "Execute stage stopped unexpectedly");
            }
        }
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal");
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}
