pub mod compile;
pub mod execute;

use std::path::PathBuf;
use std::sync::Arc;

use sea_orm::DatabaseConnection;

use mq::StageRouter;

use crate::barrier::CompletionBarrier;
use crate::dispatch::Dispatcher;
use crate::engine::ExecutionEngine;

/// Everything a stage handler needs, wired once at startup.
pub struct StageContext {
    pub db: DatabaseConnection,
    pub router: StageRouter,
    pub engine: Arc<ExecutionEngine>,
    pub dispatcher: Dispatcher,
    pub barrier: Arc<CompletionBarrier>,
    pub workdir: PathBuf,
}
