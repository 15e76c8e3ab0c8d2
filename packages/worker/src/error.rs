use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("message queue error: {0}")]
    Mq(#[from] mq::MqError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("malformed dependency graph: {0}")]
    Graph(#[from] crate::scheduler::GraphError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}
