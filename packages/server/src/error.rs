use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("message queue error: {0}")]
    Mq(#[from] mq::MqError),

    #[error("malformed dependency graph: {0}")]
    Graph(#[from] worker::scheduler::GraphError),

    #[error("reference generation failed: {0}")]
    Reference(#[from] worker::reference::ReferenceError),

    #[error("invalid reference material: {0}")]
    InvalidMaterial(String),

    #[error("{0} not found")]
    NotFound(String),
}
