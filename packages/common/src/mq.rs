use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Core trait for all stage messages.
///
/// The transport only needs serde; this trait pins down the queue routing
/// name and a stable per-message id so publishers and consumers never drift.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + Clone {
    fn message_type() -> &'static str
    where
        Self: Sized;

    fn message_id(&self) -> &str;
}
