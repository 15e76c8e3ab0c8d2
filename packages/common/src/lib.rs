pub mod config;
pub mod messages;
pub mod mq;
pub mod verdict;

#[cfg(feature = "sea-orm")]
pub mod entity;
#[cfg(feature = "sea-orm")]
pub mod store;

pub use verdict::{CorrectnessTier, Verdict};
