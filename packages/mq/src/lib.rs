pub mod error;
pub mod router;

pub use broccoli_queue::{
    brokers::broker::BrokerMessage,
    error::BroccoliError,
    queue::{BroccoliQueue, ConsumeOptions},
};
pub use error::MqError;
pub use router::{StageRouter, init_mq};

pub type Mq = BroccoliQueue;
