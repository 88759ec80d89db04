//! Background loops spawned by the order processor.

mod order_worker;
mod rediscovery;

pub(crate) use order_worker::OrderWorker;
pub(crate) use rediscovery::RediscoveryScheduler;
