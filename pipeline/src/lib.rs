//! Engine telemetry pipeline: a poller samples the upstream source, a
//! dispatcher fans each reading out to the message-bus forwarder and the
//! buffered persister, and a batch flusher drains the durable queue into
//! Postgres on its own schedule.

pub mod bus;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod errors;
pub mod flusher;
pub mod forwarder;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod persister;
pub mod pipeline;
pub mod poller;
pub mod pool;
pub mod queue;
pub mod rest;
pub mod source;
pub mod store;
#[cfg(test)]
mod testing;
pub mod validate;
