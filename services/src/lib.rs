//! Consumes listen batches from the incoming queue and writes them to the
//! timescale listen store.
//!
//! The moving parts, leaf first:
//!
//! * [`writer::BatchWriter`] bulk inserts a batch, bisecting on failure to isolate bad listens
//! * [`connection::ConnectionManager`] (re)opens the store and broker connections
//! * [`consumer::QueueConsumer`] drives the receive / write / acknowledge loop

pub use lb_writer_core::*;

pub mod batch;
pub mod broker;
pub mod connection;
pub mod consumer;
pub mod retry;
pub mod store;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;
