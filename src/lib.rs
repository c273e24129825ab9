//! podkit - supervised log aggregation and port forwarding for cluster pods.
//!
//! The [`stream`] module merges the logs of every pod matching a label
//! selector into time-ordered batches. The [`forward`] module keeps a port
//! forward to one matching pod alive across tunnel failures. Both talk to the
//! cluster only through the [`pod::PodApi`] trait.

pub mod config;
pub mod error;
pub mod forward;
pub mod log;
pub mod pod;
pub mod stream;
