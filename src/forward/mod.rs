//! Port forwarding to a pod selected by labels.
//!
//! [`ForwardSession`] is one tunnel that ends on its first failure.
//! [`ReconnectingForward`] keeps a tunnel up by replacing failed sessions,
//! paced by a [`BackoffSignal`].

mod backoff;
mod error;
mod reconnect;
mod session;
mod signal;

pub use backoff::BackoffSignal;
pub use error::ForwardError;
pub use reconnect::ReconnectingForward;
pub use session::ForwardSession;
pub use signal::{Termination, TerminationReceiver, TerminationSignal};

use crate::pod::PodDescriptor;

/// Caller-facing view of a forward, whether or not it reconnects.
pub trait ForwardHandle: Send + Sync {
    /// Local port bound for `remote`, or
    /// [`PORT_UNSPECIFIED`](crate::config::PORT_UNSPECIFIED) if unknown.
    fn local_port(&self, remote: u16) -> u16;

    /// Close the forward. Only the first call has an effect.
    fn stop(&self);

    /// Observe how the forward ends.
    fn termination(&self) -> TerminationReceiver;

    /// Pod currently targeted, if any.
    fn pod(&self) -> Option<PodDescriptor>;
}
