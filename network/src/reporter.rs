//! Hook for faults raised while routing frames nobody is waiting on.

use crate::Error;
use futures::channel::mpsc;
use tracing::error;

/// Receives faults that cannot be returned to a caller.
pub trait Reporter: Send + Sync + 'static {
    fn report(&self, error: Error);
}

/// Reports faults to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logger;

impl Reporter for Logger {
    fn report(&self, error: Error) {
        error!(?error, "routing fault");
    }
}

impl Reporter for mpsc::UnboundedSender<Error> {
    fn report(&self, error: Error) {
        if let Err(err) = self.unbounded_send(error) {
            error!(error = ?err.into_inner(), "fault receiver dropped");
        }
    }
}
