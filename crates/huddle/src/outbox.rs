//! Ordered, non-blocking outbound queue.
//!
//! Engine actions are synchronous: they update local state and enqueue the
//! matching transport event. One drain task emits queued events in order, so
//! the caller never waits on the network and emissions never reorder.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use huddle_transport::{OutboundEvent, Transport, TransportError};

/// Called when the transport refuses an event.
type FailureHook = Box<dyn FnOnce(TransportError) + Send>;

enum Envelope {
    Emit {
        event: OutboundEvent,
        on_failure: Option<FailureHook>,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the outbound queue. Cheap to clone.
#[derive(Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<Envelope>,
}

impl Outbox {
    /// Start the drain task for `transport`.
    ///
    /// Must be called from within a Tokio runtime. The task ends once every
    /// handle has been dropped.
    pub fn start(transport: Arc<dyn Transport>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                match envelope {
                    Envelope::Emit { event, on_failure } => {
                        let conversation = event.conversation_id().clone();
                        if let Err(error) = transport.emit(event).await {
                            tracing::warn!(%conversation, %error, "transport rejected event");
                            if let Some(hook) = on_failure {
                                hook(error);
                            }
                        }
                    }
                    Envelope::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("outbox drained and closed");
        });

        Self { sender }
    }

    /// Queue an event.
    pub fn push(&self, event: OutboundEvent) {
        self.enqueue(event, None);
    }

    /// Queue an event, running `on_failure` if it cannot be emitted.
    pub fn push_with<F>(&self, event: OutboundEvent, on_failure: F)
    where
        F: FnOnce(TransportError) + Send + 'static,
    {
        self.enqueue(event, Some(Box::new(on_failure)));
    }

    fn enqueue(&self, event: OutboundEvent, on_failure: Option<FailureHook>) {
        let envelope = Envelope::Emit { event, on_failure };
        if let Err(mpsc::error::SendError(envelope)) = self.sender.send(envelope) {
            if let Envelope::Emit {
                on_failure: Some(hook),
                ..
            } = envelope
            {
                hook(TransportError::Closed);
            }
        }
    }

    /// Wait until every event queued so far has been handed to the transport.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Envelope::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}
