use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::error::EngineError;
use crate::engine::matcher::{on_event, MatchReport};
use crate::models::event::DomainEvent;
use crate::state::EngineState;

struct Envelope {
    event: DomainEvent,
    reply: oneshot::Sender<Result<MatchReport, EngineError>>,
}

/// Producer side of the event channel. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Envelope>,
}

pub struct EventReceiver {
    rx: mpsc::Receiver<Envelope>,
}

/// Bounded channel between event producers and the matcher.
pub fn event_channel(capacity: usize) -> (EventPublisher, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventPublisher { tx }, EventReceiver { rx })
}

impl EventPublisher {
    /// Submits an event and waits until it has been matched and its runs
    /// materialized. Waits for channel capacity first when the listener is
    /// behind.
    pub async fn publish_event(&self, event: DomainEvent) -> Result<MatchReport, EngineError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { event, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        response.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Consumes events until every publisher is dropped. Each event is matched
/// on its own task.
pub async fn run_event_listener(state: EngineState, mut receiver: EventReceiver) {
    info!("event listener started");
    while let Some(Envelope { event, reply }) = receiver.rx.recv().await {
        let state = state.clone();
        tokio::spawn(async move {
            debug!(workspace_id = %event.workspace_id, trigger = %event.trigger_type, "event received");
            let result = on_event(&state, &event).await;
            // The publisher may have given up waiting.
            let _ = reply.send(result);
        });
    }
    info!("event listener stopped");
}
