// SPDX-License-Identifier: GPL-3.0-only

//! Workflow event subscribers

use super::WorkflowEvent;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

/// Handle returned by [`WorkflowModel::subscribe`](super::WorkflowModel::subscribe)
///
/// Events arrive in transition order. Dropping the subscription (or its
/// receiver) unsubscribes it on the next publish.
pub struct WorkflowSubscription {
    pub id: Uuid,
    pub events: UnboundedReceiver<WorkflowEvent>,
}

impl WorkflowSubscription {
    /// Take every event published so far without waiting
    pub fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    senders: Vec<(Uuid, UnboundedSender<WorkflowEvent>)>,
}

impl Observers {
    pub fn subscribe(&mut self) -> WorkflowSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.senders.push((id, tx));
        debug!(%id, observers = self.senders.len(), "Workflow observer subscribed");
        WorkflowSubscription { id, events: rx }
    }

    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sid, _)| *sid != id);
        before != self.senders.len()
    }

    /// Deliver to every live subscriber, pruning closed ones
    pub fn publish(&mut self, event: &WorkflowEvent) {
        self.senders.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                debug!(%id, "Pruning closed workflow observer");
            }
            alive
        });
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }
}
