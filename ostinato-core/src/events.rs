//! Event bus: explicit observer registration over channels.
//!
//! Observers subscribe for a receiver and drain it at their own pace; the
//! engine thread never blocks on a slow observer. Disconnected receivers are
//! dropped at the next dispatch.

use crossbeam_channel::{Receiver, Sender};

use ostinato_types::EngineEvent;

#[derive(Default)]
pub struct EventBus {
    senders: Vec<Sender<EngineEvent>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    /// Register an observer. Events dispatched after this call arrive on the
    /// returned receiver.
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.push(tx);
        rx
    }

    /// Fan an event out to every live observer.
    pub fn dispatch(&mut self, event: EngineEvent) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn observer_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_dispatched_events() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        bus.dispatch(EngineEvent::ParameterAdded {
            module_path: vec!["root".into()],
            name: "x".into(),
        });
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, EngineEvent::ParameterAdded { .. }));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.dispatch(EngineEvent::ParameterAdded {
            module_path: vec![],
            name: "x".into(),
        });
        assert_eq!(bus.observer_count(), 0);
    }
}
