//! Unsolicited event classification and dispatch.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::events::{FileRetriever, SessionEvent, SessionObserver, ShootingMode};
use crate::protocol::{
    EVENT_DEVICE_PROP_CHANGED, EVENT_OBJECT_ADDED, EVENT_OBJECT_REMOVED, EVENT_SDIO_OBJECT_ADDED,
    EVENT_SDIO_OBJECT_REMOVED, EVENT_SDIO_PROPERTY_CHANGED, EventPacket, ObjectHandle,
};

/// What an event asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Tell the consumer to re-poll the property snapshot.
    EventAvailable,
    RetrieveObject {
        handle: ObjectHandle,
        mode: ShootingMode,
    },
    TransferComplete,
    Ignore,
}

/// Map an event to its action.
pub fn classify(event: &EventPacket, mode: ShootingMode) -> EventAction {
    match event.code {
        EVENT_DEVICE_PROP_CHANGED | EVENT_SDIO_PROPERTY_CHANGED => EventAction::EventAvailable,
        EVENT_OBJECT_ADDED | EVENT_SDIO_OBJECT_ADDED => match event.params.first() {
            Some(&handle) => EventAction::RetrieveObject { handle, mode },
            None => {
                warn!(code = %format!("0x{:04X}", event.code), "Object added without a handle");
                EventAction::Ignore
            }
        },
        EVENT_OBJECT_REMOVED | EVENT_SDIO_OBJECT_REMOVED => EventAction::TransferComplete,
        _ => EventAction::Ignore,
    }
}

/// Event-side state shared between the dispatcher and the session.
#[derive(Debug, Default)]
pub struct EventState {
    /// Most recent event packet, stored before it is dispatched.
    pub last_packet: Option<EventPacket>,
    /// `None` until the consumer reports a mode.
    pub shooting_mode: Option<ShootingMode>,
    pub transfer_in_progress: bool,
}

/// Classifies events and hands them to the observer and retriever.
pub struct EventDispatcher {
    state: Arc<Mutex<EventState>>,
    observer: Arc<dyn SessionObserver>,
    retriever: Arc<dyn FileRetriever>,
}

impl EventDispatcher {
    pub fn new(
        state: Arc<Mutex<EventState>>,
        observer: Arc<dyn SessionObserver>,
        retriever: Arc<dyn FileRetriever>,
    ) -> Self {
        Self {
            state,
            observer,
            retriever,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record and dispatch one event.
    pub fn dispatch(&self, event: EventPacket) -> EventAction {
        let action = {
            let mut state = self.lock();
            let mode = state.shooting_mode.unwrap_or_default();
            let action = classify(&event, mode);
            match action {
                EventAction::RetrieveObject { .. } => state.transfer_in_progress = true,
                EventAction::TransferComplete => state.transfer_in_progress = false,
                _ => {}
            }
            state.last_packet = Some(event);
            action
        };
        trace!(?action, "Dispatching event");

        match action {
            EventAction::EventAvailable => self.observer.on_event(&SessionEvent::EventAvailable),
            EventAction::RetrieveObject { handle, mode } => {
                self.retriever.retrieve(handle, mode);
                self.observer
                    .on_event(&SessionEvent::ObjectAdded { handle, mode });
            }
            EventAction::TransferComplete => self.observer.on_event(&SessionEvent::TransferComplete),
            EventAction::Ignore => debug!("Ignoring event"),
        }
        action
    }
}
