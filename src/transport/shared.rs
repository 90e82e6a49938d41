//! Listener and status bookkeeping shared by every channel implementation.

use std::sync::{Arc, Mutex};

use super::{ChannelStatus, Envelope, EventKind, PresenceEvent};
use crate::listeners::{Callback, Listeners, Subscription, lock};
use crate::model::Participant;

pub(crate) struct ChannelCore {
    name: String,
    status: Mutex<ChannelStatus>,
    status_listeners: Listeners<ChannelStatus>,
    stroke_listeners: Listeners<Envelope>,
    clear_listeners: Listeners<Envelope>,
    message_listeners: Listeners<Envelope>,
    presence_listeners: Listeners<PresenceEvent>,
    presence: Mutex<Vec<Participant>>,
}

impl ChannelCore {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: Mutex::new(ChannelStatus::Connecting),
            status_listeners: Listeners::new(),
            stroke_listeners: Listeners::new(),
            clear_listeners: Listeners::new(),
            message_listeners: Listeners::new(),
            presence_listeners: Listeners::new(),
            presence: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn status(&self) -> ChannelStatus {
        *lock(&self.status)
    }

    /// Move to `status` and notify. `Closed` is final.
    pub(crate) fn set_status(&self, status: ChannelStatus) -> bool {
        {
            let mut current = lock(&self.status);
            if *current == status || *current == ChannelStatus::Closed {
                return false;
            }
            *current = status;
        }
        self.status_listeners.notify(&status);
        true
    }

    fn listeners_for(&self, kind: EventKind) -> &Listeners<Envelope> {
        match kind {
            EventKind::Stroke => &self.stroke_listeners,
            EventKind::Clear => &self.clear_listeners,
            EventKind::Message => &self.message_listeners,
        }
    }

    pub(crate) fn on_event(&self, kind: EventKind, callback: Callback<Envelope>) -> Subscription {
        self.listeners_for(kind).subscribe_callback(callback)
    }

    pub(crate) fn on_status_change(&self, callback: Callback<ChannelStatus>) -> Subscription {
        let sub = self.status_listeners.subscribe_callback(Arc::clone(&callback));
        callback(&self.status());
        sub
    }

    pub(crate) fn on_presence(&self, callback: Callback<PresenceEvent>) -> Subscription {
        self.presence_listeners.subscribe_callback(callback)
    }

    pub(crate) fn deliver_event(&self, envelope: &Envelope) {
        self.listeners_for(envelope.kind).notify(envelope);
    }

    pub(crate) fn deliver_presence(&self, event: &PresenceEvent) {
        if let PresenceEvent::Sync(table) = event {
            *lock(&self.presence) = table.clone();
        }
        self.presence_listeners.notify(event);
    }

    pub(crate) fn presence_state(&self) -> Vec<Participant> {
        lock(&self.presence).clone()
    }
}
