//! WebSocket client for the channel hub.
//!
//! DESIGN
//! ======
//! One socket per channel handle. `connect` spawns the socket task and
//! returns at once in `Connecting`; the task dials the hub, sends
//! `channel:join`, and moves the handle to `Subscribed` when the join is
//! acknowledged. Outbound frames go through a bounded queue drained by the
//! same task, so callers never touch the socket directly.
//!
//! ERROR HANDLING
//! ==============
//! A failed dial, a rejected join, or a socket that drops without a local
//! `disconnect` all end in `ChannelError`, which is what the failover
//! controller watches for. A local `disconnect` ends in `Closed`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::shared::ChannelCore;
use super::{
    Channel, ChannelOptions, ChannelStatus, Envelope, EventKind, PresenceEvent, Transport, TransportError,
};
use crate::frame::{Data, Frame, Status};
use crate::listeners::{Callback, Subscription};
use crate::model::Participant;

const OUTBOUND_CAPACITY: usize = 256;

/// Transport that speaks the hub's JSON frame protocol.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// `url` is the hub's websocket endpoint, e.g. `ws://127.0.0.1:3000/api/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, channel: &str, options: ChannelOptions) -> Result<Arc<dyn Channel>, TransportError> {
        let core = Arc::new(ChannelCore::new(channel));
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        tokio::spawn(run_socket(self.url.clone(), Arc::clone(&core), options, rx));
        Ok(Arc::new(WsChannel { core, outbound }))
    }
}

enum Outbound {
    Frame(Frame),
    Close,
}

// =============================================================================
// CHANNEL HANDLE
// =============================================================================

pub struct WsChannel {
    core: Arc<ChannelCore>,
    outbound: mpsc::Sender<Outbound>,
}

impl WsChannel {
    async fn submit(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| TransportError::Closed(self.core.name().to_owned()))
    }

    fn require_subscribed(&self) -> Result<(), TransportError> {
        match self.core.status() {
            ChannelStatus::Subscribed => Ok(()),
            ChannelStatus::Closed => Err(TransportError::Closed(self.core.name().to_owned())),
            _ => Err(TransportError::NotSubscribed(self.core.name().to_owned())),
        }
    }
}

#[async_trait::async_trait]
impl Channel for WsChannel {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn status(&self) -> ChannelStatus {
        self.core.status()
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.require_subscribed()?;
        let frame = Frame::request("broadcast:send", envelope_data(&envelope)?).with_channel(self.core.name());
        self.submit(frame).await
    }

    fn on_event(&self, kind: EventKind, callback: Callback<Envelope>) -> Subscription {
        self.core.on_event(kind, callback)
    }

    fn on_status_change(&self, callback: Callback<ChannelStatus>) -> Subscription {
        self.core.on_status_change(callback)
    }

    fn on_presence(&self, callback: Callback<PresenceEvent>) -> Subscription {
        self.core.on_presence(callback)
    }

    async fn track(&self, participant: &Participant) -> Result<(), TransportError> {
        self.require_subscribed()?;
        let frame = Frame::request("presence:track", Data::new())
            .with_channel(self.core.name())
            .with_data("participant", serde_json::to_value(participant)?);
        self.submit(frame).await
    }

    async fn untrack(&self) -> Result<(), TransportError> {
        if self.core.status() != ChannelStatus::Subscribed {
            return Ok(());
        }
        self.submit(Frame::request("presence:untrack", Data::new()).with_channel(self.core.name()))
            .await
    }

    fn presence_state(&self) -> Vec<Participant> {
        self.core.presence_state()
    }

    async fn disconnect(&self) {
        if self.outbound.send(Outbound::Close).await.is_err() {
            debug!(channel = %self.core.name(), "ws: socket task already gone");
        }
        self.core.set_status(ChannelStatus::Closed);
    }
}

// =============================================================================
// SOCKET TASK
// =============================================================================

async fn run_socket(url: String, core: Arc<ChannelCore>, options: ChannelOptions, mut rx: mpsc::Receiver<Outbound>) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(error = %e, %url, channel = %core.name(), "ws: connect failed");
            core.set_status(ChannelStatus::ChannelError);
            return;
        }
    };
    let (mut sink, mut source) = stream.split();

    let join = join_frame(core.name(), &options);
    let join_id = join.id;
    if let Err(e) = write_frame(&mut sink, &join).await {
        warn!(error = %e, channel = %core.name(), "ws: join send failed");
        core.set_status(ChannelStatus::ChannelError);
        return;
    }

    let mut closing = false;
    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(Outbound::Frame(frame)) = cmd else {
                    closing = true;
                    let leave = Frame::request("channel:leave", Data::new()).with_channel(core.name());
                    if let Err(e) = write_frame(&mut sink, &leave).await {
                        debug!(error = %e, "ws: leave send failed");
                    }
                    if let Err(e) = sink.close().await {
                        debug!(error = %e, "ws: close failed");
                    }
                    break;
                };
                if let Err(e) = write_frame(&mut sink, &frame).await {
                    warn!(error = %e, channel = %core.name(), "ws: send failed");
                    break;
                }
            }
            msg = source.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => handle_inbound(&core, join_id, &text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if closing {
        core.set_status(ChannelStatus::Closed);
    } else {
        info!(channel = %core.name(), "ws: socket lost");
        core.set_status(ChannelStatus::ChannelError);
    }
}

fn join_frame(channel: &str, options: &ChannelOptions) -> Frame {
    let mut frame = Frame::request("channel:join", Data::new())
        .with_channel(channel)
        .with_data("self", options.receive_own);
    if let Some(key) = &options.presence_key {
        frame = frame.with_data("key", key.as_str());
    }
    frame
}

async fn write_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), TransportError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(frame)?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))
}

/// Apply one frame pushed by the hub.
pub(crate) fn handle_inbound(core: &ChannelCore, join_id: Uuid, text: &str) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, channel = %core.name(), "ws: invalid inbound frame");
            return;
        }
    };

    if frame.parent_id == Some(join_id) {
        match frame.status {
            Status::Done => {
                core.set_status(ChannelStatus::Subscribed);
            }
            Status::Error => {
                warn!(channel = %core.name(), code = frame.error_code().unwrap_or("-"), "ws: join rejected");
                core.set_status(ChannelStatus::ChannelError);
            }
            _ => {}
        }
        return;
    }

    if frame.status == Status::Error {
        warn!(
            channel = %core.name(),
            syscall = %frame.syscall,
            code = frame.error_code().unwrap_or("-"),
            message = frame.data_str("message").unwrap_or("-"),
            "ws: request failed"
        );
        return;
    }

    match frame.syscall.as_str() {
        "broadcast:event" => match decode_envelope(&frame.data) {
            Ok(envelope) => core.deliver_event(&envelope),
            Err(e) => warn!(error = %e, channel = %core.name(), "ws: malformed broadcast"),
        },
        "presence:sync" => core.deliver_presence(&PresenceEvent::Sync(participants(&frame))),
        "presence:join" => core.deliver_presence(&PresenceEvent::Join(participants(&frame))),
        "presence:leave" => core.deliver_presence(&PresenceEvent::Leave(participants(&frame))),
        _ => {}
    }
}

fn participants(frame: &Frame) -> Vec<Participant> {
    frame.data_as::<Vec<Participant>>("participants").unwrap_or_default()
}

/// Flatten an envelope into frame data (`type`, `payload`, `originId`).
pub(crate) fn envelope_data(envelope: &Envelope) -> Result<Data, TransportError> {
    match serde_json::to_value(envelope)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(Data::new()),
    }
}

pub(crate) fn decode_envelope(data: &Data) -> Result<Envelope, TransportError> {
    let object: serde_json::Map<String, serde_json::Value> =
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
