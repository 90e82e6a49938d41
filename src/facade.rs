//! Sync facade — the one entry point the board UI talks to.
//!
//! ARCHITECTURE
//! ============
//! ```text
//!   publish_* ──► per-kind route ──► Primary:  transport channel (+ primary view)
//!                                 └► Degraded: HybridRelay (local relay / durable store)
//!
//!   primary view ─┐
//!                 ├─► compose (per kind) ──► CapacityGate ──► on_snapshot_change
//!   fallback view ┘
//! ```
//!
//! `SyncStrategy::PrimaryTransport` runs one `FailoverController` per
//! `ChannelKind`; each kind independently reads and writes through its
//! transport channel while `Primary` and through the fallback pipeline
//! while `Degraded`. The relay strategies never open a transport channel
//! and route everything through the fallback pipeline.
//!
//! Own writes are applied to the view that is currently published before
//! the first suspension point of the `publish_*` future, so the next
//! `snapshot()` always contains them. Broadcasts carrying our own origin id
//! are ignored on receipt.
//!
//! HANDOVER
//! ========
//! When drawing or chat degrades, the primary history is written into the
//! fallback relays. Until that finishes the degraded view shows the fallback
//! items plus the history not yet handed over, so nothing seen before the
//! outage drops out. A clear while degraded empties both. On recovery the
//! fallback history is folded back into the primary view.
//!
//! Composition, storing and notifying run under one lock: snapshots are
//! published in the order they were composed.
//!
//! CAPACITY
//! ========
//! Every composed participant list runs through the `CapacityGate` with the
//! local participant included. Only the admitted set is published. When
//! the local participant becomes blocked it withdraws its presence
//! (untrack on the primary channel, delete from the relays); when it is
//! admitted again it re-announces itself.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::capacity::CapacityGate;
use crate::config::SyncConfig;
use crate::cross_device::{CrossDeviceRelay, DurableStore};
use crate::failover::{FailoverController, TierState, Transition};
use crate::listeners::{Callback, Listeners, Subscription, lock};
use crate::local_relay::{LocalBus, LocalRelay, SnapshotStore};
use crate::merge::HybridRelay;
use crate::model::{
    BoardItem, ChatMessage, Participant, Point, Stroke, SyncSnapshot, now_ms, push_unique, retain_last,
};
use crate::scheduler::{Scheduler, Ticket};
use crate::transport::{
    Channel, ChannelKind, ChannelOptions, ChannelStatus, Envelope, EventKind, PresenceEvent, Transport,
};

// =============================================================================
// STRATEGY & ERRORS
// =============================================================================

/// Which tiers a facade runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Transport first, per-kind failover to whichever relays were supplied.
    #[default]
    PrimaryTransport,
    LocalRelayOnly,
    CrossDeviceOnly,
    /// Local relay and cross-device relay merged; no transport.
    Hybrid,
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PrimaryTransport => "primary",
            Self::LocalRelayOnly => "local",
            Self::CrossDeviceOnly => "cross-device",
            Self::Hybrid => "hybrid",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown strategy: {0} (expected primary, hybrid, local, or cross-device)")]
pub struct ParseStrategyError(String);

impl FromStr for SyncStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::PrimaryTransport),
            "local" => Ok(Self::LocalRelayOnly),
            "cross-device" => Ok(Self::CrossDeviceOnly),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(ParseStrategyError(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("strategy {0} needs a primary transport")]
    MissingTransport(SyncStrategy),
    #[error("strategy {0} needs a local bus and snapshot store")]
    MissingLocal(SyncStrategy),
    #[error("strategy {0} needs a durable store")]
    MissingDurable(SyncStrategy),
    #[error("strategy {0} needs at least one fallback relay")]
    NoFallback(SyncStrategy),
}

// =============================================================================
// BUILDER
// =============================================================================

pub struct SyncFacadeBuilder {
    config: SyncConfig,
    strategy: SyncStrategy,
    transport: Option<Arc<dyn Transport>>,
    local: Option<(LocalBus, Arc<dyn SnapshotStore>)>,
    durable: Option<Arc<dyn DurableStore>>,
    participant: Option<Participant>,
}

impl SyncFacadeBuilder {
    #[must_use]
    pub fn strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn local(mut self, bus: LocalBus, store: Arc<dyn SnapshotStore>) -> Self {
        self.local = Some((bus, store));
        self
    }

    #[must_use]
    pub fn durable(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// The local participant. Defaults to a random nickname and color.
    #[must_use]
    pub fn participant(mut self, participant: Participant) -> Self {
        self.participant = Some(participant);
        self
    }

    /// Start every tier the strategy needs.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier required by the strategy was not supplied.
    pub async fn start(self) -> Result<SyncFacade, BuildError> {
        let Self { config, strategy, transport, local, durable, participant } = self;

        let transport = match strategy {
            SyncStrategy::PrimaryTransport => Some(transport.ok_or(BuildError::MissingTransport(strategy))?),
            _ => None,
        };
        let (local, durable) = match strategy {
            SyncStrategy::PrimaryTransport => {
                if local.is_none() && durable.is_none() {
                    return Err(BuildError::NoFallback(strategy));
                }
                (local, durable)
            }
            SyncStrategy::LocalRelayOnly => (Some(local.ok_or(BuildError::MissingLocal(strategy))?), None),
            SyncStrategy::CrossDeviceOnly => (None, Some(durable.ok_or(BuildError::MissingDurable(strategy))?)),
            SyncStrategy::Hybrid => (
                Some(local.ok_or(BuildError::MissingLocal(strategy))?),
                Some(durable.ok_or(BuildError::MissingDurable(strategy))?),
            ),
        };

        let me = participant.unwrap_or_else(Participant::random);
        let local = local.map(|(bus, store)| LocalRelay::start(bus, store, &config));
        let cross = durable.map(|store| CrossDeviceRelay::start(store, &config));
        let fallback = HybridRelay::new(local, cross, &config);

        let mut controllers = BTreeMap::new();
        if let Some(transport) = transport {
            for kind in ChannelKind::ALL {
                let options = match kind {
                    ChannelKind::Presence => ChannelOptions::presence(me.id.clone()),
                    ChannelKind::Drawing | ChannelKind::Chat => ChannelOptions::default(),
                };
                let controller = FailoverController::start(Arc::clone(&transport), kind, options, &config).await;
                controllers.insert(kind, controller);
            }
        }

        let facade = SyncFacade {
            inner: Arc::new(FacadeInner {
                strategy,
                config,
                controllers,
                fallback,
                gate: CapacityGate::new(config.max_participants),
                state: Mutex::new(FacadeState {
                    me,
                    primary: PrimaryView::default(),
                    published: SyncSnapshot::default(),
                    handlers: BTreeMap::new(),
                    heartbeat: None,
                    stopped: false,
                }),
                listeners: Listeners::new(),
                publishing: Mutex::new(()),
                writes: tokio::sync::Mutex::new(()),
                wiring: Mutex::new(Vec::new()),
                scheduler: Scheduler::new(),
            }),
        };
        facade.wire().await;

        let me = facade.participant();
        info!(%strategy, participant = %me.id, name = %me.display_name, "sync facade: started");
        Ok(facade)
    }
}

// =============================================================================
// FACADE
// =============================================================================

/// Board state received over the primary transport.
#[derive(Default)]
struct PrimaryView {
    strokes: Vec<Stroke>,
    messages: Vec<ChatMessage>,
    presence: Vec<Participant>,
}

struct FacadeState {
    me: Participant,
    primary: PrimaryView,
    published: SyncSnapshot,
    handlers: BTreeMap<ChannelKind, Vec<Subscription>>,
    heartbeat: Option<Ticket>,
    stopped: bool,
}

struct FacadeInner {
    strategy: SyncStrategy,
    config: SyncConfig,
    controllers: BTreeMap<ChannelKind, FailoverController>,
    fallback: HybridRelay,
    gate: CapacityGate,
    state: Mutex<FacadeState>,
    listeners: Listeners<SyncSnapshot>,
    /// Held across compose, store and notify.
    publishing: Mutex<()>,
    /// Orders handover against degraded-path clears.
    writes: tokio::sync::Mutex<()>,
    wiring: Mutex<Vec<Subscription>>,
    scheduler: Scheduler,
}

/// Running sync stack for one participant. Clones share it.
#[derive(Clone)]
pub struct SyncFacade {
    inner: Arc<FacadeInner>,
}

impl SyncFacade {
    #[must_use]
    pub fn builder(config: SyncConfig) -> SyncFacadeBuilder {
        SyncFacadeBuilder {
            config,
            strategy: SyncStrategy::default(),
            transport: None,
            local: None,
            durable: None,
            participant: None,
        }
    }

    #[must_use]
    pub fn strategy(&self) -> SyncStrategy {
        self.inner.strategy
    }

    /// The local participant as last announced.
    #[must_use]
    pub fn participant(&self) -> Participant {
        lock(&self.inner.state).me.clone()
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub async fn publish_stroke(&self, stroke: Stroke) {
        let Some(channel) = self.primary_channel(ChannelKind::Drawing) else {
            self.inner.fallback.add_stroke(&stroke).await;
            return;
        };
        let cap = self.inner.config.remote_stroke_window;
        self.update_primary(|view| insert_sorted(&mut view.strokes, stroke.clone(), cap));

        let origin = self.origin_id();
        let sent = match Envelope::stroke(&stroke, &origin) {
            Ok(envelope) => channel.send(envelope).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(error = %e, stroke = %stroke.id, "sync facade: stroke send failed; writing to fallback");
            self.inner.fallback.add_stroke(&stroke).await;
        }
    }

    pub async fn publish_clear(&self) {
        let Some(channel) = self.primary_channel(ChannelKind::Drawing) else {
            let _writes = self.inner.writes.lock().await;
            self.update_primary(|view| view.strokes.clear());
            self.inner.fallback.clear_strokes().await;
            return;
        };
        self.update_primary(|view| view.strokes.clear());
        if let Err(e) = channel.send(Envelope::clear(&self.origin_id())).await {
            warn!(error = %e, "sync facade: clear send failed; writing to fallback");
            self.inner.fallback.clear_strokes().await;
        }
    }

    pub async fn publish_message(&self, message: ChatMessage) {
        let Some(channel) = self.primary_channel(ChannelKind::Chat) else {
            self.inner.fallback.add_message(&message).await;
            return;
        };
        let cap = self.inner.config.message_history;
        self.update_primary(|view| insert_sorted(&mut view.messages, message.clone(), cap));

        let origin = self.origin_id();
        let sent = match Envelope::message(&message, &origin) {
            Ok(envelope) => channel.send(envelope).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(error = %e, message = %message.id, "sync facade: message send failed; writing to fallback");
            self.inner.fallback.add_message(&message).await;
        }
    }

    /// Author a message as the local participant. Blank content is ignored.
    pub async fn new_message(&self, content: &str) -> Option<ChatMessage> {
        let message = ChatMessage::from_participant(&self.participant(), content)?;
        self.publish_message(message.clone()).await;
        Some(message)
    }

    /// Move the local cursor and re-announce presence.
    pub async fn publish_cursor(&self, x: f64, y: f64) {
        let me = {
            let mut state = lock(&self.inner.state);
            state.me.cursor = Some(Point { x, y });
            state.me.last_seen = now_ms();
            state.me.clone()
        };
        self.recompute();
        self.announce(&me).await;
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Last published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        lock(&self.inner.state).published.clone()
    }

    /// Register for published snapshots. The callback runs immediately
    /// with the current snapshot.
    pub fn on_snapshot_change<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncSnapshot) + Send + Sync + 'static,
    {
        let callback: Callback<SyncSnapshot> = Arc::new(f);
        let sub = self.inner.listeners.subscribe_callback(Arc::clone(&callback));
        callback(&self.snapshot());
        sub
    }

    /// Current tier for `kind`. Relay-only strategies always report
    /// `Degraded`: they run on the fallback pipeline.
    #[must_use]
    pub fn tier(&self, kind: ChannelKind) -> TierState {
        self.inner.controllers.get(&kind).map_or(TierState::Degraded, FailoverController::tier)
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.inner.gate.is_blocked()
    }

    /// Called with the new blocked flag whenever admission changes.
    pub fn on_capacity_change<F>(&self, f: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.gate.on_change(f)
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Withdraw presence everywhere, close channels, and cancel every timer.
    pub async fn shutdown(&self) {
        let me = {
            let mut state = lock(&self.inner.state);
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.handlers.clear();
            state.heartbeat = None;
            state.me.clone()
        };
        self.inner.scheduler.cancel_all();
        lock(&self.inner.wiring).clear();

        if let Some(channel) = self.primary_channel(ChannelKind::Presence) {
            if let Err(e) = channel.untrack().await {
                debug!(error = %e, "sync facade: untrack on shutdown failed");
            }
        }
        for controller in self.inner.controllers.values() {
            controller.stop().await;
        }
        self.inner.fallback.remove_participant(&me.id).await;
        self.inner.fallback.stop();
        info!(participant = %me.id, "sync facade: shut down");
    }

    // =========================================================================
    // WIRING
    // =========================================================================

    async fn wire(&self) {
        let mut wiring = Vec::new();

        let weak = self.weak();
        wiring.push(self.inner.gate.on_change(move |blocked| {
            if let Some(facade) = upgrade(&weak) {
                let blocked = *blocked;
                let task = facade.clone();
                facade.inner.scheduler.spawn("facade:capacity", async move {
                    task.apply_capacity(blocked).await;
                });
            }
        }));

        let weak = self.weak();
        wiring.push(self.inner.fallback.subscribe(move |_| {
            if let Some(facade) = upgrade(&weak) {
                facade.recompute();
            }
        }));

        for controller in self.inner.controllers.values() {
            let weak = self.weak();
            wiring.push(controller.on_transition(move |transition| {
                if let Some(facade) = upgrade(&weak) {
                    facade.on_transition(transition);
                }
            }));
        }
        lock(&self.inner.wiring).extend(wiring);

        for (kind, controller) in &self.inner.controllers {
            match controller.channel() {
                Some(channel) => self.attach(*kind, channel),
                None => self.on_degraded(*kind),
            }
        }
        if self.inner.controllers.is_empty() {
            let me = self.participant();
            self.announce(&me).await;
            self.start_heartbeat();
        }
        self.recompute();
    }

    fn on_transition(&self, transition: &Transition) {
        match (transition.tier, &transition.channel) {
            (TierState::Primary, Some(channel)) => {
                self.seed_primary(transition.kind);
                self.attach(transition.kind, Arc::clone(channel));
                if transition.kind == ChannelKind::Presence {
                    self.stop_heartbeat();
                }
            }
            (TierState::Primary, None) => {}
            (TierState::Degraded, _) => self.on_degraded(transition.kind),
        }
        self.recompute();
    }

    /// Route `kind` through the fallback pipeline.
    fn on_degraded(&self, kind: ChannelKind) {
        lock(&self.inner.state).handlers.remove(&kind);
        if kind != ChannelKind::Presence {
            let facade = self.clone();
            self.inner.scheduler.spawn("facade:handover", async move {
                facade.hand_over(kind).await;
            });
            return;
        }
        let facade = self.clone();
        self.inner.scheduler.spawn("facade:announce", async move {
            facade.heartbeat().await;
        });
        self.start_heartbeat();
    }

    /// Write the primary history of `kind` into the fallback relays, then
    /// drop the handed-over items from the primary view.
    async fn hand_over(&self, kind: ChannelKind) {
        let _writes = self.inner.writes.lock().await;
        let (strokes, messages) = {
            let state = lock(&self.inner.state);
            match kind {
                ChannelKind::Drawing => (state.primary.strokes.clone(), Vec::new()),
                ChannelKind::Chat => (Vec::new(), state.primary.messages.clone()),
                ChannelKind::Presence => return,
            }
        };
        if strokes.is_empty() && messages.is_empty() {
            return;
        }
        for stroke in &strokes {
            self.inner.fallback.add_stroke(stroke).await;
        }
        for message in &messages {
            self.inner.fallback.add_message(message).await;
        }

        if !self.on_primary(kind) {
            let mut state = lock(&self.inner.state);
            state.primary.strokes.retain(|s| !strokes.iter().any(|h| h.id == s.id));
            state.primary.messages.retain(|m| !messages.iter().any(|h| h.id == m.id));
        }
        debug!(
            channel = %kind,
            strokes = strokes.len(),
            messages = messages.len(),
            "sync facade: primary history handed to fallback"
        );
        self.recompute();
    }

    /// Carry fallback history into the primary view after recovery.
    fn seed_primary(&self, kind: ChannelKind) {
        let fallback = self.inner.fallback.snapshot();
        let config = &self.inner.config;
        let mut state = lock(&self.inner.state);
        match kind {
            ChannelKind::Drawing => {
                for stroke in fallback.strokes {
                    insert_sorted(&mut state.primary.strokes, stroke, config.remote_stroke_window);
                }
            }
            ChannelKind::Chat => {
                for message in fallback.messages {
                    insert_sorted(&mut state.primary.messages, message, config.message_history);
                }
            }
            ChannelKind::Presence => {}
        }
    }

    /// Register event handlers on a subscribed-or-connecting channel.
    fn attach(&self, kind: ChannelKind, channel: Arc<dyn Channel>) {
        let mut subs = Vec::new();
        match kind {
            ChannelKind::Drawing => {
                subs.push(self.on_envelope(channel.as_ref(), EventKind::Stroke));
                subs.push(self.on_envelope(channel.as_ref(), EventKind::Clear));
            }
            ChannelKind::Chat => subs.push(self.on_envelope(channel.as_ref(), EventKind::Message)),
            ChannelKind::Presence => {
                let weak = self.weak();
                subs.push(channel.on_presence(Arc::new(move |event: &PresenceEvent| {
                    if let Some(facade) = upgrade(&weak) {
                        facade.on_presence(event);
                    }
                })));

                let weak = self.weak();
                let tracked = Arc::clone(&channel);
                subs.push(channel.on_status_change(Arc::new(move |status: &ChannelStatus| {
                    if *status != ChannelStatus::Subscribed {
                        return;
                    }
                    if let Some(facade) = upgrade(&weak) {
                        facade.track_on(Arc::clone(&tracked));
                    }
                })));
            }
        }
        debug!(channel = %kind, "sync facade: channel attached");
        lock(&self.inner.state).handlers.insert(kind, subs);
    }

    fn on_envelope(&self, channel: &dyn Channel, kind: EventKind) -> Subscription {
        let weak = self.weak();
        channel.on_event(
            kind,
            Arc::new(move |envelope: &Envelope| {
                if let Some(facade) = upgrade(&weak) {
                    facade.on_envelope_received(envelope);
                }
            }),
        )
    }

    fn on_envelope_received(&self, envelope: &Envelope) {
        if envelope.origin_id == self.origin_id() {
            return;
        }
        let config = self.inner.config;
        match envelope.kind {
            EventKind::Stroke => match envelope.decode_stroke() {
                Ok(stroke) => self.update_primary(|view| insert_sorted(&mut view.strokes, stroke, config.remote_stroke_window)),
                Err(e) => warn!(error = %e, "sync facade: dropping undecodable stroke"),
            },
            EventKind::Clear => self.update_primary(|view| view.strokes.clear()),
            EventKind::Message => match envelope.decode_message() {
                Ok(message) => {
                    self.update_primary(|view| insert_sorted(&mut view.messages, message, config.message_history));
                }
                Err(e) => warn!(error = %e, "sync facade: dropping undecodable message"),
            },
        }
    }

    fn on_presence(&self, event: &PresenceEvent) {
        match event {
            PresenceEvent::Sync(table) => {
                let table = table.clone();
                self.update_primary(|view| view.presence = table);
            }
            PresenceEvent::Join(joined) => debug!(count = joined.len(), "sync facade: presence join"),
            PresenceEvent::Leave(left) => debug!(count = left.len(), "sync facade: presence leave"),
        }
    }

    fn track_on(&self, channel: Arc<dyn Channel>) {
        if self.is_blocked() {
            return;
        }
        let me = self.participant();
        self.inner.scheduler.spawn("facade:track", async move {
            if let Err(e) = channel.track(&me).await {
                warn!(error = %e, "sync facade: presence track failed");
            }
        });
    }

    // =========================================================================
    // PRESENCE & CAPACITY
    // =========================================================================

    /// Publish the local participant on whichever tier carries presence.
    async fn announce(&self, me: &Participant) {
        if self.is_blocked() {
            return;
        }
        match self.primary_channel(ChannelKind::Presence) {
            Some(channel) => {
                if let Err(e) = channel.track(me).await {
                    warn!(error = %e, "sync facade: presence track failed");
                }
            }
            None => self.inner.fallback.add_participant(me).await,
        }
    }

    async fn heartbeat(&self) {
        let me = {
            let mut state = lock(&self.inner.state);
            state.me.last_seen = now_ms();
            state.me.clone()
        };
        if self.primary_channel(ChannelKind::Presence).is_none() && !self.is_blocked() {
            self.inner.fallback.add_participant(&me).await;
        }
    }

    fn start_heartbeat(&self) {
        let mut state = lock(&self.inner.state);
        if state.heartbeat.is_some() || state.stopped {
            return;
        }
        let weak = self.weak();
        let ticket = self.inner.scheduler.every("facade:heartbeat", self.inner.config.heartbeat_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(facade) = upgrade(&weak) {
                    facade.heartbeat().await;
                }
            }
        });
        state.heartbeat = Some(ticket);
    }

    fn stop_heartbeat(&self) {
        let ticket = lock(&self.inner.state).heartbeat.take();
        if let Some(ticket) = ticket {
            self.inner.scheduler.cancel(ticket);
        }
    }

    async fn apply_capacity(&self, blocked: bool) {
        let me = self.participant();
        if blocked {
            info!(participant = %me.id, "sync facade: over capacity; withdrawing presence");
            if let Some(channel) = self.primary_channel(ChannelKind::Presence) {
                if let Err(e) = channel.untrack().await {
                    warn!(error = %e, "sync facade: presence untrack failed");
                }
            }
            self.inner.fallback.remove_participant(&me.id).await;
        } else {
            info!(participant = %me.id, "sync facade: admitted; announcing presence");
            self.announce(&me).await;
        }
    }

    // =========================================================================
    // COMPOSITION
    // =========================================================================

    fn on_primary(&self, kind: ChannelKind) -> bool {
        self.inner.controllers.get(&kind).is_some_and(|c| c.tier() == TierState::Primary)
    }

    fn primary_channel(&self, kind: ChannelKind) -> Option<Arc<dyn Channel>> {
        self.inner.controllers.get(&kind).and_then(FailoverController::channel)
    }

    fn origin_id(&self) -> String {
        lock(&self.inner.state).me.id.clone()
    }

    fn update_primary<F>(&self, apply: F)
    where
        F: FnOnce(&mut PrimaryView),
    {
        apply(&mut lock(&self.inner.state).primary);
        self.recompute();
    }

    fn compose(&self) -> SyncSnapshot {
        let fallback = self.inner.fallback.snapshot();
        let drawing = self.on_primary(ChannelKind::Drawing);
        let chat = self.on_primary(ChannelKind::Chat);
        let presence = self.on_primary(ChannelKind::Presence);
        let (me, strokes, messages, presence, held_strokes, held_messages) = {
            let state = lock(&self.inner.state);
            (
                state.me.clone(),
                drawing.then(|| state.primary.strokes.clone()),
                chat.then(|| state.primary.messages.clone()),
                presence.then(|| state.primary.presence.clone()),
                if drawing { Vec::new() } else { state.primary.strokes.clone() },
                if chat { Vec::new() } else { state.primary.messages.clone() },
            )
        };

        let participants = presence.unwrap_or(fallback.participants);
        let decision = self.inner.gate.evaluate(&participants, &me);
        let config = &self.inner.config;
        SyncSnapshot {
            participants: decision.admitted,
            strokes: match strokes {
                Some(primary) => primary,
                None => with_history(fallback.strokes, held_strokes, config.remote_stroke_window),
            },
            messages: match messages {
                Some(primary) => primary,
                None => with_history(fallback.messages, held_messages, config.message_history),
            },
        }
    }

    /// Re-derive the published snapshot and notify if it changed.
    /// Listeners must not recompute synchronously.
    fn recompute(&self) {
        let _publishing = lock(&self.inner.publishing);
        if lock(&self.inner.state).stopped {
            return;
        }
        let snapshot = self.compose();
        {
            let mut state = lock(&self.inner.state);
            if state.published == snapshot {
                return;
            }
            state.published = snapshot.clone();
        }
        self.inner.listeners.notify(&snapshot);
    }

    fn weak(&self) -> Weak<FacadeInner> {
        Arc::downgrade(&self.inner)
    }
}

fn upgrade(weak: &Weak<FacadeInner>) -> Option<SyncFacade> {
    weak.upgrade().map(|inner| SyncFacade { inner })
}

/// Insert by id, keep timestamp order, keep the newest `cap`.
fn insert_sorted<T: BoardItem>(items: &mut Vec<T>, item: T, cap: usize) {
    if push_unique(items, item) {
        items.sort_by_key(|i| i.timestamp());
        retain_last(items, cap);
    }
}

/// Fallback items plus primary history that has not been handed over yet.
fn with_history<T: BoardItem>(mut items: Vec<T>, history: Vec<T>, cap: usize) -> Vec<T> {
    if history.is_empty() {
        return items;
    }
    let cap = cap.max(items.len());
    for item in history {
        insert_sorted(&mut items, item, cap);
    }
    items
}

#[cfg(test)]
#[path = "facade_test.rs"]
mod tests;
