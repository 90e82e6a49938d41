//! Failover controller — decides when one logical channel leaves the
//! primary transport.
//!
//! DESIGN
//! ======
//! One controller per `ChannelKind`. It starts `Primary`, opens a channel on
//! the transport, and arms a grace timer. The channel degrades when:
//!
//! - the transport reports `ChannelError` or `TimedOut`, or
//! - `Subscribed` was not reached before the grace timer fired.
//!
//! While `Degraded`, the controller re-probes the transport with
//! exponential backoff (`RetryPolicy`). A probe that reaches `Subscribed`
//! moves the channel back to `Primary` and resets the attempt counter. A
//! probe that fails schedules the next attempt until `max_retries` is
//! spent; with `max_retries == 0` degradation is permanent.
//!
//! Every connection gets an epoch number. Status callbacks and timers carry
//! the epoch they were created for, and anything from an older epoch is
//! ignored, so a late event from a discarded channel cannot flip the tier.
//!
//! Listeners receive a `Transition` on every tier change; a transition to
//! `Primary` carries the live channel so the owner can re-attach its event
//! handlers.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{RetryPolicy, SyncConfig};
use crate::listeners::{Listeners, Subscription, lock};
use crate::scheduler::{Scheduler, Ticket};
use crate::transport::{Channel, ChannelKind, ChannelOptions, ChannelStatus, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierState {
    Primary,
    Degraded,
}

/// A tier change for one logical channel.
#[derive(Clone)]
pub struct Transition {
    pub kind: ChannelKind,
    pub tier: TierState,
    /// The subscribed channel when `tier == Primary`.
    pub channel: Option<Arc<dyn Channel>>,
}

struct Link {
    epoch: u64,
    channel: Arc<dyn Channel>,
    subscribed: bool,
    status: Option<Subscription>,
    grace: Option<Ticket>,
}

struct ControllerState {
    tier: TierState,
    epoch: u64,
    link: Option<Link>,
    attempt: u32,
    stopped: bool,
}

struct ControllerInner {
    kind: ChannelKind,
    transport: Arc<dyn Transport>,
    options: ChannelOptions,
    grace: Duration,
    retry: RetryPolicy,
    state: Mutex<ControllerState>,
    listeners: Listeners<Transition>,
    scheduler: Scheduler,
}

/// Handle on one channel's controller. Clones share the controller.
#[derive(Clone)]
pub struct FailoverController {
    inner: Arc<ControllerInner>,
}

impl FailoverController {
    /// Open the primary channel for `kind` and arm the grace timer.
    pub async fn start(
        transport: Arc<dyn Transport>,
        kind: ChannelKind,
        options: ChannelOptions,
        config: &SyncConfig,
    ) -> Self {
        let controller = Self {
            inner: Arc::new(ControllerInner {
                kind,
                transport,
                options,
                grace: config.grace_timeout,
                retry: config.retry,
                state: Mutex::new(ControllerState {
                    tier: TierState::Primary,
                    epoch: 0,
                    link: None,
                    attempt: 0,
                    stopped: false,
                }),
                listeners: Listeners::new(),
                scheduler: Scheduler::new(),
            }),
        };
        controller.connect().await;
        controller
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    #[must_use]
    pub fn tier(&self) -> TierState {
        lock(&self.inner.state).tier
    }

    /// The channel writes should use, if this kind is on the primary tier.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        let state = lock(&self.inner.state);
        match state.tier {
            TierState::Primary => state.link.as_ref().map(|link| Arc::clone(&link.channel)),
            TierState::Degraded => None,
        }
    }

    /// Retry attempts made since the last time the channel was healthy.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        lock(&self.inner.state).attempt
    }

    pub fn on_transition<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(f)
    }

    /// Cancel timers and close the current channel.
    pub async fn stop(&self) {
        let link = {
            let mut state = lock(&self.inner.state);
            state.stopped = true;
            state.link.take()
        };
        self.inner.scheduler.cancel_all();
        if let Some(link) = link {
            link.channel.disconnect().await;
        }
        debug!(channel = %self.inner.kind, "failover: stopped");
    }

    // =========================================================================
    // CONNECTION LIFECYCLE
    // =========================================================================

    async fn connect(&self) {
        let epoch = {
            let mut state = lock(&self.inner.state);
            if state.stopped {
                return;
            }
            state.epoch += 1;
            state.epoch
        };

        let kind = self.inner.kind;
        let channel = match self.inner.transport.connect(kind.channel_name(), self.inner.options.clone()).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, channel = %kind, "failover: connect failed");
                self.fail(epoch, "connect failed");
                return;
            }
        };

        let grace = {
            let weak = self.weak();
            self.inner.scheduler.after("failover:grace", self.inner.grace, move || {
                if let Some(inner) = weak.upgrade() {
                    FailoverController { inner }.on_grace(epoch);
                }
                std::future::ready(())
            })
        };
        let installed = {
            let mut state = lock(&self.inner.state);
            if state.stopped || state.epoch != epoch {
                false
            } else {
                state.link = Some(Link { epoch, channel: Arc::clone(&channel), subscribed: false, status: None, grace: Some(grace) });
                true
            }
        };
        if !installed {
            self.inner.scheduler.cancel(grace);
            channel.disconnect().await;
            return;
        }

        let weak = self.weak();
        let sub = channel.on_status_change(Arc::new(move |status: &ChannelStatus| {
            if let Some(inner) = weak.upgrade() {
                FailoverController { inner }.on_status(epoch, *status);
            }
        }));

        let mut state = lock(&self.inner.state);
        if let Some(link) = state.link.as_mut().filter(|link| link.epoch == epoch) {
            link.status = Some(sub);
        } else {
            drop(state);
            drop(sub);
        }
    }

    fn on_status(&self, epoch: u64, status: ChannelStatus) {
        match status {
            ChannelStatus::Subscribed => self.on_subscribed(epoch),
            ChannelStatus::ChannelError | ChannelStatus::TimedOut => {
                warn!(channel = %self.inner.kind, ?status, "failover: transport failure");
                self.fail(epoch, "transport failure");
            }
            ChannelStatus::Connecting | ChannelStatus::Closed => {}
        }
    }

    fn on_subscribed(&self, epoch: u64) {
        let transition = {
            let mut state = lock(&self.inner.state);
            let was_degraded = state.tier == TierState::Degraded;
            let Some(link) = state.link.as_mut().filter(|link| link.epoch == epoch) else {
                return;
            };
            link.subscribed = true;
            let channel = Arc::clone(&link.channel);
            if let Some(ticket) = link.grace.take() {
                self.inner.scheduler.cancel(ticket);
            }
            if !was_degraded {
                return;
            }
            state.tier = TierState::Primary;
            state.attempt = 0;
            Transition { kind: self.inner.kind, tier: TierState::Primary, channel: Some(channel) }
        };
        info!(channel = %self.inner.kind, "failover: primary transport recovered");
        self.inner.listeners.notify(&transition);
    }

    fn on_grace(&self, epoch: u64) {
        {
            let mut state = lock(&self.inner.state);
            let Some(link) = state.link.as_mut().filter(|link| link.epoch == epoch) else {
                return;
            };
            // Running inside the grace task; forget the ticket so it is not
            // cancelled from within.
            link.grace = None;
            if link.subscribed {
                return;
            }
        }
        warn!(channel = %self.inner.kind, grace = ?self.inner.grace, "failover: grace timeout");
        self.fail(epoch, "grace timeout");
    }

    /// Drop the connection for `epoch`, degrade if still primary, and
    /// schedule the next probe.
    fn fail(&self, epoch: u64, reason: &'static str) {
        let (link, was_primary, retry) = {
            let mut state = lock(&self.inner.state);
            if state.stopped || state.epoch != epoch {
                return;
            }
            let link = state.link.take();
            let was_primary = state.tier == TierState::Primary;
            state.tier = TierState::Degraded;
            let retry = if state.attempt < self.inner.retry.max_retries {
                state.attempt += 1;
                Some((state.attempt, self.inner.retry.delay(state.attempt)))
            } else {
                None
            };
            (link, was_primary, retry)
        };

        if let Some(link) = link {
            if let Some(ticket) = link.grace {
                self.inner.scheduler.cancel(ticket);
            }
            let channel = link.channel;
            self.inner.scheduler.spawn("failover:disconnect", async move {
                channel.disconnect().await;
            });
        }

        if was_primary {
            warn!(channel = %self.inner.kind, reason, "failover: degraded to fallback tier");
            self.inner.listeners.notify(&Transition { kind: self.inner.kind, tier: TierState::Degraded, channel: None });
        } else {
            debug!(channel = %self.inner.kind, reason, "failover: probe failed");
        }

        match retry {
            Some((attempt, delay)) => {
                debug!(channel = %self.inner.kind, attempt, delay = ?delay, "failover: retry scheduled");
                let weak = self.weak();
                self.inner.scheduler.after("failover:retry", delay, move || async move {
                    if let Some(inner) = weak.upgrade() {
                        FailoverController { inner }.connect().await;
                    }
                });
            }
            None if self.inner.retry.max_retries > 0 => {
                warn!(channel = %self.inner.kind, "failover: retries exhausted; staying degraded");
            }
            None => {}
        }
    }

    fn weak(&self) -> Weak<ControllerInner> {
        Arc::downgrade(&self.inner)
    }
}

#[cfg(test)]
#[path = "failover_test.rs"]
mod tests;
