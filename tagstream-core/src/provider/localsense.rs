//! Provider backed by a live LocalSense positioning server.
//!
//! Two tasks cooperate per session: the connection task in
//! [`crate::connection`] owns the socket, and a pump task owned here turns
//! [`LinkEvent`]s into cache writes and dispatched events. The pump is also
//! the sole owner of the subscription registry, so subscribe calls and
//! reconnect re-flushes can never interleave.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{DEFAULT_BATTERY_LEVEL, PositionCache};
use crate::config::ProviderConfig;
use crate::connection::{
    ConnectOptions, ConnectionHandle, ConnectionManager, FrameSender, LinkEvent,
};
use crate::dispatch::{EventDispatcher, ListenerId};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::provider::PositioningProvider;
use crate::state::ConnectionState;
use crate::subscription::SubscriptionRegistry;
use crate::types::{BatteryStatus, CLOSE_NORMAL, Disconnection, TagPosition, now_ms};
use crate::wire::{DecodedFrame, SubscriptionAction, SubscriptionRequest, parse_tag_id};

/// Most tag ids carried per subscription frame. Keeps every frame well
/// under [`MAX_FRAME_SIZE`](crate::wire::MAX_FRAME_SIZE).
const MAX_SUBSCRIPTION_TAGS: usize = 512;

enum PumpCommand {
    Subscribe {
        ids: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        ids: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct SessionHandles {
    conn: ConnectionHandle,
    cmd_tx: mpsc::Sender<PumpCommand>,
    pump_cancel: CancellationToken,
}

/// [`PositioningProvider`] implementation speaking the LocalSense wire
/// protocol over TCP.
pub struct LocalSenseProvider {
    config: ProviderConfig,
    dispatcher: Arc<EventDispatcher>,
    cache: Arc<RwLock<PositionCache>>,
    session: Option<SessionHandles>,
}

impl LocalSenseProvider {
    /// Build an uninitialized provider. Fails when the configuration is
    /// missing the server address.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if config.server_url.is_empty() {
            return Err(Error::InvalidConfig("server_url is required"));
        }
        Ok(Self {
            config,
            dispatcher: Arc::new(EventDispatcher::new()),
            cache: Arc::new(RwLock::new(PositionCache::new())),
            session: None,
        })
    }

    async fn pump_roundtrip(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> PumpCommand,
    ) -> Result<()> {
        let session = self.session.as_ref().ok_or(Error::NotInitialized)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        session
            .cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }
}

#[async_trait]
impl PositioningProvider for LocalSenseProvider {
    async fn initialize(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let options = ConnectOptions {
            reconnect_interval: self.config.reconnect_interval(),
            auth_timeout: self.config.auth_timeout(),
        };
        let manager = ConnectionManager::new(
            self.config.server_url.clone(),
            self.config.credentials(),
            options,
        );
        let mut conn = manager.spawn();
        let link_events = conn.take_link_events().ok_or(Error::ChannelClosed)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (first_tx, first_rx) = oneshot::channel();
        let pump_cancel = CancellationToken::new();
        let pump = Pump {
            registry: SubscriptionRegistry::new(),
            sender: conn.sender(),
            dispatcher: Arc::clone(&self.dispatcher),
            cache: Arc::clone(&self.cache),
            link_events,
            cmd_rx,
            first_outcome: Some(first_tx),
            cancel: pump_cancel.clone(),
        };
        tokio::spawn(pump.run());
        self.session = Some(SessionHandles {
            conn,
            cmd_tx,
            pump_cancel,
        });

        // First connection outcome. Failure leaves the session running its
        // reconnect loop; only disconnect() stops it.
        first_rx.await.map_err(|_| Error::NotConnected)?
    }

    async fn subscribe_to_tags(&self, tag_ids: &[String]) -> Result<()> {
        let ids = tag_ids.to_vec();
        self.pump_roundtrip(|reply| PumpCommand::Subscribe { ids, reply })
            .await
    }

    async fn unsubscribe_from_tags(&self, tag_ids: &[String]) -> Result<()> {
        let ids = tag_ids.to_vec();
        self.pump_roundtrip(|reply| PumpCommand::Unsubscribe { ids, reply })
            .await
    }

    async fn get_position_history(
        &self,
        tag_id: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<TagPosition>> {
        if !self.connection_state().is_connected() {
            return Err(Error::NotConnected);
        }
        // The LocalSense wire protocol has no history query. Callers get
        // an empty result rather than an error so dashboards degrade.
        debug!(tag_id, from_ms, to_ms, "position history unavailable on live backend");
        Ok(Vec::new())
    }

    fn get_all_positions(&self) -> Vec<TagPosition> {
        read_cache(&self.cache).get_all()
    }

    fn connection_state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|session| session.conn.state())
            .unwrap_or_default()
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.pump_cancel.cancel();
            session.conn.shutdown();
            self.dispatcher.emit(&Event::Disconnected(Disconnection {
                code: CLOSE_NORMAL,
                reason: "client disconnect".into(),
            }));
        }
    }

    fn on(
        &self,
        kind: EventKind,
        listener: Box<dyn Fn(&Event) + Send + Sync + 'static>,
    ) -> ListenerId {
        self.dispatcher.on_boxed(kind, listener)
    }

    fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.dispatcher.off(kind, id)
    }
}

// ── Pump task ────────────────────────────────────────────────────

struct Pump {
    registry: SubscriptionRegistry,
    sender: FrameSender,
    dispatcher: Arc<EventDispatcher>,
    cache: Arc<RwLock<PositionCache>>,
    link_events: mpsc::Receiver<LinkEvent>,
    cmd_rx: mpsc::Receiver<PumpCommand>,
    first_outcome: Option<oneshot::Sender<Result<()>>>,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(mut self) {
        loop {
            // Biased: cancellation beats queued traffic, so disconnect()
            // guarantees no event follows the terminal one. Link events
            // beat commands so a subscribe issued around reconnect time
            // lands after the Up-triggered flush.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = self.link_events.recv() => match event {
                    Some(event) => self.handle_link_event(event).await,
                    None => break,
                },
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
        debug!("provider pump stopped");
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up => {
                self.dispatcher.emit(&Event::Connected);
                if let Some(tx) = self.first_outcome.take() {
                    let _ = tx.send(Ok(()));
                }
                self.flush_subscriptions().await;
            }
            LinkEvent::Down { code, reason } => {
                // Confirmations die with the session; the desired set is
                // re-flushed wholesale on the next Up.
                self.registry.reset_confirmed();
                self.dispatcher
                    .emit(&Event::Disconnected(Disconnection { code, reason }));
            }
            LinkEvent::Error(err) => {
                self.dispatcher.emit(&Event::ConnectionError {
                    message: err.to_string(),
                });
                if let Some(tx) = self.first_outcome.take() {
                    let _ = tx.send(Err(err));
                }
            }
            LinkEvent::Frame(frame) => self.handle_frame(frame),
        }
    }

    fn handle_frame(&mut self, frame: DecodedFrame) {
        match frame {
            DecodedFrame::Position(samples) => {
                let timestamp_ms = now_ms();
                let merged: Vec<TagPosition> = {
                    let mut cache = write_cache(&self.cache);
                    samples
                        .iter()
                        .map(|sample| {
                            cache.merge_position(
                                sample.to_position(timestamp_ms, DEFAULT_BATTERY_LEVEL),
                            )
                        })
                        .collect()
                };
                if !merged.is_empty() {
                    self.dispatcher.emit(&Event::PositionUpdate(merged));
                }
            }
            DecodedFrame::Battery(readings) => {
                let timestamp_ms = now_ms();
                let statuses: Vec<BatteryStatus> = readings
                    .iter()
                    .map(|reading| reading.to_status(timestamp_ms))
                    .collect();
                {
                    let mut cache = write_cache(&self.cache);
                    for status in &statuses {
                        cache.apply_battery(&status.tag_id, status.level, status.timestamp_ms);
                    }
                }
                if !statuses.is_empty() {
                    self.dispatcher.emit(&Event::BatteryUpdate(statuses));
                }
            }
            DecodedFrame::Alarm(report) => {
                self.dispatcher
                    .emit(&Event::Alarm(report.to_alarm_event(now_ms())));
            }
            other => {
                debug!(frame = other.type_name(), "ignoring frame without a consumer");
            }
        }
    }

    async fn handle_command(&mut self, command: PumpCommand) {
        match command {
            PumpCommand::Subscribe { ids, reply } => {
                let result = self.subscribe(ids).await;
                let _ = reply.send(result);
            }
            PumpCommand::Unsubscribe { ids, reply } => {
                let result = self.unsubscribe(ids).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn subscribe(&mut self, ids: Vec<String>) -> Result<()> {
        // Reject the whole batch before touching the registry.
        for id in &ids {
            parse_tag_id(id)?;
        }
        let delta = self.registry.add(&ids);
        if delta.is_empty() || !self.sender.state().is_connected() {
            // Queued; flushed when the session comes up.
            return Ok(());
        }
        self.send_subscription(SubscriptionAction::Subscribe, &delta.to_add)
            .await?;
        self.registry.commit();
        Ok(())
    }

    async fn unsubscribe(&mut self, ids: Vec<String>) -> Result<()> {
        let (delta, dropped) = self.registry.remove(&ids);
        if !dropped.is_empty() {
            write_cache(&self.cache).remove_many(&dropped);
        }
        if delta.is_empty() || !self.sender.state().is_connected() {
            return Ok(());
        }
        self.send_subscription(SubscriptionAction::Unsubscribe, &delta.to_remove)
            .await?;
        self.registry.commit();
        Ok(())
    }

    /// Push the registry's pending delta to the server after a session
    /// comes up. Failures leave the delta pending for the next session.
    async fn flush_subscriptions(&mut self) {
        let delta = self.registry.pending_delta();
        if delta.is_empty() {
            return;
        }
        let result = async {
            self.send_subscription(SubscriptionAction::Unsubscribe, &delta.to_remove)
                .await?;
            self.send_subscription(SubscriptionAction::Subscribe, &delta.to_add)
                .await
        }
        .await;
        match result {
            Ok(()) => {
                self.registry.commit();
                debug!(count = self.registry.len(), "subscriptions flushed");
            }
            Err(err) => {
                warn!(error = %err, "failed to flush subscriptions");
            }
        }
    }

    async fn send_subscription(
        &self,
        action: SubscriptionAction,
        tag_ids: &[String],
    ) -> Result<()> {
        if tag_ids.is_empty() {
            return Ok(());
        }
        for chunk in tag_ids.chunks(MAX_SUBSCRIPTION_TAGS) {
            let ids = chunk
                .iter()
                .map(|id| parse_tag_id(id))
                .collect::<Result<Vec<u64>>>()?;
            let frame = DecodedFrame::Subscription(SubscriptionRequest {
                action,
                tag_ids: ids,
            });
            self.sender.send_frame(frame).await?;
        }
        Ok(())
    }
}

fn read_cache(cache: &RwLock<PositionCache>) -> RwLockReadGuard<'_, PositionCache> {
    cache.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_cache(cache: &RwLock<PositionCache>) -> RwLockWriteGuard<'_, PositionCache> {
    cache.write().unwrap_or_else(PoisonError::into_inner)
}
