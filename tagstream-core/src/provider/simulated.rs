//! Provider that fabricates positioning traffic on a timer.
//!
//! Behaves like the live backend as far as callers can tell: the same
//! events, the same cache semantics, the same terminal disconnect. A
//! generator task replaces the socket, producing a random walk per
//! subscribed tag plus occasional battery, status, and alarm traffic.
//! With a non-zero `seed` every run of the walk is reproducible.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::PositionCache;
use crate::config::ProviderConfig;
use crate::dispatch::{EventDispatcher, ListenerId};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::provider::PositioningProvider;
use crate::state::ConnectionState;
use crate::types::{
    AlarmEvent, AlarmKind, BatteryStatus, CLOSE_NORMAL, Disconnection, TagPoint, TagPosition,
    TagState, TagStatus, now_ms,
};

/// Delay applied to simulated history queries.
const HISTORY_DELAY: Duration = Duration::from_millis(300);
/// Coarsest history sample spacing.
const HISTORY_MIN_STEP_MS: u64 = 30_000;

enum GenCommand {
    Subscribe {
        ids: Vec<String>,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        ids: Vec<String>,
        reply: oneshot::Sender<()>,
    },
}

struct GenHandles {
    cmd_tx: mpsc::Sender<GenCommand>,
    cancel: CancellationToken,
    connected_at: std::time::Instant,
}

impl Drop for GenHandles {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// [`PositioningProvider`] implementation with no transport behind it.
pub struct SimulatedProvider {
    config: ProviderConfig,
    dispatcher: Arc<EventDispatcher>,
    cache: Arc<RwLock<PositionCache>>,
    generator: Option<GenHandles>,
}

impl SimulatedProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(EventDispatcher::new()),
            cache: Arc::new(RwLock::new(PositionCache::new())),
            generator: None,
        }
    }

    fn walk_rng(&self) -> SmallRng {
        match self.config.seed {
            0 => SmallRng::from_os_rng(),
            seed => SmallRng::seed_from_u64(seed),
        }
    }

    /// History uses its own stream so replaying a query never disturbs
    /// the live walk.
    fn history_rng(&self) -> SmallRng {
        match self.config.seed {
            0 => SmallRng::from_os_rng(),
            seed => SmallRng::seed_from_u64(seed.wrapping_add(0x9E37_79B9)),
        }
    }
}

#[async_trait]
impl PositioningProvider for SimulatedProvider {
    async fn initialize(&mut self) -> Result<()> {
        if self.generator.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        tokio::time::sleep(self.config.connect_delay()).await;

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let generator = Generator {
            dispatcher: Arc::clone(&self.dispatcher),
            cache: Arc::clone(&self.cache),
            cmd_rx,
            cancel: cancel.clone(),
            rng: self.walk_rng(),
            subscribed: BTreeSet::new(),
            update_interval: self.config.update_interval(),
        };
        tokio::spawn(generator.run());
        self.generator = Some(GenHandles {
            cmd_tx,
            cancel,
            connected_at: std::time::Instant::now(),
        });

        self.dispatcher.emit(&Event::Connected);
        Ok(())
    }

    async fn subscribe_to_tags(&self, tag_ids: &[String]) -> Result<()> {
        self.roundtrip(|reply| GenCommand::Subscribe {
            ids: tag_ids.to_vec(),
            reply,
        })
        .await
    }

    async fn unsubscribe_from_tags(&self, tag_ids: &[String]) -> Result<()> {
        self.roundtrip(|reply| GenCommand::Unsubscribe {
            ids: tag_ids.to_vec(),
            reply,
        })
        .await
    }

    async fn get_position_history(
        &self,
        tag_id: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<TagPosition>> {
        if self.generator.is_none() {
            return Err(Error::NotConnected);
        }
        tokio::time::sleep(HISTORY_DELAY).await;
        if to_ms <= from_ms {
            return Ok(Vec::new());
        }

        let span = to_ms - from_ms;
        let step_ms = (span / 100).max(HISTORY_MIN_STEP_MS);
        let mut rng = self.history_rng();
        let (mut x, mut y) = match read_cache(&self.cache).get(tag_id) {
            Some(position) => (position.x, position.y),
            None => (
                150.0 + rng.random::<f64>() * 100.0,
                150.0 + rng.random::<f64>() * 100.0,
            ),
        };

        let mut samples = Vec::new();
        // Index iteration: i * step_ms never exceeds span, so the
        // timestamps stay in range even for to_ms near u64::MAX.
        for i in 0..=span / step_ms {
            let at = from_ms + i * step_ms;
            let progress = (at - from_ms) as f64 / span as f64;
            samples.push(TagPosition {
                tag_id: tag_id.to_string(),
                x,
                y,
                z: 0.0,
                map_id: "map-1".into(),
                timestamp_ms: at,
                battery_level: (100.0 - progress * 30.0) as u8,
            });
            x += (rng.random::<f64>() - 0.5) * 20.0;
            y += (rng.random::<f64>() - 0.5) * 20.0;
        }
        debug!(tag_id, count = samples.len(), "generated history walk");
        Ok(samples)
    }

    fn get_all_positions(&self) -> Vec<TagPosition> {
        read_cache(&self.cache).get_all()
    }

    fn connection_state(&self) -> ConnectionState {
        self.generator
            .as_ref()
            .map(|generator| ConnectionState::Connected {
                since: generator.connected_at,
            })
            .unwrap_or_default()
    }

    fn disconnect(&mut self) {
        if let Some(generator) = self.generator.take() {
            generator.cancel.cancel();
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

impl SimulatedProvider {
    async fn roundtrip(&self, build: impl FnOnce(oneshot::Sender<()>) -> GenCommand) -> Result<()> {
        let generator = self.generator.as_ref().ok_or(Error::NotInitialized)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        generator
            .cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }
}

// ── Generator task ───────────────────────────────────────────────

struct Generator {
    dispatcher: Arc<EventDispatcher>,
    cache: Arc<RwLock<PositionCache>>,
    cmd_rx: mpsc::Receiver<GenCommand>,
    cancel: CancellationToken,
    rng: SmallRng,
    subscribed: BTreeSet<String>,
    update_interval: Duration,
}

impl Generator {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.update_interval,
            self.update_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // Biased: cancellation wins over a ready tick, so disconnect()
            // guarantees no traffic after the terminal event.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = ticker.tick() => self.tick(),
            }
        }
        debug!("simulation generator stopped");
    }

    fn handle_command(&mut self, command: GenCommand) {
        match command {
            GenCommand::Subscribe { ids, reply } => {
                self.subscribed.extend(ids);
                let _ = reply.send(());
            }
            GenCommand::Unsubscribe { ids, reply } => {
                for id in &ids {
                    self.subscribed.remove(id);
                }
                write_cache(&self.cache).remove_many(&ids);
                let _ = reply.send(());
            }
        }
    }

    fn tick(&mut self) {
        if self.subscribed.is_empty() {
            return;
        }
        let timestamp_ms = now_ms();
        self.emit_positions(timestamp_ms);
        if self.rng.random_bool(0.1) {
            self.emit_battery_drain(timestamp_ms);
        }
        if self.rng.random_bool(0.05) {
            self.emit_status_changes(timestamp_ms);
        }
        if self.rng.random_bool(0.02) {
            self.emit_alarm(timestamp_ms);
        }
    }

    fn emit_positions(&mut self, timestamp_ms: u64) {
        let mut batch = Vec::with_capacity(self.subscribed.len());
        {
            let mut cache = write_cache(&self.cache);
            for tag_id in &self.subscribed {
                let position = match cache.get(tag_id) {
                    Some(mut previous) => {
                        previous.x += (self.rng.random::<f64>() - 0.5) * 10.0;
                        previous.y += (self.rng.random::<f64>() - 0.5) * 10.0;
                        previous.timestamp_ms = timestamp_ms;
                        previous
                    }
                    None => TagPosition {
                        tag_id: tag_id.clone(),
                        x: 100.0 + self.rng.random::<f64>() * 300.0,
                        y: 100.0 + self.rng.random::<f64>() * 200.0,
                        z: 0.0,
                        map_id: "map-1".into(),
                        timestamp_ms,
                        battery_level: (80.0 + self.rng.random::<f64>() * 20.0) as u8,
                    },
                };
                cache.upsert(position.clone());
                batch.push(position);
            }
        }
        self.dispatcher.emit(&Event::PositionUpdate(batch));
    }

    fn emit_battery_drain(&mut self, timestamp_ms: u64) {
        let mut updates = Vec::new();
        {
            let mut cache = write_cache(&self.cache);
            for tag_id in &self.subscribed {
                if !self.rng.random_bool(0.3) {
                    continue;
                }
                if let Some(position) = cache.get(tag_id) {
                    let level = position
                        .battery_level
                        .saturating_sub(self.rng.random_range(0..=2));
                    cache.apply_battery(tag_id, level, timestamp_ms);
                    updates.push(BatteryStatus {
                        tag_id: tag_id.clone(),
                        level,
                        timestamp_ms,
                    });
                }
            }
        }
        if !updates.is_empty() {
            self.dispatcher.emit(&Event::BatteryUpdate(updates));
        }
    }

    fn emit_status_changes(&mut self, timestamp_ms: u64) {
        let mut changes = Vec::new();
        for tag_id in &self.subscribed {
            if !self.rng.random_bool(0.2) {
                continue;
            }
            let state = TagState::ALL[self.rng.random_range(0..TagState::ALL.len())];
            changes.push(TagStatus {
                tag_id: tag_id.clone(),
                state,
                timestamp_ms,
            });
        }
        if !changes.is_empty() {
            self.dispatcher.emit(&Event::TagStatusChange(changes));
        }
    }

    fn emit_alarm(&mut self, timestamp_ms: u64) {
        let ids: Vec<&String> = self.subscribed.iter().collect();
        let tag_id = ids[self.rng.random_range(0..ids.len())].clone();
        let kind = AlarmKind::ALL[self.rng.random_range(0..AlarmKind::ALL.len())];
        let location = read_cache(&self.cache).get(&tag_id).map(|position| TagPoint {
            x: position.x,
            y: position.y,
            z: position.z,
            map_id: position.map_id.clone(),
        });
        self.dispatcher.emit(&Event::Alarm(AlarmEvent {
            tag_id,
            kind,
            message: format!("simulated {kind} alarm"),
            timestamp_ms,
            location,
        }));
    }
}

fn read_cache(cache: &RwLock<PositionCache>) -> RwLockReadGuard<'_, PositionCache> {
    cache.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_cache(cache: &RwLock<PositionCache>) -> RwLockWriteGuard<'_, PositionCache> {
    cache.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn seeded_config(seed: u64) -> ProviderConfig {
        ProviderConfig {
            seed,
            connect_delay_ms: 10,
            update_interval_ms: 100,
            ..ProviderConfig::default()
        }
    }

    fn capture(provider: &SimulatedProvider, kind: EventKind) -> UnboundedReceiver<Event> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        provider.on(
            kind,
            Box::new(move |event| {
                let _ = tx.send(event.clone());
            }),
        );
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_connects_after_delay_and_is_single_shot() {
        let mut provider = SimulatedProvider::new(seeded_config(1));
        let mut connected = capture(&provider, EventKind::Connected);

        provider.initialize().await.unwrap();
        assert!(provider.connection_state().is_connected());
        assert!(matches!(connected.try_recv(), Ok(Event::Connected)));

        let err = provider.initialize().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
    }

    #[tokio::test(start_paused = true)]
    async fn walk_covers_every_subscribed_tag() {
        let mut provider = SimulatedProvider::new(seeded_config(7));
        let mut updates = capture(&provider, EventKind::PositionUpdate);
        provider.initialize().await.unwrap();
        provider
            .subscribe_to_tags(&["alpha".into(), "beta".into()])
            .await
            .unwrap();

        let event = updates.recv().await.unwrap();
        let Event::PositionUpdate(batch) = event else {
            panic!("expected position update");
        };
        assert_eq!(batch.len(), 2);
        for position in &batch {
            assert_eq!(position.map_id, "map-1");
            assert!((100.0..400.0).contains(&position.x));
            assert!((100.0..300.0).contains(&position.y));
            assert!((80..=100).contains(&position.battery_level));
        }
        assert_eq!(provider.get_all_positions().len(), 2);

        // Later ticks drift from the previous point instead of re-seeding.
        let first_alpha = batch
            .iter()
            .find(|p| p.tag_id == "alpha")
            .cloned()
            .unwrap();
        let event = updates.recv().await.unwrap();
        let Event::PositionUpdate(batch) = event else {
            panic!("expected position update");
        };
        let next_alpha = batch.iter().find(|p| p.tag_id == "alpha").unwrap();
        assert!((next_alpha.x - first_alpha.x).abs() <= 5.0);
        assert!((next_alpha.y - first_alpha.y).abs() <= 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_evicts_cache_entries() {
        let mut provider = SimulatedProvider::new(seeded_config(11));
        let mut updates = capture(&provider, EventKind::PositionUpdate);
        provider.initialize().await.unwrap();
        provider
            .subscribe_to_tags(&["a".into(), "b".into()])
            .await
            .unwrap();
        let _ = updates.recv().await.unwrap();
        assert_eq!(provider.get_all_positions().len(), 2);

        provider.unsubscribe_from_tags(&["a".into()]).await.unwrap();
        let positions = provider.get_all_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].tag_id, "b");

        let Event::PositionUpdate(batch) = updates.recv().await.unwrap() else {
            panic!("expected position update");
        };
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].tag_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_terminal_and_keeps_cache() {
        let mut provider = SimulatedProvider::new(seeded_config(5));
        let mut updates = capture(&provider, EventKind::PositionUpdate);
        let mut disconnects = capture(&provider, EventKind::Disconnected);
        provider.initialize().await.unwrap();
        provider.subscribe_to_tags(&["a".into()]).await.unwrap();
        let _ = updates.recv().await.unwrap();

        provider.disconnect();
        let Event::Disconnected(disconnection) = disconnects.recv().await.unwrap() else {
            panic!("expected disconnected");
        };
        assert_eq!(disconnection.code, CLOSE_NORMAL);
        assert_eq!(disconnection.reason, "client disconnect");
        assert!(provider.connection_state().is_disconnected());

        // The last snapshot survives for late readers.
        assert_eq!(provider.get_all_positions().len(), 1);

        // No more ticks arrive after the generator is cancelled.
        while updates.try_recv().is_ok() {}
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(updates.try_recv().is_err());

        let err = provider.subscribe_to_tags(&["b".into()]).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        provider.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn history_walk_is_deterministic_and_bounded() {
        let mut provider = SimulatedProvider::new(seeded_config(3));
        provider.initialize().await.unwrap();

        let from_ms = 1_000_000;
        let to_ms = from_ms + 600_000;
        let samples = provider
            .get_position_history("99", from_ms, to_ms)
            .await
            .unwrap();
        // 600 s span at the 30 s floor: inclusive endpoints.
        assert_eq!(samples.len(), 21);
        assert_eq!(samples[0].timestamp_ms, from_ms);
        assert_eq!(samples[0].battery_level, 100);
        assert_eq!(samples.last().unwrap().timestamp_ms, to_ms);
        assert_eq!(samples.last().unwrap().battery_level, 70);
        for pair in samples.windows(2) {
            assert_eq!(pair[1].timestamp_ms - pair[0].timestamp_ms, 30_000);
        }

        let replay = provider
            .get_position_history("99", from_ms, to_ms)
            .await
            .unwrap();
        assert_eq!(samples, replay);
    }

    #[tokio::test(start_paused = true)]
    async fn history_edge_cases() {
        let mut provider = SimulatedProvider::new(seeded_config(2));
        let err = provider
            .get_position_history("1", 0, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        provider.initialize().await.unwrap();
        let empty = provider.get_position_history("1", 500, 500).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn history_spans_the_full_timestamp_range() {
        let mut provider = SimulatedProvider::new(seeded_config(4));
        provider.initialize().await.unwrap();

        let samples = provider
            .get_position_history("1", 0, u64::MAX)
            .await
            .unwrap();
        // step = span / 100, inclusive endpoints.
        assert_eq!(samples.len(), 101);
        assert_eq!(samples[0].timestamp_ms, 0);
        for pair in samples.windows(2) {
            assert!(pair[0].timestamp_ms < pair[1].timestamp_ms);
        }
        let step = u64::MAX / 100;
        assert!(samples.last().unwrap().timestamp_ms > u64::MAX - step);
    }
}
