//! In-process LocalSense server for development and tests.
//!
//! Speaks the same wire protocol as the real hardware: clients must
//! authenticate first, then subscription frames select which tags the
//! emulator walks around a 100x100 metre floor. Each connection gets its
//! own random walk, seeded from the configured seed and the connection
//! counter so parallel clients do not share a stream.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::password_digest;
use crate::error::{Error, Result};
use crate::types::AlarmKind;
use crate::wire::{
    AlarmReport, BatteryReading, DecodedFrame, FrameCodec, PositionSample, SubscriptionAction,
    WireLocation,
};

/// How long a fresh connection may sit without authenticating.
const AUTH_DEADLINE: Duration = Duration::from_secs(10);
/// Samples per position frame.
const SAMPLES_PER_FRAME: usize = 255;
/// Battery never drains below this level.
const BATTERY_FLOOR: u8 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub bind_addr: String,
    pub username: String,
    pub password: String,
    pub salt: String,
    pub update_interval_ms: u64,
    /// Chance per tick of emitting a battery frame.
    pub battery_probability: f64,
    /// Chance per tick of emitting an alarm frame.
    pub alarm_probability: f64,
    /// Seed for the walks. Zero draws a fresh seed per run.
    pub seed: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9100".to_string(),
            username: String::new(),
            password: String::new(),
            salt: String::new(),
            update_interval_ms: 2000,
            battery_probability: 0.1,
            alarm_probability: 0.02,
            seed: 0,
        }
    }
}

impl EmulatorConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

/// A bound, not yet running emulator.
#[derive(Debug)]
pub struct Emulator {
    listener: TcpListener,
    config: EmulatorConfig,
}

/// Handle to a spawned emulator. Dropping it stops the server.
#[derive(Debug)]
pub struct EmulatorHandle {
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl EmulatorHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Emulator {
    /// Bind the configured listen address.
    ///
    /// Fails on an unbindable address or a traffic probability outside
    /// `0..=1`.
    pub async fn bind(config: EmulatorConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.battery_probability) {
            return Err(Error::InvalidConfig("battery_probability must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&config.alarm_probability) {
            return Err(Error::InvalidConfig("alarm_probability must be within 0..=1"));
        }
        let listener = TcpListener::bind(&config.bind_addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the emulator on a background task.
    pub fn spawn(self) -> Result<EmulatorHandle> {
        let addr = self.local_addr()?;
        let cancel = CancellationToken::new();
        tokio::spawn(self.run(cancel.clone()));
        Ok(EmulatorHandle { addr, cancel })
    }

    /// Accept clients until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "emulator listening");
        }
        let mut next_conn_id: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_conn_id += 1;
                        info!(%peer, conn = next_conn_id, "client connected");
                        let session = ClientSession::new(self.config.clone(), next_conn_id);
                        tokio::spawn(session.run(stream, cancel.child_token()));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
            }
        }
        info!("emulator stopped");
    }
}

// ── Per-connection session ───────────────────────────────────────

struct Walker {
    x: f32,
    y: f32,
    battery: u8,
}

struct ClientSession {
    config: EmulatorConfig,
    conn_id: u64,
    rng: SmallRng,
    subscribed: BTreeSet<u64>,
    walkers: HashMap<u64, Walker>,
}

impl ClientSession {
    fn new(config: EmulatorConfig, conn_id: u64) -> Self {
        let rng = match config.seed {
            0 => SmallRng::from_os_rng(),
            seed => SmallRng::seed_from_u64(seed ^ conn_id),
        };
        Self {
            config,
            conn_id,
            rng,
            subscribed: BTreeSet::new(),
            walkers: HashMap::new(),
        }
    }

    async fn run(mut self, stream: TcpStream, cancel: CancellationToken) {
        let mut framed = Framed::new(stream, FrameCodec::new());

        let authorized = tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(AUTH_DEADLINE) => {
                warn!(conn = self.conn_id, "client never authenticated");
                return;
            }
            first = framed.next() => match first {
                Some(Ok(DecodedFrame::Auth(auth))) => {
                    let expected = password_digest(&self.config.password, &self.config.salt);
                    auth.username == self.config.username && auth.digest == expected
                }
                Some(Ok(other)) => {
                    warn!(conn = self.conn_id, frame = other.type_name(), "expected auth first");
                    false
                }
                _ => return,
            },
        };
        let status = u8::from(!authorized);
        if framed.send(DecodedFrame::AuthAck { status }).await.is_err() {
            return;
        }
        if !authorized {
            info!(conn = self.conn_id, "rejected credentials");
            return;
        }
        debug!(conn = self.conn_id, "authenticated");

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.update_interval(),
            self.config.update_interval(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.emit_tick(&mut framed).await.is_err() {
                        break;
                    }
                }
                incoming = framed.next() => match incoming {
                    Some(Ok(DecodedFrame::Subscription(request))) => {
                        self.apply_subscription(request.action, request.tag_ids);
                    }
                    Some(Ok(other)) => {
                        debug!(conn = self.conn_id, frame = other.type_name(), "ignoring frame");
                    }
                    Some(Err(err)) => {
                        warn!(conn = self.conn_id, error = %err, "read failed");
                        break;
                    }
                    None => break,
                },
            }
        }
        debug!(conn = self.conn_id, "client session ended");
    }

    fn apply_subscription(&mut self, action: SubscriptionAction, tag_ids: Vec<u64>) {
        match action {
            SubscriptionAction::Subscribe => {
                debug!(conn = self.conn_id, count = tag_ids.len(), "subscribe");
                self.subscribed.extend(tag_ids);
            }
            SubscriptionAction::Unsubscribe => {
                debug!(conn = self.conn_id, count = tag_ids.len(), "unsubscribe");
                for tag_id in &tag_ids {
                    self.subscribed.remove(tag_id);
                    self.walkers.remove(tag_id);
                }
            }
        }
    }

    async fn emit_tick(&mut self, framed: &mut Framed<TcpStream, FrameCodec>) -> Result<()> {
        if self.subscribed.is_empty() {
            return Ok(());
        }

        let mut samples = Vec::with_capacity(self.subscribed.len());
        for &tag_id in &self.subscribed {
            let walker = self.walkers.entry(tag_id).or_insert_with(|| Walker {
                x: self.rng.random::<f32>() * 80.0,
                y: self.rng.random::<f32>() * 60.0,
                battery: 100,
            });
            walker.x = (walker.x + (self.rng.random::<f32>() - 0.5) * 4.0).clamp(0.0, 100.0);
            walker.y = (walker.y + (self.rng.random::<f32>() - 0.5) * 4.0).clamp(0.0, 100.0);
            samples.push(PositionSample {
                tag_id,
                x: walker.x,
                y: walker.y,
                z_cm: 0,
                map_id: 1,
            });
        }
        for chunk in samples.chunks(SAMPLES_PER_FRAME) {
            framed.send(DecodedFrame::Position(chunk.to_vec())).await?;
        }

        if self.rng.random_bool(self.config.battery_probability) {
            let mut readings = Vec::with_capacity(self.subscribed.len());
            for &tag_id in &self.subscribed {
                if let Some(walker) = self.walkers.get_mut(&tag_id) {
                    let drain = self.rng.random_range(0..=1);
                    walker.battery = walker.battery.saturating_sub(drain).max(BATTERY_FLOOR);
                    readings.push(BatteryReading {
                        tag_id,
                        level: walker.battery,
                    });
                }
            }
            for chunk in readings.chunks(SAMPLES_PER_FRAME) {
                framed.send(DecodedFrame::Battery(chunk.to_vec())).await?;
            }
        }

        if self.rng.random_bool(self.config.alarm_probability) {
            let ids: Vec<u64> = self.subscribed.iter().copied().collect();
            let tag_id = ids[self.rng.random_range(0..ids.len())];
            let kind = AlarmKind::ALL[self.rng.random_range(0..AlarmKind::ALL.len())];
            let location = self.walkers.get(&tag_id).map(|walker| WireLocation {
                x: walker.x,
                y: walker.y,
                z_cm: 0,
                map_id: 1,
            });
            framed
                .send(DecodedFrame::Alarm(AlarmReport {
                    kind,
                    tag_id,
                    location,
                }))
                .await?;
        }
        Ok(())
    }
}
