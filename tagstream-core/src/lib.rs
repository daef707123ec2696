//! # tagstream-core
//!
//! Client library for LocalSense real-time tag positioning systems.
//!
//! This crate contains:
//! - **Model types**: `TagPosition`, `BatteryStatus`, `TagStatus`, `AlarmEvent`
//! - **Wire protocol**: checksummed binary frames with `FrameCodec` for framed TCP I/O via `tokio_util`
//! - **Connection**: `ConnectionManager` driving connect, authenticate, reconnect on one task
//! - **Subscriptions**: desired/confirmed registry that replays across reconnects
//! - **Cache**: last-write-wins position snapshot per tag
//! - **Events**: `EventDispatcher` fanning typed events out to listeners in order
//! - **Providers**: `PositioningProvider` implemented for live hardware and simulation
//! - **Emulator**: an in-process LocalSense server for development and tests
//! - **Error**: one typed `thiserror`-based `Error` for every fallible call

pub mod auth;
pub mod cache;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod emulator;
pub mod error;
pub mod event;
pub mod provider;
pub mod state;
pub mod subscription;
pub mod types;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{Credentials, password_digest};
pub use cache::{DEFAULT_BATTERY_LEVEL, PositionCache};
pub use config::{ProviderConfig, ProviderKind};
pub use connection::{ConnectOptions, ConnectionHandle, ConnectionManager, FrameSender, LinkEvent};
pub use dispatch::{EventDispatcher, ListenerId};
pub use emulator::{Emulator, EmulatorConfig, EmulatorHandle};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use provider::{LocalSenseProvider, PositioningProvider, SimulatedProvider, create_provider};
pub use state::ConnectionState;
pub use subscription::{SubscriptionDelta, SubscriptionRegistry};
pub use types::{
    AlarmEvent, AlarmKind, BatteryStatus, CLOSE_ABNORMAL, CLOSE_NORMAL, Disconnection, TagPoint,
    TagPosition, TagState, TagStatus, now_ms,
};
pub use wire::{DecodedFrame, FrameCodec, FrameType};
