//! Positioning provider implementations behind one trait.
//!
//! A provider is the application-facing surface of the subsystem: it owns
//! the data source (a live LocalSense server or a simulation), the position
//! cache, and the event dispatcher. Callers pick an implementation through
//! [`create_provider`] and program against [`PositioningProvider`] only.

mod localsense;
mod simulated;

pub use localsense::LocalSenseProvider;
pub use simulated::SimulatedProvider;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::dispatch::ListenerId;
use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::state::ConnectionState;
use crate::types::TagPosition;

/// A source of real-time tag positioning data.
///
/// Implementations share the same observable behavior: events fire in
/// listener registration order, the position cache is last-write-wins, and
/// [`disconnect`](Self::disconnect) is terminal until the provider is
/// initialized again.
#[async_trait]
pub trait PositioningProvider: Send + Sync {
    /// Start the provider and resolve on the first connection outcome.
    ///
    /// An `Err` return does not stop the provider: reconnect attempts keep
    /// running until [`disconnect`](Self::disconnect) is called. Calling
    /// this on an already-initialized provider fails with
    /// [`Error::AlreadyInitialized`](crate::Error::AlreadyInitialized).
    async fn initialize(&mut self) -> Result<()>;

    /// Add tags to the subscription set. Position updates for them start
    /// flowing once the source confirms, immediately for the simulation.
    async fn subscribe_to_tags(&self, tag_ids: &[String]) -> Result<()>;

    /// Remove tags from the subscription set and evict their cache entries.
    async fn unsubscribe_from_tags(&self, tag_ids: &[String]) -> Result<()>;

    /// Fetch historical positions for one tag over `[from_ms, to_ms]`.
    async fn get_position_history(
        &self,
        tag_id: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<TagPosition>>;

    /// Snapshot of the latest known position per tag. Order is unspecified.
    fn get_all_positions(&self) -> Vec<TagPosition>;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Stop the provider. Emits a normal-closure disconnected event and
    /// cancels any pending reconnect. Idempotent.
    fn disconnect(&mut self);

    /// Register an event listener. Listeners for the same kind fire in
    /// registration order.
    fn on(
        &self,
        kind: EventKind,
        listener: Box<dyn Fn(&Event) + Send + Sync + 'static>,
    ) -> ListenerId;

    /// Unregister a listener. Returns `false` for an unknown id.
    fn off(&self, kind: EventKind, id: ListenerId) -> bool;
}

/// Build a provider for the requested backend.
pub fn create_provider(
    kind: ProviderKind,
    config: ProviderConfig,
) -> Result<Box<dyn PositioningProvider>> {
    match kind {
        ProviderKind::LocalSense => Ok(Box::new(LocalSenseProvider::new(config)?)),
        ProviderKind::Simulated => Ok(Box::new(SimulatedProvider::new(config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_each_backend() {
        let simulated = create_provider(ProviderKind::Simulated, ProviderConfig::default());
        assert!(simulated.is_ok());

        let config = ProviderConfig {
            server_url: "127.0.0.1:9100".into(),
            ..ProviderConfig::default()
        };
        let hardware = create_provider(ProviderKind::LocalSense, config);
        assert!(hardware.is_ok());
    }

    #[test]
    fn factory_rejects_incomplete_hardware_config() {
        let err = create_provider(ProviderKind::LocalSense, ProviderConfig::default());
        assert!(err.is_err());
    }
}
