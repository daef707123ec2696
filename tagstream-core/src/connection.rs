//! Session actor owning the transport connection.
//!
//! One spawned task drives the whole lifecycle: TCP connect, auth frame,
//! verdict, connected traffic, fixed-delay reconnect. It is the only code
//! that touches the socket or mutates [`ConnectionState`]. Everyone else
//! talks to it through the handle: frames go in over a command channel,
//! decoded traffic and lifecycle changes come out as [`LinkEvent`]s, state
//! snapshots are published on a `watch` channel.
//!
//! Shutdown is an explicit `CancellationToken`. Cancelling it aborts any
//! pending reconnect timer deterministically, so a stale session can never
//! race a new one created afterwards.

use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, trace, warn};

use crate::auth::Credentials;
use crate::error::{Error, Result};
use crate::state::ConnectionState;
use crate::types::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::wire::{AuthRequest, DecodedFrame, FrameCodec};

/// Timing knobs for the session task.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Fixed delay between reconnect attempts. No backoff.
    pub reconnect_interval: std::time::Duration,
    /// How long to wait for the auth verdict before treating the attempt
    /// as failed.
    pub auth_timeout: std::time::Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: std::time::Duration::from_millis(5000),
            auth_timeout: std::time::Duration::from_millis(10_000),
        }
    }
}

/// What the session reports to its owner, in order.
#[derive(Debug)]
pub enum LinkEvent {
    /// Authenticated and ready for traffic.
    Up,
    /// An established session ended.
    Down { code: u16, reason: String },
    /// A connect or authentication attempt failed.
    Error(Error),
    /// One decoded telemetry frame.
    Frame(DecodedFrame),
}

enum LinkCommand {
    SendFrame {
        frame: DecodedFrame,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Clonable frame-sending half of a session handle.
#[derive(Debug, Clone)]
pub struct FrameSender {
    cmd_tx: mpsc::Sender<LinkCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl FrameSender {
    /// Write one frame to the wire, resolving once the write completed.
    ///
    /// Fails with [`Error::NotConnected`] unless the session is in the
    /// `Connected` state, including when it is torn down mid-call.
    pub async fn send_frame(&self, frame: DecodedFrame) -> Result<()> {
        if !self.state_rx.borrow().is_connected() {
            return Err(Error::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(LinkCommand::SendFrame {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }
}

/// Owning handle to a spawned session task.
///
/// Dropping the handle cancels the session.
#[derive(Debug)]
pub struct ConnectionHandle {
    sender: FrameSender,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Take the link event receiver. Yields `None` on the second call.
    pub fn take_link_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
        self.link_events.take()
    }

    /// A clonable sender usable from other tasks.
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// See [`FrameSender::send_frame`].
    pub async fn send_frame(&self, frame: DecodedFrame) -> Result<()> {
        self.sender.send_frame(frame).await
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    /// A watch receiver for awaiting state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.sender.state_rx.clone()
    }

    /// Stop the session: cancels timers and closes the transport. The
    /// session task publishes `Disconnected` and exits; in-flight sends
    /// observe [`Error::NotConnected`]. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Factory for the session task.
#[derive(Debug)]
pub struct ConnectionManager {
    endpoint: String,
    credentials: Credentials,
    options: ConnectOptions,
}

impl ConnectionManager {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Credentials,
        options: ConnectOptions,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials,
            options,
        }
    }

    /// Spawn the session task and return its handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let session = Session {
            endpoint: self.endpoint,
            auth_frame: DecodedFrame::Auth(AuthRequest::from_credentials(&self.credentials)),
            options: self.options,
            state: ConnectionState::Disconnected,
            state_tx,
            events: event_tx,
            cmd_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(session.run());

        ConnectionHandle {
            sender: FrameSender { cmd_tx, state_rx },
            link_events: Some(event_rx),
            cancel,
        }
    }
}

// ── Session task ─────────────────────────────────────────────────

enum AuthVerdict {
    Accepted,
    Failed(Error),
    Cancelled,
}

struct Session {
    endpoint: String,
    auth_frame: DecodedFrame,
    options: ConnectOptions,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::Sender<LinkEvent>,
    cmd_rx: mpsc::Receiver<LinkCommand>,
    cancel: CancellationToken,
}

impl Session {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.drain_stale_commands();
            attempt += 1;
            if !self.transition(ConnectionState::begin_connect) {
                break;
            }
            debug!(endpoint = %self.endpoint, attempt, "connecting");

            let stream = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = TcpStream::connect(&self.endpoint) => match result {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(error = %err, attempt, "connect failed");
                        if !self.fail_and_wait(Error::Transport(err)).await {
                            break;
                        }
                        continue;
                    }
                },
            };
            let _ = stream.set_nodelay(true);
            let mut framed = Framed::new(stream, FrameCodec::new());

            if !self.transition(ConnectionState::transport_open) {
                break;
            }
            if let Err(err) = framed.send(self.auth_frame.clone()).await {
                warn!(error = %err, "failed to send auth frame");
                if !self.fail_and_wait(err).await {
                    break;
                }
                continue;
            }
            trace!("auth frame sent, awaiting verdict");

            match self.await_auth_verdict(&mut framed).await {
                AuthVerdict::Accepted => {}
                AuthVerdict::Cancelled => break,
                AuthVerdict::Failed(err) => {
                    warn!(error = %err, "authentication did not complete");
                    if !self.fail_and_wait(err).await {
                        break;
                    }
                    continue;
                }
            }

            if !self.transition(ConnectionState::complete_authentication) {
                break;
            }
            info!(endpoint = %self.endpoint, "session established");
            attempt = 0;
            if !self.emit(LinkEvent::Up).await {
                break;
            }

            let Some((code, reason)) = self.connected_loop(&mut framed).await else {
                break;
            };
            info!(code, reason = %reason, "session lost");
            // Reply to queued sends first: a caller blocked on a reply
            // cannot drain the event channel this emit may be waiting on.
            self.drain_stale_commands();
            if !self.emit(LinkEvent::Down { code, reason }).await {
                break;
            }
            if !self.transition(ConnectionState::begin_reconnect) {
                break;
            }
            if !self.wait_retry().await {
                break;
            }
        }
        self.state.force_disconnect();
        self.state_tx.send_replace(self.state.clone());
        debug!("session task stopped");
    }

    /// Run the established session until it ends.
    ///
    /// Returns the synthesized close code and reason, or `None` when the
    /// session was cancelled (or its owner vanished) and the loop should
    /// exit without reporting a disconnection.
    async fn connected_loop(
        &mut self,
        framed: &mut Framed<TcpStream, FrameCodec>,
    ) -> Option<(u16, String)> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                command = self.cmd_rx.recv() => match command {
                    Some(LinkCommand::SendFrame { frame, reply }) => {
                        match framed.send(frame).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                            Err(err) => {
                                let reason = err.to_string();
                                let _ = reply.send(Err(err));
                                return Some((CLOSE_ABNORMAL, reason));
                            }
                        }
                    }
                    None => return None,
                },
                incoming = framed.next() => match incoming {
                    Some(Ok(frame)) => self.route_frame(frame),
                    Some(Err(err)) => return Some((CLOSE_ABNORMAL, err.to_string())),
                    None => return Some((CLOSE_NORMAL, "connection closed by peer".into())),
                },
            }
        }
    }

    /// Wait for the auth ack, bounded by the configured timeout.
    async fn await_auth_verdict(
        &mut self,
        framed: &mut Framed<TcpStream, FrameCodec>,
    ) -> AuthVerdict {
        let deadline = tokio::time::sleep(self.options.auth_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return AuthVerdict::Cancelled,
                _ = &mut deadline => {
                    return AuthVerdict::Failed(Error::Timeout(self.options.auth_timeout));
                }
                incoming = framed.next() => match incoming {
                    Some(Ok(DecodedFrame::AuthAck { status: 0 })) => return AuthVerdict::Accepted,
                    Some(Ok(DecodedFrame::AuthAck { status })) => {
                        return AuthVerdict::Failed(Error::Authentication {
                            reason: format!("server rejected credentials (status {status})"),
                        });
                    }
                    Some(Ok(frame)) => {
                        trace!(frame = frame.type_name(), "ignoring frame before auth verdict");
                    }
                    Some(Err(err)) => return AuthVerdict::Failed(err),
                    None => {
                        return AuthVerdict::Failed(Error::Authentication {
                            reason: "connection closed during authentication".into(),
                        });
                    }
                },
            }
        }
    }

    fn route_frame(&mut self, frame: DecodedFrame) {
        match frame {
            DecodedFrame::AuthAck { status } => {
                debug!(status, "ignoring auth ack after session establishment");
            }
            DecodedFrame::Unknown {
                frame_type,
                payload_len,
            } => {
                debug!(frame_type, payload_len, "ignoring unknown frame type");
            }
            other => self.forward_frame(other),
        }
    }

    fn forward_frame(&mut self, frame: DecodedFrame) {
        // Telemetry is lossy under backpressure: latest-wins consumers
        // tolerate a dropped batch. Lifecycle events never take this path.
        match self.events.try_send(LinkEvent::Frame(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("link event channel full, dropping telemetry frame");
            }
            Err(TrySendError::Closed(_)) => {
                trace!("link event receiver gone");
            }
        }
    }

    /// Record a failed attempt, surface the error, and run the retry
    /// delay. Returns `false` when the session should stop.
    async fn fail_and_wait(&mut self, err: Error) -> bool {
        if !self.transition(ConnectionState::fail_attempt) {
            return false;
        }
        if !self.emit(LinkEvent::Error(err)).await {
            return false;
        }
        self.wait_retry().await
    }

    /// Sleep the reconnect interval. Returns `false` when cancelled.
    async fn wait_retry(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.options.reconnect_interval) => true,
        }
    }

    /// Deliver a lifecycle event. Returns `false` when the receiver is
    /// gone and the session should stop.
    async fn emit(&self, event: LinkEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Apply a state transition and publish the result.
    ///
    /// A rejected transition is a session bug; log it and stop rather
    /// than running with an inconsistent machine.
    fn transition(&mut self, apply: fn(&mut ConnectionState) -> Result<()>) -> bool {
        match apply(&mut self.state) {
            Ok(()) => {
                self.state_tx.send_replace(self.state.clone());
                true
            }
            Err(err) => {
                error!(error = %err, "session state machine violation");
                false
            }
        }
    }

    /// Reject commands queued while no session was established.
    fn drain_stale_commands(&mut self) {
        while let Ok(LinkCommand::SendFrame { reply, .. }) = self.cmd_rx.try_recv() {
            let _ = reply.send(Err(Error::NotConnected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(50);

    fn options() -> ConnectOptions {
        ConnectOptions {
            reconnect_interval: TICK,
            auth_timeout: Duration::from_secs(2),
        }
    }

    async fn ephemeral_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    /// Accept one client, verify its auth frame, and answer with `status`.
    async fn accept_and_ack(listener: &TcpListener, status: u8) -> Framed<TcpStream, FrameCodec> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        match framed.next().await.unwrap().unwrap() {
            DecodedFrame::Auth(auth) => {
                assert_eq!(auth.digest.len(), 32);
            }
            other => panic!("expected auth frame, got {other:?}"),
        }
        framed.send(DecodedFrame::AuthAck { status }).await.unwrap();
        framed
    }

    fn handle_with_events(
        manager: ConnectionManager,
    ) -> (ConnectionHandle, mpsc::Receiver<LinkEvent>) {
        let mut handle = manager.spawn();
        let events = handle.take_link_events().unwrap();
        (handle, events)
    }

    #[tokio::test]
    async fn connects_and_reports_up() {
        let (listener, addr) = ephemeral_listener().await;
        let manager =
            ConnectionManager::new(addr, Credentials::new("u", "p", "s"), options());
        let (handle, mut events) = handle_with_events(manager);

        let _server = timeout(Duration::from_secs(5), accept_and_ack(&listener, 0))
            .await
            .unwrap();
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Up) => {}
            other => panic!("expected Up, got {other:?}"),
        }
        assert!(handle.state().is_connected());

        handle.shutdown();
        // The event channel closes once the task exits.
        while timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .is_some()
        {}
        assert!(handle.state().is_disconnected());
    }

    #[tokio::test]
    async fn rejected_auth_surfaces_error_and_retries() {
        let (listener, addr) = ephemeral_listener().await;
        let manager =
            ConnectionManager::new(addr, Credentials::new("u", "wrong", "s"), options());
        let (handle, mut events) = handle_with_events(manager);

        let _first = timeout(Duration::from_secs(5), accept_and_ack(&listener, 1))
            .await
            .unwrap();
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Error(Error::Authentication { reason })) => {
                assert!(reason.contains("status 1"));
            }
            other => panic!("expected authentication error, got {other:?}"),
        }

        // The connection itself is retried with the same credentials.
        let _second = timeout(Duration::from_secs(5), accept_and_ack(&listener, 1))
            .await
            .unwrap();

        handle.shutdown();
    }

    #[tokio::test]
    async fn established_loss_reports_abnormal_close_then_reconnects() {
        let (listener, addr) = ephemeral_listener().await;
        let manager =
            ConnectionManager::new(addr, Credentials::new("u", "p", "s"), options());
        let (handle, mut events) = handle_with_events(manager);

        let server = timeout(Duration::from_secs(5), accept_and_ack(&listener, 0))
            .await
            .unwrap();
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Up) => {}
            other => panic!("expected Up, got {other:?}"),
        }

        // Reset the connection abruptly: linger zero turns the drop into RST.
        let stream = server.into_inner();
        stream.set_linger(Some(Duration::ZERO)).unwrap();
        drop(stream);

        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Down { code, .. }) => assert_eq!(code, CLOSE_ABNORMAL),
            other => panic!("expected Down, got {other:?}"),
        }

        // After the retry delay the session connects and authenticates again.
        let _second = timeout(Duration::from_secs(5), accept_and_ack(&listener, 0))
            .await
            .unwrap();
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Up) => {}
            other => panic!("expected second Up, got {other:?}"),
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn clean_peer_close_reports_normal_code() {
        let (listener, addr) = ephemeral_listener().await;
        let manager =
            ConnectionManager::new(addr, Credentials::new("u", "p", "s"), options());
        let (handle, mut events) = handle_with_events(manager);

        let server = timeout(Duration::from_secs(5), accept_and_ack(&listener, 0))
            .await
            .unwrap();
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Up) => {}
            other => panic!("expected Up, got {other:?}"),
        }
        drop(server); // clean FIN

        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Down { code, .. }) => assert_eq!(code, CLOSE_NORMAL),
            other => panic!("expected Down, got {other:?}"),
        }
        handle.shutdown();
    }

    #[tokio::test]
    async fn send_frame_requires_connected_state() {
        // Nothing listens on this address: grab a port and close it.
        let (listener, addr) = ephemeral_listener().await;
        drop(listener);

        let manager =
            ConnectionManager::new(addr, Credentials::default(), options());
        let handle = manager.spawn();
        let err = handle
            .send_frame(DecodedFrame::AuthAck { status: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        handle.shutdown();
    }

    #[tokio::test]
    async fn connect_failure_surfaces_transport_error_and_keeps_retrying() {
        let (listener, addr) = ephemeral_listener().await;
        drop(listener);

        let manager =
            ConnectionManager::new(addr.clone(), Credentials::default(), options());
        let (handle, mut events) = handle_with_events(manager);

        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Error(Error::Transport(_))) => {}
            other => panic!("expected transport error, got {other:?}"),
        }
        // Still trying: a second failure arrives after the retry delay.
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(LinkEvent::Error(Error::Transport(_))) => {}
            other => panic!("expected transport error, got {other:?}"),
        }

        handle.shutdown();
        while timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .is_some()
        {}
        assert!(handle.state().is_disconnected());
    }
}
