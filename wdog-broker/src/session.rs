use std::sync::Arc;

use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    watch,
};
use tokio::time::{sleep, sleep_until, timeout, Duration, Instant};

use wdog_proto::{
    decode_dl_report, Command, DeviceIdentity, FrameReassembler, LineMeasurement, MacAddress,
    Packet, HANDSHAKE_PAYLOAD,
};

use crate::transport::{BleError, BleTransport, DeviceLink};
use crate::REQUESTED_MTU;

// Floor for the liveness window so slow refresh settings never make a
// healthy device look dead
const MIN_LIVENESS: Duration = Duration::from_secs(20);

/// Connection state machine states. `Disabled` is terminal and only
/// reachable through an explicit disable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Handshaking,
    Streaming,
    Backoff,
    Disabled,
}

/// Events a session reports up to the fleet layer.
#[derive(Debug)]
pub enum SessionEvent {
    Measurements {
        mac: MacAddress,
        lines: Vec<LineMeasurement>,
    },
    /// Advisory ErrorReport/Alarm notification; body is opaque and the
    /// authoritative error state stays the per-line error code
    Notice { mac: MacAddress, command: Command },
    StateChanged {
        mac: MacAddress,
        state: SessionState,
    },
    /// Transport failure, reported for logging only; the retry loop
    /// keeps running
    ConnectionError { mac: MacAddress, error: BleError },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub refresh_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(10),
            reconnect_max_delay: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            refresh_interval: Duration::from_millis(5000),
        }
    }
}

/// Reconnect delay that doubles on consecutive failures up to a
/// maximum, resetting once a connection reaches Streaming.
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now; doubles the next one.
    pub(crate) fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

fn liveness_window(refresh: Duration) -> Duration {
    (refresh * 4).max(MIN_LIVENESS)
}

enum Exit {
    Disabled,
    Lost(Option<BleError>),
}

/// Control handle held by the fleet for one running session. Dropping
/// the handle disables the session, which cancels any in-flight
/// connect, handshake, or backoff wait and closes the link.
pub struct SessionHandle {
    disable_tx: watch::Sender<bool>,
    refresh_tx: watch::Sender<Duration>,
}

impl SessionHandle {
    pub fn disable(&self) {
        self.disable_tx.send(true).ok();
    }

    /// Push a new refresh interval to the live session; takes effect
    /// without reconnecting.
    pub fn set_refresh_interval(&self, interval: Duration) {
        self.refresh_tx.send(interval).ok();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.disable_tx.send(true).ok();
    }
}

/// Owns one device's BLE connection lifecycle:
/// connect, subscribe, handshake, stream, and reconnect with backoff.
/// Every reconnect repeats subscribe + handshake in full; nothing from
/// a prior connection is reused.
pub struct DeviceSession {
    identity: DeviceIdentity,
    cfg: SessionConfig,
    transport: Arc<dyn BleTransport>,
    events: UnboundedSender<SessionEvent>,
    disable_rx: watch::Receiver<bool>,
    refresh_rx: watch::Receiver<Duration>,
    state: SessionState,
}

impl DeviceSession {
    pub fn spawn(
        identity: DeviceIdentity,
        cfg: SessionConfig,
        transport: Arc<dyn BleTransport>,
        events: UnboundedSender<SessionEvent>,
    ) -> SessionHandle {
        let (disable_tx, disable_rx) = watch::channel(false);
        let (refresh_tx, refresh_rx) = watch::channel(cfg.refresh_interval);

        let session = Self {
            identity,
            cfg,
            transport,
            events,
            disable_rx,
            refresh_rx,
            state: SessionState::Idle,
        };

        tokio::spawn(session.run());

        SessionHandle {
            disable_tx,
            refresh_tx,
        }
    }

    async fn run(mut self) {
        let mac = self.identity.mac;
        let mut backoff = Backoff::new(self.cfg.reconnect_delay, self.cfg.reconnect_max_delay);
        let mut disable_rx = self.disable_rx.clone();

        log::info!("Session for {mac:} starting");

        while !self.disabled() {
            self.set_state(SessionState::Connecting);

            match self.connect_and_stream(&mut backoff).await {
                Exit::Disabled => break,
                Exit::Lost(error) => {
                    if let Some(error) = error {
                        log::warn!("Connection error for {mac:}: {error:}");
                        self.events
                            .send(SessionEvent::ConnectionError { mac, error })
                            .ok();
                    }
                }
            }

            if self.disabled() {
                break;
            }

            let delay = backoff.next();
            log::info!("Retrying {mac:} in {delay:?}");
            self.set_state(SessionState::Backoff);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = disable_rx.changed() => {}
            }
        }

        self.set_state(SessionState::Disabled);
        log::info!("Session for {mac:} stopped");
    }

    async fn connect_and_stream(&mut self, backoff: &mut Backoff) -> Exit {
        let mac = self.identity.mac;
        let mut disable_rx = self.disable_rx.clone();

        let mut link = tokio::select! {
            _ = disable_rx.changed() => return Exit::Disabled,
            res = timeout(self.cfg.connect_timeout, self.transport.connect(mac)) => {
                match res {
                    Ok(Ok(link)) => link,
                    Ok(Err(e)) => return Exit::Lost(Some(e)),
                    Err(_) => return Exit::Lost(Some(BleError::Timeout)),
                }
            }
        };

        log::info!("Connected to {mac:}");
        self.set_state(SessionState::Handshaking);

        let handshake = tokio::select! {
            _ = disable_rx.changed() => None,
            res = Self::handshake(&self.cfg, &mut link, mac) => Some(res),
        };

        let exit = match handshake {
            None => Exit::Disabled,
            Some(Err(e)) => Exit::Lost(Some(e)),
            Some(Ok(fragments)) => self.stream(fragments, backoff).await,
        };

        // Guaranteed release on every exit path, including mid-handshake
        // disable
        link.close().await;
        exit
    }

    /// Subscribe, request the larger MTU, and write the handshake
    /// payload. The device sends no handshake ack; success is decided
    /// by the first well-formed packet arriving in [`stream`].
    ///
    /// [`stream`]: DeviceSession::stream
    async fn handshake(
        cfg: &SessionConfig,
        link: &mut Box<dyn DeviceLink>,
        mac: MacAddress,
    ) -> Result<UnboundedReceiver<Vec<u8>>, BleError> {
        let fragments = timeout(cfg.handshake_timeout, link.subscribe())
            .await
            .map_err(|_| BleError::Timeout)??;

        if let Err(e) = link.request_mtu(REQUESTED_MTU).await {
            log::warn!("MTU request failed for {mac:}: {e:}, continuing fragmented");
        }

        timeout(cfg.handshake_timeout, link.write(HANDSHAKE_PAYLOAD, true))
            .await
            .map_err(|_| BleError::Timeout)??;

        log::debug!("Handshake written to {mac:}, waiting for data");
        Ok(fragments)
    }

    async fn stream(
        &mut self,
        mut fragments: UnboundedReceiver<Vec<u8>>,
        backoff: &mut Backoff,
    ) -> Exit {
        let mac = self.identity.mac;
        let mut disable_rx = self.disable_rx.clone();
        let mut refresh_rx = self.refresh_rx.clone();
        let mut reassembler = FrameReassembler::new();
        let mut streaming = false;

        // Fixed deadline for the first well-formed packet: fragments
        // that never assemble into one must not keep re-arming it
        let handshake_deadline = Instant::now() + self.cfg.handshake_timeout;

        loop {
            // Once streaming, the liveness window is re-armed by every
            // fragment
            let idle = if streaming {
                sleep_until(Instant::now() + liveness_window(*self.refresh_rx.borrow()))
            } else {
                sleep_until(handshake_deadline)
            };

            tokio::select! {
                _ = disable_rx.changed() => return Exit::Disabled,
                // Re-arm the window when the refresh interval changes;
                // a dropped handle means the session is done
                res = refresh_rx.changed() => {
                    if res.is_err() {
                        return Exit::Disabled;
                    }
                }
                _ = idle => {
                    if streaming {
                        log::warn!("{mac:} went silent, treating as disconnected");
                    } else {
                        log::warn!("{mac:} sent no valid packet before the handshake deadline");
                    }
                    return Exit::Lost(None);
                }
                fragment = fragments.recv() => {
                    let Some(bytes) = fragment else {
                        log::warn!("{mac:} disconnected");
                        return Exit::Lost(None);
                    };
                    for packet in reassembler.feed(&bytes) {
                        if !streaming {
                            streaming = true;
                            backoff.reset();
                            self.set_state(SessionState::Streaming);
                        }
                        self.dispatch(packet);
                    }
                }
            }
        }
    }

    fn dispatch(&self, packet: Packet) {
        let mac = self.identity.mac;
        match packet.command {
            Command::DlReport => {
                match decode_dl_report(&packet.body, self.identity.line_count) {
                    Ok(lines) => {
                        self.events
                            .send(SessionEvent::Measurements { mac, lines })
                            .ok();
                    }
                    Err(e) => log::debug!("Dropping malformed DLReport from {mac:}: {e:}"),
                }
            }
            Command::ErrorReport | Command::Alarm => {
                log::warn!("{:?} notification from {mac:}", packet.command);
                self.events
                    .send(SessionEvent::Notice {
                        mac,
                        command: packet.command,
                    })
                    .ok();
            }
            Command::Unknown(raw) => {
                log::trace!("Unknown cmd {raw:} from {mac:} ({} bytes)", packet.body.len());
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.events
            .send(SessionEvent::StateChanged {
                mac: self.identity.mac,
                state,
            })
            .ok();
    }

    fn disabled(&self) -> bool {
        *self.disable_rx.borrow()
    }
}
