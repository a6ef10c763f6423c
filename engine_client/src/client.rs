//! Client connection and per-tick orchestration.
//!
//! Owns the single `UdpSocket` talking to the server, the connection state
//! machine, clock sync, the reliable lane, client-side prediction for the
//! local player, and interpolation for everyone else. `tick()` is the one
//! entry point the embedding application calls once per client frame/tick.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use engine_shared::{
    bsp::BspMap,
    clock::{ClockSync, PingSchedule},
    config::EngineConfig,
    conn_fsm::{ConnEvent, ConnState, ConnectionFsm},
    console::{Console, CvarFlags, CvarValue},
    diagnostics::Diagnostics,
    ecs::EntityId,
    net::ClientId,
    state::{self, EntityState, EntityTable, Snapshot},
    transport::{ReceiveOutcome, Transport},
    wire::{self, DisconnectReason, Header, Message, ReliablePayload, PROTOCOL_VERSION},
};

use crate::input::InputSample;
use crate::interp::InterpolationBuffer;
use crate::predict::{CorrectionKind, Predictor};

/// How many past received snapshots the client retains to resolve a delta's
/// baseline, mirroring the server's per-client retention.
const SNAPSHOT_HISTORY_TICKS: usize = 64;
/// Entity kind assigned to the local player before the first authoritative
/// snapshot arrives; must match what `spawn_player` gives it server-side.
const LOCAL_PLAYER_KIND: u16 = 1;

/// Retains received `EntityTable`s keyed by tick, just deep enough to resolve
/// the baseline a freshly arrived delta snapshot references.
struct SnapshotHistory {
    tables: VecDeque<(u32, EntityTable)>,
}

impl SnapshotHistory {
    fn new() -> Self {
        Self { tables: VecDeque::new() }
    }

    fn get(&self, tick: u32) -> Option<&EntityTable> {
        self.tables.iter().find(|(t, _)| *t == tick).map(|(_, table)| table)
    }

    fn retain(&mut self, tick: u32, table: &EntityTable) {
        self.tables.push_back((tick, table.clone()));
        while self.tables.len() > SNAPSHOT_HISTORY_TICKS {
            self.tables.pop_front();
        }
    }
}

/// Client-side view of one connection to a server.
pub struct GameClient {
    pub cfg: EngineConfig,
    pub console: Console,

    fsm: ConnectionFsm,
    transport: Transport,
    clock: ClockSync,
    ping_schedule: PingSchedule,
    next_ping_at: Instant,
    awaiting_ping: Option<(u64, Instant)>,

    socket: UdpSocket,
    server_addr: SocketAddr,

    client_id: Option<ClientId>,
    local_player: Option<EntityId>,
    predictor: Option<Predictor>,
    interp: InterpolationBuffer,
    snapshot_history: SnapshotHistory,
    world_entities: EntityTable,

    current_map: Option<BspMap>,
    maps_dir: PathBuf,

    started_at: Instant,
    last_seen: Instant,
    tick: u32,

    console_rx: Option<mpsc::Receiver<String>>,
    diagnostics: Diagnostics,
}

impl GameClient {
    pub async fn new(cfg: EngineConfig, maps_dir: PathBuf) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let socket = UdpSocket::bind(bind_addr).await.context("bind client udp socket")?;
        socket.connect(server_addr).await.context("connect client udp socket")?;

        let mut console = Console::new();
        Self::register_cvars(&mut console);

        let tick_dt_secs = cfg.tick_dt().as_secs_f64();
        let now = Instant::now();

        Ok(Self {
            cfg,
            console,
            fsm: ConnectionFsm::new(),
            transport: Transport::new(),
            clock: ClockSync::new(),
            ping_schedule: PingSchedule::default(),
            next_ping_at: now,
            awaiting_ping: None,
            socket,
            server_addr,
            client_id: None,
            local_player: None,
            predictor: None,
            interp: InterpolationBuffer::new(tick_dt_secs),
            snapshot_history: SnapshotHistory::new(),
            world_entities: EntityTable::new(),
            current_map: None,
            maps_dir,
            started_at: now,
            last_seen: now,
            tick: 0,
            console_rx: None,
            diagnostics: Diagnostics::new(),
        })
    }

    fn register_cvars(console: &mut Console) {
        console.register_cvar("cl_interp", CvarValue::Float(0.1), "Entity interpolation delay in seconds", CvarFlags::NONE);
        console.register_cvar("cl_predict", CvarValue::Bool(true), "Enable client-side movement prediction", CvarFlags::NONE);
        console.register_cvar("name", CvarValue::String("Player".to_string()), "Player name sent as auth credentials", CvarFlags::ARCHIVE);
    }

    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn state(&self) -> ConnState {
        self.fsm.state()
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn local_player(&self) -> Option<EntityId> {
        self.local_player
    }

    pub fn predicted_state(&self) -> Option<&EntityState> {
        self.predictor.as_ref().map(|p| p.predicted_state())
    }

    pub fn interpolation_buffer(&self) -> &InterpolationBuffer {
        &self.interp
    }

    /// Read-only health counters accumulated since this client connected.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.socket.local_addr().context("client local_addr")
    }

    fn millis_since_start(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_millis() as u64
    }

    /// Begins connecting: sends the handshake and advances the FSM out of
    /// `Disconnected`. The auth exchange happens once `HandshakeAck` arrives.
    pub async fn connect(&mut self) -> anyhow::Result<()> {
        self.fsm.apply(ConnEvent::HandshakeSent)?;
        self.last_seen = Instant::now();
        let now = Instant::now();
        info!(server = %self.server_addr, "Connecting to server");
        self.send_single(Message::Handshake { client_capability_flags: 0 }, now).await
    }

    /// Runs one client tick: drains console input, reads the socket, checks
    /// for a stalled connection, advances prediction, and sends input.
    pub async fn tick(&mut self, input: InputSample) -> anyhow::Result<()> {
        self.process_console_commands().await?;
        self.recv_datagrams().await?;
        self.check_timeout();

        let now = Instant::now();
        if self.fsm.is_connected() {
            self.send_input(input, now).await?;
        }
        self.maybe_send_ping(now).await?;

        self.tick += 1;
        Ok(())
    }

    async fn process_console_commands(&mut self) -> anyhow::Result<()> {
        let Some(rx) = self.console_rx.as_mut() else { return Ok(()) };
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        for line in lines {
            match self.exec_console(&line).await {
                Ok(output) => {
                    for line in output {
                        println!("{line}");
                    }
                }
                Err(e) => warn!(error = %e, "Console command failed"),
            }
        }
        Ok(())
    }

    /// Executes a console command line, dispatching connection/map commands
    /// before falling through to the generic cvar/command console.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let trimmed = line.trim();
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "connect" => {
                self.connect().await?;
                Ok(vec!["Connecting...".to_string()])
            }
            "disconnect" => {
                self.request_disconnect().await?;
                Ok(vec!["Disconnected".to_string()])
            }
            "status" => Ok(vec![self.status_line()]),
            "map" => {
                if tokens.len() < 2 {
                    return Ok(vec!["usage: map <name>".to_string()]);
                }
                match self.load_map(tokens[1]) {
                    Ok(()) => Ok(vec![format!("Loaded map {}", tokens[1])]),
                    Err(e) => Ok(vec![format!("Failed to load map {}: {e}", tokens[1])]),
                }
            }
            "say" => {
                let text = tokens[1..].join(" ");
                self.say(text).await
            }
            "quit" | "exit" => std::process::exit(0),
            _ => self.console.exec(line),
        }
    }

    fn status_line(&self) -> String {
        format!(
            "state={:?} client_id={:?} tick={} rtt_ms={:?} loss={:.1}% tracked_entities={}",
            self.fsm.state(),
            self.client_id,
            self.tick,
            self.clock.rtt().map(|d| d.as_millis()),
            self.clock.loss_ratio() * 100.0,
            self.interp.tracked_entities().count(),
        )
    }

    async fn request_disconnect(&mut self) -> anyhow::Result<()> {
        match self.fsm.state() {
            ConnState::Disconnected | ConnState::Disconnecting => return Ok(()),
            _ => {}
        }
        self.fsm.apply(ConnEvent::DisconnectRequested)?;
        let now = Instant::now();
        self.send_single(Message::Disconnect { reason: DisconnectReason::ClientQuit }, now).await?;
        self.transport.discard_pending_reliable();
        let _ = self.fsm.apply(ConnEvent::DrainComplete);
        Ok(())
    }

    async fn say(&mut self, text: String) -> anyhow::Result<Vec<String>> {
        let Some(client_id) = self.client_id else {
            return Ok(vec!["Not connected".to_string()]);
        };
        let now = Instant::now();
        let reliable_id = self.transport.next_reliable_id();
        let message = Message::Reliable {
            reliable_id,
            payload: ReliablePayload::Chat { from: client_id, text: text.clone() },
        };
        self.transport.queue_reliable(message, now);
        Ok(vec![format!("(chat queued) {text}")])
    }

    /// Loads a BSP map purely for local use (geometry/spawn points); the wire
    /// protocol carries no map-push message, so this is driven by the `map`
    /// console command rather than anything the server sends.
    pub fn load_map(&mut self, map_name: &str) -> anyhow::Result<()> {
        let path = self.maps_dir.join(format!("{map_name}.bsp"));
        let bsp = BspMap::load(&path).with_context(|| format!("load map {map_name}"))?;
        info!(map = %bsp.name, spawn_points = bsp.spawn_points().len(), "Loaded map");
        self.current_map = Some(bsp);
        Ok(())
    }

    fn check_timeout(&mut self) {
        if self.fsm.state() == ConnState::Disconnected {
            return;
        }
        let timeout = Duration::from_millis(self.cfg.connection_timeout_ms as u64);
        if Instant::now().saturating_duration_since(self.last_seen) >= timeout {
            let _ = self.fsm.apply(ConnEvent::TimedOut);
            warn!("Connection to server timed out");
        }
    }

    async fn send_input(&mut self, input: InputSample, now: Instant) -> anyhow::Result<()> {
        let Some(predictor) = &mut self.predictor else { return Ok(()) };
        let dt = self.cfg.tick_dt().as_secs_f32();
        predictor.predict_tick(input.wish_vector(), input.look_yaw, input.look_pitch, input.buttons, dt);
        let frames = predictor.outbound_tail(self.cfg.input_redundancy as usize);
        let bundle = wire::InputBundle { tick: self.tick, frames };

        let rtt = self.clock.rtt().unwrap_or(Duration::from_millis(100));
        let due = self.transport.drain_reliable_for_send(now, rtt);
        for (id, _) in &due {
            if self.transport.is_retransmit(*id) {
                self.diagnostics.record_retransmit();
            }
        }
        let reliable_ids: Vec<u32> = due.iter().map(|(id, _)| *id).collect();
        let mut messages: Vec<Message> = due.into_iter().map(|(_, m)| m).collect();
        messages.push(Message::InputFrame(bundle));

        let header = self.transport.build_header(PROTOCOL_VERSION, 0, &reliable_ids, now);
        self.send_datagram(&header, &messages).await
    }

    async fn maybe_send_ping(&mut self, now: Instant) -> anyhow::Result<()> {
        if self.awaiting_ping.is_some() || now < self.next_ping_at || self.fsm.state() == ConnState::Disconnected {
            return Ok(());
        }
        let token = self.millis_since_start(now);
        self.awaiting_ping = Some((token, now));
        self.next_ping_at = now + self.ping_schedule.next_interval(self.clock.samples_taken());
        self.send_single(Message::ClockPing { t_send: token }, now).await
    }

    async fn send_single(&mut self, message: Message, now: Instant) -> anyhow::Result<()> {
        let header = self.transport.build_header(PROTOCOL_VERSION, 0, &[], now);
        self.send_datagram(&header, &[message]).await
    }

    async fn send_datagram(&mut self, header: &Header, messages: &[Message]) -> anyhow::Result<()> {
        match wire::encode_datagram(header, messages) {
            Ok(bytes) => {
                self.socket.send(&bytes).await.context("udp send")?;
            }
            Err(e) => warn!(error = %e, "Failed to encode outbound datagram"),
        }
        Ok(())
    }

    async fn recv_datagrams(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; wire::MAX_DATAGRAM_BYTES];
        loop {
            match self.socket.try_recv(&mut buf) {
                Ok(n) => self.handle_datagram(&buf[..n]).await,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv"),
            }
        }
        Ok(())
    }

    async fn handle_datagram(&mut self, bytes: &[u8]) {
        let (header, messages) = match wire::decode_datagram(bytes) {
            Ok(pair) => pair,
            Err(e) => {
                self.diagnostics.record_decode_error();
                debug!(error = %e, "Dropped malformed datagram from server");
                return;
            }
        };

        self.last_seen = Instant::now();
        if self.transport.on_receive_header(&header) == ReceiveOutcome::Duplicate {
            self.diagnostics.record_duplicate_datagram();
            return;
        }

        for message in messages {
            self.handle_message(message).await;
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::HandshakeAck { accepted } => {
                if accepted && self.fsm.state() == ConnState::Connecting {
                    let _ = self.fsm.apply(ConnEvent::HandshakeAccepted);
                    let credentials = self
                        .console
                        .get_cvar("name")
                        .map(|v| v.as_string())
                        .unwrap_or_else(|| "Player".to_string())
                        .into_bytes();
                    let now = Instant::now();
                    if let Err(e) = self.send_single(Message::Auth { credentials }, now).await {
                        warn!(error = %e, "Failed to send auth request");
                    }
                } else if !accepted {
                    warn!("Server rejected handshake");
                }
            }
            Message::AuthResult { accepted, client_id, entity_id } => {
                if accepted {
                    let _ = self.fsm.apply(ConnEvent::AuthSucceeded);
                    self.client_id = Some(client_id);
                    self.local_player = Some(entity_id);
                    self.predictor = Some(Predictor::new(entity_id, EntityState::new(entity_id, LOCAL_PLAYER_KIND)));
                    info!(%client_id, entity_id = %entity_id, "Authenticated with server");
                } else {
                    let _ = self.fsm.apply(ConnEvent::AuthRejected);
                    let _ = self.fsm.apply(ConnEvent::DrainComplete);
                    warn!("Server rejected authentication");
                }
            }
            Message::SnapshotFull(snap) | Message::SnapshotDelta(snap) => {
                self.apply_snapshot(snap);
            }
            Message::ClockPong { t_send, t_recv } => {
                let _ = t_recv;
                if let Some((token, sent_at)) = self.awaiting_ping.take() {
                    if token == t_send {
                        if let Some(sample) = self.clock.record_round_trip(sent_at, Instant::now(), Duration::ZERO) {
                            debug!(rtt_ms = sample.rtt.as_millis(), offset_ms = sample.offset.as_millis(), "Clock ping round trip");
                        }
                    } else {
                        self.awaiting_ping = Some((token, sent_at));
                    }
                }
            }
            Message::Disconnect { reason } => {
                info!(?reason, "Server closed the connection");
                let _ = self.fsm.apply(ConnEvent::RemoteDisconnected);
                let _ = self.fsm.apply(ConnEvent::DrainComplete);
            }
            Message::Reliable { reliable_id, payload } => {
                let (_, ready) = self
                    .transport
                    .receive_reliable(reliable_id, Message::Reliable { reliable_id, payload });
                for msg in ready {
                    if let Message::Reliable { payload: ReliablePayload::Chat { from, text }, .. } = msg {
                        info!(%from, %text, "Chat");
                    }
                }
            }
            other => debug!(?other, "Unexpected message from server"),
        }
    }

    fn apply_snapshot(&mut self, snap: Snapshot) {
        let table = if snap.is_full() {
            state::apply_delta(&EntityTable::new(), &snap)
        } else {
            let Some(baseline) = self.snapshot_history.get(snap.baseline_tick) else {
                warn!(wanted = snap.baseline_tick, "Delta snapshot baseline not retained, dropping until next full snapshot");
                return;
            };
            match state::try_apply_delta(baseline, snap.baseline_tick, &snap) {
                Ok(table) => table,
                Err(e) => {
                    warn!(error = %e, "Dropping delta snapshot");
                    return;
                }
            }
        };

        self.snapshot_history.retain(snap.tick, &table);

        if let (Some(client_id), Some(predictor)) = (self.client_id, self.predictor.as_mut()) {
            let authoritative = table.get(&predictor.local_player());
            let last_processed = snap.last_processed_input.get(&client_id).copied().unwrap_or(0);
            let report = predictor.reconcile(snap.tick, authoritative, last_processed, &self.cfg);
            match report.kind {
                CorrectionKind::Snapped => self.diagnostics.record_reconciliation(true),
                CorrectionKind::Blended => self.diagnostics.record_reconciliation(false),
                CorrectionKind::NoOp => {}
            }
            debug!(kind = ?report.kind, position_delta = report.position_delta, "Reconciled local player prediction");
        }

        let remote_states: Vec<EntityState> = table
            .values()
            .filter(|s| Some(s.id) != self.local_player)
            .cloned()
            .collect();
        self.interp.push_snapshot(snap.tick, &remote_states);
        for id in &snap.removed {
            self.interp.forget(*id);
        }

        self.world_entities = table;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    async fn fake_server() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn client_to(addr: SocketAddr) -> GameClient {
        let mut cfg = EngineConfig::default();
        cfg.server_addr = addr.to_string();
        GameClient::new(cfg, PathBuf::from("maps")).await.unwrap()
    }

    #[tokio::test]
    async fn connect_sends_a_handshake_datagram() {
        let (server, addr) = fake_server().await;
        let mut client = client_to(addr).await;

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnState::Connecting);

        let mut buf = [0u8; 1500];
        let (n, from) = tokio::time::timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let (_, messages) = wire::decode_datagram(&buf[..n]).unwrap();
        assert!(matches!(messages[0], Message::Handshake { .. }));
        let _ = from;
    }

    #[tokio::test]
    async fn handshake_ack_triggers_auth_request() {
        let (server, addr) = fake_server().await;
        let mut client = client_to(addr).await;
        client.connect().await.unwrap();

        let mut buf = [0u8; 1500];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        let (_, _) = wire::decode_datagram(&buf[..n]).unwrap();

        let header = Header { version: PROTOCOL_VERSION, flags: 0, peer_seq: 0, peer_ack: 0, ack_bits: 0 };
        let ack = wire::encode_datagram(&header, &[Message::HandshakeAck { accepted: true }]).unwrap();
        server.send_to(&ack, from).await.unwrap();

        client.recv_datagrams().await.unwrap();
        assert_eq!(client.state(), ConnState::Authenticating);

        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        let (_, messages) = wire::decode_datagram(&buf[..n]).unwrap();
        assert!(matches!(messages[0], Message::Auth { .. }));
    }

    #[tokio::test]
    async fn auth_result_builds_predictor_for_local_player() {
        let (_server, addr) = fake_server().await;
        let mut client = client_to(addr).await;
        client.fsm.apply(ConnEvent::HandshakeSent).unwrap();
        client.fsm.apply(ConnEvent::HandshakeAccepted).unwrap();

        client
            .handle_message(Message::AuthResult {
                accepted: true,
                client_id: ClientId(7),
                entity_id: EntityId(42),
            })
            .await;

        assert_eq!(client.state(), ConnState::Connected);
        assert_eq!(client.client_id(), Some(ClientId(7)));
        assert_eq!(client.local_player(), Some(EntityId(42)));
        assert!(client.predictor.is_some());
    }

    #[tokio::test]
    async fn full_snapshot_populates_world_and_remote_interpolation() {
        let (_server, addr) = fake_server().await;
        let mut client = client_to(addr).await;
        client.fsm.apply(ConnEvent::HandshakeSent).unwrap();
        client.fsm.apply(ConnEvent::HandshakeAccepted).unwrap();
        client
            .handle_message(Message::AuthResult {
                accepted: true,
                client_id: ClientId(1),
                entity_id: EntityId(1),
            })
            .await;

        let mut table = EntityTable::new();
        table.insert(EntityId(1), EntityState::new(EntityId(1), 1));
        table.insert(EntityId(2), EntityState::new(EntityId(2), 1));
        let snap = state::encode_full(5, &table, std::collections::HashMap::new());

        client.apply_snapshot(snap);

        assert_eq!(client.world_entities.len(), 2);
        // The local player is excluded from remote interpolation.
        assert_eq!(client.interp.tracked_entities().count(), 1);
    }

    #[tokio::test]
    async fn delta_snapshot_with_unretained_baseline_is_dropped() {
        let (_server, addr) = fake_server().await;
        let mut client = client_to(addr).await;

        let old = EntityTable::new();
        let delta = state::encode_delta(999, 1000, &old, &old, std::collections::HashMap::new());
        client.apply_snapshot(delta);

        assert!(client.world_entities.is_empty());
    }
}
