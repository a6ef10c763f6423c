//! Server implementation.
//!
//! Authoritative tick-based server loop: one UDP socket carries handshake,
//! auth, input, snapshot, and reliable-lane traffic together (the old
//! TCP-control/UDP-gameplay split is gone now that the reliable lane rides
//! the same datagram transport as everything else). Responsibilities:
//! - BSP map loading
//! - Console commands (map, status, quit)
//! - Per-peer handshake/auth via the shared connection state machine
//! - Input validation, rate limiting, and one-input-per-tick simulation
//! - Per-client delta snapshot emission with baseline promotion on ack
//! - Lag-compensated history retention
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Avoid wall-clock-dependent branching in gameplay code.
//! - Use stable ordering when iterating collections.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use engine_shared::{
    bsp::BspMap,
    config::EngineConfig,
    console::{Console, CvarFlags, CvarValue},
    diagnostics::Diagnostics,
    ecs::{EntityId, World},
    math::Vec3,
    net::ClientId,
    state::{self, EntityState, EntityTable},
    transport::{self, ReceiveOutcome, Transport},
    wire::{self, DecodeError, DisconnectReason, Header, InputBundle, Message, WireInputFrame, PROTOCOL_VERSION},
};
use tokio::{net::UdpSocket, sync::mpsc};
use tracing::{debug, info, warn};

use engine_shared::conn_fsm::{ConnEvent, ConnState, ConnectionFsm};

use crate::lagcomp::HistoryRing;

/// Crude movement model mirroring the client's own prediction integration;
/// kept as a separate copy here rather than shared across the crate
/// boundary, since this is the server's only authority on the result.
const PLAYER_ACCELERATION: f32 = 10.0;
const FRICTION: f32 = 4.0;

/// Entities farther than this from a client's viewpoint are dropped first
/// when a snapshot would otherwise exceed the datagram budget.
const MAX_SNAPSHOT_ENTITIES: usize = 64;

/// Ticks of per-client baseline history retained for delta encoding.
const BASELINE_HISTORY_TICKS: usize = 64;

/// Wish-vector components farther than this from the unit sphere are
/// clamped and counted as a suspicious input.
const MAX_WISH_MAGNITUDE: f32 = 1.05;

/// Known button bits; anything outside this mask is a protocol error.
const KNOWN_BUTTONS_MASK: u32 = 0xFF;

/// Position drift between a client's reported position and the server's
/// authoritative one, beyond which an input is treated as suspicious.
const MOVE_TOLERANCE_M: f32 = 1.0;

/// Server state enum for connection flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// No map loaded, waiting for `map` command.
    Idle,
    /// Map is loading.
    LoadingMap,
    /// Map loaded, accepting clients and running simulation.
    Running,
}

/// Per-connection bookkeeping, keyed by the peer's socket address until
/// auth assigns it a [`ClientId`].
struct ClientRecord {
    addr: SocketAddr,
    client_id: Option<ClientId>,
    fsm: ConnectionFsm,
    transport: Transport,
    last_seen: Instant,

    player_entity: EntityId,
    last_processed_input: u32,
    pending_inputs: BTreeMap<u32, WireInputFrame>,

    inputs_this_window: u32,
    input_window_start: Instant,
    protocol_error_count: u32,
    suspicion_count: u32,

    /// Recent outgoing snapshots, tick -> table, for delta-baseline retention.
    recent_snapshots: VecDeque<(u32, EntityTable)>,
    /// Outbound `peer_seq` -> the snapshot tick it carried, pruned as the ack
    /// window moves on.
    snapshot_seq_map: HashMap<u16, u32>,
    /// Tick the next delta is encoded against; 0 means "send a full snapshot".
    baseline_tick: u32,
}

impl ClientRecord {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            client_id: None,
            fsm: ConnectionFsm::new(),
            transport: Transport::new(),
            last_seen: now,
            player_entity: EntityId::NONE,
            last_processed_input: 0,
            pending_inputs: BTreeMap::new(),
            inputs_this_window: 0,
            input_window_start: now,
            protocol_error_count: 0,
            suspicion_count: 0,
            recent_snapshots: VecDeque::new(),
            snapshot_seq_map: HashMap::new(),
            baseline_tick: 0,
        }
    }

    fn retain_snapshot(&mut self, tick: u32, table: &EntityTable) {
        self.recent_snapshots.push_back((tick, table.clone()));
        while self.recent_snapshots.len() > BASELINE_HISTORY_TICKS {
            self.recent_snapshots.pop_front();
        }
    }

    /// Promotes `tick` to the baseline the next delta will be encoded
    /// against, now that the client has acknowledged receiving it.
    fn promote_baseline(&mut self, tick: u32) {
        self.baseline_tick = tick;
        let floor = tick.saturating_sub(BASELINE_HISTORY_TICKS as u32 * 2);
        self.snapshot_seq_map.retain(|_, t| *t >= floor);
        self.recent_snapshots.retain(|(t, _)| *t >= floor);
    }

    fn baseline_table(&self, tick: u32) -> Option<&EntityTable> {
        self.recent_snapshots.iter().find(|(t, _)| *t == tick).map(|(_, table)| table)
    }
}

/// Game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    pub console: Console,
    world: World,
    entities: EntityTable,
    history: HistoryRing,
    diagnostics: Diagnostics,

    clients: HashMap<SocketAddr, ClientRecord>,
    client_addrs: HashMap<ClientId, SocketAddr>,

    socket: UdpSocket,
    started_at: Instant,

    tick: u32,
    state: ServerState,

    current_map: Option<BspMap>,
    maps_dir: PathBuf,

    console_rx: Option<mpsc::Receiver<String>>,
}

impl GameServer {
    /// Creates a new server with the given config.
    pub async fn new(cfg: EngineConfig, maps_dir: PathBuf) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;

        let mut console = Console::new();
        Self::register_cvars(&mut console);

        let max_rewind_ticks = ((cfg.max_rewind_ms as f32 / 1000.0) * cfg.tick_hz as f32).round() as u32;

        Ok(Self {
            cfg,
            console,
            world: World::default(),
            entities: EntityTable::new(),
            history: HistoryRing::new(max_rewind_ticks.max(1)),
            diagnostics: Diagnostics::new(),
            clients: HashMap::new(),
            client_addrs: HashMap::new(),
            socket,
            started_at: Instant::now(),
            tick: 0,
            state: ServerState::Idle,
            current_map: None,
            maps_dir,
            console_rx: None,
        })
    }

    /// Binds the server socket (legacy API for compatibility).
    pub async fn bind(cfg: EngineConfig) -> anyhow::Result<Self> {
        Self::new(cfg, PathBuf::from("maps")).await
    }

    fn register_cvars(console: &mut Console) {
        console.register_cvar("sv_tickrate", CvarValue::Int(60), "Server tick rate", CvarFlags::NONE);
        console.register_cvar("sv_maxclients", CvarValue::Int(32), "Max connected clients", CvarFlags::NONE);
        console.register_cvar("sv_cheats", CvarValue::Bool(false), "Allow cheat commands", CvarFlags::REPLICATED);
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Returns the current server state.
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Read-only health counters accumulated since this server started.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Loads a map by name.
    pub fn load_map(&mut self, map_name: &str) -> anyhow::Result<()> {
        self.state = ServerState::LoadingMap;
        info!(map = %map_name, "Loading map");

        let path = self.maps_dir.join(format!("{}.bsp", map_name));
        let bsp = BspMap::load(&path).with_context(|| format!("load map {}", path.display()))?;

        info!(
            map = %bsp.name,
            entities = bsp.entities.len(),
            vertices = bsp.vertices.len(),
            faces = bsp.faces.len(),
            "Map loaded"
        );

        self.world = World::default();
        self.entities.clear();
        self.spawn_bsp_entities(&bsp);

        self.current_map = Some(bsp);
        self.tick = 0;
        self.state = ServerState::Running;
        Ok(())
    }

    fn spawn_bsp_entities(&mut self, bsp: &BspMap) {
        for ent in &bsp.entities {
            if ent.classname == "worldspawn" {
                continue;
            }
            let id = self.world.spawn();
            let mut state = EntityState::new(id, 0);
            if let Some(origin) = ent.origin() {
                state.position = origin;
            }
            self.entities.insert(id, state);
            debug!(id = ?id, classname = %ent.classname, "Spawned BSP entity");
        }
    }

    /// Spawns a player entity for a newly authenticated client.
    fn spawn_player(&mut self) -> EntityId {
        let spawn_points = self.current_map.as_ref().map(|m| m.spawn_points()).unwrap_or_default();
        let spawn_pos = spawn_points.first().copied().unwrap_or(Vec3::ZERO);

        let id = self.world.spawn();
        let mut state = EntityState::new(id, 1);
        state.position = spawn_pos;
        self.entities.insert(id, state);
        id
    }

    fn millis_since_start(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_millis() as u64
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = self.cfg.tick_dt();
        let mut next = tokio::time::Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.process_console_commands().await?;
        self.recv_datagrams().await?;
        self.check_timeouts();
        self.simulate(dt_sec);
        self.history.record_tick(self.tick, self.entities.values().cloned());
        if self.state == ServerState::Running {
            self.send_snapshots().await?;
        }
        self.tick += 1;
        Ok(())
    }

    async fn process_console_commands(&mut self) -> anyhow::Result<()> {
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            self.exec_console(&line)?;
        }
        Ok(())
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "map" => {
                if tokens.len() < 2 {
                    return Ok(vec!["Usage: map <mapname>".to_string()]);
                }
                match self.load_map(tokens[1]) {
                    Ok(()) => Ok(vec![format!("Map '{}' loaded", tokens[1])]),
                    Err(e) => Ok(vec![format!("Failed to load map: {}", e)]),
                }
            }
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Server state: {:?}", self.state));
                out.push(format!("Tick: {}", self.tick));
                if let Some(ref map) = self.current_map {
                    out.push(format!("Map: {}", map.name));
                }
                out.push(format!("Clients: {}", self.clients.len()));
                for client in self.clients.values() {
                    out.push(format!(
                        "  {:?}: addr={} state={:?} entity={:?}",
                        client.client_id,
                        client.addr,
                        client.fsm.state(),
                        client.player_entity,
                    ));
                }
                Ok(out)
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                std::process::exit(0);
            }
            _ => self.console.exec(line),
        }
    }

    async fn recv_datagrams(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; wire::MAX_DATAGRAM_BYTES];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((n, from)) => self.handle_datagram(from, &buf[..n]).await,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv"),
            }
        }
        Ok(())
    }

    async fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        let (header, messages) = match wire::decode_datagram(bytes) {
            Ok(pair) => pair,
            Err(e) => {
                self.diagnostics.record_decode_error();
                debug!(%from, error = %e, "Dropped malformed datagram");
                return;
            }
        };

        let now = Instant::now();
        let record = self.clients.entry(from).or_insert_with(|| ClientRecord::new(from, now));
        record.last_seen = now;

        let acked_seqs = transport::acked_seqs_from_header(&header);
        if record.transport.on_receive_header(&header) == ReceiveOutcome::Duplicate {
            self.diagnostics.record_duplicate_datagram();
            return;
        }
        self.advance_baseline(from, &acked_seqs);

        for message in messages {
            self.handle_message(from, message, now).await;
        }
    }

    fn advance_baseline(&mut self, from: SocketAddr, acked_seqs: &[u16]) {
        let Some(record) = self.clients.get_mut(&from) else { return };
        let newly_acked_tick = acked_seqs
            .iter()
            .filter_map(|seq| record.snapshot_seq_map.get(seq).copied())
            .max();
        if let Some(tick) = newly_acked_tick {
            if tick > record.baseline_tick {
                if record.baseline_table(tick).is_some() {
                    record.promote_baseline(tick);
                } else {
                    // Baseline fell out of the retained window; fall back to a full snapshot.
                    record.baseline_tick = 0;
                }
            }
        }
    }

    async fn handle_message(&mut self, from: SocketAddr, message: Message, now: Instant) {
        match message {
            Message::Handshake { .. } => {
                let Some(record) = self.clients.get_mut(&from) else { return };
                if record.fsm.state() == ConnState::Disconnected {
                    let _ = record.fsm.apply(ConnEvent::HandshakeSent);
                }
                if record.fsm.state() == ConnState::Connecting {
                    let _ = record.fsm.apply(ConnEvent::HandshakeAccepted);
                }
                self.send_single(from, Message::HandshakeAck { accepted: true }).await;
            }
            Message::Auth { credentials } => {
                self.handle_auth(from, credentials).await;
            }
            Message::InputFrame(bundle) => {
                self.handle_input(from, bundle, now);
            }
            Message::ClockPing { t_send } => {
                let t_recv = self.millis_since_start(now);
                self.send_single(from, Message::ClockPong { t_send, t_recv }).await;
            }
            Message::Disconnect { reason } => {
                info!(%from, ?reason, "Client disconnected");
                if let Some(record) = self.clients.get_mut(&from) {
                    let _ = record.fsm.apply(ConnEvent::RemoteDisconnected);
                }
                self.remove_client(from);
            }
            Message::Reliable { reliable_id, payload } => {
                let Some(record) = self.clients.get_mut(&from) else { return };
                let (_, ready) = record.transport.receive_reliable(reliable_id, Message::Reliable { reliable_id, payload });
                for msg in ready {
                    debug!(%from, ?msg, "Reliable message delivered");
                }
            }
            other => {
                debug!(%from, ?other, "Unexpected message from client");
            }
        }
    }

    async fn handle_auth(&mut self, from: SocketAddr, credentials: Vec<u8>) {
        let accepted = !credentials.is_empty();
        let client_id = if accepted {
            Some(ClientId::new_unique())
        } else {
            None
        };

        let player_entity = if accepted { Some(self.spawn_player()) } else { None };

        let Some(record) = self.clients.get_mut(&from) else { return };
        if record.fsm.state() != ConnState::Authenticating {
            // Tolerate a retried Auth before the handshake ack round-trips.
            let _ = record.fsm.apply(ConnEvent::HandshakeSent);
            let _ = record.fsm.apply(ConnEvent::HandshakeAccepted);
        }

        if accepted {
            let id = client_id.unwrap();
            let entity = player_entity.unwrap();
            record.client_id = Some(id);
            record.player_entity = entity;
            self.client_addrs.insert(id, from);
            let _ = record.fsm.apply(ConnEvent::AuthSucceeded);
            info!(%from, client_id = ?id, entity = ?entity, "Client authenticated");
            self.send_single(from, Message::AuthResult { accepted: true, client_id: id, entity_id: entity }).await;
        } else {
            let _ = record.fsm.apply(ConnEvent::AuthRejected);
            warn!(%from, "Client auth rejected: empty credentials");
            self.send_single(from, Message::AuthResult { accepted: false, client_id: ClientId(0), entity_id: EntityId::NONE }).await;
            self.remove_client(from);
        }
    }

    fn handle_input(&mut self, from: SocketAddr, bundle: InputBundle, now: Instant) {
        let Some(record) = self.clients.get_mut(&from) else { return };
        if !record.fsm.is_connected() {
            return;
        }

        if now.duration_since(record.input_window_start) >= Duration::from_secs(1) {
            record.input_window_start = now;
            record.inputs_this_window = 0;
        }

        for frame in bundle.frames {
            if frame.sequence <= record.last_processed_input || record.pending_inputs.contains_key(&frame.sequence) {
                continue; // stale or already-queued redundant copy
            }

            if frame.buttons & !KNOWN_BUTTONS_MASK != 0 {
                record.protocol_error_count += 1;
                if record.protocol_error_count > self.cfg.protocol_error_threshold {
                    record.fsm.force_disconnect(DisconnectReason::ProtocolError);
                }
                continue;
            }

            if record.inputs_this_window >= self.cfg.max_inputs_per_second {
                self.diagnostics.record_rate_limit_drop();
                continue; // rate limited, silently drop
            }
            record.inputs_this_window += 1;

            let mut frame = frame;
            if frame.mv.len() > MAX_WISH_MAGNITUDE {
                record.suspicion_count += 1;
                frame.mv = frame.mv.scale(1.0 / frame.mv.len().max(1e-6));
            }

            record.pending_inputs.insert(frame.sequence, frame);
        }

        if record.suspicion_count > self.cfg.suspicion_threshold {
            record.fsm.force_disconnect(DisconnectReason::Cheat);
        }
    }

    fn check_timeouts(&mut self) {
        let now = Instant::now();
        let timeout = Duration::from_millis(self.cfg.connection_timeout_ms as u64);
        let mut to_remove = Vec::new();
        for (addr, record) in &mut self.clients {
            if record.fsm.state() == ConnState::Disconnecting {
                let _ = record.fsm.apply(ConnEvent::DrainComplete);
                to_remove.push(*addr);
                continue;
            }
            if now.duration_since(record.last_seen) >= timeout && record.fsm.state() != ConnState::Disconnected {
                let _ = record.fsm.apply(ConnEvent::TimedOut);
                warn!(addr = %addr, "Client timed out");
            }
        }
        for addr in to_remove {
            self.remove_client(addr);
        }
    }

    fn remove_client(&mut self, addr: SocketAddr) {
        if let Some(record) = self.clients.remove(&addr) {
            if let Some(id) = record.client_id {
                self.client_addrs.remove(&id);
            }
            if !record.player_entity.is_none() {
                self.entities.remove(&record.player_entity);
                self.history.forget(record.player_entity);
            }
        }
    }

    /// Advances simulation by one input (if available) per connected client.
    fn simulate(&mut self, dt_sec: f32) {
        for record in self.clients.values_mut() {
            if !record.fsm.is_connected() || record.player_entity.is_none() {
                continue;
            }

            let input = record.pending_inputs.iter().next().map(|(seq, frame)| (*seq, *frame));
            let wish = match input {
                Some((seq, frame)) => {
                    record.pending_inputs.remove(&seq);
                    record.last_processed_input = seq;
                    Some(frame)
                }
                None => None,
            };

            let Some(state) = self.entities.get_mut(&record.player_entity) else { continue };
            let wish_vec = wish.map(|f| f.mv).unwrap_or(Vec3::ZERO);
            integrate(state, wish_vec, dt_sec);

            if let Some(frame) = wish {
                if state.position.sub(frame.reported_pos).len() > MOVE_TOLERANCE_M {
                    record.suspicion_count += 1;
                    if record.suspicion_count > self.cfg.suspicion_threshold {
                        record.fsm.force_disconnect(DisconnectReason::Cheat);
                    }
                }
                if let Some(yaw_pitch_rotation) = Some(Vec3::new(frame.look_pitch, frame.look_yaw, state.rotation.z)) {
                    state.rotation = yaw_pitch_rotation;
                }
            }
        }
    }

    async fn send_snapshots(&mut self) -> anyhow::Result<()> {
        let last_processed_input: HashMap<ClientId, u32> = self
            .clients
            .values()
            .filter_map(|c| c.client_id.map(|id| (id, c.last_processed_input)))
            .collect();

        let addrs: Vec<SocketAddr> = self.clients.keys().copied().collect();
        for addr in addrs {
            self.send_snapshot_to(addr, &last_processed_input).await?;
        }
        Ok(())
    }

    async fn send_snapshot_to(&mut self, addr: SocketAddr, last_processed_input: &HashMap<ClientId, u32>) -> anyhow::Result<()> {
        let now = Instant::now();
        let tick = self.tick;
        let entities = self.entities.clone();

        let Some(record) = self.clients.get_mut(&addr) else { return Ok(()) };
        if !record.fsm.is_connected() {
            return Ok(());
        }

        let viewpoint = entities.get(&record.player_entity).map(|s| s.position).unwrap_or(Vec3::ZERO);

        let mut snapshot = if record.baseline_tick == 0 {
            state::encode_full(tick, &entities, last_processed_input.clone())
        } else {
            let baseline = record.baseline_table(record.baseline_tick).cloned().unwrap_or_default();
            state::encode_delta(record.baseline_tick, tick, &baseline, &entities, last_processed_input.clone())
        };
        state::prioritize_and_truncate(&mut snapshot, viewpoint, MAX_SNAPSHOT_ENTITIES);

        let reliable_due = record.transport.drain_reliable_for_send(now, Duration::from_millis(100));
        for (id, _) in &reliable_due {
            if record.transport.is_retransmit(*id) {
                self.diagnostics.record_retransmit();
            }
        }
        let reliable_ids: Vec<u32> = reliable_due.iter().map(|(id, _)| *id).collect();
        let mut messages: Vec<Message> = reliable_due.into_iter().map(|(_, msg)| msg).collect();
        messages.push(if snapshot.is_full() {
            Message::SnapshotFull(snapshot.clone())
        } else {
            Message::SnapshotDelta(snapshot.clone())
        });

        let header = record.transport.build_header(PROTOCOL_VERSION, 0, &reliable_ids, now);

        match wire::encode_datagram(&header, &messages) {
            Ok(bytes) => {
                record.snapshot_seq_map.insert(header.peer_seq, tick);
                // Baseline promotion waits for the client to ack this datagram
                // (see `advance_baseline`); just retain the table so that ack,
                // whenever it arrives, can find it.
                record.retain_snapshot(tick, &entities);
                self.socket.send_to(&bytes, addr).await.context("udp send snapshot")?;
            }
            Err(DecodeError::TooLarge) => {
                warn!(%addr, "Snapshot too large even after truncation, skipping this tick");
            }
            Err(e) => warn!(%addr, error = %e, "Failed to encode snapshot"),
        }
        Ok(())
    }

    async fn send_single(&mut self, addr: SocketAddr, message: Message) {
        let now = Instant::now();
        let Some(record) = self.clients.get_mut(&addr) else { return };
        let header = record.transport.build_header(PROTOCOL_VERSION, 0, &[], now);
        match wire::encode_datagram(&header, &[message]) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, addr).await {
                    warn!(%addr, error = %e, "Failed to send datagram");
                }
            }
            Err(e) => warn!(%addr, error = %e, "Failed to encode datagram"),
        }
    }
}

fn integrate(state: &mut EntityState, wish: Vec3, dt: f32) {
    state.position = state.position.add(state.velocity.scale(dt));
    state.velocity = state.velocity.add(wish.scale(PLAYER_ACCELERATION * dt));
    state.velocity = state.velocity.scale((1.0 - FRICTION * dt).max(0.0));
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, EngineConfig)> {
    let cfg = EngineConfig {
        server_addr: "127.0.0.1:0".to_string(),
        tick_hz,
        ..Default::default()
    };
    let mut server = GameServer::new(cfg.clone(), PathBuf::from("maps")).await?;
    let addr = server.local_addr()?;
    server.cfg.server_addr = addr.to_string();
    server.state = ServerState::Running; // tests assume running without a loaded map
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_shared::wire::{decode_datagram, encode_datagram};

    #[tokio::test]
    async fn handshake_then_auth_reaches_connected() {
        let (mut server, _cfg) = bind_ephemeral(60).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();

        let mut transport = Transport::new();
        let header = transport.build_header(PROTOCOL_VERSION, 0, &[], Instant::now());
        let bytes = encode_datagram(&header, &[Message::Handshake { client_capability_flags: 0 }]).unwrap();
        client.send(&bytes).await.unwrap();
        server.recv_datagrams().await.unwrap();

        let mut buf = vec![0u8; 1200];
        let n = client.recv(&mut buf).await.unwrap();
        let (_, msgs) = decode_datagram(&buf[..n]).unwrap();
        assert!(matches!(msgs[0], Message::HandshakeAck { accepted: true }));

        let header = transport.build_header(PROTOCOL_VERSION, 0, &[], Instant::now());
        let bytes = encode_datagram(&header, &[Message::Auth { credentials: vec![1, 2, 3] }]).unwrap();
        client.send(&bytes).await.unwrap();
        server.recv_datagrams().await.unwrap();

        let n = client.recv(&mut buf).await.unwrap();
        let (_, msgs) = decode_datagram(&buf[..n]).unwrap();
        match &msgs[0] {
            Message::AuthResult { accepted, .. } => assert!(*accepted),
            other => panic!("expected AuthResult, got {other:?}"),
        }

        assert_eq!(server.clients.len(), 1);
        let record = server.clients.values().next().unwrap();
        assert_eq!(record.fsm.state(), ConnState::Connected);
        assert!(!record.player_entity.is_none());
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected() {
        let (mut server, _cfg) = bind_ephemeral(60).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();

        let mut transport = Transport::new();
        let header = transport.build_header(PROTOCOL_VERSION, 0, &[], Instant::now());
        let bytes = encode_datagram(&header, &[Message::Auth { credentials: vec![] }]).unwrap();
        client.send(&bytes).await.unwrap();
        server.recv_datagrams().await.unwrap();

        let mut buf = vec![0u8; 1200];
        let n = client.recv(&mut buf).await.unwrap();
        let (_, msgs) = decode_datagram(&buf[..n]).unwrap();
        match &msgs[0] {
            Message::AuthResult { accepted, .. } => assert!(!accepted),
            other => panic!("expected AuthResult, got {other:?}"),
        }
        assert!(server.clients.is_empty());
    }

    #[tokio::test]
    async fn input_frame_moves_player_entity() {
        let (mut server, _cfg) = bind_ephemeral(60).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();

        let mut transport = Transport::new();
        for msg in [
            Message::Handshake { client_capability_flags: 0 },
            Message::Auth { credentials: vec![9] },
        ] {
            let header = transport.build_header(PROTOCOL_VERSION, 0, &[], Instant::now());
            let bytes = encode_datagram(&header, &[msg]).unwrap();
            client.send(&bytes).await.unwrap();
            server.recv_datagrams().await.unwrap();
            let mut buf = vec![0u8; 1200];
            let _ = client.recv(&mut buf).await.unwrap();
        }

        let entity = server.clients.values().next().unwrap().player_entity;
        let before = server.entities[&entity].position;

        let header = transport.build_header(PROTOCOL_VERSION, 0, &[], Instant::now());
        let bundle = InputBundle {
            tick: 0,
            frames: vec![WireInputFrame {
                sequence: 1,
                mv: Vec3::new(1.0, 0.0, 0.0),
                look_yaw: 0.0,
                look_pitch: 0.0,
                buttons: 0,
                reported_pos: before,
            }],
        };
        let bytes = encode_datagram(&header, &[Message::InputFrame(bundle)]).unwrap();
        client.send(&bytes).await.unwrap();
        server.recv_datagrams().await.unwrap();
        server.simulate(1.0 / 60.0);

        let after = server.entities[&entity].position;
        assert!(after.x > before.x || after.len() >= before.len());
    }

    #[tokio::test]
    async fn unknown_buttons_increment_protocol_error_count() {
        let (mut server, _cfg) = bind_ephemeral(60).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();

        let mut transport = Transport::new();
        for msg in [
            Message::Handshake { client_capability_flags: 0 },
            Message::Auth { credentials: vec![9] },
        ] {
            let header = transport.build_header(PROTOCOL_VERSION, 0, &[], Instant::now());
            let bytes = encode_datagram(&header, &[msg]).unwrap();
            client.send(&bytes).await.unwrap();
            server.recv_datagrams().await.unwrap();
            let mut buf = vec![0u8; 1200];
            let _ = client.recv(&mut buf).await.unwrap();
        }

        let header = transport.build_header(PROTOCOL_VERSION, 0, &[], Instant::now());
        let bundle = InputBundle {
            tick: 0,
            frames: vec![WireInputFrame {
                sequence: 1,
                mv: Vec3::ZERO,
                look_yaw: 0.0,
                look_pitch: 0.0,
                buttons: 1 << 30,
                reported_pos: Vec3::ZERO,
            }],
        };
        let bytes = encode_datagram(&header, &[Message::InputFrame(bundle)]).unwrap();
        client.send(&bytes).await.unwrap();
        server.recv_datagrams().await.unwrap();

        let record = server.clients.values().next().unwrap();
        assert_eq!(record.protocol_error_count, 1);
        assert!(record.pending_inputs.is_empty());
    }
}
