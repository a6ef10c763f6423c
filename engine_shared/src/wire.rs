//! Binary wire codec for the UDP datagram protocol.
//!
//! Fixed-endian, length-prefixed binary framing over a single UDP datagram.
//! Pure in both directions: no I/O, no allocation beyond the scratch buffer
//! the caller hands in. Every decode path returns a classified [`DecodeError`]
//! instead of panicking on malformed input.
//!
//! Header layout:
//! ```text
//! magic:u16 | version:u8 | flags:u8 | peer_seq:u16 | peer_ack:u16
//! ack_bits:u32 | payload_len:u16 | payload:bytes
//! ```
//! `payload` is zero or more `type:u8 | len:u16 | body:bytes[len]` messages.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ecs::EntityId;
use crate::math::{dequantize_mm, quantize_mm, Vec3};
use crate::net::ClientId;
use crate::state::{EntityDelta, Snapshot};

/// `"Gz"` — a nod to the Doom-engine lineage this protocol descends from.
pub const MAGIC: u16 = 0x477A;
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum payload bytes after the fixed 14-byte header (1200 bytes total per datagram).
pub const MAX_DATAGRAM_BYTES: usize = 1200;
pub const HEADER_BYTES: usize = 14;
pub const MAX_PAYLOAD_BYTES: usize = MAX_DATAGRAM_BYTES - HEADER_BYTES;

pub const FLAG_COMPRESSED: u8 = 1 << 0;
pub const FLAG_ENCRYPTED: u8 = 1 << 1;

/// Classified decode failure. Never panics the caller; the transport layer
/// counts these toward a peer's protocol-error disconnect threshold.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram shorter than the fixed header")]
    Truncated,
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("payload_len {declared} does not match remaining {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("message body truncated for type {msg_type}")]
    MessageTruncated { msg_type: u8 },
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("message field out of range: {0}")]
    FieldOutOfRange(&'static str),
    #[error("datagram exceeds max size of {MAX_DATAGRAM_BYTES} bytes")]
    TooLarge,
}

impl From<io::Error> for DecodeError {
    fn from(_: io::Error) -> Self {
        DecodeError::Truncated
    }
}

/// The fixed per-datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
    pub peer_seq: u16,
    pub peer_ack: u16,
    pub ack_bits: u32,
}

impl Header {
    pub fn compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
    pub fn encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// One logical message, tagged by its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Handshake { client_capability_flags: u32 },
    HandshakeAck { accepted: bool },
    Auth { credentials: Vec<u8> },
    AuthResult { accepted: bool, client_id: ClientId, entity_id: EntityId },
    InputFrame(InputBundle),
    SnapshotFull(Snapshot),
    SnapshotDelta(Snapshot),
    /// `reliable_id` is the sender's per-peer monotonic id for this
    /// message, used by the receiver to dedupe and reorder independent of
    /// which `peer_seq` ultimately carried it (retransmits reuse the id).
    Reliable { reliable_id: u32, payload: ReliablePayload },
    ClockPing { t_send: u64 },
    ClockPong { t_send: u64, t_recv: u64 },
    Disconnect { reason: DisconnectReason },
    ScriptRpc { reliable_id: u32, channel: u8, payload: Vec<u8> },
    VarSync { reliable_id: u32, key: String, value: Vec<u8> },
}

/// Reason codes for a `Disconnect` message, exposed to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    ClientQuit = 0,
    ServerFull = 1,
    Cheat = 2,
    ProtocolError = 3,
    Timeout = 4,
    AuthRejected = 5,
}

impl DisconnectReason {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::ClientQuit,
            1 => Self::ServerFull,
            2 => Self::Cheat,
            3 => Self::ProtocolError,
            4 => Self::Timeout,
            5 => Self::AuthRejected,
            _ => return None,
        })
    }
}

/// Opaque reliable-lane sub-messages the core does not interpret: chat text
/// and mod/script events ride here untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ReliablePayload {
    Chat { from: ClientId, text: String },
    ModEvent { payload: Vec<u8> },
}

/// One client input sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireInputFrame {
    pub sequence: u32,
    pub mv: Vec3,
    pub look_yaw: f32,
    pub look_pitch: f32,
    pub buttons: u32,
    pub reported_pos: Vec3,
}

/// The redundant tail of recent input frames sent in one datagram (default
/// redundancy 3, hard cap 8 per the wire format).
#[derive(Debug, Clone, PartialEq)]
pub struct InputBundle {
    pub tick: u32,
    pub frames: Vec<WireInputFrame>,
}

pub const MAX_INPUT_FRAMES_PER_BUNDLE: usize = 8;

/// Message type tags.
mod msg_type {
    pub const HANDSHAKE: u8 = 0;
    pub const HANDSHAKE_ACK: u8 = 1;
    pub const AUTH: u8 = 2;
    pub const AUTH_RESULT: u8 = 3;
    pub const INPUT_FRAME: u8 = 4;
    pub const SNAPSHOT_FULL: u8 = 5;
    pub const SNAPSHOT_DELTA: u8 = 6;
    pub const RELIABLE_MSG: u8 = 7;
    pub const CLOCK_PING: u8 = 8;
    pub const CLOCK_PONG: u8 = 9;
    pub const DISCONNECT: u8 = 10;
    pub const SCRIPT_RPC: u8 = 11;
    pub const VAR_SYNC: u8 = 12;
}

mod reliable_sub {
    pub const CHAT: u8 = 0;
    pub const MOD_EVENT: u8 = 1;
}

/// Encodes a full datagram: header + packed messages. Fails with
/// [`DecodeError::TooLarge`] (reused as the encode-side size error) if the
/// result would exceed [`MAX_DATAGRAM_BYTES`].
pub fn encode_datagram(header: &Header, messages: &[Message]) -> Result<Vec<u8>, DecodeError> {
    let mut payload = Vec::with_capacity(256);
    for m in messages {
        encode_message(&mut payload, m)?;
    }
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(DecodeError::TooLarge);
    }

    let mut out = Vec::with_capacity(HEADER_BYTES + payload.len());
    out.write_u16::<LittleEndian>(MAGIC).unwrap();
    out.write_u8(header.version).unwrap();
    out.write_u8(header.flags).unwrap();
    out.write_u16::<LittleEndian>(header.peer_seq).unwrap();
    out.write_u16::<LittleEndian>(header.peer_ack).unwrap();
    out.write_u32::<LittleEndian>(header.ack_bits).unwrap();
    out.write_u16::<LittleEndian>(payload.len() as u16).unwrap();
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes a full datagram into its header and messages.
pub fn decode_datagram(bytes: &[u8]) -> Result<(Header, Vec<Message>), DecodeError> {
    if bytes.len() > MAX_DATAGRAM_BYTES {
        return Err(DecodeError::TooLarge);
    }
    if bytes.len() < HEADER_BYTES {
        return Err(DecodeError::Truncated);
    }
    let mut cur = Cursor::new(bytes);
    let magic = cur.read_u16::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version = cur.read_u8()?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let flags = cur.read_u8()?;
    let peer_seq = cur.read_u16::<LittleEndian>()?;
    let peer_ack = cur.read_u16::<LittleEndian>()?;
    let ack_bits = cur.read_u32::<LittleEndian>()?;
    let payload_len = cur.read_u16::<LittleEndian>()? as usize;

    let remaining = bytes.len() - cur.position() as usize;
    if payload_len != remaining {
        return Err(DecodeError::LengthMismatch {
            declared: payload_len,
            actual: remaining,
        });
    }

    let header = Header {
        version,
        flags,
        peer_seq,
        peer_ack,
        ack_bits,
    };

    let mut messages = Vec::new();
    while (cur.position() as usize) < bytes.len() {
        messages.push(decode_message(&mut cur)?);
    }
    Ok((header, messages))
}

fn encode_message(out: &mut Vec<u8>, msg: &Message) -> Result<(), DecodeError> {
    let mut body = Vec::new();
    let ty = match msg {
        Message::Handshake { client_capability_flags } => {
            body.write_u32::<LittleEndian>(*client_capability_flags).unwrap();
            msg_type::HANDSHAKE
        }
        Message::HandshakeAck { accepted } => {
            body.write_u8(*accepted as u8).unwrap();
            msg_type::HANDSHAKE_ACK
        }
        Message::Auth { credentials } => {
            write_bytes(&mut body, credentials)?;
            msg_type::AUTH
        }
        Message::AuthResult { accepted, client_id, entity_id } => {
            body.write_u8(*accepted as u8).unwrap();
            body.write_u32::<LittleEndian>(client_id.0).unwrap();
            body.write_u32::<LittleEndian>(entity_id.0).unwrap();
            msg_type::AUTH_RESULT
        }
        Message::InputFrame(bundle) => {
            encode_input_bundle(&mut body, bundle)?;
            msg_type::INPUT_FRAME
        }
        Message::SnapshotFull(snap) => {
            encode_snapshot(&mut body, snap)?;
            msg_type::SNAPSHOT_FULL
        }
        Message::SnapshotDelta(snap) => {
            encode_snapshot(&mut body, snap)?;
            msg_type::SNAPSHOT_DELTA
        }
        Message::Reliable { reliable_id, payload } => {
            body.write_u32::<LittleEndian>(*reliable_id).unwrap();
            encode_reliable(&mut body, payload)?;
            msg_type::RELIABLE_MSG
        }
        Message::ClockPing { t_send } => {
            body.write_u64::<LittleEndian>(*t_send).unwrap();
            msg_type::CLOCK_PING
        }
        Message::ClockPong { t_send, t_recv } => {
            body.write_u64::<LittleEndian>(*t_send).unwrap();
            body.write_u64::<LittleEndian>(*t_recv).unwrap();
            msg_type::CLOCK_PONG
        }
        Message::Disconnect { reason } => {
            body.write_u8(*reason as u8).unwrap();
            msg_type::DISCONNECT
        }
        Message::ScriptRpc { reliable_id, channel, payload } => {
            body.write_u32::<LittleEndian>(*reliable_id).unwrap();
            body.write_u8(*channel).unwrap();
            write_bytes(&mut body, payload)?;
            msg_type::SCRIPT_RPC
        }
        Message::VarSync { reliable_id, key, value } => {
            body.write_u32::<LittleEndian>(*reliable_id).unwrap();
            write_string(&mut body, key)?;
            write_bytes(&mut body, value)?;
            msg_type::VAR_SYNC
        }
    };

    if body.len() > u16::MAX as usize {
        return Err(DecodeError::TooLarge);
    }
    out.write_u8(ty).unwrap();
    out.write_u16::<LittleEndian>(body.len() as u16).unwrap();
    out.extend_from_slice(&body);
    Ok(())
}

fn decode_message(cur: &mut Cursor<&[u8]>) -> Result<Message, DecodeError> {
    let ty = cur.read_u8()?;
    let len = cur.read_u16::<LittleEndian>()? as usize;
    let start = cur.position() as usize;
    let buf = *cur.get_ref();
    if start + len > buf.len() {
        return Err(DecodeError::MessageTruncated { msg_type: ty });
    }
    let body = &buf[start..start + len];
    cur.set_position((start + len) as u64);

    let mut b = Cursor::new(body);
    let msg = match ty {
        msg_type::HANDSHAKE => Message::Handshake {
            client_capability_flags: b.read_u32::<LittleEndian>()?,
        },
        msg_type::HANDSHAKE_ACK => Message::HandshakeAck {
            accepted: b.read_u8()? != 0,
        },
        msg_type::AUTH => Message::Auth {
            credentials: read_bytes(&mut b)?,
        },
        msg_type::AUTH_RESULT => Message::AuthResult {
            accepted: b.read_u8()? != 0,
            client_id: ClientId(b.read_u32::<LittleEndian>()?),
            entity_id: EntityId(b.read_u32::<LittleEndian>()?),
        },
        msg_type::INPUT_FRAME => Message::InputFrame(decode_input_bundle(&mut b)?),
        msg_type::SNAPSHOT_FULL => Message::SnapshotFull(decode_snapshot(&mut b, true)?),
        msg_type::SNAPSHOT_DELTA => Message::SnapshotDelta(decode_snapshot(&mut b, false)?),
        msg_type::RELIABLE_MSG => Message::Reliable {
            reliable_id: b.read_u32::<LittleEndian>()?,
            payload: decode_reliable(&mut b)?,
        },
        msg_type::CLOCK_PING => Message::ClockPing {
            t_send: b.read_u64::<LittleEndian>()?,
        },
        msg_type::CLOCK_PONG => Message::ClockPong {
            t_send: b.read_u64::<LittleEndian>()?,
            t_recv: b.read_u64::<LittleEndian>()?,
        },
        msg_type::DISCONNECT => {
            let code = b.read_u8()?;
            Message::Disconnect {
                reason: DisconnectReason::from_u8(code)
                    .ok_or(DecodeError::FieldOutOfRange("disconnect reason"))?,
            }
        }
        msg_type::SCRIPT_RPC => Message::ScriptRpc {
            reliable_id: b.read_u32::<LittleEndian>()?,
            channel: b.read_u8()?,
            payload: read_bytes(&mut b)?,
        },
        msg_type::VAR_SYNC => Message::VarSync {
            reliable_id: b.read_u32::<LittleEndian>()?,
            key: read_string(&mut b)?,
            value: read_bytes(&mut b)?,
        },
        other => return Err(DecodeError::UnknownMessageType(other)),
    };
    Ok(msg)
}

fn encode_input_bundle(out: &mut Vec<u8>, bundle: &InputBundle) -> Result<(), DecodeError> {
    if bundle.frames.len() > MAX_INPUT_FRAMES_PER_BUNDLE {
        return Err(DecodeError::FieldOutOfRange("num_frames"));
    }
    out.write_u32::<LittleEndian>(bundle.tick).unwrap();
    out.write_u8(bundle.frames.len() as u8).unwrap();
    for f in &bundle.frames {
        out.write_u32::<LittleEndian>(f.sequence).unwrap();
        out.write_f32::<LittleEndian>(f.mv.x).unwrap();
        out.write_f32::<LittleEndian>(f.mv.y).unwrap();
        out.write_f32::<LittleEndian>(f.mv.z).unwrap();
        out.write_f32::<LittleEndian>(f.look_yaw).unwrap();
        out.write_f32::<LittleEndian>(f.look_pitch).unwrap();
        out.write_u32::<LittleEndian>(f.buttons).unwrap();
        out.write_f32::<LittleEndian>(f.reported_pos.x).unwrap();
        out.write_f32::<LittleEndian>(f.reported_pos.y).unwrap();
        out.write_f32::<LittleEndian>(f.reported_pos.z).unwrap();
    }
    Ok(())
}

fn decode_input_bundle(b: &mut Cursor<&[u8]>) -> Result<InputBundle, DecodeError> {
    let tick = b.read_u32::<LittleEndian>()?;
    let n = b.read_u8()? as usize;
    if n > MAX_INPUT_FRAMES_PER_BUNDLE {
        return Err(DecodeError::FieldOutOfRange("num_frames"));
    }
    let mut frames = Vec::with_capacity(n);
    for _ in 0..n {
        let sequence = b.read_u32::<LittleEndian>()?;
        let mv = Vec3::new(
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
        );
        let look_yaw = b.read_f32::<LittleEndian>()?;
        let look_pitch = b.read_f32::<LittleEndian>()?;
        let buttons = b.read_u32::<LittleEndian>()?;
        let reported_pos = Vec3::new(
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
        );
        frames.push(WireInputFrame {
            sequence,
            mv,
            look_yaw,
            look_pitch,
            buttons,
            reported_pos,
        });
    }
    Ok(InputBundle { tick, frames })
}

fn encode_snapshot(out: &mut Vec<u8>, snap: &Snapshot) -> Result<(), DecodeError> {
    out.write_u32::<LittleEndian>(snap.tick).unwrap();
    out.write_u32::<LittleEndian>(snap.baseline_tick).unwrap();

    if snap.entities.len() > u16::MAX as usize {
        return Err(DecodeError::FieldOutOfRange("num_changed"));
    }
    out.write_u16::<LittleEndian>(snap.entities.len() as u16).unwrap();
    for d in &snap.entities {
        encode_entity_delta(out, d)?;
    }

    if snap.removed.len() > u16::MAX as usize {
        return Err(DecodeError::FieldOutOfRange("num_removed"));
    }
    out.write_u16::<LittleEndian>(snap.removed.len() as u16).unwrap();
    for id in &snap.removed {
        out.write_u32::<LittleEndian>(id.0).unwrap();
    }

    if snap.last_processed_input.len() > u8::MAX as usize {
        return Err(DecodeError::FieldOutOfRange("num_clients"));
    }
    out.write_u8(snap.last_processed_input.len() as u8).unwrap();
    let mut clients: Vec<(&ClientId, &u32)> = snap.last_processed_input.iter().collect();
    clients.sort_by_key(|(id, _)| id.0);
    for (client_id, seq) in clients {
        if client_id.0 > u16::MAX as u32 {
            return Err(DecodeError::FieldOutOfRange("client_id"));
        }
        out.write_u16::<LittleEndian>(client_id.0 as u16).unwrap();
        out.write_u32::<LittleEndian>(*seq).unwrap();
    }
    Ok(())
}

fn decode_snapshot(b: &mut Cursor<&[u8]>, expect_full: bool) -> Result<Snapshot, DecodeError> {
    let tick = b.read_u32::<LittleEndian>()?;
    let baseline_tick = b.read_u32::<LittleEndian>()?;
    if expect_full && baseline_tick != 0 {
        return Err(DecodeError::FieldOutOfRange("baseline_tick"));
    }

    let num_changed = b.read_u16::<LittleEndian>()? as usize;
    let mut entities = Vec::with_capacity(num_changed);
    for _ in 0..num_changed {
        entities.push(decode_entity_delta(b)?);
    }

    let num_removed = b.read_u16::<LittleEndian>()? as usize;
    let mut removed = Vec::with_capacity(num_removed);
    for _ in 0..num_removed {
        removed.push(EntityId(b.read_u32::<LittleEndian>()?));
    }

    let num_clients = b.read_u8()? as usize;
    let mut last_processed_input = HashMap::with_capacity(num_clients);
    for _ in 0..num_clients {
        let client_id = ClientId(b.read_u16::<LittleEndian>()? as u32);
        let seq = b.read_u32::<LittleEndian>()?;
        last_processed_input.insert(client_id, seq);
    }

    Ok(Snapshot {
        tick,
        baseline_tick,
        entities,
        removed,
        last_processed_input,
    })
}

fn encode_entity_delta(out: &mut Vec<u8>, d: &EntityDelta) -> Result<(), DecodeError> {
    out.write_u32::<LittleEndian>(d.id.0).unwrap();
    out.write_u32::<LittleEndian>(d.field_mask).unwrap();
    use crate::state::FieldMask;
    if d.field_mask & FieldMask::KIND != 0 {
        out.write_u16::<LittleEndian>(d.kind.unwrap_or(0)).unwrap();
    }
    if d.field_mask & FieldMask::POSITION != 0 {
        let p = d.position.unwrap_or(Vec3::ZERO);
        out.write_i32::<LittleEndian>(quantize_mm(p.x)).unwrap();
        out.write_i32::<LittleEndian>(quantize_mm(p.y)).unwrap();
        out.write_i32::<LittleEndian>(quantize_mm(p.z)).unwrap();
    }
    if d.field_mask & FieldMask::VELOCITY != 0 {
        let v = d.velocity.unwrap_or(Vec3::ZERO);
        out.write_f32::<LittleEndian>(v.x).unwrap();
        out.write_f32::<LittleEndian>(v.y).unwrap();
        out.write_f32::<LittleEndian>(v.z).unwrap();
    }
    if d.field_mask & FieldMask::ROTATION != 0 {
        let r = d.rotation.unwrap_or(Vec3::ZERO);
        out.write_f32::<LittleEndian>(r.x).unwrap();
        out.write_f32::<LittleEndian>(r.y).unwrap();
        out.write_f32::<LittleEndian>(r.z).unwrap();
    }
    if d.field_mask & FieldMask::FLAGS != 0 {
        out.write_u32::<LittleEndian>(d.flags.unwrap_or(0)).unwrap();
    }
    if d.field_mask & FieldMask::EXTRA != 0 {
        write_bytes(out, d.extra.as_deref().unwrap_or(&[]))?;
    }
    Ok(())
}

fn decode_entity_delta(b: &mut Cursor<&[u8]>) -> Result<EntityDelta, DecodeError> {
    use crate::state::FieldMask;
    let id = EntityId(b.read_u32::<LittleEndian>()?);
    let field_mask = b.read_u32::<LittleEndian>()?;

    let kind = if field_mask & FieldMask::KIND != 0 {
        Some(b.read_u16::<LittleEndian>()?)
    } else {
        None
    };
    let position = if field_mask & FieldMask::POSITION != 0 {
        Some(Vec3::new(
            dequantize_mm(b.read_i32::<LittleEndian>()?),
            dequantize_mm(b.read_i32::<LittleEndian>()?),
            dequantize_mm(b.read_i32::<LittleEndian>()?),
        ))
    } else {
        None
    };
    let velocity = if field_mask & FieldMask::VELOCITY != 0 {
        Some(Vec3::new(
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
        ))
    } else {
        None
    };
    let rotation = if field_mask & FieldMask::ROTATION != 0 {
        Some(Vec3::new(
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
            b.read_f32::<LittleEndian>()?,
        ))
    } else {
        None
    };
    let flags = if field_mask & FieldMask::FLAGS != 0 {
        Some(b.read_u32::<LittleEndian>()?)
    } else {
        None
    };
    let extra = if field_mask & FieldMask::EXTRA != 0 {
        Some(read_bytes(b)?)
    } else {
        None
    };

    Ok(EntityDelta {
        id,
        field_mask,
        kind,
        position,
        velocity,
        rotation,
        flags,
        extra,
    })
}

fn encode_reliable(out: &mut Vec<u8>, payload: &ReliablePayload) -> Result<(), DecodeError> {
    match payload {
        ReliablePayload::Chat { from, text } => {
            out.write_u8(reliable_sub::CHAT).unwrap();
            out.write_u32::<LittleEndian>(from.0).unwrap();
            write_string(out, text)?;
        }
        ReliablePayload::ModEvent { payload } => {
            out.write_u8(reliable_sub::MOD_EVENT).unwrap();
            write_bytes(out, payload)?;
        }
    }
    Ok(())
}

fn decode_reliable(b: &mut Cursor<&[u8]>) -> Result<ReliablePayload, DecodeError> {
    let sub = b.read_u8()?;
    Ok(match sub {
        reliable_sub::CHAT => ReliablePayload::Chat {
            from: ClientId(b.read_u32::<LittleEndian>()?),
            text: read_string(b)?,
        },
        reliable_sub::MOD_EVENT => ReliablePayload::ModEvent {
            payload: read_bytes(b)?,
        },
        other => return Err(DecodeError::UnknownMessageType(other)),
    })
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() > u16::MAX as usize {
        return Err(DecodeError::FieldOutOfRange("byte blob too long"));
    }
    out.write_u16::<LittleEndian>(bytes.len() as u16).unwrap();
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_bytes(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>, DecodeError> {
    let len = cur.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<(), DecodeError> {
    write_bytes(out, s.as_bytes())
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String, DecodeError> {
    let bytes = read_bytes(cur)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::FieldOutOfRange("utf8 string"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{encode_full, EntityTable};

    fn header() -> Header {
        Header {
            version: PROTOCOL_VERSION,
            flags: 0,
            peer_seq: 7,
            peer_ack: 3,
            ack_bits: 0xFFFF_0000,
        }
    }

    #[test]
    fn header_roundtrip() {
        let bytes = encode_datagram(&header(), &[]).unwrap();
        let (h, msgs) = decode_datagram(&bytes).unwrap();
        assert_eq!(h, header());
        assert!(msgs.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode_datagram(&header(), &[]).unwrap();
        bytes[0] = 0xAB;
        assert_eq!(decode_datagram(&bytes).unwrap_err(), DecodeError::BadMagic(0x47AB));
    }

    #[test]
    fn rejects_truncated_datagram() {
        let bytes = encode_datagram(&header(), &[]).unwrap();
        assert_eq!(
            decode_datagram(&bytes[..5]).unwrap_err(),
            DecodeError::Truncated
        );
    }

    #[test]
    fn input_frame_message_roundtrip() {
        let bundle = InputBundle {
            tick: 42,
            frames: vec![WireInputFrame {
                sequence: 1,
                mv: Vec3::new(1.0, 0.0, -1.0),
                look_yaw: 0.5,
                look_pitch: -0.25,
                buttons: 0b101,
                reported_pos: Vec3::new(10.0, 20.0, 30.0),
            }],
        };
        let msg = Message::InputFrame(bundle.clone());
        let bytes = encode_datagram(&header(), &[msg.clone()]).unwrap();
        let (_, msgs) = decode_datagram(&bytes).unwrap();
        assert_eq!(msgs, vec![msg]);
    }

    #[test]
    fn snapshot_message_roundtrip_quantizes_position() {
        let mut table = EntityTable::new();
        table.insert(
            EntityId(1),
            crate::state::EntityState::new(EntityId(1), 2),
        );
        let snap = encode_full(9, &table, HashMap::new());
        let msg = Message::SnapshotFull(snap.clone());
        let bytes = encode_datagram(&header(), &[msg]).unwrap();
        let (_, msgs) = decode_datagram(&bytes).unwrap();
        match &msgs[0] {
            Message::SnapshotFull(decoded) => {
                assert_eq!(decoded.tick, snap.tick);
                assert_eq!(decoded.entities.len(), snap.entities.len());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn oversized_payload_is_rejected_at_encode() {
        let big = Message::ScriptRpc {
            reliable_id: 1,
            channel: 0,
            payload: vec![0u8; MAX_PAYLOAD_BYTES + 10],
        };
        assert_eq!(
            encode_datagram(&header(), &[big]).unwrap_err(),
            DecodeError::TooLarge
        );
    }

    #[test]
    fn unknown_message_type_is_classified() {
        let mut bytes = encode_datagram(&header(), &[Message::ClockPing { t_send: 1 }]).unwrap();
        // Corrupt the type byte of the single packed message (right after the header).
        bytes[HEADER_BYTES] = 0xFE;
        assert_eq!(
            decode_datagram(&bytes).unwrap_err(),
            DecodeError::UnknownMessageType(0xFE)
        );
    }
}
