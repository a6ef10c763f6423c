//! Transport: per-peer sequencing, acks, duplicate suppression, and the
//! reliable lane.
//!
//! Pure bookkeeping — no sockets here. The endpoint (`engine_client`/
//! `engine_server`) owns the actual `UdpSocket` and calls into a `Transport`
//! once per received/sent datagram to get sequence numbers, acks, and the set
//! of reliable messages that need (re)sending this tick.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::wire::{Header, Message};

/// Width of the duplicate-suppression / ack window.
const WINDOW: usize = 1024;
/// Number of prior sequence numbers covered by `ack_bits`.
const ACK_BITS_WIDTH: u16 = 32;

const MIN_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Fixed-size sequence-number presence buffer, indexed by `seq % WINDOW`.
/// A slot holding the requested sequence number means "already seen"; any
/// other contents (including an older, reused slot) means "not seen", which
/// both implements duplicate suppression and tolerates sequence wraparound.
#[derive(Debug)]
struct SeqWindow {
    slots: Vec<Option<u16>>,
}

impl SeqWindow {
    fn new() -> Self {
        Self {
            slots: vec![None; WINDOW],
        }
    }

    /// Returns `true` if `seq` was newly recorded (i.e. not a duplicate).
    fn insert(&mut self, seq: u16) -> bool {
        let idx = (seq as usize) % WINDOW;
        if self.slots[idx] == Some(seq) {
            return false;
        }
        self.slots[idx] = Some(seq);
        true
    }

    fn contains(&self, seq: u16) -> bool {
        self.slots[(seq as usize) % WINDOW] == Some(seq)
    }
}

/// Signed comparison for wrapping `u16` sequence numbers.
pub fn seq_greater_than(a: u16, b: u16) -> bool {
    let diff = a.wrapping_sub(b) as i16;
    diff > 0 && diff < (i16::MAX / 2)
}

/// Every outbound `peer_seq` this header's ack fields confirm as received,
/// for callers tracking per-datagram bookkeeping beyond the reliable lane
/// (e.g. which snapshot tick a now-acked datagram carried).
pub fn acked_seqs_from_header(header: &Header) -> Vec<u16> {
    let mut acked = vec![header.peer_ack];
    for i in 0..ACK_BITS_WIDTH {
        if header.ack_bits & (1 << i) != 0 {
            acked.push(header.peer_ack.wrapping_sub(i + 1));
        }
    }
    acked
}

/// A message queued on the reliable lane, awaiting acknowledgement.
#[derive(Debug, Clone)]
struct PendingReliable {
    message: Message,
    /// The outbound `peer_seq` that most recently carried this message, if sent yet.
    carried_by: Option<u16>,
    last_sent_at: Instant,
}

/// What the caller should do with a freshly received datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// New datagram; process its payload normally.
    Accepted,
    /// Already seen this `peer_seq`; discard the datagram without reprocessing.
    Duplicate,
}

/// Outcome of feeding one reliable application message through the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliableReceive {
    /// Already delivered to the application; drop it.
    Duplicate,
    /// Held because earlier reliable ids in the sequence haven't arrived yet.
    Buffered,
    /// Newly contiguous; returned to the application along with any messages
    /// the reorder buffer was able to release behind it.
    Ready,
}

/// Per-peer transport state: one instance per connected remote endpoint.
pub struct Transport {
    next_outbound_seq: u16,
    highest_received_seq: Option<u16>,
    recv_window: SeqWindow,

    next_reliable_id: u32,
    pending_reliable: HashMap<u32, PendingReliable>,
    /// Which reliable ids rode on a given outbound `peer_seq`, so an ack can
    /// retire them. Pruned as entries drop out of the ack window.
    carried_reliable_by_seq: HashMap<u16, Vec<u32>>,

    next_expected_reliable_id: u32,
    delivered_reliable_ids: SeqIdWindow,
    reorder_buffer: BTreeMap<u32, Message>,
}

/// Same duplicate-suppression idea as [`SeqWindow`] but for the unbounded
/// `reliable_id: u32` space (ids only ever increase for a given peer).
struct SeqIdWindow {
    highest: Option<u32>,
    recent: std::collections::HashSet<u32>,
}

impl SeqIdWindow {
    fn new() -> Self {
        Self {
            highest: None,
            recent: std::collections::HashSet::new(),
        }
    }

    fn contains(&self, id: u32) -> bool {
        self.recent.contains(&id)
    }

    fn insert(&mut self, id: u32) {
        self.recent.insert(id);
        self.highest = Some(self.highest.map_or(id, |h| h.max(id)));
        // Bound memory: drop anything more than one window behind the highest seen.
        if let Some(highest) = self.highest {
            let floor = highest.saturating_sub(WINDOW as u32 * 4);
            self.recent.retain(|id| *id > floor);
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            next_outbound_seq: 0,
            highest_received_seq: None,
            recv_window: SeqWindow::new(),
            next_reliable_id: 1,
            pending_reliable: HashMap::new(),
            carried_reliable_by_seq: HashMap::new(),
            next_expected_reliable_id: 1,
            delivered_reliable_ids: SeqIdWindow::new(),
            reorder_buffer: BTreeMap::new(),
        }
    }

    /// The `reliable_id` the next [`Transport::queue_reliable`] call will
    /// assign. Message variants that carry their own `reliable_id` field
    /// (`Message::Reliable`, `ScriptRpc`, `VarSync`) need to embed this value
    /// before queuing so the field matches what the receiver's reorder
    /// buffer expects.
    pub fn next_reliable_id(&self) -> u32 {
        self.next_reliable_id
    }

    /// Queues `message` on the reliable lane and returns its `reliable_id`.
    /// The message itself isn't sent until the next call to
    /// [`Transport::build_header`]/[`Transport::drain_reliable_for_send`].
    pub fn queue_reliable(&mut self, message: Message, now: Instant) -> u32 {
        let id = self.next_reliable_id;
        self.next_reliable_id += 1;
        self.pending_reliable.insert(
            id,
            PendingReliable {
                message,
                carried_by: None,
                last_sent_at: now,
            },
        );
        id
    }

    /// Returns reliable messages that need to go out this datagram: every
    /// message never sent, plus anything whose `retransmit_timeout` elapsed.
    pub fn drain_reliable_for_send(&mut self, now: Instant, rtt: Duration) -> Vec<(u32, Message)> {
        let timeout = (rtt * 3).max(MIN_RETRANSMIT_TIMEOUT);
        self.pending_reliable
            .iter()
            .filter(|(_, p)| p.carried_by.is_none() || now.duration_since(p.last_sent_at) >= timeout)
            .map(|(id, p)| (*id, p.message.clone()))
            .collect()
    }

    /// True if `id` has already gone out at least once, i.e. a subsequent
    /// send of it (as returned by [`Transport::drain_reliable_for_send`]) is
    /// a retransmit rather than a first send. Used only for diagnostics.
    pub fn is_retransmit(&self, id: u32) -> bool {
        self.pending_reliable.get(&id).map(|p| p.carried_by.is_some()).unwrap_or(false)
    }

    /// Builds the header for the next outbound datagram and records which
    /// reliable ids it carries so a later ack can retire them.
    pub fn build_header(&mut self, version: u8, flags: u8, carried_reliable_ids: &[u32], now: Instant) -> Header {
        let seq = self.next_outbound_seq;
        self.next_outbound_seq = self.next_outbound_seq.wrapping_add(1);

        for id in carried_reliable_ids {
            if let Some(p) = self.pending_reliable.get_mut(id) {
                p.carried_by = Some(seq);
                p.last_sent_at = now;
            }
        }
        if !carried_reliable_ids.is_empty() {
            self.carried_reliable_by_seq
                .insert(seq, carried_reliable_ids.to_vec());
        }
        // Forget ack bookkeeping for datagrams outside the ack window.
        let floor = seq.wrapping_sub(WINDOW as u16);
        self.carried_reliable_by_seq
            .retain(|s, _| seq_greater_than(*s, floor) || *s == floor);

        let (peer_ack, ack_bits) = self.build_ack_fields();
        Header {
            version,
            flags,
            peer_seq: seq,
            peer_ack,
            ack_bits,
        }
    }

    fn build_ack_fields(&self) -> (u16, u32) {
        let Some(highest) = self.highest_received_seq else {
            return (0, 0);
        };
        let mut ack_bits = 0u32;
        for i in 0..ACK_BITS_WIDTH {
            let seq = highest.wrapping_sub(i + 1);
            if self.recv_window.contains(seq) {
                ack_bits |= 1 << i;
            }
        }
        (highest, ack_bits)
    }

    /// Processes an incoming header: updates duplicate-suppression state and
    /// retires any reliable messages the remote has now acked.
    pub fn on_receive_header(&mut self, header: &Header) -> ReceiveOutcome {
        let is_new = self.recv_window.insert(header.peer_seq);
        if is_new {
            self.highest_received_seq = Some(match self.highest_received_seq {
                Some(h) if seq_greater_than(h, header.peer_seq) => h,
                _ => header.peer_seq,
            });
        }

        self.retire_acked(header.peer_ack);
        for i in 0..ACK_BITS_WIDTH {
            if header.ack_bits & (1 << i) != 0 {
                self.retire_acked(header.peer_ack.wrapping_sub(i + 1));
            }
        }

        if is_new {
            ReceiveOutcome::Accepted
        } else {
            ReceiveOutcome::Duplicate
        }
    }

    fn retire_acked(&mut self, acked_seq: u16) {
        if let Some(ids) = self.carried_reliable_by_seq.remove(&acked_seq) {
            for id in ids {
                self.pending_reliable.remove(&id);
            }
        }
    }

    /// Feeds one received reliable message through dedup + reorder. Returns
    /// the in-order run of messages now ready for the application (possibly
    /// including messages buffered from earlier calls).
    pub fn receive_reliable(&mut self, reliable_id: u32, message: Message) -> (ReliableReceive, Vec<Message>) {
        if self.delivered_reliable_ids.contains(reliable_id) || reliable_id < self.next_expected_reliable_id {
            return (ReliableReceive::Duplicate, Vec::new());
        }

        self.reorder_buffer.insert(reliable_id, message);

        let mut ready = Vec::new();
        while let Some(msg) = self.reorder_buffer.remove(&self.next_expected_reliable_id) {
            self.delivered_reliable_ids.insert(self.next_expected_reliable_id);
            ready.push(msg);
            self.next_expected_reliable_id += 1;
        }

        if ready.is_empty() {
            (ReliableReceive::Buffered, ready)
        } else {
            (ReliableReceive::Ready, ready)
        }
    }

    pub fn pending_reliable_count(&self) -> usize {
        self.pending_reliable.len()
    }

    /// Drops all pending reliable state ("pending reliable messages
    /// are discarded on disconnect").
    pub fn discard_pending_reliable(&mut self) {
        self.pending_reliable.clear();
        self.carried_reliable_by_seq.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::DisconnectReason;

    fn msg() -> Message {
        Message::Disconnect {
            reason: DisconnectReason::ClientQuit,
        }
    }

    #[test]
    fn sequence_wrap_compares_correctly() {
        assert!(seq_greater_than(1, 0));
        assert!(seq_greater_than(0, u16::MAX));
        assert!(!seq_greater_than(u16::MAX, 0));
    }

    #[test]
    fn duplicate_datagram_is_detected() {
        let mut t = Transport::new();
        let h = Header {
            version: 1,
            flags: 0,
            peer_seq: 5,
            peer_ack: 0,
            ack_bits: 0,
        };
        assert_eq!(t.on_receive_header(&h), ReceiveOutcome::Accepted);
        assert_eq!(t.on_receive_header(&h), ReceiveOutcome::Duplicate);
    }

    #[test]
    fn reliable_message_retired_after_ack() {
        let mut t = Transport::new();
        let now = Instant::now();
        let id = t.queue_reliable(msg(), now);
        let header = t.build_header(1, 0, &[id], now);
        assert_eq!(t.pending_reliable_count(), 1);

        // Simulate the remote acking that exact peer_seq.
        let ack_header = Header {
            version: 1,
            flags: 0,
            peer_seq: 0,
            peer_ack: header.peer_seq,
            ack_bits: 0,
        };
        t.on_receive_header(&ack_header);
        assert_eq!(t.pending_reliable_count(), 0);
    }

    #[test]
    fn unacked_reliable_message_is_retransmitted_after_timeout() {
        let mut t = Transport::new();
        let t0 = Instant::now();
        let id = t.queue_reliable(msg(), t0);
        let _ = t.build_header(1, 0, &[id], t0);

        let soon = t0 + Duration::from_millis(50);
        assert!(t.drain_reliable_for_send(soon, Duration::from_millis(10)).is_empty());

        let later = t0 + Duration::from_millis(200);
        let due = t.drain_reliable_for_send(later, Duration::from_millis(10));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn reliable_messages_delivered_in_order_despite_arrival_order() {
        let mut t = Transport::new();
        let (_, ready1) = t.receive_reliable(2, msg());
        assert!(ready1.is_empty()); // 2 arrived before 1, buffered.

        let (_, ready2) = t.receive_reliable(1, msg());
        assert_eq!(ready2.len(), 2); // releases 1 then 2.
    }

    #[test]
    fn reliable_duplicate_is_not_redelivered() {
        let mut t = Transport::new();
        let (_, _) = t.receive_reliable(1, msg());
        let (outcome, ready) = t.receive_reliable(1, msg());
        assert_eq!(outcome, ReliableReceive::Duplicate);
        assert!(ready.is_empty());
    }

    #[test]
    fn disconnect_discards_pending_reliable() {
        let mut t = Transport::new();
        let now = Instant::now();
        t.queue_reliable(msg(), now);
        assert_eq!(t.pending_reliable_count(), 1);
        t.discard_pending_reliable();
        assert_eq!(t.pending_reliable_count(), 0);
    }
}
