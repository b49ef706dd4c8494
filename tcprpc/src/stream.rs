//! The stream registry: per-4-tuple reassembly state, keyed and looked up the way the
//! teacher's IP fragment store keys its own partial-reassembly state.

use std::collections::HashMap;
use std::net::IpAddr;

/// Identifies one direction of a TCP connection. Both directions of a connection get distinct
/// keys (src/dst are not normalized), matching how the reassembler only ever needs to track the
/// direction carrying RPC traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
	pub src_addr: IpAddr,
	pub src_port: u16,
	pub dst_addr: IpAddr,
	pub dst_port: u16,
}

/// Per-stream reassembly state carried across segments.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
	/// Bytes of an RPC record collected so far but not yet complete, spanning more than one
	/// segment. Mutually exclusive with a non-zero `frag_off` (see `frag_off`'s doc).
	pub msfrag: Vec<u8>,
	/// The byte offset into the *current* segment's payload at which the next RPC record
	/// begins, set when more than one record shares a segment. Only meaningful while `msfrag`
	/// is empty: a segment carrying a straddling record in progress never also has a pending
	/// intra-segment boundary. Consumed by `reassemble_once`'s carry-over positioning step,
	/// which lets a caller re-enter with the same segment payload to pick up the next record.
	pub frag_off: usize,
	/// The highest relative sequence number processed for this stream, used to detect
	/// retransmissions.
	pub last_seq: u64,
	/// The relative sequence number the next segment must start at to be considered a
	/// contiguous continuation of `msfrag`. `None` when no record is in progress.
	pub next_record_seq: Option<u64>,
	/// `true` once a SYN has been observed and `seq_base` is meaningful.
	pub seq_synced: bool,
	/// The raw 32-bit sequence number that relative sequence 0 corresponds to.
	pub seq_base: u32,
	/// Number of times the raw sequence counter has wrapped past 2^32 for this stream.
	pub seq_wraps: u64,
}

impl StreamState {
	/// `true` while a partial RPC record is being accumulated across segments.
	pub fn record_in_progress(&self) -> bool {
		!self.msfrag.is_empty()
	}

	/// Resets reassembly state without disturbing the sequence tracking fields.
	pub fn reset_record(&mut self) {
		self.msfrag.clear();
		self.frag_off = 0;
		self.next_record_seq = None;
	}
}

/// Holds one [`StreamState`] per [`StreamKey`], created on first sight of a stream.
#[derive(Debug, Default)]
pub struct StreamRegistry {
	streams: HashMap<StreamKey, StreamState>,
}

impl StreamRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the state for `key`, inserting a fresh default if this is the first segment
	/// seen for the stream.
	pub fn get_or_insert(&mut self, key: StreamKey) -> &mut StreamState {
		self.streams.entry(key).or_default()
	}

	/// Drops all state for `key`, e.g. on FIN/RST teardown.
	pub fn remove(&mut self, key: &StreamKey) {
		self.streams.remove(key);
	}

	pub fn len(&self) -> usize {
		self.streams.len()
	}

	pub fn is_empty(&self) -> bool {
		self.streams.is_empty()
	}
}
