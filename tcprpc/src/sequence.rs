//! Turns a segment's wrapping 32-bit TCP sequence number into a monotonic 64-bit relative
//! sequence per stream, so the reassembler never has to reason about wraparound itself.

use crate::stream::StreamState;

/// The outcome of normalizing one segment's sequence number against a stream's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedSegment {
	/// The segment's first payload byte, as a monotonic offset from the stream's first SYN
	/// (or from the first segment observed, if no SYN was captured).
	pub seq: u64,
	/// `true` when this segment's relative sequence is behind the highest one already
	/// processed for this stream — a retransmission, whose payload must not be reassembled.
	pub retransmission: bool,
}

/// Normalizes `seq_number` against `state`, updating `state`'s rebase/wrap bookkeeping as a
/// side effect.
///
/// A `SYN` segment always triggers a rebase: its own sequence number becomes relative 0, even
/// if a stream was already in progress (a new connection reusing the 4-tuple). The very first
/// segment seen for a stream that never carried a SYN (the capture started mid-stream) is
/// treated the same way, since there is no earlier reference point to normalize against.
pub fn normalize(state: &mut StreamState, seq_number: u32, syn: bool) -> NormalizedSegment {
	if syn || !state.seq_synced {
		state.seq_base = seq_number;
		state.seq_synced = true;
		// Rebase to the current wrap floor, not to absolute zero: a stream that already
		// wrapped once keeps that history across a new SYN on a reused 4-tuple, or invariant
		// #1 (monotonic seq) breaks the moment the old direction's bytes are compared against
		// the new one's.
		let seq_wrap = state.seq_wraps << 32;
		state.last_seq = seq_wrap;
		return NormalizedSegment { seq: seq_wrap, retransmission: false };
	}

	let low32 = seq_number.wrapping_sub(state.seq_base) as u64;
	let mut candidate = (state.seq_wraps << 32) | low32;

	// If the widened candidate falls far behind the last seen sequence, a wrap likely
	// occurred between the two segments: re-derive candidate one wrap further along.
	let half_range = 1u64 << 31;
	if candidate + half_range < state.last_seq {
		state.seq_wraps += 1;
		candidate = (state.seq_wraps << 32) | low32;
	}

	let retransmission = candidate < state.last_seq;
	if !retransmission {
		state.last_seq = candidate;
	}

	NormalizedSegment { seq: candidate, retransmission }
}
