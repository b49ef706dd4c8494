//! The RPC reassembler: turns a sequence of TCP segments on one stream into a sequence of
//! complete ONC RPC record-marked messages, handling both directions of fragmentation (many
//! records per segment, and one record spanning many segments).

use log::{debug, trace, warn};

use crate::error::DecodeError;
use crate::external::{CallTable, PortDecoder, RpcDecoder, RpcMessage};
use crate::segment::TcpFlags;
use crate::stream::StreamState;
use crate::ReassemblyConfig;

/// Destination or source port that pre-empts RPC reassembly entirely and hands the payload to
/// the DNS decoder instead.
const DNS_PORT: u16 = 53;
/// Destination or source port that pre-empts RPC reassembly entirely and hands the payload to
/// the Kerberos-v5 decoder instead.
const KRB5_PORT: u16 = 88;

/// Attempts a single decode pass against one incoming segment.
///
/// This is the primitive operation the spec's scenarios are written against: it is handed the
/// *entire* segment payload every time, never a remainder. When a segment carries more than one
/// complete RPC record, one call here decodes the first and records where the next one starts
/// (`state.frag_off`); the caller re-enters with the *same* `payload` slice to pick up the next
/// record — [`reassemble_all`] is the convenience loop that does this automatically. When the
/// segment's bytes complete only part of a record, the remainder is kept in `state.msfrag` for
/// the next segment's call to prepend to.
///
/// `length_orig`/`length_inc` are the capture record's original and captured (possibly
/// truncated) byte counts; when they differ, a record that looks incomplete is assumed to be an
/// artifact of capture-tool truncation rather than a genuine straddle, and reassembly gives up on
/// it instead of waiting for bytes that will never arrive.
#[allow(clippy::too_many_arguments)]
pub fn reassemble_once(
	state: &mut StreamState,
	config: ReassemblyConfig,
	seq: u64,
	retransmission: bool,
	flags: TcpFlags,
	src_port: u16,
	dst_port: u16,
	payload: &[u8],
	length_orig: usize,
	length_inc: usize,
	decoder: &mut dyn RpcDecoder,
	call_table: &mut dyn CallTable,
	port_decoder: Option<&mut dyn PortDecoder>,
) -> Result<Option<Box<dyn RpcMessage>>, DecodeError> {
	if retransmission {
		trace!("dropping retransmitted payload at seq {seq}");
		return Ok(None);
	}

	if src_port == DNS_PORT || dst_port == DNS_PORT || src_port == KRB5_PORT || dst_port == KRB5_PORT {
		if let Some(port_decoder) = port_decoder {
			port_decoder.decode(payload);
		}
		return Ok(None);
	}

	if payload.is_empty() {
		// An empty payload carrying something other than a bare ACK (e.g. FIN or RST with no
		// data) is evidence of a torn-down connection, not a keepalive; any record straddling
		// this point is never going to see its remaining bytes.
		if !flags.is_ack_only() && !state.msfrag.is_empty() {
			warn!("empty payload with non-ACK flags at seq {seq}, discarding {} buffered bytes", state.msfrag.len());
			state.reset_record();
		}
		return Ok(None);
	}

	if config.strict_valid_data_guard && is_small_zero_filler(payload) {
		let expected = expected_additional_bytes(&state.msfrag);
		let delta = seq.saturating_sub(state.last_seq) as usize;
		if expected != delta {
			debug!("rejecting {}-byte zero filler segment at seq {seq}, expected {expected} more bytes to complete the record in progress", payload.len());
			return Ok(None);
		}
	}

	if state.record_in_progress() {
		if let Some(expected_next) = state.next_record_seq {
			if seq != expected_next {
				warn!("sequence gap on in-progress record at seq {seq} (expected {expected_next}), discarding {} buffered bytes", state.msfrag.len());
				state.reset_record();
			}
		}
	}

	state.last_seq = seq;

	// Carry-over positioning: a prior call against this same payload already emitted a record
	// and found the start of another one at `frag_off`. Only applies when no straddling record
	// is in progress — the two are mutually exclusive per `frag_off`'s invariant.
	let skip = if state.msfrag.is_empty() { state.frag_off.min(payload.len()) } else { 0 };
	let cursor = &payload[skip..];

	// Prefer in-segment resync over stale accumulation: if this segment's own bytes parse as a
	// clean, self-contained record, trust them over a carry-over that most likely belongs to a
	// record this capture never saw the rest of.
	let resynced = !state.msfrag.is_empty() && decoder.decode(cursor, false).is_some();
	if resynced {
		debug!("in-segment resync at seq {seq}, discarding {} stale buffered bytes", state.msfrag.len());
		state.msfrag.clear();
	}

	let mut buf = if state.msfrag.is_empty() {
		cursor.to_vec()
	} else {
		let mut buf = std::mem::take(&mut state.msfrag);
		buf.extend_from_slice(cursor);
		buf
	};

	match decoder.decode(&buf, true) {
		None => {
			let needed = expected_additional_bytes(&buf);
			if needed == 0 {
				// The record mark and declared body length are both present, yet decoding
				// still declined: the bytes are malformed, not merely incomplete.
				trace!("{}", DecodeError::UnalignedRecord);
				state.reset_record();
				return Ok(None);
			}

			if length_orig == length_inc {
				state.next_record_seq = Some(seq + payload.len() as u64);
				state.msfrag = buf;
				state.frag_off = 0;
			} else {
				// The capture tool dropped the tail of this segment; more bytes are never
				// coming for this record, so there is nothing to wait for.
				debug!("{}", DecodeError::CaptureTruncation);
				state.reset_record();
			}

			Ok(None)
		}
		Some(mut message) => {
			let consumed = message.fragment_size() as usize;
			if consumed < 4 || consumed > buf.len() {
				return Err(DecodeError::IncompleteRecord);
			}

			let remainder = buf.split_off(consumed);

			if message.is_reply() {
				call_table.remove(message.xid());
			}

			let ldata = consumed - 4;
			let remaining = message.decode_payload(&buf[4..]);
			let rpcbytes = ldata.saturating_sub(remaining);
			if rpcbytes != ldata {
				trace!("payload decoder consumed {rpcbytes} of {ldata} declared body bytes for xid {}, swallowing silently", message.xid());
			}

			if remainder.is_empty() {
				state.reset_record();
			} else {
				// Bytes remain after the record body: another record may start within this
				// segment. `remainder` is always a suffix of `payload` itself, so its offset
				// there is the new carry-over position regardless of where `cursor` started.
				match decoder.decode(&remainder, false) {
					Some(probe) if probe.fragment_size() as usize <= remainder.len() => {
						state.frag_off = payload.len() - remainder.len();
						state.next_record_seq = None;
					}
					_ => {
						state.next_record_seq = Some(seq + payload.len() as u64);
						state.msfrag = remainder;
						state.frag_off = 0;
					}
				}
			}

			Ok(Some(message))
		}
	}
}

/// Convenience driver loop around [`reassemble_once`] that keeps re-entering it against the
/// *same* `payload` while a carry-over position is pending, so a segment carrying several
/// back-to-back RPC records yields all of them in one call. Stands in for the capture driver's
/// own re-entry, which spec.md leaves unspecified (see DESIGN.md).
#[allow(clippy::too_many_arguments)]
pub fn reassemble_all(
	state: &mut StreamState,
	config: ReassemblyConfig,
	seq: u64,
	retransmission: bool,
	flags: TcpFlags,
	src_port: u16,
	dst_port: u16,
	payload: &[u8],
	length_orig: usize,
	length_inc: usize,
	decoder: &mut dyn RpcDecoder,
	call_table: &mut dyn CallTable,
	mut port_decoder: Option<&mut dyn PortDecoder>,
) -> Result<Vec<Box<dyn RpcMessage>>, DecodeError> {
	let mut messages = Vec::new();

	loop {
		let message = reassemble_once(
			state,
			config,
			seq,
			retransmission,
			flags,
			src_port,
			dst_port,
			payload,
			length_orig,
			length_inc,
			decoder,
			call_table,
			port_decoder.as_mut().map(|p| &mut **p),
		)?;

		match message {
			Some(message) => messages.push(message),
			None => break,
		}

		if !(state.frag_off > 0 && state.msfrag.is_empty()) {
			break;
		}
	}

	Ok(messages)
}

/// Small, all-zero payloads are the shape of TCP keepalive/window-probe filler; a segment this
/// small is only treated as real record data when its length matches what's needed to finish
/// the record currently in progress.
fn is_small_zero_filler(payload: &[u8]) -> bool {
	payload.len() <= 20 && payload.iter().all(|&b| b == 0)
}

/// Peeks the ONC RPC record mark at the front of `buf` (a 4-byte big-endian word: high bit set
/// for the last fragment, low 31 bits the fragment's byte count after the mark) and reports how
/// many more bytes are needed to complete it. Returns a non-zero sentinel while even the mark
/// itself hasn't fully arrived.
fn expected_additional_bytes(buf: &[u8]) -> usize {
	if buf.len() < 4 {
		return 4 - buf.len();
	}

	let mark = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
	let body_len = (mark & 0x7FFF_FFFF) as usize;
	let total = 4 + body_len;

	total.saturating_sub(buf.len())
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::external::mock::{build_record, MockCallTable, MockDecoder, MockPortDecoder};

	const SRC_PORT: u16 = 4000;
	const DST_PORT: u16 = 2049;

	fn ack(flags: u16) -> TcpFlags {
		TcpFlags { raw: flags }
	}

	#[test]
	fn single_record_fully_in_one_segment() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let record = build_record(42, false, true);

		let message = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			&record,
			record.len(),
			record.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap()
		.unwrap();

		assert_eq!(message.xid(), 42);
		assert!(state.msfrag.is_empty());
		assert_eq!(state.frag_off, 0);
	}

	#[test]
	fn one_record_split_across_two_segments() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let record = build_record(7, false, true);
		let (first, second) = record.split_at(6);

		let none = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK),
			SRC_PORT,
			DST_PORT,
			first,
			first.len(),
			first.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();
		assert!(none.is_none());
		assert!(state.record_in_progress());

		let message = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			6,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			second,
			second.len(),
			second.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap()
		.unwrap();
		assert_eq!(message.xid(), 7);
		assert!(!state.record_in_progress());
	}

	#[test]
	fn two_records_in_one_segment_via_reassemble_all() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();

		let mut combined = build_record(1, false, true);
		combined.extend_from_slice(&build_record(2, false, true));

		let messages = reassemble_all(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			&combined,
			combined.len(),
			combined.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();

		assert_eq!(messages.len(), 2);
		assert_eq!(messages[0].xid(), 1);
		assert_eq!(messages[1].xid(), 2);
		assert!(state.msfrag.is_empty());
		assert_eq!(state.frag_off, 0);
	}

	#[test]
	fn frag_off_carries_next_record_start_within_same_payload() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();

		let mut combined = build_record(1, false, true);
		let second_record_offset = combined.len();
		combined.extend_from_slice(&build_record(2, false, true));

		let first = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			&combined,
			combined.len(),
			combined.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap()
		.unwrap();
		assert_eq!(first.xid(), 1);
		assert_eq!(state.frag_off, second_record_offset);
		assert!(state.msfrag.is_empty());

		// Re-entry with the *same* payload, per reassemble_once's contract: carry-over
		// positioning skips straight to the second record.
		let second = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			&combined,
			combined.len(),
			combined.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap()
		.unwrap();
		assert_eq!(second.xid(), 2);
		assert_eq!(state.frag_off, 0);
		assert!(state.msfrag.is_empty());
	}

	#[test]
	fn retransmission_is_dropped_without_state_change() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let record = build_record(1, false, true);

		let result = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			true,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			&record,
			record.len(),
			record.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();
		assert!(result.is_none());
		assert!(state.msfrag.is_empty());
		assert_eq!(state.last_seq, 0);
	}

	#[test]
	fn ack_only_segment_does_not_trigger_loss_reset() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let record = build_record(9, false, true);
		let (first, second) = record.split_at(6);

		reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK),
			SRC_PORT,
			DST_PORT,
			first,
			first.len(),
			first.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();

		// An ACK-only keepalive arrives with no payload; it must not discard the in-progress
		// record even though it carries no bytes at all.
		let none = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			999,
			false,
			ack(TcpFlags::ACK),
			SRC_PORT,
			DST_PORT,
			&[],
			0,
			0,
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();
		assert!(none.is_none());
		assert!(state.record_in_progress());

		let message = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			6,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			second,
			second.len(),
			second.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap()
		.unwrap();
		assert_eq!(message.xid(), 9);
	}

	#[test]
	fn empty_payload_with_non_ack_flags_clears_in_progress_record() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let record = build_record(21, false, true);
		let (first, _second) = record.split_at(6);

		reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK),
			SRC_PORT,
			DST_PORT,
			first,
			first.len(),
			first.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();
		assert!(state.record_in_progress());

		// FIN+ACK with no data: the connection is tearing down, the rest of the record is
		// never coming.
		let result = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			6,
			false,
			ack(TcpFlags::FIN | TcpFlags::ACK),
			SRC_PORT,
			DST_PORT,
			&[],
			0,
			0,
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();

		assert!(result.is_none());
		assert!(!state.record_in_progress());
		assert_eq!(state.frag_off, 0);
	}

	#[test]
	fn sequence_gap_resets_in_progress_record() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let record = build_record(3, false, true);
		let (first, _lost_second) = record.split_at(6);

		reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK),
			SRC_PORT,
			DST_PORT,
			first,
			first.len(),
			first.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();
		assert!(state.record_in_progress());

		// The rest of record 3 never arrives; instead a new, unrelated record shows up far
		// ahead in the sequence space.
		let fresh = build_record(4, false, true);
		let message = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			500,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			&fresh,
			fresh.len(),
			fresh.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap()
		.unwrap();
		assert_eq!(message.xid(), 4);
	}

	#[test]
	fn reply_removes_pending_call() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		calls.pending.insert(11, ());

		let record = build_record(11, true, true);
		reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			&record,
			record.len(),
			record.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();

		assert!(!calls.pending.contains_key(&11));
	}

	#[test]
	fn strict_guard_rejects_mismatched_zero_filler() {
		let mut state = StreamState::default();
		state.msfrag = vec![1, 2, 3, 4];
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();

		let filler = vec![0u8; 3];
		let result = reassemble_once(
			&mut state,
			ReassemblyConfig::strict(),
			4,
			false,
			ack(TcpFlags::ACK),
			SRC_PORT,
			DST_PORT,
			&filler,
			filler.len(),
			filler.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();

		assert!(result.is_none());
		assert_eq!(state.msfrag, vec![1, 2, 3, 4]);
	}

	#[test]
	fn capture_truncation_abandons_incomplete_record_instead_of_waiting() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let record = build_record(5, false, true);
		let (first, _rest) = record.split_at(6);

		// The capture tool dropped the tail of this segment: length_orig exceeds length_inc.
		let result = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			SRC_PORT,
			DST_PORT,
			first,
			200,
			first.len(),
			&mut decoder,
			&mut calls,
			None,
		)
		.unwrap();

		assert!(result.is_none());
		assert!(state.msfrag.is_empty());
		assert_eq!(state.frag_off, 0);
	}

	#[test]
	fn port_53_is_dispatched_before_any_reassembly() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let mut ports = MockPortDecoder::default();
		let payload = b"stand-in dns query bytes";

		let message = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			53,
			40000,
			payload,
			payload.len(),
			payload.len(),
			&mut decoder,
			&mut calls,
			Some(&mut ports),
		)
		.unwrap();

		assert!(message.is_none());
		assert_eq!(ports.seen, vec![payload.to_vec()]);
		assert!(state.msfrag.is_empty());
	}

	#[test]
	fn port_88_is_dispatched_before_any_reassembly() {
		let mut state = StreamState::default();
		let mut decoder = MockDecoder;
		let mut calls = MockCallTable::default();
		let mut ports = MockPortDecoder::default();
		let payload = b"stand-in kerberos bytes";

		let message = reassemble_once(
			&mut state,
			ReassemblyConfig::loose(),
			0,
			false,
			ack(TcpFlags::ACK | TcpFlags::PSH),
			40000,
			88,
			payload,
			payload.len(),
			payload.len(),
			&mut decoder,
			&mut calls,
			Some(&mut ports),
		)
		.unwrap();

		assert!(message.is_none());
		assert_eq!(ports.seen, vec![payload.to_vec()]);
	}
}
