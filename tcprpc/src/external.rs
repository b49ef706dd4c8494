//! Collaborator interfaces this crate calls into but does not implement: RPC message decoding,
//! pending-call tracking, and per-port payload hand-off. A capture driver and an RPC/NFS layer
//! live on the other side of these traits; the `mock` test module provides minimal stand-ins.

/// One fully or partially decoded RPC record.
pub trait RpcMessage {
	/// The record's declared total size, including the 4-byte record-marking header, as read
	/// from the last fragment's record mark.
	fn fragment_size(&self) -> u32;
	/// The RPC transaction id, used to key the [`CallTable`].
	fn xid(&self) -> u32;
	/// `true` if this record is a reply (as opposed to a call).
	fn is_reply(&self) -> bool;
	/// Decodes the record's payload (the NFS/mount/portmap body beyond the RPC header).
	///
	/// Returns the count of trailing bytes in `body` the decoder did not consume, mirroring
	/// `rpcbytes = ldata - remaining`: the reassembler uses this to detect a declined payload
	/// decode and swallow it silently rather than treat it as a framing error.
	fn decode_payload(&mut self, body: &[u8]) -> usize;
}

/// Decodes one ONC RPC record-marked message out of a byte buffer.
pub trait RpcDecoder {
	/// Attempts to decode one record from the front of `data`.
	///
	/// When `mutate` is `false` this is a stateless probe: the decoder must not register the
	/// call in a [`CallTable`] or otherwise record side effects, it only reports whether a
	/// complete, well-formed record starts at the front of `data` and how large it is.
	fn decode(&mut self, data: &[u8], mutate: bool) -> Option<Box<dyn RpcMessage>>;
}

/// Tracks RPC calls awaiting a matching reply, keyed by transaction id.
pub trait CallTable {
	/// Removes and returns any pending call state associated with `xid`.
	fn remove(&mut self, xid: u32);
}

/// Decodes a payload handed off by destination port, for protocols that ride over TCP outside
/// the ONC RPC record-marking format (e.g. DNS on port 53, Kerberos v5 on port 88).
pub trait PortDecoder {
	fn decode(&mut self, payload: &[u8]);
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
	//! A minimal ONC RPC record-marking implementation, just enough to drive the reassembler's
	//! tests without a real NFS/mount/portmap decode stack behind it.

	use std::collections::HashMap;

	use super::{CallTable, PortDecoder, RpcDecoder, RpcMessage};

	pub struct MockMessage {
		pub fragment_size: u32,
		pub xid: u32,
		pub is_reply: bool,
	}

	impl RpcMessage for MockMessage {
		fn fragment_size(&self) -> u32 {
			self.fragment_size
		}

		fn xid(&self) -> u32 {
			self.xid
		}

		fn is_reply(&self) -> bool {
			self.is_reply
		}

		/// No NFS/mount/portmap body to decode in this test double; reports the whole body
		/// consumed.
		fn decode_payload(&mut self, _body: &[u8]) -> usize {
			0
		}
	}

	/// A record-marking decoder for a single 4-byte-header + 8-byte-body wire shape: the record
	/// mark (top bit = last-fragment, low 31 bits = fragment byte count excluding the mark),
	/// followed by a 4-byte xid and a 4-byte reply flag (0 = call, 1 = reply).
	#[derive(Default)]
	pub struct MockDecoder;

	impl RpcDecoder for MockDecoder {
		fn decode(&mut self, data: &[u8], _mutate: bool) -> Option<Box<dyn RpcMessage>> {
			if data.len() < 4 {
				return None;
			}

			let mark = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
			let body_len = (mark & 0x7FFF_FFFF) as usize;
			let total = 4 + body_len;

			if data.len() < total || body_len < 8 {
				return None;
			}

			let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
			let is_reply = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) == 1;

			Some(Box::new(MockMessage { fragment_size: total as u32, xid, is_reply }))
		}
	}

	#[derive(Default)]
	pub struct MockCallTable {
		pub pending: HashMap<u32, ()>,
	}

	impl CallTable for MockCallTable {
		fn remove(&mut self, xid: u32) {
			self.pending.remove(&xid);
		}
	}

	/// Records every payload handed to it, standing in for the DNS/Kerberos-v5 port decoders.
	#[derive(Debug, Default)]
	pub struct MockPortDecoder {
		pub seen: Vec<Vec<u8>>,
	}

	impl PortDecoder for MockPortDecoder {
		fn decode(&mut self, payload: &[u8]) {
			self.seen.push(payload.to_vec());
		}
	}

	/// Builds one record-marked RPC message: `len` is the body length (xid + reply flag, at
	/// least 8), `last` sets the record-mark's final-fragment bit.
	pub fn build_record(xid: u32, is_reply: bool, last: bool) -> Vec<u8> {
		let body_len: u32 = 8;
		let mark = body_len | if last { 0x8000_0000 } else { 0 };
		let mut buf = Vec::with_capacity(4 + body_len as usize);
		buf.extend_from_slice(&mark.to_be_bytes());
		buf.extend_from_slice(&xid.to_be_bytes());
		buf.extend_from_slice(&(is_reply as u32).to_be_bytes());
		buf
	}
}
