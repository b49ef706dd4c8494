use core::fmt::{self, Display, Formatter};

/// Error kinds raised while decoding a TCP segment or reassembling an RPC record.
///
/// Only [`DecodeError::ShortHeader`] is ever surfaced as an `Err` from the public API; the
/// remaining kinds describe conditions that are recovered locally (logged, then absorbed into
/// reassembly state) and exist so callers can recognize them in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
	/// Fewer than 20 bytes were available for the fixed TCP header, or `header_size` exceeds
	/// the remaining buffer.
	ShortHeader,
	/// A TCP option's declared length exceeds the bytes remaining in the options area.
	MalformedOption,
	/// A stateless probe of the next RPC record declined or did not fit within the segment.
	UnalignedRecord,
	/// A complete RPC header was parsed but its declared body is not fully present, and the
	/// capture recorded no tail truncation to explain the shortfall.
	IncompleteRecord,
	/// The capture record's `length_orig` exceeds `length_inc`: the tail of this segment was
	/// dropped by the capturing tool, not lost on the wire.
	CaptureTruncation,
}

impl Display for DecodeError {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			DecodeError::ShortHeader => write!(f, "ShortHeader: fewer than 20 bytes available for the TCP header"),
			DecodeError::MalformedOption => write!(f, "MalformedOption: option length exceeds remaining bytes"),
			DecodeError::UnalignedRecord => write!(f, "UnalignedRecord: next RPC record does not fit in this segment"),
			DecodeError::IncompleteRecord => write!(f, "IncompleteRecord: RPC body incomplete and no capture truncation recorded"),
			DecodeError::CaptureTruncation => write!(f, "CaptureTruncation: capture dropped trailing bytes of this segment"),
		}
	}
}

impl std::error::Error for DecodeError {}
