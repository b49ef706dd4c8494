/// Tunables for the RPC reassembler that spec behavior leaves as an explicit, non-default
/// choice (see the "valid data" guard in the design notes).
///
/// Two variants of the reassembler are observed in the systems this crate's behavior is
/// modeled on: one applies a strict guard against small all-zero "filler" segments while a
/// record is in progress, the other does not. Neither is silently preferred — callers must
/// pick one via [`ReassemblyConfig::strict`] or [`ReassemblyConfig::loose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyConfig {
	/// When `true`, a segment carrying at most 20 all-zero payload bytes is rejected as
	/// invalid filler (state untouched) unless its byte count matches the gap expected to
	/// complete the in-progress record. When `false`, such segments fall through to the
	/// ordinary retransmission/loss-reset handling.
	pub strict_valid_data_guard: bool,
}

impl ReassemblyConfig {
	/// The strict variant: reject small all-zero filler segments that don't match the
	/// expected continuation size of an in-progress record.
	pub const fn strict() -> Self {
		Self { strict_valid_data_guard: true }
	}

	/// The loose variant: rely solely on the retransmission rule and the ACK-exception in
	/// the loss-driven reset to distinguish real data from filler.
	pub const fn loose() -> Self {
		Self { strict_valid_data_guard: false }
	}
}
