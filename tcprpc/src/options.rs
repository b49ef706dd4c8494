//! The TCP options sub-parser.
//!
//! Reads until the option buffer is empty or an End-Of-Options (kind 0) is seen. Malformed
//! options (a declared length exceeding the remaining bytes) terminate option parsing without
//! failing the segment — whatever options were already parsed are kept.

use log::trace;

use crate::error::DecodeError;

/// A single decoded TCP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOption {
	/// kind 0: terminates the option list.
	EndOfOptions,
	/// kind 1: alignment padding, carries no data.
	NoOp,
	/// kind 2: maximum segment size.
	Mss { mss: u16 },
	/// kind 3: window scale shift count.
	WScale { wsopt: u8 },
	/// kind 5: selective-ack block list.
	Sack { blocks: Vec<(u32, u32)> },
	/// kind 8: timestamp echo pair.
	Timestamp { tsval: u32, tsecr: u32 },
	/// Any other kind, carried as its raw body bytes.
	Unknown { kind: u8, data: Vec<u8> },
}

struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	fn remaining(&self) -> usize {
		self.buf.len() - self.pos
	}

	fn take(&mut self, n: usize) -> Option<&'a [u8]> {
		if self.remaining() < n {
			return None;
		}

		let slice = &self.buf[self.pos..self.pos + n];
		self.pos += n;
		Some(slice)
	}

	fn u8(&mut self) -> Option<u8> {
		self.take(1).map(|s| s[0])
	}

	fn u16be(&mut self) -> Option<u16> {
		self.take(2).map(|s| u16::from_be_bytes([s[0], s[1]]))
	}

	fn u32be(&mut self) -> Option<u32> {
		self.take(4).map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
	}
}

/// Parses the variable-length TCP options area, stopping early (without error) on a malformed
/// option or an End-Of-Options marker.
pub fn parse_options(buf: &[u8]) -> Vec<TcpOption> {
	let mut reader = Reader::new(buf);
	let mut options = Vec::new();

	loop {
		let Some(kind) = reader.u8() else { break };

		match kind {
			0 => {
				options.push(TcpOption::EndOfOptions);
				break;
			}
			1 => options.push(TcpOption::NoOp),
			kind => {
				let Some(length) = reader.u8() else {
					trace!("{}", DecodeError::MalformedOption);
					break;
				};

				// An option whose length is <= 2 (kind + length bytes themselves) has an empty body.
				let body_len = length.saturating_sub(2) as usize;

				match parse_option_body(&mut reader, kind, body_len) {
					Some(option) => options.push(option),
					None => {
						trace!("{}", DecodeError::MalformedOption);
						break;
					}
				}
			}
		}
	}

	options
}

fn parse_option_body(reader: &mut Reader<'_>, kind: u8, body_len: usize) -> Option<TcpOption> {
	if body_len == 0 {
		return Some(match kind {
			2 => TcpOption::Mss { mss: 0 },
			3 => TcpOption::WScale { wsopt: 0 },
			5 => TcpOption::Sack { blocks: Vec::new() },
			8 => TcpOption::Timestamp { tsval: 0, tsecr: 0 },
			kind => TcpOption::Unknown { kind, data: Vec::new() },
		});
	}

	match kind {
		2 => Some(TcpOption::Mss { mss: reader.u16be()? }),
		3 => Some(TcpOption::WScale { wsopt: reader.u8()? }),
		5 => {
			if body_len % 8 != 0 {
				// Truncate to whole (left_edge, right_edge) pairs; a short trailing remainder
				// is itself a malformed option and the caller will treat the stop as such.
				let pairs = body_len / 8;
				let mut blocks = Vec::with_capacity(pairs);
				for _ in 0..pairs {
					blocks.push((reader.u32be()?, reader.u32be()?));
				}
				// Consume (and discard) the short remainder so later options stay aligned.
				reader.take(body_len - pairs * 8)?;
				Some(TcpOption::Sack { blocks })
			} else {
				let mut blocks = Vec::with_capacity(body_len / 8);
				for _ in 0..body_len / 8 {
					blocks.push((reader.u32be()?, reader.u32be()?));
				}
				Some(TcpOption::Sack { blocks })
			}
		}
		8 => Some(TcpOption::Timestamp { tsval: reader.u32be()?, tsecr: reader.u32be()? }),
		kind => Some(TcpOption::Unknown { kind, data: reader.take(body_len)?.to_vec() }),
	}
}
