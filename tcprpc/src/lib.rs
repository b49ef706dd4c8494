//! TCP segment decoding and per-stream ONC RPC record reassembly.
//!
//! This crate decodes individual TCP segments (header, options, payload) and reassembles the
//! record-marked RPC messages carried in their payload across segment boundaries, in either
//! direction: several RPC records packed into one segment, or one record spanning several
//! segments. It does not decode RPC/NFS payloads itself, track sockets, or read capture files —
//! those are the job of the collaborators behind the traits in [`external`].

pub mod config;
pub mod error;
pub mod external;
pub mod options;
pub mod reassembly;
pub mod segment;
pub mod sequence;
pub mod stream;

pub use config::ReassemblyConfig;
pub use error::DecodeError;
pub use external::{CallTable, PortDecoder, RpcDecoder, RpcMessage};
pub use options::TcpOption;
pub use reassembly::{reassemble_all, reassemble_once};
pub use segment::{parse_segment, Segment, TcpFlags};
pub use sequence::{normalize, NormalizedSegment};
pub use stream::{StreamKey, StreamRegistry, StreamState};
