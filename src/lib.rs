//! # pktset: packet construction set
//!
//! Bit-exact protocol layouts, encapsulation chains and capture-driven matching.
//!
//! A [`Layout`] is an ordered list of [`Field`]s packed MSB-first with no padding.
//! A [`Protocol`] pairs a layout with the discriminator map that says which protocol
//! follows it, plus optional checksum and length hooks. [`Packet`]s are live
//! instances of a protocol; a [`Chain`] is a stack of packets, outermost first.
//!
//! ## Building
//!
//! ```no_run
//! use pktset::{ProtocolRegistry, Result};
//!
//! fn syn() -> Result<Vec<u8>> {
//!     let registry = ProtocolRegistry::builtin();
//!     let mut tcp = registry.packet("tcp")?;
//!     tcp.set("dport", 80u16)?;
//!     tcp.set("syn", 1u8)?;
//!     let mut chain = registry.packet("ethernet")? / registry.packet("ipv4")? / tcp;
//!     Ok(chain.fixup()?.to_vec())
//! }
//! ```
//!
//! `a / b` fills `a`'s discriminator from `b`'s protocol; `fixup` computes lengths,
//! then checksums, innermost first, and encodes.
//!
//! ## Matching
//!
//! [`expect`] reads chains from a [`Connector`] until one matches a template.
//! Wildcarded template fields are ignored. A template chain may be shorter than
//! the traffic it matches.
//!
//! ## Layout language
//!
//! ```text
//! layout vlan "802.1Q tag" {
//!     priority: bits(3);
//!     cfi: bits(1);
//!     id: bits(12);
//!     type: u16 discriminator;
//! }
//! map ethernet { 0x8100 => vlan; }
//! map vlan { 0x0800 => ipv4; }
//! ```
//!
//! Loaded with [`ProtocolRegistry::load_layouts`].

pub mod ast;
pub mod bits;
pub mod bpf;
pub mod chain;
pub mod checksum;
pub mod connector;
pub mod dump;
pub mod error;
pub mod expect;
#[cfg(unix)]
pub mod fd;
pub mod field;
pub mod layout;
pub mod link;
pub mod packet;
pub mod parser;
pub mod pcap;
pub mod protocol;
pub mod protocols;
pub mod registry;
pub mod value;

pub use bpf::{BpfInsn, BpfProgram};
pub use chain::Chain;
pub use connector::{Connector, Frame, PollOutcome, ReplayConnector};
pub use error::Error;
pub use expect::{expect, expect_outcome, ExpectConfig, ExpectOutcome, MatchResult, Pattern};
pub use field::{Compare, Field, FieldKind, MAX_FIXED_BYTES};
pub use layout::Layout;
pub use link::LinkType;
pub use packet::Packet;
pub use parser::parse;
pub use pcap::{PcapConfig, PcapConnector, PcapDumpConnector};
pub use protocol::{Checksummable, Demux, Lengthed, Protocol};
pub use registry::ProtocolRegistry;
pub use value::Value;

pub type Result<T> = std::result::Result<T, Error>;
