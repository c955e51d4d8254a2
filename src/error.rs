//! Error taxonomy shared by the codec, chains, connectors and the matcher.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Value or byte string does not fit the field; raised at assignment time.
    #[error("Field bounds: {field}: {reason}")]
    FieldBounds { field: String, reason: String },
    /// Byte-aligned field met a cursor in the middle of a byte.
    #[error("Field alignment: {0} must start on a byte boundary")]
    FieldAlignment(String),
    #[error("Layout {layout}: only one discriminator allowed, found {first} and {second}")]
    LayoutDiscriminator {
        layout: String,
        first: String,
        second: String,
    },
    #[error("Invalid layout {layout}: {reason}")]
    InvalidLayout { layout: String, reason: String },
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),
    /// The assigned value has the wrong shape (bytes for an integer field, ...).
    #[error("Field type: {field}: expected {expected}")]
    FieldType { field: String, expected: &'static str },
    #[error("Unpack: {0}")]
    Unpack(String),
    #[error("Packet {0} is not part of this chain")]
    PacketNotInChain(usize),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("End of file")]
    Eof,
    #[error("Limit of {0} packets reached")]
    LimitReached(usize),
    #[error("Connector does not implement {0}")]
    ConnNotImplemented(&'static str),
    #[error("BPF: branch displacement {displacement} at instruction {index} exceeds 255")]
    BpfBranchOverflow { index: usize, displacement: usize },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Pcap: {0}")]
    Pcap(String),
}

impl Error {
    pub(crate) fn bounds(field: &str, reason: impl Into<String>) -> Self {
        Error::FieldBounds {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the three terminal conditions of [`expect`](crate::expect::expect).
    pub fn is_expect_terminal(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Eof | Error::LimitReached(_))
    }
}
