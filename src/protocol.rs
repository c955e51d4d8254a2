//! Protocol descriptors: a layout plus its discriminator map and per-protocol hooks.
//!
//! Behaviour that differs between protocols (where the payload starts, how options
//! are parsed, how checksums and lengths are derived) is supplied through the
//! [`Demux`], [`Checksummable`] and [`Lengthed`] traits rather than by subclassing.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::bits::BitReader;
use crate::chain::Chain;
use crate::error::Error;
use crate::layout::Layout;
use crate::packet::Packet;

/// Decoding hooks. The default implementation treats every byte after the
/// decoded fields as payload and looks the discriminator up in the map.
pub trait Demux: Send + Sync {
    /// Parse variable parts of the header (option lists) after the fixed fields
    /// have been decoded. `reader` is positioned just after the layout fields.
    fn decode_options(&self, _packet: &mut Packet, _reader: &mut BitReader<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Byte range of the encapsulated payload. `header_len` is the number of bytes
    /// the header (including options) consumed.
    fn payload_range(&self, _packet: &Packet, bytes: &[u8], header_len: usize) -> Result<Range<usize>, Error> {
        Ok(header_len.min(bytes.len())..bytes.len())
    }

    /// Name of the protocol that follows `packet`, if any.
    fn next_protocol<'p>(&self, protocol: &'p Protocol, packet: &Packet) -> Option<&'p str> {
        let index = protocol.layout().discriminator()?;
        let value = packet.fields()[index].as_u64()?;
        protocol.lookup(value)
    }
}

/// Fills in a checksum field of the packet at `index` from its neighbours in the chain.
pub trait Checksummable: Send + Sync {
    fn calc_checksum(&self, chain: &mut Chain, index: usize) -> Result<(), Error>;
}

/// Fills in length fields of the packet at `index` from the chain that follows it.
pub trait Lengthed: Send + Sync {
    fn calc_length(&self, chain: &mut Chain, index: usize) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Discriminated;

impl Demux for Discriminated {}

#[derive(Clone)]
pub struct Protocol {
    name: String,
    description: String,
    layout: Layout,
    map: Vec<(u64, String)>,
    demux: Arc<dyn Demux>,
    checksum: Option<Arc<dyn Checksummable>>,
    length: Option<Arc<dyn Lengthed>>,
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("layout", &self.layout.name())
            .field("map", &self.map)
            .field("checksum", &self.checksum.is_some())
            .field("length", &self.length.is_some())
            .finish()
    }
}

impl Protocol {
    pub fn new(layout: Layout) -> Self {
        Protocol {
            name: layout.name().to_string(),
            description: String::new(),
            layout,
            map: Vec::new(),
            demux: Arc::new(Discriminated),
            checksum: None,
            length: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a discriminator map entry. Entries keep insertion order, which decides
    /// reverse lookups.
    pub fn map(mut self, value: u64, next: impl Into<String>) -> Self {
        self.map.push((value, next.into()));
        self
    }

    pub fn demux(mut self, demux: impl Demux + 'static) -> Self {
        self.demux = Arc::new(demux);
        self
    }

    pub fn checksum(mut self, hook: impl Checksummable + 'static) -> Self {
        self.checksum = Some(Arc::new(hook));
        self
    }

    pub fn length(mut self, hook: impl Lengthed + 'static) -> Self {
        self.length = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn entries(&self) -> &[(u64, String)] {
        &self.map
    }

    pub(crate) fn push_entry(&mut self, value: u64, next: String) {
        self.map.push((value, next));
    }

    /// Protocol selected by a discriminator value.
    pub fn lookup(&self, value: u64) -> Option<&str> {
        self.map
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, n)| n.as_str())
    }

    /// First discriminator value mapping to `next`.
    pub fn reverse_lookup(&self, next: &str) -> Option<u64> {
        self.map.iter().find(|(_, n)| n == next).map(|(v, _)| *v)
    }

    pub fn demuxer(&self) -> &Arc<dyn Demux> {
        &self.demux
    }

    pub fn checksum_hook(&self) -> Option<Arc<dyn Checksummable>> {
        self.checksum.clone()
    }

    pub fn length_hook(&self) -> Option<Arc<dyn Lengthed>> {
        self.length.clone()
    }

    /// Fresh packet of this protocol with default field values.
    pub fn packet(self: &Arc<Self>) -> Packet {
        Packet::new(Arc::clone(self))
    }
}
