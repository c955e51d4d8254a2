//! A packet: one instantiated layout with live field values.

use std::fmt;
use std::ops::Div;
use std::sync::Arc;
use std::time::Duration;

use crate::bits::{BitReader, BitWriter};
use crate::chain::Chain;
use crate::error::Error;
use crate::field::{Compare, Field};
use crate::layout::Layout;
use crate::protocol::Protocol;
use crate::value::Value;

/// Field values are cached as encoded bytes; any mutation marks the cache dirty and
/// the next [`bytes`](Packet::bytes) call re-encodes.
#[derive(Debug, Clone)]
pub struct Packet {
    protocol: Arc<Protocol>,
    fields: Vec<Field>,
    discriminator_initialized: bool,
    bytes: Vec<u8>,
    dirty: bool,
    data: Option<Box<Packet>>,
    timestamp: Option<Duration>,
}

impl Packet {
    pub fn new(protocol: Arc<Protocol>) -> Self {
        let fields = protocol.layout().fields().to_vec();
        Packet {
            protocol,
            fields,
            discriminator_initialized: false,
            bytes: Vec::new(),
            dirty: true,
            data: None,
            timestamp: None,
        }
    }

    /// Build a packet and assign each named value in turn.
    pub fn with_values<I, K, V>(protocol: Arc<Protocol>, values: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut p = Packet::new(protocol);
        for (k, v) in values {
            p.set(k.as_ref(), v)?;
        }
        Ok(p)
    }

    pub fn from_bytes(protocol: Arc<Protocol>, bytes: &[u8]) -> Result<Self, Error> {
        let mut p = Packet::new(protocol);
        p.decode(bytes)?;
        Ok(p)
    }

    pub fn name(&self) -> &str {
        self.protocol.name()
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn layout(&self) -> &Layout {
        self.protocol.layout()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn index(&self, name: &str) -> Result<usize, Error> {
        self.layout()
            .index_of(name)
            .ok_or_else(|| Error::UnknownField(format!("{}.{}", self.name(), name)))
    }

    pub fn field(&self, name: &str) -> Result<&Field, Error> {
        let i = self.index(name)?;
        Ok(&self.fields[i])
    }

    /// Mutable access for structural edits (option lists, TLV types). Marks the
    /// packet for re-encoding.
    pub fn field_mut(&mut self, name: &str) -> Result<&mut Field, Error> {
        let i = self.index(name)?;
        self.dirty = true;
        Ok(&mut self.fields[i])
    }

    pub fn get(&self, name: &str) -> Result<Value, Error> {
        Ok(self.field(name)?.value())
    }

    pub fn get_int(&self, name: &str) -> Result<u64, Error> {
        let f = self.field(name)?;
        f.as_u64().ok_or_else(|| Error::FieldType {
            field: name.to_string(),
            expected: "integer",
        })
    }

    pub fn get_bytes(&self, name: &str) -> Result<Vec<u8>, Error> {
        match self.get(name)? {
            Value::Bytes(b) => Ok(b),
            _ => Err(Error::FieldType {
                field: name.to_string(),
                expected: "bytes",
            }),
        }
    }

    /// Bounds-checked assignment. Setting the discriminator explicitly stops
    /// composition from overwriting it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let i = self.index(name)?;
        self.fields[i].set(value.into())?;
        if self.layout().discriminator() == Some(i) {
            self.discriminator_initialized = true;
        }
        self.dirty = true;
        Ok(())
    }

    pub fn discriminator_initialized(&self) -> bool {
        self.discriminator_initialized
    }

    /// Re-encode the fields and refresh the cached bytes.
    pub fn encode(&mut self) -> Result<&[u8], Error> {
        for f in &mut self.fields {
            f.sync_lengths();
        }
        self.bytes = self.encode_fields()?;
        self.dirty = false;
        Ok(&self.bytes)
    }

    fn encode_fields(&self) -> Result<Vec<u8>, Error> {
        let mut w = BitWriter::new();
        for f in &self.fields {
            f.encode(&mut w)?;
        }
        Ok(w.finish())
    }

    /// The encoded header, re-encoding first if any field changed.
    pub fn bytes(&mut self) -> Result<&[u8], Error> {
        if self.dirty {
            self.encode()?;
        }
        Ok(&self.bytes)
    }

    /// Encoded header without touching the cache.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        if self.dirty {
            self.encode_fields()
        } else {
            Ok(self.bytes.clone())
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Decode fields from `bytes` in layout order, then any protocol options.
    /// Decoding stops early once the buffer is exhausted; fields not reached keep
    /// their defaults. Returns the number of header bytes consumed.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        let mut r = BitReader::new(bytes);
        for f in &mut self.fields {
            if r.is_exhausted() {
                break;
            }
            f.decode(&mut r)?;
        }
        let demux = Arc::clone(self.protocol.demuxer());
        demux.decode_options(self, &mut r)?;
        self.dirty = true;
        Ok(r.consumed())
    }

    /// Template match: `self` is the template. Wildcarded fields are skipped,
    /// bytes are not compared.
    pub fn matches(&self, other: &Packet) -> bool {
        self.name() == other.name()
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(t, c)| t.matches(c))
    }

    pub fn set_compare(&mut self, name: &str, compare: Compare) -> Result<(), Error> {
        let i = self.index(name)?;
        self.fields[i].set_comparator(compare);
        Ok(())
    }

    pub fn wildcard(&mut self, names: &[&str]) -> Result<(), Error> {
        for n in names {
            self.set_compare(n, Compare::Wildcard)?;
        }
        Ok(())
    }

    pub fn wildcard_all(&mut self) {
        for f in &mut self.fields {
            f.set_comparator(Compare::Wildcard);
        }
    }

    pub fn unwildcard_all(&mut self) {
        for f in &mut self.fields {
            f.set_comparator(Compare::Equal);
        }
    }

    /// Wildcard every field except `names`.
    pub fn wildcard_except(&mut self, names: &[&str]) -> Result<(), Error> {
        for n in names {
            self.index(n)?;
        }
        for f in &mut self.fields {
            if !names.contains(&f.name()) {
                f.set_comparator(Compare::Wildcard);
            }
        }
        Ok(())
    }

    /// Set the discriminator from the protocol of the packet about to follow this
    /// one: the first map entry naming it wins. Leaves an explicitly assigned
    /// discriminator alone. Returns true if the field changed.
    pub fn rdiscriminate(&mut self, next: &Packet) -> Result<bool, Error> {
        if self.discriminator_initialized {
            return Ok(false);
        }
        let Some(i) = self.layout().discriminator() else {
            return Ok(false);
        };
        let Some(value) = self.protocol.reverse_lookup(next.name()) else {
            return Ok(false);
        };
        self.fields[i].set(Value::Int(value as i128))?;
        self.dirty = true;
        Ok(true)
    }

    pub fn data(&self) -> Option<&Packet> {
        self.data.as_deref()
    }

    pub fn data_mut(&mut self) -> Option<&mut Packet> {
        self.data.as_deref_mut()
    }

    pub fn set_data(&mut self, data: Option<Packet>) {
        self.data = data.map(Box::new);
    }

    pub fn take_data(&mut self) -> Option<Packet> {
        self.data.take().map(|b| *b)
    }

    /// Flatten this packet and its encapsulated packets into a chain.
    pub fn into_chain(mut self) -> Chain {
        let mut packets = Vec::new();
        loop {
            let next = self.take_data();
            packets.push(self);
            match next {
                Some(p) => self = p,
                None => break,
            }
        }
        Chain::from_packets(packets)
    }

    /// Header size in bytes as currently laid out.
    pub fn sizeof(&self) -> usize {
        let bits: u32 = self.fields.iter().map(Field::width).sum();
        bits.div_ceil(8) as usize
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, ts: Option<Duration>) {
        self.timestamp = ts;
    }
}

/// Same protocol, same encoded bytes, same field values.
impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        if self.name() != other.name() {
            return false;
        }
        match (self.to_bytes(), other.to_bytes()) {
            (Ok(a), Ok(b)) if a == b => {}
            _ => return false,
        }
        self.fields == other.fields
    }
}

/// `a / b`: start a chain from `a` and append `b`, filling `a`'s discriminator.
impl Div<Packet> for Packet {
    type Output = Chain;

    fn div(self, rhs: Packet) -> Chain {
        self.into_chain() / rhs
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::dump::write_packet(f, self)
    }
}
