//! Protocol registry: the dispatch tables used to decode raw bytes into chains.
//!
//! A registry is built once (built-in protocols, user layouts), then shared behind an
//! `Arc` by every decoder and connector that needs it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::chain::Chain;
use crate::error::Error;
use crate::link::LinkType;
use crate::packet::Packet;
use crate::protocol::Protocol;
use crate::protocols;

#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    protocols: HashMap<String, Arc<Protocol>>,
    payload: Arc<Protocol>,
    lenient: bool,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolRegistry {
    /// Registry knowing only the opaque `payload` protocol.
    pub fn new() -> Self {
        let payload = Arc::new(protocols::payload::protocol());
        let mut protocols = HashMap::new();
        protocols.insert(payload.name().to_string(), Arc::clone(&payload));
        ProtocolRegistry {
            protocols,
            payload,
            lenient: false,
        }
    }

    /// Registry with every built-in protocol.
    pub fn builtin() -> Self {
        let mut r = Self::new();
        for p in protocols::all() {
            r.register(p);
        }
        r
    }

    /// When lenient, a layer that fails to decode becomes an opaque payload packet
    /// instead of failing the whole chain.
    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Add or replace a protocol.
    pub fn register(&mut self, protocol: Protocol) -> Arc<Protocol> {
        let p = Arc::new(protocol);
        self.protocols.insert(p.name().to_string(), Arc::clone(&p));
        p
    }

    /// Add discriminator map entries to an already registered protocol.
    pub fn extend_map(&mut self, protocol: &str, entries: &[(u64, String)]) -> Result<(), Error> {
        let existing = self.get(protocol)?;
        let mut updated = (*existing).clone();
        for (v, n) in entries {
            updated.push_entry(*v, n.clone());
        }
        self.register(updated);
        Ok(())
    }

    /// Parse layout-language source and register every layout and map it declares.
    pub fn load_layouts(&mut self, source: &str) -> Result<Vec<Arc<Protocol>>, Error> {
        let file = crate::parser::parse(source)?;
        file.install(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.protocols.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Protocol>, Error> {
        self.protocols
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProtocol(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.protocols.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    /// Fresh packet with default values.
    pub fn packet(&self, name: &str) -> Result<Packet, Error> {
        Ok(Packet::new(self.get(name)?))
    }

    /// Decode `bytes` as `name`, following discriminators into nested packets.
    pub fn decode(&self, name: &str, bytes: &[u8]) -> Result<Packet, Error> {
        let mut layers = self.decode_layers(self.get(name)?, bytes)?;
        let mut inner: Option<Packet> = None;
        while let Some(mut p) = layers.pop() {
            p.set_data(inner.take());
            inner = Some(p);
        }
        inner.ok_or_else(|| Error::Unpack(format!("{}: empty buffer", name)))
    }

    pub fn decode_chain(&self, name: &str, bytes: &[u8]) -> Result<Chain, Error> {
        let layers = self.decode_layers(self.get(name)?, bytes)?;
        Ok(Chain::from_packets(layers))
    }

    /// Decode a captured frame of the given link type.
    pub fn decode_link(&self, link: LinkType, bytes: &[u8], timestamp: Option<Duration>) -> Result<Chain, Error> {
        let layers = self.decode_layers(self.get(link.protocol())?, bytes)?;
        let mut chain = Chain::from_packets(layers);
        if let Some(first) = chain.get_mut(0) {
            first.set_timestamp(timestamp);
        }
        Ok(chain)
    }

    fn decode_layers(&self, first: Arc<Protocol>, bytes: &[u8]) -> Result<Vec<Packet>, Error> {
        let mut layers = Vec::new();
        let mut current = Some(first);
        let mut rest = bytes;
        while let Some(proto) = current.take() {
            if rest.is_empty() {
                break;
            }
            let (packet, payload) = match self.decode_layer(&proto, rest) {
                Ok(v) => v,
                Err(e) if self.lenient && !layers.is_empty() => {
                    warn!(protocol = proto.name(), error = %e, "layer decode failed, keeping payload");
                    layers.push(self.opaque(rest)?);
                    rest = &[];
                    break;
                }
                Err(e) => return Err(e),
            };
            trace!(protocol = proto.name(), header = rest.len() - payload.len(), "decoded layer");
            current = proto
                .demuxer()
                .next_protocol(&proto, &packet)
                .and_then(|n| self.protocols.get(n).cloned());
            layers.push(packet);
            rest = payload;
        }
        if !rest.is_empty() {
            layers.push(self.opaque(rest)?);
        }
        Ok(layers)
    }

    fn decode_layer<'b>(&self, proto: &Arc<Protocol>, bytes: &'b [u8]) -> Result<(Packet, &'b [u8]), Error> {
        let mut packet = Packet::new(Arc::clone(proto));
        let header_len = packet.decode(bytes)?;
        let range = proto.demuxer().payload_range(&packet, bytes, header_len)?;
        if range.start > range.end || range.end > bytes.len() {
            return Err(Error::Unpack(format!(
                "{}: payload {:?} outside the {} bytes available",
                proto.name(),
                range,
                bytes.len()
            )));
        }
        Ok((packet, &bytes[range]))
    }

    fn opaque(&self, bytes: &[u8]) -> Result<Packet, Error> {
        Packet::from_bytes(Arc::clone(&self.payload), bytes)
    }
}
