//! Encapsulation stacks of packets.

use std::fmt;
use std::ops::{Div, Index};
use std::time::Duration;

use tracing::warn;

use crate::checksum::internet_checksum;
use crate::error::Error;
use crate::packet::Packet;
use crate::value::Value;

/// Ordered packets, outermost first. The chain's bytes are the concatenation of
/// each packet's encoding and are recomputed lazily after any change.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    packets: Vec<Packet>,
    bytes: Vec<u8>,
    dirty: bool,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_packets(packets: Vec<Packet>) -> Self {
        Chain {
            packets,
            bytes: Vec::new(),
            dirty: true,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn get(&self, index: usize) -> Option<&Packet> {
        self.packets.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Packet> {
        self.dirty = true;
        self.packets.get_mut(index)
    }

    pub fn last(&self) -> Option<&Packet> {
        self.packets.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.packets.iter()
    }

    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }

    pub fn append(&mut self, packet: Packet) {
        self.packets.push(packet);
        self.dirty = true;
    }

    /// Insert `packet` right after the packet at `index`, filling that packet's
    /// discriminator from the newcomer.
    pub fn insert_after(&mut self, index: usize, packet: Packet) -> Result<(), Error> {
        let prev = self
            .packets
            .get_mut(index)
            .ok_or(Error::PacketNotInChain(index))?;
        prev.rdiscriminate(&packet)?;
        self.packets.insert(index + 1, packet);
        self.dirty = true;
        Ok(())
    }

    pub fn find_first_of(&self, protocol: &str) -> Option<usize> {
        self.packets.iter().position(|p| p.name() == protocol)
    }

    /// Nearest packet of `protocol` before `index`. With `adjacent`, only the one
    /// or two packets directly in front are examined.
    pub fn find_preceding(&self, index: usize, protocol: &str, adjacent: bool) -> Option<usize> {
        let end = index.min(self.packets.len());
        let start = if adjacent { end.saturating_sub(2) } else { 0 };
        (start..end).rev().find(|&i| self.packets[i].name() == protocol)
    }

    /// Encoded bytes of every packet strictly after `index`.
    pub fn collate_following(&self, index: usize) -> Result<Vec<u8>, Error> {
        if index >= self.packets.len() {
            return Err(Error::PacketNotInChain(index));
        }
        let mut out = Vec::new();
        for p in &self.packets[index + 1..] {
            out.extend_from_slice(&p.to_bytes()?);
        }
        Ok(out)
    }

    /// Re-encode every packet and rebuild the chain bytes.
    pub fn encode(&mut self) -> Result<&[u8], Error> {
        let mut out = Vec::new();
        for p in &mut self.packets {
            out.extend_from_slice(p.bytes()?);
        }
        self.bytes = out;
        self.dirty = false;
        Ok(&self.bytes)
    }

    pub fn bytes(&mut self) -> Result<&[u8], Error> {
        if self.dirty || self.packets.iter().any(Packet::is_dirty) {
            self.encode()?;
        }
        Ok(&self.bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        for p in &self.packets {
            out.extend_from_slice(&p.to_bytes()?);
        }
        Ok(out)
    }

    /// Run every checksum hook, innermost packet first.
    pub fn calc_checksums(&mut self) -> Result<(), Error> {
        for i in (0..self.packets.len()).rev() {
            if let Some(hook) = self.packets[i].protocol().checksum_hook() {
                hook.calc_checksum(self, i)?;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Run every length hook, innermost packet first.
    pub fn calc_lengths(&mut self) -> Result<(), Error> {
        for i in (0..self.packets.len()).rev() {
            if let Some(hook) = self.packets[i].protocol().length_hook() {
                hook.calc_length(self, i)?;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Lengths, then checksums, then a fresh encoding.
    pub fn fixup(&mut self) -> Result<&[u8], Error> {
        self.calc_lengths()?;
        self.calc_checksums()?;
        self.encode()
    }

    /// Template match: `self` is the template and may be shorter than `other`;
    /// each template packet is matched against the packet at the same position.
    pub fn matches(&self, other: &Chain) -> bool {
        self.packets.len() <= other.packets.len()
            && self
                .packets
                .iter()
                .zip(&other.packets)
                .all(|(t, c)| t.matches(c))
    }

    /// Index of the first packet of the template's protocol that it matches.
    pub fn contains(&self, template: &Packet) -> Option<usize> {
        self.packets
            .iter()
            .position(|p| p.name() == template.name() && template.matches(p))
    }

    pub fn wildcard_mask(&mut self, wildcard: bool) {
        for p in &mut self.packets {
            if wildcard {
                p.wildcard_all();
            } else {
                p.unwildcard_all();
            }
        }
    }

    /// RFC 792 checksum over the whole chain after zeroing every `checksum` field.
    pub fn chain_checksum(&mut self) -> Result<u16, Error> {
        for p in &mut self.packets {
            if p.layout().index_of("checksum").is_some() {
                p.set("checksum", Value::Int(0))?;
            }
        }
        Ok(internet_checksum(self.bytes()?))
    }

    /// Capture time of the outermost packet.
    pub fn timestamp(&self) -> Option<Duration> {
        self.packets.first().and_then(Packet::timestamp)
    }
}

/// Same number of packets, pairwise equal.
impl PartialEq for Chain {
    fn eq(&self, other: &Self) -> bool {
        self.packets == other.packets
    }
}

/// `chain / packet`: append, filling the current tail's discriminator.
impl Div<Packet> for Chain {
    type Output = Chain;

    fn div(mut self, rhs: Packet) -> Chain {
        if let Some(last) = self.packets.last_mut() {
            if let Err(e) = last.rdiscriminate(&rhs) {
                warn!(protocol = last.name(), next = rhs.name(), error = %e, "discriminator not set");
            }
        }
        self.append(rhs);
        self
    }
}

impl Index<usize> for Chain {
    type Output = Packet;

    fn index(&self, index: usize) -> &Packet {
        &self.packets[index]
    }
}

impl IntoIterator for Chain {
    type Item = Packet;
    type IntoIter = std::vec::IntoIter<Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.into_iter()
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a Packet;
    type IntoIter = std::slice::Iter<'a, Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.iter()
    }
}

impl From<Packet> for Chain {
    fn from(p: Packet) -> Self {
        p.into_chain()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::dump::write_chain(f, self)
    }
}
