//! Connectors: sources and sinks of link-layer frames.
//!
//! The [`Connector`] trait is the contract [`expect`](crate::expect::expect) runs on.
//! Every method a concrete connector leaves alone fails with
//! [`Error::ConnNotImplemented`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::bpf::BpfProgram;
use crate::chain::Chain;
use crate::error::Error;
use crate::link::LinkType;
use crate::packet::Packet;
use crate::registry::ProtocolRegistry;

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    /// Capture time, relative to the epoch of the source.
    pub timestamp: Duration,
}

impl Frame {
    pub fn new(data: Vec<u8>, timestamp: Duration) -> Self {
        Frame { data, timestamp }
    }
}

/// Result of waiting for readability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    Timeout,
    Eof,
}

pub trait Connector {
    /// Link type of the frames this connector delivers.
    fn link_type(&self) -> LinkType;

    /// Registry used to decode frames into chains.
    fn registry(&self) -> &ProtocolRegistry;

    /// Protocol a delivered frame is decoded as. Link-layer connectors start at
    /// their link type's protocol; stream sockets deliver bare payload.
    fn first_protocol(&self) -> &str {
        self.link_type().protocol()
    }

    /// Next frame. `None` means nothing is available right now (non-blocking) or
    /// the source is exhausted; [`poll_read`](Connector::poll_read) tells the two apart.
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        Err(Error::ConnNotImplemented("read"))
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<usize, Error> {
        Err(Error::ConnNotImplemented("write"))
    }

    /// Wait up to `timeout` (forever with `None`) for a frame to become readable.
    fn poll_read(&mut self, _timeout: Option<Duration>) -> Result<PollOutcome, Error> {
        Err(Error::ConnNotImplemented("poll_read"))
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Switch blocking mode and return the previous mode.
    fn set_nonblocking(&mut self, _nonblocking: bool) -> Result<bool, Error> {
        Ok(false)
    }

    /// Install a filter; frames it rejects are never delivered.
    fn set_filter(&mut self, _filter: BpfProgram) -> Result<(), Error> {
        Err(Error::ConnNotImplemented("set_filter"))
    }

    /// Next frame decoded as a nested packet.
    fn read_packet(&mut self) -> Result<Option<Packet>, Error> {
        let Some(frame) = self.read()? else {
            return Ok(None);
        };
        let mut packet = self.registry().decode(self.first_protocol(), &frame.data)?;
        packet.set_timestamp(Some(frame.timestamp));
        Ok(Some(packet))
    }

    /// Next frame decoded as a chain.
    fn read_chain(&mut self) -> Result<Option<Chain>, Error> {
        let Some(frame) = self.read()? else {
            return Ok(None);
        };
        let mut chain = self.registry().decode_chain(self.first_protocol(), &frame.data)?;
        if let Some(first) = chain.get_mut(0) {
            first.set_timestamp(Some(frame.timestamp));
        }
        Ok(Some(chain))
    }

    /// Encode `chain` and write it as one frame.
    fn write_chain(&mut self, chain: &mut Chain) -> Result<usize, Error> {
        let bytes = chain.bytes()?.to_vec();
        self.write(&bytes)
    }

    /// Up to `n` chains that are already available (one chain when `n` is 0). The
    /// first read may block; the rest are taken only while the source is ready.
    fn try_read_n_chains(&mut self, n: usize) -> Result<Vec<Chain>, Error> {
        let n = n.max(1);
        let mut chains = Vec::with_capacity(n);
        while chains.len() < n {
            if !chains.is_empty() && self.poll_read(Some(Duration::ZERO))? != PollOutcome::Ready {
                break;
            }
            match self.read_chain()? {
                Some(c) => chains.push(c),
                None => break,
            }
        }
        trace!(requested = n, read = chains.len(), "read batch");
        Ok(chains)
    }
}

#[derive(Debug, Clone)]
enum Script {
    Frame(Frame),
    Gap(Duration),
}

/// Scripted connector: frames and idle gaps replayed in order, with written frames
/// recorded for inspection.
#[derive(Debug)]
pub struct ReplayConnector {
    registry: Arc<ProtocolRegistry>,
    link: LinkType,
    script: VecDeque<Script>,
    /// When the gap at the head of the script ends, once it has been reached.
    gap_until: Option<Instant>,
    clock: Duration,
    hold_open: bool,
    nonblocking: bool,
    filter: Option<BpfProgram>,
    frames_read: usize,
    written: Vec<Vec<u8>>,
    closed: bool,
}

impl ReplayConnector {
    pub fn new(registry: Arc<ProtocolRegistry>, link: LinkType) -> Self {
        ReplayConnector {
            registry,
            link,
            script: VecDeque::new(),
            gap_until: None,
            clock: Duration::ZERO,
            hold_open: false,
            nonblocking: false,
            filter: None,
            frames_read: 0,
            written: Vec::new(),
            closed: false,
        }
    }

    /// Queue a frame stamped with the script clock.
    pub fn push_frame(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        let frame = Frame::new(data.into(), self.clock);
        self.script.push_back(Script::Frame(frame));
        self
    }

    /// Queue an idle period; frames after it become readable once it has elapsed.
    pub fn push_gap(&mut self, gap: Duration) -> &mut Self {
        self.clock += gap;
        self.script.push_back(Script::Gap(gap));
        self
    }

    pub fn push_chain(&mut self, chain: &mut Chain) -> Result<&mut Self, Error> {
        let bytes = chain.bytes()?.to_vec();
        Ok(self.push_frame(bytes))
    }

    /// Once the script is exhausted, behave like an idle live source (time out)
    /// instead of reporting end of file.
    pub fn hold_open(&mut self, hold: bool) -> &mut Self {
        self.hold_open = hold;
        self
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    pub fn remaining(&self) -> usize {
        self.script
            .iter()
            .filter(|s| matches!(s, Script::Frame(_)))
            .count()
    }

    fn accepted(&self, frame: &Frame) -> bool {
        self.filter.as_ref().map_or(true, |f| f.accepts(&frame.data))
    }

    /// Drop filtered frames and elapsed gaps from the head of the script. Returns the
    /// time left on a pending gap, if the head is one.
    fn settle(&mut self) -> Option<Duration> {
        loop {
            match self.script.front() {
                Some(Script::Gap(gap)) => {
                    let until = *self.gap_until.get_or_insert_with(|| Instant::now() + *gap);
                    let left = until.saturating_duration_since(Instant::now());
                    if !left.is_zero() {
                        return Some(left);
                    }
                    self.script.pop_front();
                    self.gap_until = None;
                }
                Some(Script::Frame(f)) if !self.accepted(f) => {
                    trace!(len = f.data.len(), "frame rejected by filter");
                    self.script.pop_front();
                }
                _ => return None,
            }
        }
    }
}

impl Connector for ReplayConnector {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    fn read(&mut self) -> Result<Option<Frame>, Error> {
        if self.closed {
            return Ok(None);
        }
        while let Some(left) = self.settle() {
            if self.nonblocking {
                return Ok(None);
            }
            thread::sleep(left);
        }
        match self.script.pop_front() {
            Some(Script::Frame(f)) => {
                self.frames_read += 1;
                Ok(Some(f))
            }
            _ => Ok(None),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.written.push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn poll_read(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, Error> {
        if self.closed {
            return Ok(PollOutcome::Eof);
        }
        let started = Instant::now();
        loop {
            if let Some(left) = self.settle() {
                let budget = timeout.map(|t| t.saturating_sub(started.elapsed()));
                match budget {
                    Some(b) if b < left => {
                        thread::sleep(b);
                        return Ok(PollOutcome::Timeout);
                    }
                    _ => {
                        thread::sleep(left);
                        continue;
                    }
                }
            }
            if !self.script.is_empty() {
                return Ok(PollOutcome::Ready);
            }
            if !self.hold_open {
                return Ok(PollOutcome::Eof);
            }
            return match timeout {
                Some(t) => {
                    thread::sleep(t.saturating_sub(started.elapsed()));
                    Ok(PollOutcome::Timeout)
                }
                // Nothing will ever arrive.
                None => Ok(PollOutcome::Eof),
            };
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        debug!(frames_read = self.frames_read, written = self.written.len(), "replay closed");
        self.closed = true;
        Ok(())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<bool, Error> {
        Ok(std::mem::replace(&mut self.nonblocking, nonblocking))
    }

    fn set_filter(&mut self, filter: BpfProgram) -> Result<(), Error> {
        self.filter = Some(filter);
        Ok(())
    }
}
