//! Capture files: reading pcap/pcapng with `pcap-parser`, writing legacy pcap.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};
use pcap_parser::pcap::LegacyPcapReader;
use pcap_parser::pcapng::{Block, PcapNGReader};
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use tracing::{debug, trace, warn};

use crate::bpf::BpfProgram;
use crate::connector::{Connector, Frame, PollOutcome};
use crate::error::Error;
use crate::link::LinkType;
use crate::registry::ProtocolRegistry;

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapConfig {
    /// Size of the parser's read buffer.
    pub buffer_capacity: usize,
    /// Largest frame written by [`PcapDumpConnector`]; longer frames are truncated.
    pub snaplen: u32,
}

impl Default for PcapConfig {
    fn default() -> Self {
        PcapConfig {
            buffer_capacity: 1 << 20,
            snaplen: 65535,
        }
    }
}

impl PcapConfig {
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn snaplen(mut self, snaplen: u32) -> Self {
        self.snaplen = snaplen;
        self
    }
}

fn pcap_error<I: std::fmt::Debug>(e: PcapError<I>) -> Error {
    Error::Pcap(format!("{:?}", e))
}

enum Event {
    Header(Linktype),
    Interface(Linktype),
    Frame { frame: Frame, interface: usize },
}

/// Reads frames from a pcap or pcapng stream. The link type is taken from the
/// file header (pcap) or the interface description of each frame (pcapng). An
/// unsupported link type in a pcap header is an error; a pcapng interface with
/// one is logged and its frames are skipped.
pub struct PcapConnector {
    reader: Box<dyn PcapReaderIterator + Send>,
    registry: Arc<ProtocolRegistry>,
    interfaces: Vec<Option<LinkType>>,
    link: LinkType,
    pending: Option<Frame>,
    filter: Option<BpfProgram>,
    eof: bool,
    frames: usize,
}

impl PcapConnector {
    pub fn open(path: impl AsRef<Path>, registry: Arc<ProtocolRegistry>, config: PcapConfig) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening capture");
        Self::from_reader(File::open(path)?, registry, config)
    }

    pub fn from_reader<R>(mut reader: R, registry: Arc<ProtocolRegistry>, config: PcapConfig) -> Result<Self, Error>
    where
        R: Read + Send + 'static,
    {
        let mut probe = [0u8; 4];
        reader.read_exact(&mut probe)?;
        let input = Cursor::new(probe).chain(reader);
        let reader: Box<dyn PcapReaderIterator + Send> = if probe == PCAPNG_MAGIC {
            Box::new(PcapNGReader::new(config.buffer_capacity, input).map_err(pcap_error)?)
        } else {
            Box::new(LegacyPcapReader::new(config.buffer_capacity, input).map_err(pcap_error)?)
        };
        let mut conn = PcapConnector {
            reader,
            registry,
            interfaces: Vec::new(),
            link: LinkType::Ethernet,
            pending: None,
            filter: None,
            eof: false,
            frames: 0,
        };
        conn.prime()?;
        Ok(conn)
    }

    pub fn frames_read(&self) -> usize {
        self.frames
    }

    /// Advance to the first frame so the link type is known before anything is read.
    fn prime(&mut self) -> Result<(), Error> {
        self.fill()?;
        debug!(link = ?self.link, "capture link type");
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<Event>, Error> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let event = match block {
                        PcapBlockOwned::LegacyHeader(h) => Some(Event::Header(h.network)),
                        PcapBlockOwned::Legacy(b) => Some(Event::Frame {
                            frame: Frame::new(
                                b.data.to_vec(),
                                Duration::from_secs(b.ts_sec as u64) + Duration::from_micros(b.ts_usec as u64),
                            ),
                            interface: 0,
                        }),
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            Some(Event::Interface(idb.linktype))
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let micros = ((epb.ts_high as u64) << 32) | epb.ts_low as u64;
                            Some(Event::Frame {
                                frame: Frame::new(epb.packet_data().to_vec(), Duration::from_micros(micros)),
                                interface: epb.if_id as usize,
                            })
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => Some(Event::Frame {
                            frame: Frame::new(spb.packet_data().to_vec(), Duration::ZERO),
                            interface: 0,
                        }),
                        PcapBlockOwned::NG(_) => None,
                    };
                    self.reader.consume(offset);
                    if let Some(e) = event {
                        return Ok(Some(e));
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    self.reader.refill().map_err(pcap_error)?;
                }
                Err(e) => return Err(pcap_error(e)),
            }
        }
    }

    /// Make sure a frame that passes the filter is pending, unless the file is done.
    fn fill(&mut self) -> Result<(), Error> {
        while self.pending.is_none() && !self.eof {
            match self.next_event()? {
                Some(Event::Header(lt)) => {
                    let link = LinkType::from_dlt(lt.0)?;
                    self.interfaces.push(Some(link));
                    self.link = link;
                }
                Some(Event::Interface(lt)) => match LinkType::from_dlt(lt.0) {
                    Ok(link) => {
                        self.interfaces.push(Some(link));
                        self.link = link;
                    }
                    Err(e) => {
                        warn!(interface = self.interfaces.len(), dlt = lt.0, error = %e, "skipping frames of interface");
                        self.interfaces.push(None);
                    }
                },
                Some(Event::Frame { frame, interface }) => {
                    match self.interfaces.get(interface) {
                        Some(Some(link)) => self.link = *link,
                        Some(None) => {
                            trace!(interface, len = frame.data.len(), "frame on an unsupported interface");
                            continue;
                        }
                        None if !self.interfaces.is_empty() => {
                            warn!(interface, "frame on an undeclared interface");
                        }
                        None => {}
                    }
                    if self.filter.as_ref().map_or(true, |f| f.accepts(&frame.data)) {
                        self.pending = Some(frame);
                    } else {
                        trace!(len = frame.data.len(), "frame rejected by filter");
                    }
                }
                None => self.eof = true,
            }
        }
        Ok(())
    }
}

impl Connector for PcapConnector {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    fn read(&mut self) -> Result<Option<Frame>, Error> {
        self.fill()?;
        let frame = self.pending.take();
        if frame.is_some() {
            self.frames += 1;
        }
        Ok(frame)
    }

    /// A file never blocks: either a frame is there or the file is done.
    fn poll_read(&mut self, _timeout: Option<Duration>) -> Result<PollOutcome, Error> {
        self.fill()?;
        Ok(if self.pending.is_some() {
            PollOutcome::Ready
        } else {
            PollOutcome::Eof
        })
    }

    fn close(&mut self) -> Result<(), Error> {
        debug!(frames = self.frames, "capture closed");
        self.pending = None;
        self.eof = true;
        Ok(())
    }

    fn set_nonblocking(&mut self, _nonblocking: bool) -> Result<bool, Error> {
        Ok(true)
    }

    fn set_filter(&mut self, filter: BpfProgram) -> Result<(), Error> {
        if let Some(f) = &self.pending {
            if !filter.accepts(&f.data) {
                self.pending = None;
            }
        }
        self.filter = Some(filter);
        Ok(())
    }
}

/// Writes frames to a legacy (microsecond, little-endian) pcap stream.
pub struct PcapDumpConnector<W: Write = BufWriter<File>> {
    out: W,
    registry: Arc<ProtocolRegistry>,
    link: LinkType,
    snaplen: u32,
    frames: usize,
}

impl PcapDumpConnector<BufWriter<File>> {
    pub fn create(
        path: impl AsRef<Path>,
        link: LinkType,
        registry: Arc<ProtocolRegistry>,
        config: PcapConfig,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!(path = %path.display(), ?link, "creating capture");
        Self::new(BufWriter::new(File::create(path)?), link, registry, config)
    }
}

impl<W: Write> PcapDumpConnector<W> {
    /// Write the file header and return a connector appending records to `out`.
    pub fn new(mut out: W, link: LinkType, registry: Arc<ProtocolRegistry>, config: PcapConfig) -> Result<Self, Error> {
        out.write_u32::<LittleEndian>(PCAP_MAGIC)?;
        out.write_u16::<LittleEndian>(2)?;
        out.write_u16::<LittleEndian>(4)?;
        out.write_i32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(config.snaplen)?;
        out.write_u32::<LittleEndian>(link.dlt() as u32)?;
        Ok(PcapDumpConnector {
            out,
            registry,
            link,
            snaplen: config.snaplen,
            frames: 0,
        })
    }

    /// Append a record with the frame's own timestamp.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<usize, Error> {
        let captured = frame.data.len().min(self.snaplen as usize);
        self.out.write_u32::<LittleEndian>(frame.timestamp.as_secs() as u32)?;
        self.out.write_u32::<LittleEndian>(frame.timestamp.subsec_micros())?;
        self.out.write_u32::<LittleEndian>(captured as u32)?;
        self.out.write_u32::<LittleEndian>(frame.data.len() as u32)?;
        self.out.write_all(&frame.data[..captured])?;
        self.frames += 1;
        Ok(captured)
    }

    pub fn frames_written(&self) -> usize {
        self.frames
    }

    pub fn into_inner(mut self) -> Result<W, Error> {
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Connector for PcapDumpConnector<W> {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Record stamped with the current wall-clock time.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        self.write_frame(&Frame::new(bytes.to_vec(), now))
    }

    fn close(&mut self) -> Result<(), Error> {
        debug!(frames = self.frames, "capture written");
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_header_layout() {
        let registry = Arc::new(ProtocolRegistry::new());
        let dump = PcapDumpConnector::new(Vec::new(), LinkType::Ethernet, registry, PcapConfig::default()).unwrap();
        let bytes = dump.into_inner().unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..4], &[0xd4, 0xc3, 0xb2, 0xa1]);
        assert_eq!(&bytes[20..], &[1, 0, 0, 0]);
    }

    #[test]
    fn dump_truncates_to_snaplen() {
        let registry = Arc::new(ProtocolRegistry::new());
        let config = PcapConfig::default().snaplen(4);
        let mut dump = PcapDumpConnector::new(Vec::new(), LinkType::Raw, registry, config).unwrap();
        let n = dump
            .write_frame(&Frame::new(vec![1, 2, 3, 4, 5, 6], Duration::from_micros(1_500_000)))
            .unwrap();
        assert_eq!(n, 4);
        let bytes = dump.into_inner().unwrap();
        assert_eq!(&bytes[24..40], &[1, 0, 0, 0, 0x20, 0xa1, 0x07, 0, 4, 0, 0, 0, 6, 0, 0, 0]);
        assert_eq!(&bytes[40..], &[1, 2, 3, 4]);
    }
}
