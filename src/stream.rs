//! Byte-stream wrapper that watches chunk boundaries as the codec reads.
//!
//! The codec does not expose everything the decoder needs: the order of text
//! chunks relative to the image data, the oFFs chunk, the iCCP profile name
//! and the private animation chunks. [`ChunkTap`] passes bytes through
//! unchanged and records those details in a shared [`ChunkLog`].

use std::cell::RefCell;
use std::io::{self, Read};
use std::rc::Rc;

/// The eight magic bytes that open every PNG stream.
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Chunks larger than this are not captured; only their type is logged.
const CAPTURE_LIMIT: usize = 256;

/// Frame disposal carried by a gIFg chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Disposal {
    #[default]
    Unspecified,
    /// Leave the frame in place.
    Keep,
    /// Restore the background.
    RestoreBackground,
    /// Restore the previous frame.
    RestorePrevious,
}

impl Disposal {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Disposal::Unspecified => 0,
            Disposal::Keep => 1,
            Disposal::RestoreBackground => 2,
            Disposal::RestorePrevious => 3,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Self {
        match b {
            1 => Disposal::Keep,
            2 => Disposal::RestoreBackground,
            3 => Disposal::RestorePrevious,
            _ => Disposal::Unspecified,
        }
    }
}

/// Looping and timing hints for consumers that assemble PNG frames into an
/// animation. Single-image readers ignore them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnimationHints {
    /// Loop count from gIFx; `Some(0)` loops forever.
    pub looping: Option<u16>,
    /// Frame delay from gIFg, in milliseconds with 10 ms granularity.
    pub frame_delay_ms: Option<u32>,
    pub disposal: Disposal,
}

impl AnimationHints {
    pub fn is_empty(&self) -> bool {
        *self == AnimationHints::default()
    }

    /// gIFx payload: application id, then the loop count little-endian.
    pub(crate) fn gifx_payload(&self) -> Option<[u8; 13]> {
        let looping = self.looping?;
        let mut data = [0u8; 13];
        data[..11].copy_from_slice(b"NETSCAPE2.0");
        data[11..].copy_from_slice(&looping.to_le_bytes());
        Some(data)
    }

    /// gIFg payload: disposal, no user input, delay in hundredths of a
    /// second big-endian.
    pub(crate) fn gifg_payload(&self) -> Option<[u8; 4]> {
        if self.frame_delay_ms.is_none() && self.disposal == Disposal::Unspecified {
            return None;
        }
        let hundredths = (self.frame_delay_ms.unwrap_or(0) / 10).min(u32::from(u16::MAX)) as u16;
        let [hi, lo] = hundredths.to_be_bytes();
        Some([self.disposal.to_byte(), 0, hi, lo])
    }
}

/// Which text chunk type was seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TextKind {
    Latin1,
    Compressed,
    International,
}

/// One text chunk sighting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TextSighting {
    pub kind: TextKind,
    /// Chunk precedes the first IDAT.
    pub before_image: bool,
}

/// Pixel offset from oFFs. `unit` 0 is pixels, 1 is micrometres.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkOffset {
    pub x: i32,
    pub y: i32,
    pub unit: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ChunkLog {
    pub texts: Vec<TextSighting>,
    pub offset: Option<ChunkOffset>,
    pub icc_name: Option<String>,
    pub animation: AnimationHints,
    pub image_seen: bool,
    pub end_seen: bool,
}

impl ChunkLog {
    fn record(&mut self, kind: &[u8; 4], data: &[u8]) {
        match kind {
            b"IDAT" => self.image_seen = true,
            b"IEND" => self.end_seen = true,
            b"tEXt" | b"zTXt" | b"iTXt" => {
                let kind = match kind {
                    b"tEXt" => TextKind::Latin1,
                    b"zTXt" => TextKind::Compressed,
                    _ => TextKind::International,
                };
                self.texts.push(TextSighting {
                    kind,
                    before_image: !self.image_seen,
                });
            }
            b"oFFs" if data.len() >= 9 => {
                let x = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let y = i32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                self.offset = Some(ChunkOffset { x, y, unit: data[8] });
            }
            b"iCCP" => {
                let name = data.split(|&b| b == 0).next().unwrap_or_default();
                // Latin-1 maps byte-for-byte onto the first 256 code points
                let name: String = name.iter().map(|&b| char::from(b)).collect();
                if !name.is_empty() {
                    self.icc_name = Some(name);
                }
            }
            b"gIFx" if data.len() >= 13 && data.starts_with(b"NETSCAPE2.0") => {
                self.animation.looping = Some(u16::from_le_bytes([data[11], data[12]]));
            }
            b"gIFg" if data.len() >= 4 => {
                self.animation.disposal = Disposal::from_byte(data[0]);
                let hundredths = u16::from_be_bytes([data[2], data[3]]);
                self.animation.frame_delay_ms = Some(u32::from(hundredths) * 10);
            }
            _ => {}
        }
    }
}

fn wants_capture(kind: &[u8; 4]) -> bool {
    matches!(kind, b"oFFs" | b"iCCP" | b"gIFx" | b"gIFg")
}

#[derive(Clone, Debug)]
enum ScanState {
    Signature { remaining: usize },
    Header { buf: [u8; 8], filled: usize },
    Body {
        kind: [u8; 4],
        remaining: u64,
        capture: Option<Vec<u8>>,
    },
    Crc { remaining: usize },
}

/// Pass-through reader that logs chunk details into a [`ChunkLog`].
pub(crate) struct ChunkTap<R> {
    inner: R,
    /// Bytes read ahead by [`ChunkTap::peek_signature`], replayed first.
    replay: Vec<u8>,
    replay_pos: usize,
    state: ScanState,
    log: Rc<RefCell<ChunkLog>>,
}

impl<R: Read> ChunkTap<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            replay: Vec::new(),
            replay_pos: 0,
            state: ScanState::Signature {
                remaining: PNG_SIGNATURE.len(),
            },
            log: Rc::new(RefCell::new(ChunkLog::default())),
        }
    }

    pub(crate) fn log(&self) -> Rc<RefCell<ChunkLog>> {
        Rc::clone(&self.log)
    }

    /// Read the first eight bytes without consuming them. Returns fewer
    /// bytes only at end of stream.
    pub(crate) fn peek_signature(&mut self) -> io::Result<&[u8]> {
        while self.replay.len() < PNG_SIGNATURE.len() {
            let mut buf = [0u8; 8];
            let want = PNG_SIGNATURE.len() - self.replay.len();
            match self.inner.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => self.replay.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(&self.replay[self.replay_pos..])
    }

    fn scan(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            match &mut self.state {
                ScanState::Signature { remaining } => {
                    let n = (*remaining).min(bytes.len());
                    *remaining -= n;
                    bytes = &bytes[n..];
                    if *remaining == 0 {
                        self.state = ScanState::Header {
                            buf: [0; 8],
                            filled: 0,
                        };
                    }
                }
                ScanState::Header { buf, filled } => {
                    let n = (8 - *filled).min(bytes.len());
                    buf[*filled..*filled + n].copy_from_slice(&bytes[..n]);
                    *filled += n;
                    bytes = &bytes[n..];
                    if *filled == 8 {
                        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                        let kind = [buf[4], buf[5], buf[6], buf[7]];
                        let capture = (wants_capture(&kind) && len as usize <= CAPTURE_LIMIT)
                            .then(|| Vec::with_capacity(len as usize));
                        self.state = ScanState::Body {
                            kind,
                            remaining: u64::from(len),
                            capture,
                        };
                        self.finish_body_if_empty();
                    }
                }
                ScanState::Body {
                    remaining, capture, ..
                } => {
                    let n = (*remaining).min(bytes.len() as u64) as usize;
                    if let Some(capture) = capture {
                        capture.extend_from_slice(&bytes[..n]);
                    }
                    *remaining -= n as u64;
                    bytes = &bytes[n..];
                    self.finish_body_if_empty();
                }
                ScanState::Crc { remaining } => {
                    let n = (*remaining).min(bytes.len());
                    *remaining -= n;
                    bytes = &bytes[n..];
                    if *remaining == 0 {
                        self.state = ScanState::Header {
                            buf: [0; 8],
                            filled: 0,
                        };
                    }
                }
            }
        }
    }

    fn finish_body_if_empty(&mut self) {
        if let ScanState::Body {
            kind,
            remaining: 0,
            capture,
        } = &self.state
        {
            self.log
                .borrow_mut()
                .record(kind, capture.as_deref().unwrap_or_default());
            self.state = ScanState::Crc { remaining: 4 };
        }
    }
}

impl<R: Read> Read for ChunkTap<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = if self.replay_pos < self.replay.len() {
            let pending = &self.replay[self.replay_pos..];
            let n = pending.len().min(buf.len());
            buf[..n].copy_from_slice(&pending[..n]);
            self.replay_pos += n;
            n
        } else {
            self.inner.read(buf)?
        };
        self.scan(&buf[..n]);
        Ok(n)
    }
}
