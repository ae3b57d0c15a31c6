//! Decode sessions.
//!
//! A [`DecodeSession`] reads one image from a byte stream in up to three
//! steps: header probe, pixel decode, trailer. Queries about size, format,
//! gamma and text can be made between steps and never repeat I/O. Any fatal
//! error leaves the session in [`ReadState::Error`] for good.

use std::cell::RefCell;
use std::io::{self, Read};
use std::mem;
use std::rc::Rc;

use enough::Stop;

use crate::buffer::{BufferAllocator, HeapAllocator, PixelBuffer};
use crate::color::{self, ColorSources, ColorSpace, Chromaticities};
use crate::diagnostics::{Diagnostics, LogDiagnostics};
use crate::error::{PngError, Warning};
use crate::info::{ChunkContext, HeaderInfo, ImageInfo};
use crate::limits::Limits;
use crate::metadata::MetadataEntries;
use crate::negotiate::{Negotiation, NegotiationRequest, declared_format, negotiate};
use crate::pixel::PixelFormat;
use crate::scale::{self, RowSource};
use crate::stream::{AnimationHints, ChunkLog, ChunkTap, PNG_SIGNATURE, TextKind};
use crate::transform::RowPipeline;

/// Gamma corrections closer to 1.0 than this are skipped.
const GAMMA_THRESHOLD: f32 = 0.05;

/// Observable phase of a [`DecodeSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    /// Nothing parsed yet, or the image was fully decoded.
    Ready,
    /// Header parsed, pixel data not yet read.
    ReadHeader,
    /// Pixel data read, trailer being parsed.
    ReadingEnd,
    /// A fatal error occurred. Every further call fails.
    Error,
}

enum Phase<R: Read> {
    /// `None` once the image has been decoded and the stream released.
    Ready(Option<ChunkTap<R>>),
    ReadHeader(Box<png::Reader<ChunkTap<R>>>),
    ReadingEnd,
    Error,
}

/// Positions in the codec's three text lists already folded into metadata.
#[derive(Clone, Copy, Debug, Default)]
struct TextCursor {
    sightings: usize,
    latin1: usize,
    compressed: usize,
    international: usize,
}

impl TextCursor {
    /// Fold text chunks in stream order. With `pre_image`, stop at the first
    /// chunk that follows the image data.
    fn collect(
        &mut self,
        info: &png::Info<'_>,
        log: &ChunkLog,
        pre_image: bool,
        diagnostics: &dyn Diagnostics,
    ) -> MetadataEntries {
        let mut entries = MetadataEntries::new();
        for sighting in log.texts.iter().skip(self.sightings) {
            if pre_image && !sighting.before_image {
                break;
            }
            self.sightings += 1;
            match sighting.kind {
                TextKind::Latin1 => {
                    if let Some(chunk) = info.uncompressed_latin1_text.get(self.latin1) {
                        self.latin1 += 1;
                        entries.push(chunk.keyword.as_str(), chunk.text.as_str());
                    }
                }
                TextKind::Compressed => {
                    if let Some(chunk) = info.compressed_latin1_text.get(self.compressed) {
                        self.compressed += 1;
                        match chunk.get_text() {
                            Ok(text) => entries.push(chunk.keyword.as_str(), text),
                            Err(e) => diagnostics.warn(&Warning::UnreadableText {
                                key: chunk.keyword.clone(),
                                reason: format!("{e:?}"),
                            }),
                        }
                    }
                }
                TextKind::International => {
                    if let Some(chunk) = info.utf8_text.get(self.international) {
                        self.international += 1;
                        match chunk.get_text() {
                            Ok(text) => entries.push(chunk.keyword.as_str(), text),
                            Err(e) => diagnostics.warn(&Warning::UnreadableText {
                                key: chunk.keyword.clone(),
                                reason: format!("{e:?}"),
                            }),
                        }
                    }
                }
            }
        }
        entries
    }
}

/// Everything learned from the chunks ahead of the image data.
#[derive(Clone, Debug)]
struct Probed {
    header: HeaderInfo,
    ctx: ChunkContext,
    color_space: ColorSpace,
    file_gamma: Option<f32>,
    dots_per_meter: (u32, u32),
    metadata: MetadataEntries,
    cursor: TextCursor,
}

/// One-image decode state machine over a byte stream.
///
/// ```no_run
/// use pngflow::{DecodeSession, Unstoppable};
///
/// let file = std::fs::File::open("in.png")?;
/// let mut session = DecodeSession::new(std::io::BufReader::new(file));
/// let (w, h) = session.size()?;
/// session.set_scaled_size(w / 2, h / 2);
/// let image = session.decode_image(Unstoppable)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct DecodeSession<R: Read> {
    phase: Phase<R>,
    probed: Option<Probed>,
    log: Rc<RefCell<ChunkLog>>,
    diagnostics: Rc<dyn Diagnostics>,
    allocator: Box<dyn BufferAllocator>,
    limits: Limits,
    scaled_size: Option<(u32, u32)>,
    gamma: f32,
}

impl<R: Read> DecodeSession<R> {
    pub fn new(reader: R) -> Self {
        let tap = ChunkTap::new(reader);
        Self {
            log: tap.log(),
            phase: Phase::Ready(Some(tap)),
            probed: None,
            diagnostics: Rc::new(LogDiagnostics),
            allocator: Box::new(HeapAllocator),
            limits: Limits::default(),
            scaled_size: None,
            gamma: 0.0,
        }
    }

    /// Route warnings to `diagnostics` instead of the `log` facade.
    pub fn with_diagnostics(mut self, diagnostics: Rc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_allocator(mut self, allocator: impl BufferAllocator + 'static) -> Self {
        self.allocator = Box::new(allocator);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Request inline box-filter downscaling. Honoured only for direct-color
    /// non-interlaced images no larger than the source; ignored otherwise.
    pub fn set_scaled_size(&mut self, width: u32, height: u32) {
        self.scaled_size = Some((width, height));
    }

    /// The requested scaled size, if any.
    pub fn scaled_size(&self) -> Option<(u32, u32)> {
        self.scaled_size
    }

    /// Display gamma for decode-time correction. `0.0` disables it.
    pub fn set_gamma(&mut self, gamma: f32) {
        self.gamma = gamma;
    }

    pub fn state(&self) -> ReadState {
        match self.phase {
            Phase::Ready(_) => ReadState::Ready,
            Phase::ReadHeader(_) => ReadState::ReadHeader,
            Phase::ReadingEnd => ReadState::ReadingEnd,
            Phase::Error => ReadState::Error,
        }
    }

    /// Whether the stream starts with the PNG signature. Consumes nothing.
    pub fn can_read(&mut self) -> Result<bool, PngError> {
        let peeked = match &mut self.phase {
            Phase::Error => return Err(PngError::SessionFailed),
            Phase::Ready(Some(tap)) => tap.peek_signature().map(|sig| sig == PNG_SIGNATURE),
            _ => return Ok(true),
        };
        peeked.map_err(|e| self.fail(PngError::StreamRead(e)))
    }

    /// Parse everything up to the image data. Idempotent.
    pub fn probe_header(&mut self) -> Result<(), PngError> {
        match mem::replace(&mut self.phase, Phase::Error) {
            Phase::Ready(Some(tap)) => {
                let (reader, probed) = self.read_header(tap).map_err(|e| self.fail(e))?;
                log::debug!(
                    "pngflow: header {}x{} {:?} depth {} interlaced={}",
                    probed.header.width,
                    probed.header.height,
                    probed.header.color,
                    probed.header.bit_depth,
                    probed.header.interlaced
                );
                self.probed = Some(probed);
                self.phase = Phase::ReadHeader(Box::new(reader));
                Ok(())
            }
            Phase::Error | Phase::ReadingEnd => Err(PngError::SessionFailed),
            other => {
                self.phase = other;
                if self.probed.is_some() {
                    Ok(())
                } else {
                    Err(self.fail(PngError::SessionFailed))
                }
            }
        }
    }

    /// Decode the pixels into a new buffer, then read the trailer.
    ///
    /// Only one image can be decoded per session; a second call fails with
    /// [`PngError::StreamRead`] and moves the session to the error state.
    pub fn decode_image(&mut self, stop: impl Stop) -> Result<PixelBuffer, PngError> {
        self.probe_header()?;
        let mut reader = match mem::replace(&mut self.phase, Phase::Error) {
            Phase::ReadHeader(reader) => reader,
            _ => {
                return Err(self.fail(PngError::StreamRead(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "image data already consumed",
                ))));
            }
        };

        let (mut buffer, negotiation) = self
            .read_pixels(&mut reader, &stop)
            .map_err(|e| self.fail(e))?;

        self.phase = Phase::ReadingEnd;
        reader
            .finish()
            .map_err(|e| self.fail(PngError::from_body(e)))?;

        let trailing = match self.probed.as_mut() {
            Some(probed) => {
                let log = self.log.borrow();
                let entries =
                    probed
                        .cursor
                        .collect(reader.info(), &log, false, self.diagnostics.as_ref());
                probed.metadata.extend(entries);
                probed.metadata.clone()
            }
            None => return Err(self.fail(PngError::SessionFailed)),
        };
        drop(reader);

        self.finish_buffer(&mut buffer, &negotiation, trailing);
        self.phase = Phase::Ready(None);
        log::debug!(
            "pngflow: decoded {}x{} {:?}",
            buffer.width(),
            buffer.height(),
            buffer.format()
        );
        Ok(buffer)
    }

    /// Image dimensions as stored in the file.
    pub fn size(&mut self) -> Result<(u32, u32), PngError> {
        let probed = self.probed()?;
        Ok((probed.header.width, probed.header.height))
    }

    pub fn header(&mut self) -> Result<HeaderInfo, PngError> {
        Ok(self.probed()?.header)
    }

    /// Format [`DecodeSession::decode_image`] produces at full resolution.
    pub fn image_format(&mut self) -> Result<PixelFormat, PngError> {
        let probed = self.probed()?;
        Ok(declared_format(&probed.header, &probed.ctx))
    }

    /// The display gamma override if set, otherwise the file's gAMA value.
    pub fn gamma(&mut self) -> Result<Option<f32>, PngError> {
        let override_gamma = self.gamma;
        let probed = self.probed()?;
        if override_gamma != 0.0 {
            return Ok(Some(override_gamma));
        }
        Ok(probed.file_gamma)
    }

    /// Text gathered so far as `key: value` pairs separated by blank lines.
    pub fn description(&mut self) -> Result<String, PngError> {
        Ok(self.probed()?.metadata.summary())
    }

    /// Text gathered so far, in chunk order.
    pub fn metadata(&mut self) -> Result<MetadataEntries, PngError> {
        Ok(self.probed()?.metadata.clone())
    }

    /// Color space a decode attaches, after any gamma override.
    pub fn color_space(&mut self) -> Result<ColorSpace, PngError> {
        let override_gamma = self.gamma;
        let probed = self.probed()?;
        Ok(
            color::apply_gamma_override(&probed.color_space, override_gamma, probed.file_gamma)
                .unwrap_or_else(|| probed.color_space.clone()),
        )
    }

    /// gIFx/gIFg hints seen so far.
    pub fn animation_hints(&mut self) -> Result<AnimationHints, PngError> {
        self.probed()?;
        Ok(self.log.borrow().animation)
    }

    fn probed(&mut self) -> Result<&Probed, PngError> {
        self.probe_header()?;
        self.probed.as_ref().ok_or(PngError::SessionFailed)
    }

    fn fail(&mut self, err: PngError) -> PngError {
        log::debug!("pngflow: decode session failed: {err}");
        self.phase = Phase::Error;
        err
    }

    fn read_header(
        &self,
        mut tap: ChunkTap<R>,
    ) -> Result<(png::Reader<ChunkTap<R>>, Probed), PngError> {
        let signature = tap.peek_signature().map_err(PngError::StreamRead)?;
        if signature != PNG_SIGNATURE {
            return Err(PngError::NotPng);
        }

        let mut decoder = png::Decoder::new_with_limits(tap, self.limits.codec_limits());
        decoder.set_transformations(png::Transformations::IDENTITY);
        decoder.set_ignore_text_chunk(false);
        let reader = decoder.read_info().map_err(PngError::from_header)?;

        let info = reader.info();
        let header = HeaderInfo::from_codec(info)?;
        self.limits.check(header.width, header.height)?;
        let ctx = ChunkContext::from_codec(info, &header);

        let log = self.log.borrow();
        let file_gamma = info.source_gamma.map(|g| g.into_value());
        let chromaticities = info.source_chromaticities.map(|c| Chromaticities {
            white: (c.white.0.into_value(), c.white.1.into_value()),
            red: (c.red.0.into_value(), c.red.1.into_value()),
            green: (c.green.0.into_value(), c.green.1.into_value()),
            blue: (c.blue.0.into_value(), c.blue.1.into_value()),
        });
        let sources = ColorSources {
            icc_profile: info.icc_profile.as_deref(),
            icc_name: log.icc_name.as_deref(),
            srgb_intent: info.srgb.map(|intent| intent as u8),
            gamma: file_gamma,
            chromaticities,
        };
        let color_space = color::resolve(&sources, self.diagnostics.as_ref());

        let dots_per_meter = match info.pixel_dims {
            Some(dims) if dims.unit == png::Unit::Meter => (dims.xppu, dims.yppu),
            _ => (0, 0),
        };

        let mut cursor = TextCursor::default();
        let metadata = cursor.collect(info, &log, true, self.diagnostics.as_ref());
        drop(log);

        Ok((
            reader,
            Probed {
                header,
                ctx,
                color_space,
                file_gamma,
                dots_per_meter,
                metadata,
                cursor,
            },
        ))
    }

    fn gamma_exponent(&self, probed: &Probed) -> Option<f32> {
        if self.gamma == 0.0 {
            return None;
        }
        let file_gamma = probed.file_gamma.filter(|g| *g > 0.0)?;
        let exponent = self.gamma / file_gamma;
        ((exponent - 1.0).abs() >= GAMMA_THRESHOLD).then_some(exponent)
    }

    fn read_pixels(
        &self,
        reader: &mut png::Reader<ChunkTap<R>>,
        stop: &dyn Stop,
    ) -> Result<(PixelBuffer, Negotiation), PngError> {
        let probed = self.probed.as_ref().ok_or(PngError::SessionFailed)?;
        let header = &probed.header;
        let request = NegotiationRequest {
            scaled_size: self.scaled_size,
            gamma_exponent: self.gamma_exponent(probed),
        };
        let negotiation = negotiate(header, &probed.ctx, &request);
        if let Some(entries) = negotiation.rejected_palette {
            self.diagnostics
                .warn(&Warning::UnsupportedPalette { entries });
        }
        log::debug!(
            "pngflow: negotiated {:?} {}x{} scaled={} transforms={:?}",
            negotiation.format,
            negotiation.width,
            negotiation.height,
            negotiation.scaled,
            negotiation.transforms
        );

        let (width, height, format) = (negotiation.width, negotiation.height, negotiation.format);
        let bytes = format
            .aligned_stride(width)
            .and_then(|stride| stride.checked_mul(height as usize))
            .ok_or(PngError::AllocationFailure {
                width,
                height,
                format,
            })?;
        self.limits.check_memory(bytes)?;
        let mut buffer = self.allocator.allocate(width, height, format)?;
        if (buffer.width(), buffer.height(), buffer.format()) != (width, height, format) {
            return Err(PngError::LayoutMismatch {
                expected: format,
                actual: buffer.format(),
            });
        }

        stop.check()?;
        let mut pipeline = RowPipeline::new(header, &probed.ctx, &negotiation.transforms);
        if negotiation.scaled {
            let mut rows = CodecRows {
                reader,
                pipeline: &mut pipeline,
                raw_row_bytes: header.raw_row_bytes(),
            };
            scale::downscale(&mut rows, header.width, header.height, &mut buffer, stop)?;
        } else if header.interlaced {
            let mut frame = vec![0u8; reader.output_buffer_size()];
            reader.next_frame(&mut frame).map_err(PngError::from_body)?;
            let raw_len = header.raw_row_bytes();
            for (y, raw) in frame.chunks_exact(raw_len).take(height as usize).enumerate() {
                if y % 16 == 0 {
                    stop.check()?;
                }
                pipeline.run(raw, buffer.row_mut(y as u32))?;
            }
        } else {
            for y in 0..height {
                if y % 16 == 0 {
                    stop.check()?;
                }
                let row = reader
                    .next_row()
                    .map_err(PngError::from_body)?
                    .ok_or_else(|| PngError::CorruptData(format!("image data ends at row {y}")))?;
                pipeline.run(row.data(), buffer.row_mut(y))?;
            }
        }

        if let Some(table) = &negotiation.color_table {
            if negotiation.sanitize_indices {
                let len = table.len();
                for y in 0..height {
                    for index in buffer.row_mut(y) {
                        if usize::from(*index) >= len {
                            *index = 0;
                        }
                    }
                }
            }
            buffer.set_color_table(table.clone())?;
        }
        Ok((buffer, negotiation))
    }

    fn finish_buffer(
        &self,
        buffer: &mut PixelBuffer,
        negotiation: &Negotiation,
        metadata: MetadataEntries,
    ) {
        let Some(probed) = self.probed.as_ref() else {
            return;
        };
        let (src_w, src_h) = (probed.header.width, probed.header.height);

        buffer.color_space =
            color::apply_gamma_override(&probed.color_space, self.gamma, probed.file_gamma)
                .unwrap_or_else(|| probed.color_space.clone());
        buffer.metadata = metadata;

        let (mut dpm_x, mut dpm_y) = probed.dots_per_meter;
        let mut offset = match self.log.borrow().offset {
            Some(o) if o.unit == 0 => (o.x, o.y),
            _ => (0, 0),
        };
        if negotiation.scaled {
            dpm_x = scale::scale_density(dpm_x, negotiation.width, src_w);
            dpm_y = scale::scale_density(dpm_y, negotiation.height, src_h);
            offset = (
                scale::scale_offset(offset.0, negotiation.width, src_w),
                scale::scale_offset(offset.1, negotiation.height, src_h),
            );
        }
        buffer.dots_per_meter_x = dpm_x;
        buffer.dots_per_meter_y = dpm_y;
        buffer.offset = offset;
    }
}

/// Feeds transformed codec rows to the scaler.
struct CodecRows<'a, R: Read> {
    reader: &'a mut png::Reader<ChunkTap<R>>,
    pipeline: &'a mut RowPipeline,
    raw_row_bytes: usize,
}

impl<R: Read> RowSource for CodecRows<'_, R> {
    fn next_row(&mut self, out: &mut [u8]) -> Result<(), PngError> {
        let row = self
            .reader
            .next_row()
            .map_err(PngError::from_body)?
            .ok_or_else(|| PngError::CorruptData("image data ended early".into()))?;
        let data = row.data();
        if data.len() < self.raw_row_bytes {
            return Err(PngError::CorruptData("short image row".into()));
        }
        self.pipeline.run(data, out)
    }
}

/// Whether `data` starts with the PNG signature.
pub fn is_png(data: &[u8]) -> bool {
    data.starts_with(&PNG_SIGNATURE)
}

/// Read the header of an in-memory PNG without decoding pixels.
pub fn probe(data: &[u8]) -> Result<ImageInfo, PngError> {
    let mut session = DecodeSession::new(data);
    let header = session.header()?;
    let format = session.image_format()?;
    Ok(ImageInfo {
        width: header.width,
        height: header.height,
        format,
        header,
    })
}

/// Decode an in-memory PNG at full resolution.
pub fn decode(data: &[u8], stop: impl Stop) -> Result<PixelBuffer, PngError> {
    DecodeSession::new(data).decode_image(stop)
}
