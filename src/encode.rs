//! Encoding a [`PixelBuffer`] as PNG.
//!
//! The buffer's [`PixelFormat`] picks the smallest on-disk color type that
//! holds it losslessly. Mono, Indexed8 and Grayscale8 rows are streamed as
//! they are; every other format is converted one row at a time.

use std::borrow::Cow;
use std::io::Write;
use std::rc::Rc;

use enough::Stop;
use rgb::RGBA8;

use crate::buffer::{MAX_COLOR_TABLE_LEN, PixelBuffer};
use crate::color::ColorSpace;
use crate::diagnostics::{Diagnostics, LogDiagnostics};
use crate::error::{PngError, Warning};
use crate::idat::{DEFAULT_LEVEL, ImageDataWriter, RowFilter};
use crate::info::ColorKind;
use crate::metadata::{TextEncoding, plan_text_chunks};
use crate::pixel::{AlphaMode, PixelFormat};
use crate::stream::AnimationHints;

/// Highest zlib level.
const MAX_LEVEL: u32 = 9;

/// Compression level from the legacy 0..=100 scales.
///
/// `compression` wins when both are set; otherwise `100 - quality` is used.
/// Negative values count as unset. The ratio is capped at 100 and mapped with
/// `ratio * 9 / 91`, so 91 and above already give level 9.
pub fn level_from_options(compression: Option<i32>, quality: Option<i32>) -> Option<u8> {
    let ratio = match (
        compression.filter(|c| *c >= 0),
        quality.filter(|q| *q >= 0),
    ) {
        (Some(c), _) => c.min(100),
        (None, Some(q)) => 100 - q.min(100),
        (None, None) => return None,
    };
    Some((ratio * 9 / 91) as u8)
}

/// Builder for one PNG encode.
///
/// ```no_run
/// use pngflow::{EncodeRequest, PixelBuffer, PixelFormat, Unstoppable};
///
/// let buffer = PixelBuffer::new(64, 64, PixelFormat::Argb32)?;
/// let bytes = EncodeRequest::new()
///     .with_quality(80)
///     .with_description("Title: Example\n\nAuthor: someone")
///     .encode_to_vec(&buffer, Unstoppable)?;
/// # Ok::<(), pngflow::PngError>(())
/// ```
#[derive(Clone)]
pub struct EncodeRequest {
    compression: Option<i32>,
    quality: Option<i32>,
    level: Option<u32>,
    gamma: f32,
    description: String,
    offset: (i32, i32),
    animation: AnimationHints,
    diagnostics: Rc<dyn Diagnostics>,
}

impl Default for EncodeRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeRequest {
    pub fn new() -> Self {
        Self {
            compression: None,
            quality: None,
            level: None,
            gamma: 0.0,
            description: String::new(),
            offset: (0, 0),
            animation: AnimationHints::default(),
            diagnostics: Rc::new(LogDiagnostics),
        }
    }

    /// Legacy compression ratio, 0 (fastest) to 100 (smallest).
    pub fn with_compression_ratio(mut self, ratio: i32) -> Self {
        self.compression = Some(ratio);
        self
    }

    /// Legacy quality, 0 to 100. Used only without a compression ratio.
    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = Some(quality);
        self
    }

    /// zlib level 0..=9. Larger values are clamped with a warning. Takes
    /// precedence over the legacy scales.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    /// Display gamma. Written as gAMA `1 / gamma` unless the buffer carries
    /// an ICC profile. `0.0` disables it.
    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    /// `key: value` pairs separated by blank lines, written as text chunks.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Added to the buffer's own offset before writing oFFs.
    pub fn with_offset(mut self, x: i32, y: i32) -> Self {
        self.offset = (x, y);
        self
    }

    pub fn with_animation(mut self, hints: AnimationHints) -> Self {
        self.animation = hints;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Rc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Effective zlib level, if any option sets one.
    pub fn level(&self) -> Option<u32> {
        let level = self
            .level
            .or_else(|| level_from_options(self.compression, self.quality).map(u32::from))?;
        if level > MAX_LEVEL {
            self.diagnostics
                .warn(&Warning::CompressionLevelOutOfRange { requested: level });
            return Some(MAX_LEVEL);
        }
        Some(level)
    }

    pub fn encode_to_vec(&self, buffer: &PixelBuffer, stop: impl Stop) -> Result<Vec<u8>, PngError> {
        let mut out = Vec::new();
        self.encode(buffer, &mut out, stop)?;
        Ok(out)
    }

    pub fn encode<W: Write>(
        &self,
        buffer: &PixelBuffer,
        writer: W,
        stop: impl Stop,
    ) -> Result<(), PngError> {
        let stop: &dyn Stop = &stop;
        let plan = WritePlan::for_buffer(buffer)?;
        let (width, height) = (buffer.width(), buffer.height());
        log::debug!(
            "pngflow: encoding {width}x{height} {:?} as {:?} depth {}",
            buffer.format(),
            plan.color,
            plan.bit_depth
        );

        let mut info = png::Info::with_size(width, height);
        info.color_type = plan.color.to_codec();
        info.bit_depth = match plan.bit_depth {
            1 => png::BitDepth::One,
            8 => png::BitDepth::Eight,
            _ => png::BitDepth::Sixteen,
        };
        info.palette = plan.palette.map(Cow::Owned);
        info.trns = plan.trns.map(Cow::Owned);
        self.set_color_chunks(&mut info, &buffer.color_space);
        if buffer.dots_per_meter_x > 0 || buffer.dots_per_meter_y > 0 {
            info.pixel_dims = Some(png::PixelDimensions {
                xppu: buffer.dots_per_meter_x,
                yppu: buffer.dots_per_meter_y,
                unit: png::Unit::Meter,
            });
        }

        let encoder = png::Encoder::with_info(writer, info).map_err(PngError::from_encoding)?;
        let mut writer = encoder.write_header().map_err(PngError::from_encoding)?;

        let offset = (
            buffer.offset.0.saturating_add(self.offset.0),
            buffer.offset.1.saturating_add(self.offset.1),
        );
        if offset != (0, 0) {
            let mut data = Vec::with_capacity(9);
            data.extend_from_slice(&offset.0.to_be_bytes());
            data.extend_from_slice(&offset.1.to_be_bytes());
            data.push(0);
            writer
                .write_chunk(png::chunk::ChunkType(*b"oFFs"), &data)
                .map_err(PngError::from_encoding)?;
        }

        for chunk in plan_text_chunks(&buffer.metadata, &self.description) {
            let written = match chunk.encoding {
                TextEncoding::Latin1 => writer.write_text_chunk(
                    &png::text_metadata::TEXtChunk::new(chunk.key, chunk.value),
                ),
                TextEncoding::Latin1Compressed => writer.write_text_chunk(
                    &png::text_metadata::ZTXtChunk::new(chunk.key, chunk.value),
                ),
                TextEncoding::Unicode | TextEncoding::UnicodeCompressed => {
                    let mut itxt = png::text_metadata::ITXtChunk::new(chunk.key, chunk.value);
                    itxt.compressed = chunk.encoding == TextEncoding::UnicodeCompressed;
                    writer.write_text_chunk(&itxt)
                }
            };
            written.map_err(PngError::from_encoding)?;
        }

        if let Some(data) = self.animation.gifx_payload() {
            writer
                .write_chunk(png::chunk::ChunkType(*b"gIFx"), &data)
                .map_err(PngError::from_encoding)?;
        }
        if let Some(data) = self.animation.gifg_payload() {
            writer
                .write_chunk(png::chunk::ChunkType(*b"gIFg"), &data)
                .map_err(PngError::from_encoding)?;
        }

        let level = self.level().unwrap_or(DEFAULT_LEVEL);
        let bits_per_pixel = plan.color.channels() * usize::from(plan.bit_depth);
        let adaptive = level > 0 && plan.color != ColorKind::Palette && plan.bit_depth >= 8;
        {
            let mut image_data =
                ImageDataWriter::new(&mut writer, level, RowFilter::new(bits_per_pixel, adaptive));
            let mut converted = Vec::new();
            for (y, row) in buffer.rows().enumerate() {
                if y % 16 == 0 {
                    stop.check()?;
                }
                let bytes = if plan.direct {
                    row
                } else {
                    convert_row(buffer.format(), buffer.alpha_mode(), row, &mut converted);
                    &converted[..]
                };
                image_data.write_row(bytes)?;
            }
            image_data.finish()?;
        }
        writer.finish().map_err(PngError::from_encoding)?;
        Ok(())
    }

    fn set_color_chunks(&self, info: &mut png::Info<'_>, color_space: &ColorSpace) {
        let override_gamma = (self.gamma != 0.0).then(|| 1.0 / self.gamma);
        let chromaticities = |c: &crate::color::Chromaticities| {
            png::SourceChromaticities::new(c.white, c.red, c.green, c.blue)
        };
        match color_space {
            ColorSpace::IccProfile { profile, .. } => {
                info.icc_profile = Some(Cow::Owned(profile.clone()));
            }
            ColorSpace::StandardRgb => match override_gamma {
                None => info.srgb = Some(png::SrgbRenderingIntent::Perceptual),
                Some(gamma) => {
                    info.source_gamma = Some(png::ScaledFloat::new(gamma));
                    info.source_chromaticities =
                        Some(chromaticities(&crate::color::Chromaticities::SRGB));
                }
            },
            ColorSpace::GammaChroma { gamma, primaries } => {
                let gamma = override_gamma.unwrap_or(*gamma);
                info.source_gamma = Some(png::ScaledFloat::new(gamma));
                info.source_chromaticities = primaries.as_ref().map(chromaticities);
            }
            ColorSpace::Unset => {
                info.source_gamma = override_gamma.map(png::ScaledFloat::new);
            }
        }
    }
}

/// On-disk layout chosen for a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
struct WritePlan {
    color: ColorKind,
    bit_depth: u8,
    /// PLTE payload, RGB triples.
    palette: Option<Vec<u8>>,
    /// tRNS payload, omitted when every entry is opaque.
    trns: Option<Vec<u8>>,
    /// Buffer rows already match the on-disk row layout.
    direct: bool,
}

impl WritePlan {
    fn for_buffer(buffer: &PixelBuffer) -> Result<Self, PngError> {
        let (color, bit_depth) = match buffer.format() {
            PixelFormat::Mono => (ColorKind::Palette, 1),
            PixelFormat::Indexed8 => {
                let table = indexed_table(buffer)?;
                if is_identity_gray(table) {
                    (ColorKind::Grayscale, 8)
                } else {
                    (ColorKind::Palette, 8)
                }
            }
            PixelFormat::Grayscale8 => (ColorKind::Grayscale, 8),
            PixelFormat::Grayscale16 => (ColorKind::Grayscale, 16),
            PixelFormat::Rgb32 => (ColorKind::Truecolor, 8),
            PixelFormat::Argb32 => (ColorKind::TruecolorAlpha, 8),
            PixelFormat::Rgbx64 => (ColorKind::Truecolor, 16),
            PixelFormat::Rgba64 => (ColorKind::TruecolorAlpha, 16),
        };
        let (palette, trns) = if color == ColorKind::Palette {
            let (palette, trns) = palette_chunks(indexed_table(buffer)?);
            (Some(palette), trns)
        } else {
            (None, None)
        };
        let direct = matches!(
            buffer.format(),
            PixelFormat::Mono | PixelFormat::Indexed8 | PixelFormat::Grayscale8
        );
        Ok(Self {
            color,
            bit_depth,
            palette,
            trns,
            direct,
        })
    }
}

fn indexed_table(buffer: &PixelBuffer) -> Result<&[RGBA8], PngError> {
    match buffer.color_table() {
        Some(table) if !table.is_empty() => Ok(table),
        _ => Err(PngError::InvalidBuffer(format!(
            "{:?} buffer has no color table",
            buffer.format()
        ))),
    }
}

/// Entry `i` is opaque gray level `i` for every entry.
fn is_identity_gray(table: &[RGBA8]) -> bool {
    table
        .iter()
        .enumerate()
        .all(|(i, c)| *c == RGBA8::new(i as u8, i as u8, i as u8, 255))
}

/// PLTE and tRNS payloads. tRNS stops after the last non-opaque entry.
fn palette_chunks(table: &[RGBA8]) -> (Vec<u8>, Option<Vec<u8>>) {
    let table = &table[..table.len().min(MAX_COLOR_TABLE_LEN)];
    let palette = table.iter().flat_map(|c| [c.r, c.g, c.b]).collect();
    let trns_len = table.iter().rposition(|c| c.a < 255).map_or(0, |i| i + 1);
    let trns = (trns_len > 0).then(|| table[..trns_len].iter().map(|c| c.a).collect());
    (palette, trns)
}

fn unpremultiply(c: u32, a: u32, max: u32) -> u32 {
    if a == 0 {
        0
    } else {
        ((c * max + a / 2) / a).min(max)
    }
}

/// Convert one row of a non-streamable format to the on-disk layout.
fn convert_row(format: PixelFormat, alpha: AlphaMode, src: &[u8], out: &mut Vec<u8>) {
    out.clear();
    let premultiplied = alpha == AlphaMode::Premultiplied;
    match format {
        PixelFormat::Mono | PixelFormat::Indexed8 | PixelFormat::Grayscale8 => {
            out.extend_from_slice(src);
        }
        PixelFormat::Grayscale16 => {
            for p in src.chunks_exact(2) {
                out.extend_from_slice(&u16::from_ne_bytes([p[0], p[1]]).to_be_bytes());
            }
        }
        PixelFormat::Rgb32 | PixelFormat::Argb32 => {
            for p in src.chunks_exact(4) {
                let v = u32::from_ne_bytes([p[0], p[1], p[2], p[3]]);
                let a = v >> 24;
                let mut rgb = [(v >> 16) & 0xff, (v >> 8) & 0xff, v & 0xff];
                if format == PixelFormat::Argb32 && premultiplied {
                    rgb = rgb.map(|c| unpremultiply(c, a, 0xff));
                }
                out.extend(rgb.iter().map(|&c| c as u8));
                if format == PixelFormat::Argb32 {
                    out.push(a as u8);
                }
            }
        }
        PixelFormat::Rgbx64 | PixelFormat::Rgba64 => {
            for p in src.chunks_exact(8) {
                let mut s = [0u32; 4];
                for (v, b) in s.iter_mut().zip(p.chunks_exact(2)) {
                    *v = u32::from(u16::from_ne_bytes([b[0], b[1]]));
                }
                if format == PixelFormat::Rgba64 && premultiplied {
                    let a = s[3];
                    for c in &mut s[..3] {
                        *c = unpremultiply(*c, a, 0xffff);
                    }
                }
                let channels = if format == PixelFormat::Rgba64 { 4 } else { 3 };
                for &c in &s[..channels] {
                    out.extend_from_slice(&(c as u16).to_be_bytes());
                }
            }
        }
    }
}

/// Encode a buffer with default options.
pub fn encode(buffer: &PixelBuffer, stop: impl Stop) -> Result<Vec<u8>, PngError> {
    EncodeRequest::new().encode_to_vec(buffer, stop)
}
