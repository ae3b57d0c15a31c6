//! Per-row sample transforms from the codec's raw stream to a target layout.
//!
//! The codec hands out unfiltered rows exactly as stored: big-endian 16-bit
//! samples, sub-byte samples packed MSB first, palette indices unexpanded.
//! A [`RowPipeline`] applies an ordered list of [`SampleTransform`]s to each
//! such row and writes the result into a destination row.

use crate::error::PngError;
use crate::info::{ChunkContext, ColorKind, HeaderInfo, Transparency};

/// Where a [`SampleTransform::Filler`] sample goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillerPlacement {
    Before,
    After,
}

/// One codec-level sample transform. Applied in list order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleTransform {
    /// Sub-byte samples become one byte each, values unchanged.
    Packing,
    /// Palette to RGB(A), low-bit gray to 8 bits, transparency key to an
    /// alpha channel.
    Expand,
    /// 16-bit samples to 8 bits by dropping the low byte.
    Strip16,
    /// Gray to RGB, gray+alpha to RGBA.
    GrayToRgb,
    /// Raise color samples (not alpha) to `exponent`.
    Gamma { exponent: f32 },
    /// Add an opaque padding sample to pixels without alpha.
    Filler {
        value: u16,
        placement: FillerPlacement,
    },
    /// Move alpha from last to first sample. No-op without alpha.
    SwapAlpha,
    /// Swap red and blue.
    Bgr,
    /// Emit 16-bit samples little-endian.
    Swap16,
    /// Flip every bit of packed 1-bit gray rows.
    InvertMono,
}

#[derive(Clone, Copy, Debug)]
struct Shape {
    channels: usize,
    depth: u8,
    alpha: bool,
    color: bool,
    indexed: bool,
    /// Alpha or filler sits in front of the color samples.
    leading_extra: bool,
    little_endian: bool,
    invert: bool,
}

impl Shape {
    fn max(&self) -> u16 {
        if self.depth >= 16 {
            u16::MAX
        } else {
            (1u16 << self.depth) - 1
        }
    }

    fn bytes_per_sample(&self) -> usize {
        if self.depth == 16 { 2 } else { 1 }
    }
}

/// Applies a transform list to raw codec rows of one image.
pub(crate) struct RowPipeline {
    transforms: Vec<SampleTransform>,
    initial: Shape,
    width: usize,
    raw_row_bytes: usize,
    palette: Vec<[u8; 3]>,
    palette_alpha: Option<Vec<u8>>,
    gray_key: Option<u16>,
    rgb_key: Option<(u16, u16, u16)>,
    gamma_lut: Option<Vec<u8>>,
    /// Raw rows are copied bit-for-bit (sub-byte output without unpacking).
    packed_passthrough: bool,
    work: Vec<u16>,
    spare: Vec<u16>,
}

impl RowPipeline {
    pub(crate) fn new(header: &HeaderInfo, ctx: &ChunkContext, transforms: &[SampleTransform]) -> Self {
        let initial = Shape {
            channels: header.color.channels(),
            depth: header.bit_depth,
            alpha: header.color.has_alpha(),
            color: header.color.has_color(),
            indexed: header.color == ColorKind::Palette,
            leading_extra: false,
            little_endian: false,
            invert: false,
        };
        let (gray_key, rgb_key, palette_alpha) = match &ctx.transparency {
            Some(Transparency::Gray(g)) => (Some(*g), None, None),
            Some(Transparency::Rgb(r, g, b)) => (None, Some((*r, *g, *b)), None),
            Some(Transparency::Palette(a)) => (None, None, Some(a.clone())),
            None => (None, None, None),
        };
        let gamma_lut = transforms.iter().find_map(|t| match t {
            SampleTransform::Gamma { exponent } => Some(gamma_table_8bit(*exponent)),
            _ => None,
        });
        let packed_passthrough = header.bit_depth < 8
            && !transforms
                .iter()
                .any(|t| matches!(t, SampleTransform::Packing | SampleTransform::Expand));
        Self {
            transforms: transforms.to_vec(),
            initial,
            width: header.width as usize,
            raw_row_bytes: header.raw_row_bytes(),
            palette: ctx.palette.clone().unwrap_or_default(),
            palette_alpha,
            gray_key,
            rgb_key,
            gamma_lut,
            packed_passthrough,
            work: Vec::new(),
            spare: Vec::new(),
        }
    }

    /// Bytes written per output row.
    pub(crate) fn output_len(&self) -> usize {
        if self.packed_passthrough {
            return self.raw_row_bytes;
        }
        let shape = self
            .transforms
            .iter()
            .fold(self.initial, |shape, t| self.reshape(shape, t));
        self.width * shape.channels * shape.bytes_per_sample()
    }

    /// Shape after applying one transform. Mirrors `run` without touching data.
    fn reshape(&self, mut s: Shape, t: &SampleTransform) -> Shape {
        match *t {
            SampleTransform::Packing | SampleTransform::Gamma { .. } => {}
            SampleTransform::Expand => {
                if s.indexed {
                    s.indexed = false;
                    s.color = true;
                    s.alpha = self.palette_alpha.is_some();
                    s.channels = if s.alpha { 4 } else { 3 };
                    s.depth = 8;
                } else if !s.alpha {
                    let keyed = if s.color {
                        self.rgb_key.is_some()
                    } else {
                        self.gray_key.is_some()
                    };
                    if keyed {
                        s.alpha = true;
                        s.channels += 1;
                    }
                    s.depth = s.depth.max(8);
                }
            }
            SampleTransform::Strip16 => {
                if s.depth == 16 {
                    s.depth = 8;
                }
            }
            SampleTransform::GrayToRgb => {
                if !s.color && !s.indexed {
                    s.color = true;
                    s.channels += 2;
                }
            }
            SampleTransform::Filler { placement, .. } => {
                if !s.alpha && (s.channels == 1 || s.channels == 3) {
                    s.channels += 1;
                    s.leading_extra = placement == FillerPlacement::Before;
                }
            }
            SampleTransform::SwapAlpha => {
                if s.alpha {
                    s.leading_extra = true;
                }
            }
            SampleTransform::Bgr => {}
            SampleTransform::Swap16 => s.little_endian = true,
            SampleTransform::InvertMono => s.invert = true,
        }
        s
    }

    /// Transform one raw row into `out`.
    pub(crate) fn run(&mut self, raw: &[u8], out: &mut [u8]) -> Result<(), PngError> {
        if raw.len() < self.raw_row_bytes {
            return Err(PngError::CorruptData(format!(
                "row of {} bytes, expected {}",
                raw.len(),
                self.raw_row_bytes
            )));
        }
        let needed = self.output_len();
        if out.len() < needed {
            return Err(PngError::BufferTooSmall {
                needed,
                actual: out.len(),
            });
        }

        if self.packed_passthrough {
            let invert = self.transforms.contains(&SampleTransform::InvertMono);
            for (dst, &src) in out.iter_mut().zip(&raw[..self.raw_row_bytes]) {
                *dst = if invert { !src } else { src };
            }
            return Ok(());
        }

        let mut work = core::mem::take(&mut self.work);
        unpack_samples(
            &raw[..self.raw_row_bytes],
            self.initial.depth,
            self.width * self.initial.channels,
            &mut work,
        );
        let mut shape = self.initial;
        for t in self.transforms.clone() {
            self.apply(&mut work, &mut shape, &t);
        }
        emit_samples(&work, &shape, &mut out[..needed]);
        self.work = work;
        Ok(())
    }

    fn apply(&mut self, work: &mut Vec<u16>, s: &mut Shape, t: &SampleTransform) {
        let next = self.reshape(*s, t);
        match *t {
            SampleTransform::Packing | SampleTransform::Swap16 => {}
            SampleTransform::Expand => self.expand(work, s, &next),
            SampleTransform::Strip16 => {
                if s.depth == 16 {
                    work.iter_mut().for_each(|v| *v >>= 8);
                }
            }
            SampleTransform::GrayToRgb => {
                if next.channels != s.channels {
                    let mut out = core::mem::take(&mut self.spare);
                    out.clear();
                    for px in work.chunks_exact(s.channels) {
                        out.extend_from_slice(&[px[0], px[0], px[0]]);
                        if s.alpha {
                            out.push(px[1]);
                        }
                    }
                    self.spare = core::mem::replace(work, out);
                }
            }
            SampleTransform::Gamma { exponent } => {
                let color_channels = if s.alpha { s.channels - 1 } else { s.channels };
                let max = s.max();
                for px in work.chunks_exact_mut(s.channels) {
                    for v in &mut px[..color_channels] {
                        *v = match (&self.gamma_lut, s.depth) {
                            (Some(lut), 8) => u16::from(lut[*v as usize]),
                            _ => gamma_correct(*v, max, exponent),
                        };
                    }
                }
            }
            SampleTransform::Filler { value, placement } => {
                if next.channels != s.channels {
                    let fill = value & s.max();
                    let mut out = core::mem::take(&mut self.spare);
                    out.clear();
                    for px in work.chunks_exact(s.channels) {
                        if placement == FillerPlacement::Before {
                            out.push(fill);
                            out.extend_from_slice(px);
                        } else {
                            out.extend_from_slice(px);
                            out.push(fill);
                        }
                    }
                    self.spare = core::mem::replace(work, out);
                }
            }
            SampleTransform::SwapAlpha => {
                if s.alpha && !s.leading_extra {
                    work.chunks_exact_mut(s.channels)
                        .for_each(|px| px.rotate_right(1));
                }
            }
            SampleTransform::Bgr => {
                if s.color && s.channels >= 3 {
                    let first = usize::from(s.leading_extra);
                    work.chunks_exact_mut(s.channels)
                        .for_each(|px| px.swap(first, first + 2));
                }
            }
            SampleTransform::InvertMono => {
                if s.depth == 1 && !s.color {
                    work.iter_mut().for_each(|v| *v ^= 1);
                }
            }
        }
        *s = next;
    }

    fn expand(&mut self, work: &mut Vec<u16>, s: &Shape, next: &Shape) {
        if s.indexed {
            let mut out = core::mem::take(&mut self.spare);
            out.clear();
            for &index in work.iter() {
                let i = index as usize;
                let [r, g, b] = self.palette.get(i).copied().unwrap_or([0, 0, 0]);
                out.extend_from_slice(&[r.into(), g.into(), b.into()]);
                if let Some(alpha) = &self.palette_alpha {
                    out.push(alpha.get(i).copied().unwrap_or(255).into());
                }
            }
            self.spare = core::mem::replace(work, out);
            return;
        }
        if s.alpha {
            return;
        }

        let src_max = s.max();
        let dst_max = next.max();
        let scale = s.depth < 8;
        if next.channels == s.channels {
            if scale {
                work.iter_mut()
                    .for_each(|v| *v = *v * dst_max / src_max);
            }
            return;
        }

        let mut out = core::mem::take(&mut self.spare);
        out.clear();
        for px in work.chunks_exact(s.channels) {
            let transparent = if s.color {
                self.rgb_key.is_some_and(|(r, g, b)| {
                    (px[0], px[1], px[2]) == (r & src_max, g & src_max, b & src_max)
                })
            } else {
                self.gray_key.is_some_and(|g| px[0] == g & src_max)
            };
            for &v in px {
                out.push(if scale { v * dst_max / src_max } else { v });
            }
            out.push(if transparent { 0 } else { dst_max });
        }
        self.spare = core::mem::replace(work, out);
    }
}

/// Split a raw row into one `u16` per sample.
///
/// Sub-byte samples are read MSB first; 16-bit samples are big-endian.
pub(crate) fn unpack_samples(raw: &[u8], depth: u8, count: usize, out: &mut Vec<u16>) {
    out.clear();
    match depth {
        16 => out.extend(
            raw.chunks_exact(2)
                .take(count)
                .map(|p| u16::from_be_bytes([p[0], p[1]])),
        ),
        8 => out.extend(raw.iter().take(count).map(|&b| u16::from(b))),
        1 | 2 | 4 => {
            let per_byte = 8 / depth as usize;
            let mask = (1u8 << depth) - 1;
            out.extend(
                raw.iter()
                    .flat_map(|&byte| {
                        (0..per_byte).map(move |k| {
                            let shift = 8 - depth as usize * (k + 1);
                            u16::from((byte >> shift) & mask)
                        })
                    })
                    .take(count),
            );
        }
        _ => {}
    }
}

fn emit_samples(work: &[u16], s: &Shape, out: &mut [u8]) {
    if s.depth == 16 {
        for (dst, &v) in out.chunks_exact_mut(2).zip(work) {
            let bytes = if s.little_endian {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            };
            dst.copy_from_slice(&bytes);
        }
    } else {
        for (dst, &v) in out.iter_mut().zip(work) {
            *dst = v as u8;
        }
    }
}

fn gamma_correct(v: u16, max: u16, exponent: f32) -> u16 {
    let max_f = f32::from(max);
    let corrected = (f32::from(v) / max_f).powf(exponent) * max_f;
    corrected.round().clamp(0.0, max_f) as u16
}

/// Lookup table for 8-bit gamma correction.
pub(crate) fn gamma_table_8bit(exponent: f32) -> Vec<u8> {
    (0..=255u16)
        .map(|v| gamma_correct(v, 255, exponent) as u8)
        .collect()
}
