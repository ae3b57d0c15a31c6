//! Choice of in-memory pixel format for a decoded image.
//!
//! [`negotiate`] maps the header, palette and transparency of an image onto
//! one [`PixelFormat`] and the ordered [`SampleTransform`]s that turn raw codec
//! rows into that format. Direct 32-bit formats are native-endian words
//! (`0xAARRGGBB`), so the channel-order transforms depend on the target's byte
//! order.

use rgb::RGBA8;

use crate::buffer::{ColorTable, MAX_COLOR_TABLE_LEN};
use crate::info::{ChunkContext, ColorKind, HeaderInfo, Transparency};
use crate::pixel::PixelFormat;
use crate::transform::{FillerPlacement, SampleTransform, gamma_table_8bit};

const LITTLE_ENDIAN: bool = cfg!(target_endian = "little");

/// Caller wishes that shape a negotiation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NegotiationRequest {
    /// Target size for inline downscaling.
    pub scaled_size: Option<(u32, u32)>,
    /// Gamma correction exponent (`display / file`), already screened for
    /// being close to 1.
    pub gamma_exponent: Option<f32>,
}

/// Outcome of format negotiation for one image.
#[derive(Clone, Debug, PartialEq)]
pub struct Negotiation {
    pub format: PixelFormat,
    /// Transforms in application order.
    pub transforms: Vec<SampleTransform>,
    /// Output dimensions. Differ from the header only when `scaled`.
    pub width: u32,
    pub height: u32,
    pub scaled: bool,
    /// Table for Mono and Indexed8 outputs.
    pub color_table: Option<ColorTable>,
    /// Palette indices past the table end must be rewritten after decode.
    pub sanitize_indices: bool,
    /// Entry count of a palette too large to use.
    pub rejected_palette: Option<usize>,
}

/// Format a full decode of this image would produce, without scaling or
/// gamma correction.
pub fn declared_format(header: &HeaderInfo, ctx: &ChunkContext) -> PixelFormat {
    negotiate(header, ctx, &NegotiationRequest::default()).format
}

/// Negotiate format, transforms and output size for one image.
pub fn negotiate(
    header: &HeaderInfo,
    ctx: &ChunkContext,
    request: &NegotiationRequest,
) -> Negotiation {
    let mut out = Negotiation {
        format: PixelFormat::Argb32,
        transforms: Vec::new(),
        width: header.width,
        height: header.height,
        scaled: false,
        color_table: None,
        sanitize_indices: false,
        rejected_palette: None,
    };
    let depth = header.bit_depth;
    let has_trns = ctx.transparency.is_some();
    let gamma = request.gamma_exponent;
    let t = &mut out.transforms;

    let usable_palette = match (&header.color, &ctx.palette) {
        (ColorKind::Palette, Some(p)) if p.len() <= MAX_COLOR_TABLE_LEN => Some(p),
        (ColorKind::Palette, Some(p)) => {
            out.rejected_palette = Some(p.len());
            None
        }
        _ => None,
    };

    if header.color == ColorKind::Grayscale && depth == 1 {
        out.format = PixelFormat::Mono;
        t.push(SampleTransform::InvertMono);
        let mut table = vec![RGBA8::new(255, 255, 255, 255), RGBA8::new(0, 0, 0, 255)];
        match ctx.transparency {
            Some(Transparency::Gray(0)) => table[1].a = 0,
            Some(Transparency::Gray(1)) => table[0].a = 0,
            _ => {}
        }
        out.color_table = Some(table);
    } else if header.color == ColorKind::Grayscale && depth == 16 && !has_trns {
        out.format = PixelFormat::Grayscale16;
        push_gamma(t, gamma);
        if LITTLE_ENDIAN {
            t.push(SampleTransform::Swap16);
        }
    } else if header.color == ColorKind::Grayscale && depth == 16 {
        out.format = PixelFormat::Rgba64;
        t.push(SampleTransform::Expand);
        t.push(SampleTransform::GrayToRgb);
        push_gamma(t, gamma);
        if LITTLE_ENDIAN {
            t.push(SampleTransform::Swap16);
        }
    } else if header.color == ColorKind::Grayscale && depth == 8 && !has_trns {
        out.format = PixelFormat::Grayscale8;
        t.push(SampleTransform::Expand);
        push_gamma(t, gamma);
    } else if header.color == ColorKind::Grayscale {
        out.format = PixelFormat::Indexed8;
        if depth < 8 {
            t.push(SampleTransform::Packing);
        }
        let n = 1usize << depth.min(8);
        let mut table: ColorTable = (0..n)
            .map(|i| {
                let c = (i * 255 / (n - 1)) as u8;
                RGBA8::new(c, c, c, 255)
            })
            .collect();
        if let Some(Transparency::Gray(g)) = ctx.transparency {
            if let Some(entry) = table.get_mut(g as usize) {
                entry.a = 0;
            }
        }
        correct_table(&mut table, gamma);
        out.color_table = Some(table);
    } else if let Some(palette) = usable_palette {
        let alpha = match &ctx.transparency {
            Some(Transparency::Palette(a)) => a.as_slice(),
            _ => &[],
        };
        let entry = |i: usize| {
            let [r, g, b] = palette.get(i).copied().unwrap_or([0, 0, 0]);
            RGBA8::new(r, g, b, alpha.get(i).copied().unwrap_or(255))
        };
        let mut table: ColorTable = if depth == 1 {
            out.format = PixelFormat::Mono;
            (0..2).map(entry).collect()
        } else {
            out.format = PixelFormat::Indexed8;
            t.push(SampleTransform::Packing);
            out.sanitize_indices = true;
            (0..palette.len()).map(entry).collect()
        };
        correct_table(&mut table, gamma);
        out.color_table = Some(table);
    } else if depth == 16 {
        let has_alpha = header.color.has_alpha();
        let opaque = !has_alpha && !has_trns;
        out.format = if opaque {
            PixelFormat::Rgbx64
        } else {
            PixelFormat::Rgba64
        };
        if has_trns && !has_alpha {
            t.push(SampleTransform::Expand);
        }
        if !header.color.has_color() {
            t.push(SampleTransform::GrayToRgb);
        }
        push_gamma(t, gamma);
        if opaque {
            t.push(SampleTransform::Filler {
                value: 0xffff,
                placement: FillerPlacement::After,
            });
        }
        if LITTLE_ENDIAN {
            t.push(SampleTransform::Swap16);
        }
    } else {
        // A palette image lands here only when its PLTE was unusable, in
        // which case tRNS is its only alpha source.
        let has_alpha = header.color.has_alpha();
        let opaque = !has_alpha && !has_trns;
        out.format = if opaque {
            PixelFormat::Rgb32
        } else {
            PixelFormat::Argb32
        };
        if depth == 16 {
            t.push(SampleTransform::Strip16);
        }
        t.push(SampleTransform::Expand);
        if header.color == ColorKind::GrayscaleAlpha {
            t.push(SampleTransform::GrayToRgb);
        }
        push_gamma(t, gamma);
        if opaque {
            t.push(SampleTransform::Filler {
                value: 0xff,
                placement: if LITTLE_ENDIAN {
                    FillerPlacement::After
                } else {
                    FillerPlacement::Before
                },
            });
        }
        if LITTLE_ENDIAN {
            t.push(SampleTransform::Bgr);
        } else {
            t.push(SampleTransform::SwapAlpha);
        }

        if let Some((w, h)) = request.scaled_size {
            let fits = w > 0 && h > 0 && w <= header.width && h <= header.height;
            let differs = (w, h) != (header.width, header.height);
            if fits && differs && !header.interlaced {
                out.width = w;
                out.height = h;
                out.scaled = true;
            }
        }
    }
    out
}

fn push_gamma(transforms: &mut Vec<SampleTransform>, exponent: Option<f32>) {
    if let Some(exponent) = exponent {
        transforms.push(SampleTransform::Gamma { exponent });
    }
}

fn correct_table(table: &mut [RGBA8], exponent: Option<f32>) {
    let Some(exponent) = exponent else { return };
    let lut = gamma_table_8bit(exponent);
    for entry in table {
        entry.r = lut[entry.r as usize];
        entry.g = lut[entry.g as usize];
        entry.b = lut[entry.b as usize];
    }
}
