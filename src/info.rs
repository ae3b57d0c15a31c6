use crate::error::PngError;
use crate::pixel::PixelFormat;

/// On-disk color type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorKind {
    Grayscale,
    GrayscaleAlpha,
    Palette,
    Truecolor,
    TruecolorAlpha,
}

impl ColorKind {
    /// Samples per pixel in the raw stream.
    pub fn channels(&self) -> usize {
        match self {
            Self::Grayscale | Self::Palette => 1,
            Self::GrayscaleAlpha => 2,
            Self::Truecolor => 3,
            Self::TruecolorAlpha => 4,
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::GrayscaleAlpha | Self::TruecolorAlpha)
    }

    pub fn has_color(&self) -> bool {
        matches!(self, Self::Palette | Self::Truecolor | Self::TruecolorAlpha)
    }

    pub(crate) fn from_codec(color: png::ColorType) -> Self {
        match color {
            png::ColorType::Grayscale => Self::Grayscale,
            png::ColorType::GrayscaleAlpha => Self::GrayscaleAlpha,
            png::ColorType::Indexed => Self::Palette,
            png::ColorType::Rgb => Self::Truecolor,
            png::ColorType::Rgba => Self::TruecolorAlpha,
        }
    }

    pub(crate) fn to_codec(self) -> png::ColorType {
        match self {
            Self::Grayscale => png::ColorType::Grayscale,
            Self::GrayscaleAlpha => png::ColorType::GrayscaleAlpha,
            Self::Palette => png::ColorType::Indexed,
            Self::Truecolor => png::ColorType::Rgb,
            Self::TruecolorAlpha => png::ColorType::Rgba,
        }
    }
}

/// Image header fields. Immutable once parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub width: u32,
    pub height: u32,
    /// 1, 2, 4, 8 or 16.
    pub bit_depth: u8,
    pub color: ColorKind,
    pub interlaced: bool,
}

impl HeaderInfo {
    /// Validate a header. Rejects empty images and color/depth pairs the
    /// container format does not allow.
    pub fn new(
        width: u32,
        height: u32,
        bit_depth: u8,
        color: ColorKind,
        interlaced: bool,
    ) -> Result<Self, PngError> {
        if width == 0 || height == 0 {
            return Err(PngError::MalformedHeader(format!(
                "empty image {width}x{height}"
            )));
        }
        let allowed: &[u8] = match color {
            ColorKind::Grayscale => &[1, 2, 4, 8, 16],
            ColorKind::Palette => &[1, 2, 4, 8],
            _ => &[8, 16],
        };
        if !allowed.contains(&bit_depth) {
            return Err(PngError::MalformedHeader(format!(
                "bit depth {bit_depth} not allowed for {color:?}"
            )));
        }
        Ok(Self {
            width,
            height,
            bit_depth,
            color,
            interlaced,
        })
    }

    pub(crate) fn from_codec(info: &png::Info<'_>) -> Result<Self, PngError> {
        Self::new(
            info.width,
            info.height,
            info.bit_depth as u8,
            ColorKind::from_codec(info.color_type),
            info.interlaced,
        )
    }

    /// Bytes per row of raw, unfiltered samples.
    pub fn raw_row_bytes(&self) -> usize {
        (self.width as usize * self.color.channels() * self.bit_depth as usize).div_ceil(8)
    }
}

/// Contents of a tRNS chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transparency {
    /// Gray sample value rendered fully transparent.
    Gray(u16),
    /// RGB sample value rendered fully transparent.
    Rgb(u16, u16, u16),
    /// Alpha for the first palette entries; later entries are opaque.
    Palette(Vec<u8>),
}

impl Transparency {
    /// Interpret tRNS bytes as the codec stores them for the given color
    /// type and depth. Keys of sub-16-bit images hold one byte per sample;
    /// the on-disk two-byte form is accepted too.
    pub(crate) fn from_chunk(color: ColorKind, bit_depth: u8, data: &[u8]) -> Option<Self> {
        let samples = match color {
            ColorKind::Grayscale => 1,
            ColorKind::Truecolor => 3,
            _ => 0,
        };
        let narrow = bit_depth < 16 && data.len() < samples * 2;
        let sample = |i: usize| {
            if narrow {
                data.get(i).map(|&b| u16::from(b))
            } else {
                data.get(i * 2..i * 2 + 2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
            }
        };
        match color {
            ColorKind::Grayscale => Some(Self::Gray(sample(0)?)),
            ColorKind::Truecolor => Some(Self::Rgb(sample(0)?, sample(1)?, sample(2)?)),
            ColorKind::Palette => Some(Self::Palette(data.to_vec())),
            _ => None,
        }
    }
}

/// Chunk data that shapes format negotiation besides the header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkContext {
    /// PLTE entries as RGB triples.
    pub palette: Option<Vec<[u8; 3]>>,
    pub transparency: Option<Transparency>,
}

impl ChunkContext {
    pub(crate) fn from_codec(info: &png::Info<'_>, header: &HeaderInfo) -> Self {
        let palette = info.palette.as_deref().map(|p| {
            p.chunks_exact(3)
                .map(|rgb| [rgb[0], rgb[1], rgb[2]])
                .collect()
        });
        let transparency = info
            .trns
            .as_deref()
            .and_then(|t| Transparency::from_chunk(header.color, header.bit_depth, t));
        Self {
            palette,
            transparency,
        }
    }
}

/// Header summary returned by [`crate::probe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Format a full decode produces.
    pub format: PixelFormat,
    pub header: HeaderInfo,
}
