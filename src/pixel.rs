/// In-memory pixel layout of a [`crate::PixelBuffer`].
///
/// Multi-byte samples are stored in native byte order. The 32-bit formats
/// hold one native-endian `u32` per pixel laid out as `0xAARRGGBB`, so on
/// little-endian machines the bytes read B, G, R, A.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 1 bit per pixel, MSB first, index into a 2-entry color table.
    Mono,
    /// 1 byte per pixel, index into a color table of up to 256 entries.
    Indexed8,
    /// 1 byte per pixel, gray level.
    Grayscale8,
    /// Native-endian `u16` gray level.
    Grayscale16,
    /// Native-endian `u32` `0xFFRRGGBB`. The top byte is padding.
    Rgb32,
    /// Native-endian `u32` `0xAARRGGBB`.
    Argb32,
    /// Four native-endian `u16` samples R, G, B, X. X is padding.
    Rgbx64,
    /// Four native-endian `u16` samples R, G, B, A.
    Rgba64,
}

impl PixelFormat {
    pub fn bits_per_pixel(&self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Indexed8 | Self::Grayscale8 => 8,
            Self::Grayscale16 => 16,
            Self::Rgb32 | Self::Argb32 => 32,
            Self::Rgbx64 | Self::Rgba64 => 64,
        }
    }

    /// Minimum bytes needed for one row of `width` pixels.
    pub fn row_bytes(&self, width: u32) -> usize {
        (width as usize * self.bits_per_pixel()).div_ceil(8)
    }

    /// Row stride used for freshly allocated buffers: rows padded to 32 bits.
    pub fn aligned_stride(&self, width: u32) -> Option<usize> {
        let bits = (width as usize).checked_mul(self.bits_per_pixel())?;
        Some(bits.checked_add(31)? / 32 * 4)
    }

    /// Whether pixels are indices into a color table.
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Mono | Self::Indexed8)
    }

    pub fn has_alpha_channel(&self) -> bool {
        matches!(self, Self::Argb32 | Self::Rgba64)
    }
}

/// How color samples relate to the alpha sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlphaMode {
    /// Color samples are independent of alpha. Decoding always produces this.
    #[default]
    Straight,
    /// Color samples are pre-multiplied by alpha. Only meaningful for
    /// [`PixelFormat::Argb32`] and [`PixelFormat::Rgba64`].
    Premultiplied,
}
