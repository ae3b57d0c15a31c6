//! Owned pixel storage handed back to callers.

use rgb::RGBA8;

use crate::color::ColorSpace;
use crate::error::PngError;
use crate::metadata::MetadataEntries;
use crate::pixel::{AlphaMode, PixelFormat};

/// Color table of an indexed buffer. At most 256 entries.
pub type ColorTable = Vec<RGBA8>;

/// Maximum number of entries in a [`ColorTable`].
pub const MAX_COLOR_TABLE_LEN: usize = 256;

/// A decoded image, or an image about to be encoded.
///
/// Rows are `stride` bytes apart; only the first
/// [`PixelFormat::row_bytes`] bytes of each row carry pixels.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    alpha_mode: AlphaMode,
    data: Vec<u8>,
    color_table: Option<ColorTable>,
    pub color_space: ColorSpace,
    pub metadata: MetadataEntries,
    pub dots_per_meter_x: u32,
    pub dots_per_meter_y: u32,
    /// Position of the image relative to its page, in pixels.
    pub offset: (i32, i32),
}

impl PixelBuffer {
    /// Allocate a zeroed buffer on the heap with 32-bit aligned rows.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, PngError> {
        HeapAllocator.allocate(width, height, format)
    }

    /// Wrap existing pixel data.
    pub fn from_vec(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, PngError> {
        if width == 0 || height == 0 {
            return Err(PngError::InvalidBuffer(format!(
                "empty dimensions {width}x{height}"
            )));
        }
        let row_bytes = format.row_bytes(width);
        if stride < row_bytes {
            return Err(PngError::InvalidBuffer(format!(
                "stride {stride} shorter than row of {row_bytes} bytes"
            )));
        }
        let needed = stride
            .checked_mul(height as usize)
            .ok_or(PngError::InvalidBuffer(format!(
                "{width}x{height} buffer size overflows"
            )))?;
        if data.len() < needed {
            return Err(PngError::BufferTooSmall {
                needed,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            alpha_mode: AlphaMode::Straight,
            data,
            color_table: None,
            color_space: ColorSpace::Unset,
            metadata: MetadataEntries::new(),
            dots_per_meter_x: 0,
            dots_per_meter_y: 0,
            offset: (0, 0),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    pub fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.alpha_mode = mode;
    }

    /// Raw storage including row padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Pixel bytes of row `y`, without padding.
    ///
    /// # Panics
    ///
    /// If `y >= height`.
    pub fn row(&self, y: u32) -> &[u8] {
        assert!(y < self.height, "row {y} out of range");
        let start = y as usize * self.stride;
        &self.data[start..start + self.format.row_bytes(self.width)]
    }

    /// Mutable pixel bytes of row `y`, without padding.
    ///
    /// # Panics
    ///
    /// If `y >= height`.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        assert!(y < self.height, "row {y} out of range");
        let start = y as usize * self.stride;
        let len = self.format.row_bytes(self.width);
        &mut self.data[start..start + len]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let len = self.format.row_bytes(self.width);
        self.data
            .chunks(self.stride)
            .take(self.height as usize)
            .map(move |row| &row[..len])
    }

    pub fn color_table(&self) -> Option<&[RGBA8]> {
        self.color_table.as_deref()
    }

    /// Attach a color table. Only indexed formats carry one.
    pub fn set_color_table(&mut self, table: ColorTable) -> Result<(), PngError> {
        if !self.format.is_indexed() {
            return Err(PngError::InvalidBuffer(format!(
                "{:?} buffers have no color table",
                self.format
            )));
        }
        let limit = match self.format {
            PixelFormat::Mono => 2,
            _ => MAX_COLOR_TABLE_LEN,
        };
        if table.len() > limit {
            return Err(PngError::InvalidBuffer(format!(
                "color table of {} entries exceeds {limit}",
                table.len()
            )));
        }
        self.color_table = Some(table);
        Ok(())
    }

    /// Borrow a single-byte format as a strided [`imgref::ImgRef`].
    ///
    /// Returns [`PngError::LayoutMismatch`] unless the format is
    /// [`PixelFormat::Grayscale8`] or [`PixelFormat::Indexed8`].
    #[cfg(feature = "imgref")]
    pub fn as_imgref(&self) -> Result<imgref::ImgRef<'_, u8>, PngError> {
        match self.format {
            PixelFormat::Grayscale8 | PixelFormat::Indexed8 => Ok(imgref::ImgRef::new_stride(
                &self.data[..],
                self.width as usize,
                self.height as usize,
                self.stride,
            )),
            other => Err(PngError::LayoutMismatch {
                expected: PixelFormat::Grayscale8,
                actual: other,
            }),
        }
    }
}

/// Produces pixel buffers for the decoder.
///
/// A failure here aborts the decode with [`PngError::AllocationFailure`].
pub trait BufferAllocator {
    fn allocate(&self, width: u32, height: u32, format: PixelFormat)
    -> Result<PixelBuffer, PngError>;
}

/// Allocates zeroed heap storage with 32-bit aligned rows.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<PixelBuffer, PngError> {
        let failed = PngError::AllocationFailure {
            width,
            height,
            format,
        };
        if width == 0 || height == 0 {
            return Err(failed);
        }
        let Some(stride) = format.aligned_stride(width) else {
            return Err(failed);
        };
        let Some(len) = stride.checked_mul(height as usize) else {
            return Err(failed);
        };
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            return Err(failed);
        }
        data.resize(len, 0);
        PixelBuffer::from_vec(width, height, stride, format, data)
    }
}
