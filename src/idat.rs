//! Image data stream for the encoder: scanline filtering, zlib at the
//! requested level, and IDAT chunking through the codec's chunk writer.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::ZlibEncoder;

use crate::error::PngError;

/// Payload size of each IDAT chunk.
const IDAT_CHUNK_LEN: usize = 32 * 1024;

/// Level used when no option sets one.
pub(crate) const DEFAULT_LEVEL: u32 = 6;

/// zlib settings for a 0..=9 level. Level 0 stores blocks uncompressed.
pub(crate) fn deflate_level(level: u32) -> Compression {
    if level == 0 {
        Compression::none()
    } else {
        Compression::new(level.min(9))
    }
}

/// Filter types from the PNG specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

const ALL_FILTERS: [FilterType; 5] = [
    FilterType::None,
    FilterType::Sub,
    FilterType::Up,
    FilterType::Average,
    FilterType::Paeth,
];

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let (ia, ib, ic) = (i16::from(a), i16::from(b), i16::from(c));
    let pa = (ib - ic).abs();
    let pb = (ia - ic).abs();
    let pc = (ia + ib - 2 * ic).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn apply_filter(kind: FilterType, row: &[u8], prev: &[u8], bytewidth: usize, out: &mut Vec<u8>) {
    out.clear();
    for (i, &x) in row.iter().enumerate() {
        let a = if i >= bytewidth { row[i - bytewidth] } else { 0 };
        let b = prev[i];
        let c = if i >= bytewidth { prev[i - bytewidth] } else { 0 };
        let predicted = match kind {
            FilterType::None => 0,
            FilterType::Sub => a,
            FilterType::Up => b,
            FilterType::Average => ((u16::from(a) + u16::from(b)) / 2) as u8,
            FilterType::Paeth => paeth(a, b, c),
        };
        out.push(x.wrapping_sub(predicted));
    }
}

/// Sum of absolute values with bytes read as signed differences.
fn cost(filtered: &[u8]) -> u64 {
    filtered
        .iter()
        .map(|&b| u64::from((b as i8).unsigned_abs()))
        .sum()
}

/// Per-row filter selection.
///
/// Palette and sub-byte images always use no filter. Others pick, per row,
/// the filter with the smallest sum of absolute differences.
pub(crate) struct RowFilter {
    bytewidth: usize,
    adaptive: bool,
    prev: Vec<u8>,
    scratch: Vec<u8>,
    best: Vec<u8>,
}

impl RowFilter {
    pub(crate) fn new(bits_per_pixel: usize, adaptive: bool) -> Self {
        Self {
            bytewidth: bits_per_pixel.div_ceil(8).max(1),
            adaptive,
            prev: Vec::new(),
            scratch: Vec::new(),
            best: Vec::new(),
        }
    }

    /// Filter one scanline. Returns the filter type byte followed by the
    /// filtered samples.
    pub(crate) fn filter(&mut self, row: &[u8]) -> &[u8] {
        if self.prev.len() != row.len() {
            // The row above the first is all zeros.
            self.prev.clear();
            self.prev.resize(row.len(), 0);
        }
        self.best.clear();
        if self.adaptive {
            let mut best_cost = u64::MAX;
            for kind in ALL_FILTERS {
                apply_filter(kind, row, &self.prev, self.bytewidth, &mut self.scratch);
                let c = cost(&self.scratch);
                if c < best_cost {
                    best_cost = c;
                    self.best.clear();
                    self.best.push(kind as u8);
                    self.best.extend_from_slice(&self.scratch);
                }
            }
        } else {
            self.best.push(FilterType::None as u8);
            self.best.extend_from_slice(row);
        }
        self.prev.clear();
        self.prev.extend_from_slice(row);
        &self.best
    }
}

/// Splits the zlib stream into IDAT chunks as it is produced.
struct IdatSink<'a, W: Write> {
    writer: &'a mut png::Writer<W>,
    pending: Vec<u8>,
}

impl<W: Write> IdatSink<'_, W> {
    fn emit(&mut self, len: usize) -> io::Result<()> {
        self.writer
            .write_chunk(png::chunk::IDAT, &self.pending[..len])
            .map_err(io::Error::other)?;
        self.pending.drain(..len);
        Ok(())
    }
}

impl<W: Write> Write for IdatSink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while self.pending.len() >= IDAT_CHUNK_LEN {
            self.emit(IDAT_CHUNK_LEN)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Filtered, compressed image data written as IDAT chunks.
pub(crate) struct ImageDataWriter<'a, W: Write> {
    zlib: ZlibEncoder<IdatSink<'a, W>>,
    filter: RowFilter,
}

impl<'a, W: Write> ImageDataWriter<'a, W> {
    pub(crate) fn new(writer: &'a mut png::Writer<W>, level: u32, filter: RowFilter) -> Self {
        let sink = IdatSink {
            writer,
            pending: Vec::with_capacity(IDAT_CHUNK_LEN),
        };
        Self {
            zlib: ZlibEncoder::new(sink, deflate_level(level)),
            filter,
        }
    }

    /// Append one unfiltered scanline in on-disk layout.
    pub(crate) fn write_row(&mut self, row: &[u8]) -> Result<(), PngError> {
        let filtered = self.filter.filter(row);
        self.zlib.write_all(filtered).map_err(PngError::StreamWrite)
    }

    /// Flush the zlib stream and the last partial IDAT chunk.
    pub(crate) fn finish(self) -> Result<(), PngError> {
        let mut sink = self.zlib.finish().map_err(PngError::StreamWrite)?;
        if !sink.pending.is_empty() {
            let len = sink.pending.len();
            sink.emit(len).map_err(PngError::StreamWrite)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Undo one filtered scanline.
    fn unfilter(filtered: &[u8], prev: &[u8], bytewidth: usize) -> Vec<u8> {
        let kind = filtered[0];
        let data = &filtered[1..];
        let mut out: Vec<u8> = Vec::with_capacity(data.len());
        for (i, &x) in data.iter().enumerate() {
            let a = if i >= bytewidth { out[i - bytewidth] } else { 0 };
            let b = prev[i];
            let c = if i >= bytewidth { prev[i - bytewidth] } else { 0 };
            let predicted = match kind {
                0 => 0,
                1 => a,
                2 => b,
                3 => ((u16::from(a) + u16::from(b)) / 2) as u8,
                _ => paeth(a, b, c),
            };
            out.push(x.wrapping_add(predicted));
        }
        out
    }

    #[test]
    fn adaptive_rows_reverse_exactly() {
        let rows: Vec<Vec<u8>> = (0..6u8)
            .map(|y| (0..24u8).map(|x| x.wrapping_mul(7).wrapping_add(y * 31)).collect())
            .collect();
        let mut filter = RowFilter::new(24, true);
        let mut prev = vec![0u8; 24];
        for row in &rows {
            let filtered = filter.filter(row).to_vec();
            assert!(filtered[0] <= 4);
            assert_eq!(unfilter(&filtered, &prev, 3), *row);
            prev.clone_from(row);
        }
    }

    #[test]
    fn gradient_prefers_a_difference_filter() {
        let row: Vec<u8> = (0..64u8).map(|x| x * 2).collect();
        let mut filter = RowFilter::new(8, true);
        assert_eq!(filter.filter(&row)[0], FilterType::Sub as u8);
        // Identical next row: Up leaves all zeros.
        assert_eq!(filter.filter(&row)[0], FilterType::Up as u8);
    }

    #[test]
    fn fixed_filter_passes_row_through() {
        let mut filter = RowFilter::new(1, false);
        assert_eq!(filter.filter(&[9, 8, 7]), &[0, 9, 8, 7]);
    }

    #[test]
    fn paeth_predictor_picks_nearest_neighbor() {
        assert_eq!(paeth(10, 10, 10), 10);
        assert_eq!(paeth(1, 9, 1), 9);
        assert_eq!(paeth(9, 1, 1), 9);
        assert_eq!(paeth(5, 7, 6), 6);
        // Ties between left and above go left.
        assert_eq!(paeth(4, 8, 6), 4);
    }

    #[test]
    fn level_zero_stores() {
        assert_eq!(deflate_level(0).level(), 0);
        assert_eq!(deflate_level(4).level(), 4);
        assert_eq!(deflate_level(40).level(), 9);
    }
}
