//! Inline box-filter downscaling of 32-bit rows.
//!
//! Source rows are pulled one at a time from a [`RowSource`] and folded into
//! a single row of integer accumulators, so the full-resolution image never
//! exists in memory. Each output sample is the area-weighted mean of the
//! input samples it covers; the weights of every output row and column sum to
//! exactly the input extent.

use enough::Stop;

use crate::buffer::PixelBuffer;
use crate::error::PngError;

const BYTES_PER_PIXEL: usize = 4;

/// Supplies transformed source rows in top-to-bottom order.
pub(crate) trait RowSource {
    /// Fill `out` with the next row.
    fn next_row(&mut self, out: &mut [u8]) -> Result<(), PngError>;
}

/// Downscale `src_width` x `src_height` 4-byte pixels from `source` into
/// `dst`, whose dimensions are the target size.
///
/// Reads exactly `src_height` rows.
pub(crate) fn downscale<S: RowSource>(
    source: &mut S,
    src_width: u32,
    src_height: u32,
    dst: &mut PixelBuffer,
    stop: &dyn Stop,
) -> Result<(), PngError> {
    let (in_w, in_h) = (src_width as u64, src_height as u64);
    let (out_w, out_h) = (dst.width() as u64, dst.height() as u64);
    if out_w == 0 || out_h == 0 || out_w > in_w || out_h > in_h {
        return Err(PngError::InvalidBuffer(format!(
            "cannot box-scale {in_w}x{in_h} to {out_w}x{out_h}"
        )));
    }

    let row_len = src_width as usize * BYTES_PER_PIXEL;
    let mut acc = vec![0u64; row_len];
    let mut in_row = vec![0u8; row_len];
    let mut mid_row = vec![0u8; row_len];

    // Weight of the last read row still owed to the next output row.
    let mut carry: i64 = 0;
    for oy in 0..dst.height() {
        if oy % 16 == 0 {
            stop.check()?;
        }
        for (a, &v) in acc.iter_mut().zip(&in_row) {
            *a = carry as u64 * u64::from(v);
        }
        let mut remaining = in_h as i64 - carry;
        while remaining > 0 {
            source.next_row(&mut in_row)?;
            let weight = out_h.min(remaining as u64);
            for (a, &v) in acc.iter_mut().zip(&in_row) {
                *a += weight * u64::from(v);
            }
            remaining -= out_h as i64;
        }
        carry = -remaining;

        for (m, &a) in mid_row.iter_mut().zip(&acc) {
            *m = (a / in_h) as u8;
        }
        shrink_row(&mid_row, in_w, out_w, dst.row_mut(oy));
    }
    Ok(())
}

/// Horizontal pass over one vertically reduced row.
fn shrink_row(row: &[u8], in_w: u64, out_w: u64, out: &mut [u8]) {
    let mut carry = out_w as i64;
    let mut ix = 0usize;
    for px in out.chunks_exact_mut(BYTES_PER_PIXEL) {
        let mut sum = [0u64; BYTES_PER_PIXEL];
        for (s, &v) in sum.iter_mut().zip(&row[ix..ix + BYTES_PER_PIXEL]) {
            *s = carry as u64 * u64::from(v);
        }
        let mut remaining = in_w as i64 - carry;
        while remaining > 0 {
            ix += BYTES_PER_PIXEL;
            if ix >= row.len() {
                break;
            }
            let weight = out_w.min(remaining as u64);
            for (s, &v) in sum.iter_mut().zip(&row[ix..ix + BYTES_PER_PIXEL]) {
                *s += weight * u64::from(v);
            }
            remaining -= out_w as i64;
        }
        carry = -remaining;
        for (o, s) in px.iter_mut().zip(sum) {
            *o = (s / in_w) as u8;
        }
    }
}

/// Scale a pixels-per-metre density by `out / input`.
pub(crate) fn scale_density(density: u32, out: u32, input: u32) -> u32 {
    if input == 0 {
        return density;
    }
    (u64::from(density) * u64::from(out) / u64::from(input)) as u32
}

/// Scale a pixel offset by `out / input`, truncating toward zero.
pub(crate) fn scale_offset(offset: i32, out: u32, input: u32) -> i32 {
    if input == 0 {
        return offset;
    }
    (i64::from(offset) * i64::from(out) / i64::from(input)) as i32
}
