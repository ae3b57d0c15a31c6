//! # pngflow
//!
//! PNG format negotiation and pixel transcoding on top of the `png` codec.
//!
//! The codec handles chunk parsing and the decode side of filtering and
//! zlib. On encode, image data is filtered per row and deflated with
//! `flate2` at the exact requested level. This crate also decides
//! which in-memory layout each image becomes, converts the codec's rows into
//! it, resolves the color space from competing chunks, gathers text, and can
//! box-filter downscale while decoding. Encoding maps a buffer back to the
//! smallest on-disk color type that holds it.
//!
//! ## Pixel formats
//!
//! | On disk | Decoded as |
//! |---|---|
//! | gray, 1 bit | [`PixelFormat::Mono`] with a white/black table |
//! | gray, 2/4 bit, or 8 bit with tRNS | [`PixelFormat::Indexed8`] with a linear gray table |
//! | gray, 8 bit | [`PixelFormat::Grayscale8`] |
//! | gray, 16 bit | [`PixelFormat::Grayscale16`], or [`PixelFormat::Rgba64`] with tRNS |
//! | palette, up to 256 entries | [`PixelFormat::Mono`] (1 bit) or [`PixelFormat::Indexed8`] |
//! | other 16 bit | [`PixelFormat::Rgba64`], or [`PixelFormat::Rgbx64`] when opaque |
//! | everything else | [`PixelFormat::Argb32`], or [`PixelFormat::Rgb32`] when opaque |
//!
//! ## Non-Goals
//!
//! - General-purpose resizing. Only the inline downscale for direct-color,
//!   non-interlaced images is provided.
//! - Color conversion beyond normalizing decode output.
//! - Arbitrary chunk editing.
//!
//! ## Usage
//!
//! ```no_run
//! use pngflow::{DecodeSession, EncodeRequest, Unstoppable};
//!
//! let data: &[u8] = &[]; // your PNG bytes
//!
//! // Probe without decoding
//! let info = pngflow::probe(data)?;
//! println!("{}x{} {:?}", info.width, info.height, info.format);
//!
//! // Decode at half size with a session
//! let mut session = DecodeSession::new(data);
//! session.set_scaled_size(info.width / 2, info.height / 2);
//! let image = session.decode_image(Unstoppable)?;
//!
//! // Encode again
//! let encoded = EncodeRequest::new()
//!     .with_compression_ratio(90)
//!     .encode_to_vec(&image, Unstoppable)?;
//! # Ok::<(), pngflow::PngError>(())
//! ```

#![forbid(unsafe_code)]

mod buffer;
mod color;
mod decode;
mod diagnostics;
mod encode;
mod error;
mod idat;
mod info;
mod limits;
mod metadata;
mod negotiate;
mod pixel;
mod scale;
mod stream;
mod transform;

// Re-exports
pub use buffer::{BufferAllocator, ColorTable, HeapAllocator, MAX_COLOR_TABLE_LEN, PixelBuffer};
pub use color::{
    Chromaticities, ColorSources, ColorSpace, ColorSpaceResolver, apply_gamma_override, resolve,
};
pub use decode::{DecodeSession, ReadState, decode, is_png, probe};
pub use diagnostics::{CollectingDiagnostics, Diagnostics, LogDiagnostics};
pub use encode::{EncodeRequest, encode, level_from_options};
pub use enough::{Stop, Unstoppable};
pub use error::{PngError, Warning};
pub use info::{ChunkContext, ColorKind, HeaderInfo, ImageInfo, Transparency};
pub use limits::Limits;
pub use metadata::{MAX_KEYWORD_LEN, MetadataEntries, TextEncoding, simplify_whitespace};
pub use negotiate::{Negotiation, NegotiationRequest, declared_format, negotiate};
pub use pixel::{AlphaMode, PixelFormat};
pub use rgb::RGBA8;
pub use stream::{AnimationHints, Disposal, PNG_SIGNATURE};
pub use transform::{FillerPlacement, SampleTransform};
