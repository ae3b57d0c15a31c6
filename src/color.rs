//! Color-space resolution from iCCP, sRGB, gAMA and cHRM chunks.
//!
//! Several chunks can describe the color space of one image. They are ranked
//! ICC profile > sRGB > gamma/chromaticities > nothing, and the highest-ranked
//! valid source wins no matter where it sits in the file.

use core::cmp::Ordering;

use crate::diagnostics::Diagnostics;
use crate::error::Warning;

/// CIE xy chromaticity coordinates of the white point and the three primaries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Chromaticities {
    pub white: (f32, f32),
    pub red: (f32, f32),
    pub green: (f32, f32),
    pub blue: (f32, f32),
}

impl Chromaticities {
    /// Rec. 709 primaries with a D65 white point.
    pub const SRGB: Chromaticities = Chromaticities {
        white: (0.3127, 0.3290),
        red: (0.64, 0.33),
        green: (0.30, 0.60),
        blue: (0.15, 0.06),
    };

    /// All coordinates finite, within `[0, 1]`, and with a positive y.
    pub fn is_valid(&self) -> bool {
        [self.white, self.red, self.green, self.blue]
            .iter()
            .all(|&(x, y)| x.is_finite() && y.is_finite() && (0.0..=1.0).contains(&x) && y > 0.0 && y <= 1.0)
    }
}

/// Resolved color-space description of an image.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ColorSpace {
    /// No usable color information.
    #[default]
    Unset,
    /// Power-law transfer with `gamma` as stored in gAMA (encoding exponent,
    /// e.g. `0.45455`). `primaries` is `None` when sRGB primaries are implied.
    GammaChroma {
        gamma: f32,
        primaries: Option<Chromaticities>,
    },
    /// sRGB as signalled by the sRGB chunk.
    StandardRgb,
    /// Embedded ICC profile.
    IccProfile { profile: Vec<u8>, name: String },
}

impl ColorSpace {
    fn rank(&self) -> u8 {
        match self {
            ColorSpace::Unset => 0,
            ColorSpace::GammaChroma { .. } => 1,
            ColorSpace::StandardRgb => 2,
            ColorSpace::IccProfile { .. } => 3,
        }
    }

    /// Orders two descriptors by source precedence, not by content.
    pub fn precedence_cmp(&self, other: &ColorSpace) -> Ordering {
        self.rank().cmp(&other.rank())
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, ColorSpace::Unset)
    }

    pub fn gamma(&self) -> Option<f32> {
        match self {
            ColorSpace::GammaChroma { gamma, .. } => Some(*gamma),
            _ => None,
        }
    }
}

/// Raw color information gathered from the chunks of one image.
#[derive(Clone, Debug, Default)]
pub struct ColorSources<'a> {
    pub icc_profile: Option<&'a [u8]>,
    /// Profile name from the iCCP chunk header.
    pub icc_name: Option<&'a str>,
    /// Rendering intent byte of the sRGB chunk.
    pub srgb_intent: Option<u8>,
    pub gamma: Option<f32>,
    pub chromaticities: Option<Chromaticities>,
}

/// Folds candidate descriptors, keeping the highest-precedence one.
#[derive(Clone, Debug, Default)]
pub struct ColorSpaceResolver {
    current: ColorSpace,
}

impl ColorSpaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate. It replaces the current descriptor unless the
    /// current one has strictly higher precedence. Returns whether it did.
    pub fn offer(&mut self, candidate: ColorSpace) -> bool {
        if candidate.precedence_cmp(&self.current) == Ordering::Less {
            return false;
        }
        self.current = candidate;
        true
    }

    pub fn current(&self) -> &ColorSpace {
        &self.current
    }

    pub fn finish(self) -> ColorSpace {
        self.current
    }
}

/// Combine the color chunks of one image into a single descriptor.
///
/// A profile that fails to parse is reported to `diagnostics` and treated as
/// absent.
pub fn resolve(sources: &ColorSources<'_>, diagnostics: &dyn Diagnostics) -> ColorSpace {
    let mut resolver = ColorSpaceResolver::new();

    if let Some(profile) = sources.icc_profile {
        match parse_icc_header(profile) {
            Ok(description) => {
                let name = description
                    .or_else(|| sources.icc_name.map(str::to_owned))
                    .unwrap_or_default();
                resolver.offer(ColorSpace::IccProfile {
                    profile: profile.to_vec(),
                    name,
                });
            }
            Err(reason) => diagnostics.warn(&Warning::ColorProfileParseFailure(reason)),
        }
    }

    if let Some(intent) = sources.srgb_intent {
        if intent <= 3 {
            resolver.offer(ColorSpace::StandardRgb);
        }
    }

    if let Some(gamma) = sources.gamma {
        if gamma > 0.0 {
            let primaries = sources.chromaticities.filter(Chromaticities::is_valid);
            resolver.offer(ColorSpace::GammaChroma { gamma, primaries });
        }
    }

    resolver.finish()
}

/// Descriptor after a caller-supplied display gamma overrides the file.
///
/// Only applies when both gammas are known. The result is always
/// [`ColorSpace::GammaChroma`] with the reciprocal of `override_gamma`,
/// keeping primaries already resolved from cHRM.
pub fn apply_gamma_override(
    resolved: &ColorSpace,
    override_gamma: f32,
    file_gamma: Option<f32>,
) -> Option<ColorSpace> {
    if override_gamma == 0.0 || !file_gamma.is_some_and(|g| g > 0.0) {
        return None;
    }
    let primaries = match resolved {
        ColorSpace::GammaChroma { primaries, .. } => *primaries,
        _ => None,
    };
    Some(ColorSpace::GammaChroma {
        gamma: 1.0 / override_gamma,
        primaries,
    })
}

const ICC_HEADER_LEN: usize = 128;

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Structural check of an ICC profile. Returns the profile description when
/// the `desc` tag can be read.
pub(crate) fn parse_icc_header(profile: &[u8]) -> Result<Option<String>, String> {
    if profile.len() < ICC_HEADER_LEN + 4 {
        return Err(format!("profile of {} bytes is too short", profile.len()));
    }
    let declared = be_u32(profile, 0).unwrap_or(0) as usize;
    if declared < ICC_HEADER_LEN + 4 || declared > profile.len() {
        return Err(format!(
            "declared size {declared} does not fit {} bytes",
            profile.len()
        ));
    }
    if &profile[36..40] != b"acsp" {
        return Err("missing 'acsp' signature".into());
    }
    let profile = &profile[..declared];
    let tag_count = be_u32(profile, ICC_HEADER_LEN).unwrap_or(0) as usize;
    let table_end = tag_count
        .checked_mul(12)
        .and_then(|n| n.checked_add(ICC_HEADER_LEN + 4))
        .filter(|&end| end <= declared)
        .ok_or_else(|| format!("tag table of {tag_count} entries overruns profile"))?;

    let mut description = None;
    for entry in profile[ICC_HEADER_LEN + 4..table_end].chunks_exact(12) {
        let offset = be_u32(entry, 4).unwrap_or(0) as usize;
        let size = be_u32(entry, 8).unwrap_or(0) as usize;
        let Some(tag) = offset.checked_add(size).and_then(|end| profile.get(offset..end)) else {
            return Err(format!(
                "tag {:?} at {offset}+{size} overruns profile",
                String::from_utf8_lossy(&entry[..4])
            ));
        };
        if &entry[..4] == b"desc" {
            description = read_description(tag);
        }
    }
    Ok(description)
}

fn read_description(tag: &[u8]) -> Option<String> {
    match tag.get(..4)? {
        // ICC v2 textDescriptionType: ASCII count then NUL-terminated text
        b"desc" => {
            let count = be_u32(tag, 8)? as usize;
            let text = tag.get(12..12 + count)?;
            let text = text.split(|&b| b == 0).next().unwrap_or_default();
            let s = String::from_utf8_lossy(text).trim().to_owned();
            (!s.is_empty()).then_some(s)
        }
        // ICC v4 multiLocalizedUnicodeType: take the first record
        b"mluc" => {
            if be_u32(tag, 8)? == 0 {
                return None;
            }
            let len = be_u32(tag, 20)? as usize;
            let offset = be_u32(tag, 24)? as usize;
            let utf16 = tag.get(offset..offset.checked_add(len)?)?;
            let units: Vec<u16> = utf16
                .chunks_exact(2)
                .map(|p| u16::from_be_bytes([p[0], p[1]]))
                .collect();
            let s = String::from_utf16_lossy(&units)
                .trim_end_matches('\0')
                .trim()
                .to_owned();
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}
