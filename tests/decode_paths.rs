//! Decode of every on-disk color type / depth / transparency combination,
//! with fixtures written by the `png` encoder directly.

use std::borrow::Cow;
use std::rc::Rc;

use enough::Unstoppable;
use pngflow::*;

fn fixture(
    width: u32,
    height: u32,
    color: png::ColorType,
    depth: png::BitDepth,
    configure: impl FnOnce(&mut png::Info<'static>),
    data: &[u8],
) -> Vec<u8> {
    let mut info = png::Info::with_size(width, height);
    info.color_type = color;
    info.bit_depth = depth;
    configure(&mut info);
    let mut out = Vec::new();
    {
        let encoder = png::Encoder::with_info(&mut out, info).unwrap();
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
        writer.finish().unwrap();
    }
    out
}

fn argb(a: u8, r: u8, g: u8, b: u8) -> [u8; 4] {
    (u32::from(a) << 24 | u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b)).to_ne_bytes()
}

fn ne16(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

/// Smallest ICC profile the resolver accepts, with a v2 `desc` tag.
fn minimal_icc(description: &str) -> Vec<u8> {
    let mut desc = b"desc\0\0\0\0".to_vec();
    desc.extend_from_slice(&(description.len() as u32 + 1).to_be_bytes());
    desc.extend_from_slice(description.as_bytes());
    desc.push(0);

    let tag_offset = 128 + 4 + 12;
    let total = tag_offset + desc.len();
    let mut profile = vec![0u8; 128];
    profile[0..4].copy_from_slice(&(total as u32).to_be_bytes());
    profile[36..40].copy_from_slice(b"acsp");
    profile.extend_from_slice(&1u32.to_be_bytes());
    profile.extend_from_slice(b"desc");
    profile.extend_from_slice(&(tag_offset as u32).to_be_bytes());
    profile.extend_from_slice(&(desc.len() as u32).to_be_bytes());
    profile.extend_from_slice(&desc);
    profile
}

// ── Grayscale ───────────────────────────────────────────────────────

#[test]
fn gray1_key_zero_makes_black_transparent() {
    let data = fixture(
        8,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::One,
        |i| i.trns = Some(Cow::Owned(vec![0, 0])),
        &[0b1111_0000],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Mono);
    // bit 1 selects the black entry
    assert_eq!(image.row(0), &[0b0000_1111]);
    let table = image.color_table().unwrap();
    assert_eq!(table[0], RGBA8::new(255, 255, 255, 255));
    assert_eq!(table[1], RGBA8::new(0, 0, 0, 0));
}

#[test]
fn gray1_key_one_makes_white_transparent() {
    let data = fixture(
        8,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::One,
        |i| i.trns = Some(Cow::Owned(vec![0, 1])),
        &[0b1010_1010],
    );
    let image = decode(&data, Unstoppable).unwrap();
    let table = image.color_table().unwrap();
    assert_eq!(table[0].a, 0);
    assert_eq!(table[1].a, 255);
}

#[test]
fn gray2_decodes_to_indexed_with_linear_table() {
    let data = fixture(
        4,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Two,
        |_| {},
        &[0b00_01_10_11],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Indexed8);
    assert_eq!(image.row(0), &[0, 1, 2, 3]);
    let grays: Vec<u8> = image.color_table().unwrap().iter().map(|c| c.g).collect();
    assert_eq!(grays, [0, 85, 170, 255]);
}

#[test]
fn gray8_with_key_decodes_to_indexed() {
    let data = fixture(
        3,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Eight,
        |i| i.trns = Some(Cow::Owned(vec![0, 7])),
        &[5, 7, 9],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Indexed8);
    assert_eq!(image.row(0), &[5, 7, 9]);
    let table = image.color_table().unwrap();
    assert_eq!(table.len(), 256);
    assert_eq!(table[7], RGBA8::new(7, 7, 7, 0));
    assert_eq!(table[9].a, 255);
}

#[test]
fn gray16_with_key_decodes_to_rgba64() {
    let data = fixture(
        2,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Sixteen,
        |i| i.trns = Some(Cow::Owned(vec![0x01, 0x02])),
        &[0x01, 0x02, 0xab, 0xcd],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Rgba64);
    assert_eq!(
        image.row(0),
        &ne16(&[0x0102, 0x0102, 0x0102, 0, 0xabcd, 0xabcd, 0xabcd, 0xffff])[..]
    );
}

#[test]
fn gray16_plain_stays_grayscale16() {
    let data = fixture(
        2,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Sixteen,
        |_| {},
        &[0x01, 0x02, 0xab, 0xcd],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Grayscale16);
    assert_eq!(image.row(0), &ne16(&[0x0102, 0xabcd])[..]);
}

#[test]
fn gray_alpha8_decodes_to_argb32() {
    let data = fixture(
        1,
        1,
        png::ColorType::GrayscaleAlpha,
        png::BitDepth::Eight,
        |_| {},
        &[100, 50],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Argb32);
    assert_eq!(image.row(0), &argb(50, 100, 100, 100));
}

// ── Truecolor ───────────────────────────────────────────────────────

#[test]
fn rgb8_with_key_gets_alpha() {
    let data = fixture(
        2,
        1,
        png::ColorType::Rgb,
        png::BitDepth::Eight,
        |i| i.trns = Some(Cow::Owned(vec![0, 10, 0, 20, 0, 30])),
        &[10, 20, 30, 1, 2, 3],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Argb32);
    let mut expected = argb(0, 10, 20, 30).to_vec();
    expected.extend_from_slice(&argb(255, 1, 2, 3));
    assert_eq!(image.row(0), &expected[..]);
}

#[test]
fn rgb8_plain_is_rgb32() {
    let data = fixture(1, 1, png::ColorType::Rgb, png::BitDepth::Eight, |_| {}, &[4, 5, 6]);
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Rgb32);
    assert_eq!(image.row(0), &argb(255, 4, 5, 6));
}

#[test]
fn rgb16_is_rgbx64() {
    let data = fixture(
        1,
        1,
        png::ColorType::Rgb,
        png::BitDepth::Sixteen,
        |_| {},
        &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Rgbx64);
    assert_eq!(image.row(0), &ne16(&[0x1122, 0x3344, 0x5566, 0xffff])[..]);
}

// ── Palette ─────────────────────────────────────────────────────────

#[test]
fn palette_indices_past_table_become_zero() {
    let data = fixture(
        4,
        1,
        png::ColorType::Indexed,
        png::BitDepth::Four,
        |i| {
            i.palette = Some(Cow::Owned(vec![1, 1, 1, 2, 2, 2, 3, 3, 3]));
            i.trns = Some(Cow::Owned(vec![0]));
        },
        &[0x01, 0x25],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Indexed8);
    assert_eq!(image.row(0), &[0, 1, 2, 0]);
    let alpha: Vec<u8> = image.color_table().unwrap().iter().map(|c| c.a).collect();
    assert_eq!(alpha, [0, 255, 255]);
}

#[test]
fn one_bit_palette_is_mono() {
    let data = fixture(
        8,
        1,
        png::ColorType::Indexed,
        png::BitDepth::One,
        |i| i.palette = Some(Cow::Owned(vec![255, 0, 0, 0, 0, 255])),
        &[0b1100_0011],
    );
    let image = decode(&data, Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Mono);
    assert_eq!(image.row(0), &[0b1100_0011]);
    assert_eq!(
        image.color_table().unwrap(),
        &[RGBA8::new(255, 0, 0, 255), RGBA8::new(0, 0, 255, 255)]
    );
}

// ── Scaled decode ───────────────────────────────────────────────────

fn blocky_rgb32() -> Vec<u8> {
    let mut buf = PixelBuffer::new(8, 4, PixelFormat::Rgb32).unwrap();
    for y in 0..4u32 {
        let row: Vec<u8> = (0..8u32)
            .flat_map(|x| {
                let v = ((x / 2 + y / 2) * 40) as u8;
                argb(255, v, 255 - v, 9)
            })
            .collect();
        buf.row_mut(y).copy_from_slice(&row);
    }
    buf.dots_per_meter_x = 1000;
    buf.dots_per_meter_y = 2001;
    buf.offset = (9, -4);
    encode(&buf, Unstoppable).unwrap()
}

#[test]
fn scaled_decode_averages_and_scales_resolution() {
    let data = blocky_rgb32();
    let mut session = DecodeSession::new(&data[..]);
    session.set_scaled_size(4, 2);
    let image = session.decode_image(Unstoppable).unwrap();
    assert_eq!((image.width(), image.height()), (4, 2));
    assert_eq!(image.format(), PixelFormat::Rgb32);
    for y in 0..2u32 {
        let expected: Vec<u8> = (0..4u32)
            .flat_map(|x| {
                let v = ((x + y) * 40) as u8;
                argb(255, v, 255 - v, 9)
            })
            .collect();
        assert_eq!(image.row(y), &expected[..], "row {y}");
    }
    assert_eq!((image.dots_per_meter_x, image.dots_per_meter_y), (500, 1000));
    assert_eq!(image.offset, (4, -2));
    // The query still reports the stored size.
    assert_eq!(session.size().unwrap(), (8, 4));
    assert_eq!(session.scaled_size(), Some((4, 2)));
}

#[test]
fn scaled_request_ignored_when_not_smaller() {
    let data = blocky_rgb32();
    for (w, h) in [(8, 4), (16, 2), (0, 2)] {
        let mut session = DecodeSession::new(&data[..]);
        session.set_scaled_size(w, h);
        let image = session.decode_image(Unstoppable).unwrap();
        assert_eq!((image.width(), image.height()), (8, 4));
        assert_eq!(image.offset, (9, -4));
    }
}

#[test]
fn scaled_request_ignored_for_indexed_output() {
    let data = fixture(
        4,
        2,
        png::ColorType::Grayscale,
        png::BitDepth::Four,
        |_| {},
        &[0x12, 0x34, 0x56, 0x78],
    );
    let mut session = DecodeSession::new(&data[..]);
    session.set_scaled_size(2, 1);
    let image = session.decode_image(Unstoppable).unwrap();
    assert_eq!(image.format(), PixelFormat::Indexed8);
    assert_eq!((image.width(), image.height()), (4, 2));
}

// ── Color space ─────────────────────────────────────────────────────

#[test]
fn icc_wins_over_gamma() {
    let icc = minimal_icc("Wide Gamut");
    let profile = icc.clone();
    let data = fixture(
        1,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Eight,
        move |i| {
            i.icc_profile = Some(Cow::Owned(profile));
            i.source_gamma = Some(png::ScaledFloat::new(0.45455));
        },
        &[0],
    );
    let image = decode(&data, Unstoppable).unwrap();
    match image.color_space {
        ColorSpace::IccProfile { profile, name } => {
            assert_eq!(profile, icc);
            assert_eq!(name, "Wide Gamut");
        }
        other => panic!("expected ICC, got {other:?}"),
    }
}

#[test]
fn broken_icc_degrades_to_gamma_with_warning() {
    let data = fixture(
        1,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Eight,
        |i| {
            i.icc_profile = Some(Cow::Owned(vec![0u8; 200]));
            i.source_gamma = Some(png::ScaledFloat::new(0.5));
        },
        &[0],
    );
    let diag = Rc::new(CollectingDiagnostics::new());
    let image = DecodeSession::new(&data[..])
        .with_diagnostics(diag.clone())
        .decode_image(Unstoppable)
        .unwrap();
    assert!(matches!(
        image.color_space,
        ColorSpace::GammaChroma { primaries: None, .. }
    ));
    assert!(matches!(
        diag.warnings().as_slice(),
        [Warning::ColorProfileParseFailure(_)]
    ));
}

#[test]
fn gamma_override_corrects_samples_and_descriptor() {
    let data = fixture(
        2,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Eight,
        |i| i.source_gamma = Some(png::ScaledFloat::new(0.5)),
        &[128, 255],
    );
    let mut session = DecodeSession::new(&data[..]);
    session.set_gamma(1.0);
    assert_eq!(session.gamma().unwrap(), Some(1.0));
    let image = session.decode_image(Unstoppable).unwrap();
    assert_eq!(image.row(0), &[64, 255]);
    assert_eq!(
        image.color_space,
        ColorSpace::GammaChroma {
            gamma: 1.0,
            primaries: None
        }
    );
}

#[test]
fn gamma_override_near_file_gamma_leaves_samples() {
    let data = fixture(
        1,
        1,
        png::ColorType::Grayscale,
        png::BitDepth::Eight,
        |i| i.source_gamma = Some(png::ScaledFloat::new(0.5)),
        &[128],
    );
    let mut session = DecodeSession::new(&data[..]);
    session.set_gamma(0.51);
    let image = session.decode_image(Unstoppable).unwrap();
    assert_eq!(image.row(0), &[128]);
}

// ── Text ────────────────────────────────────────────────────────────

#[test]
fn text_after_image_data_joins_after_decode() {
    let mut data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut data, 1, 1);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .add_text_chunk("Title".to_string(), "first".to_string())
            .unwrap();
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0]).unwrap();
        writer
            .write_text_chunk(&png::text_metadata::TEXtChunk::new("Comment", "after   the\nimage"))
            .unwrap();
        writer.finish().unwrap();
    }

    let mut session = DecodeSession::new(&data[..]);
    assert_eq!(session.description().unwrap(), "Title: first");
    let image = session.decode_image(Unstoppable).unwrap();
    assert_eq!(
        session.description().unwrap(),
        "Title: first\n\nComment: after the image"
    );
    assert_eq!(image.metadata.len(), 2);
    assert_eq!(image.metadata.get("Comment"), Some("after   the\nimage"));
}
