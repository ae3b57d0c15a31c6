use std::rc::Rc;

use enough::Unstoppable;
use pngflow::*;

fn argb(a: u8, r: u8, g: u8, b: u8) -> [u8; 4] {
    (u32::from(a) << 24 | u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b)).to_ne_bytes()
}

fn rgba64(r: u16, g: u16, b: u16, a: u16) -> Vec<u8> {
    [r, g, b, a].iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn filled(w: u32, h: u32, format: PixelFormat, px: impl Fn(u32, u32) -> Vec<u8>) -> PixelBuffer {
    let mut buf = PixelBuffer::new(w, h, format).unwrap();
    for y in 0..h {
        let row: Vec<u8> = (0..w).flat_map(|x| px(x, y)).collect();
        buf.row_mut(y).copy_from_slice(&row);
    }
    buf
}

fn rows(buf: &PixelBuffer) -> Vec<Vec<u8>> {
    buf.rows().map(<[u8]>::to_vec).collect()
}

fn roundtrip(buf: &PixelBuffer) -> PixelBuffer {
    let encoded = encode(buf, Unstoppable).unwrap();
    assert!(is_png(&encoded));
    decode(&encoded, Unstoppable).unwrap()
}

#[test]
fn argb32_roundtrip() {
    let buf = filled(5, 3, PixelFormat::Argb32, |x, y| {
        argb((x * 50) as u8, (y * 80) as u8, 10, 200).to_vec()
    });
    let decoded = roundtrip(&buf);
    assert_eq!(decoded.format(), PixelFormat::Argb32);
    assert_eq!((decoded.width(), decoded.height()), (5, 3));
    assert_eq!(rows(&decoded), rows(&buf));
}

#[test]
fn rgb32_roundtrip_keeps_opaque_padding() {
    let buf = filled(4, 4, PixelFormat::Rgb32, |x, y| {
        argb(255, (x * 60) as u8, (y * 60) as u8, 7).to_vec()
    });
    let decoded = roundtrip(&buf);
    assert_eq!(decoded.format(), PixelFormat::Rgb32);
    assert_eq!(rows(&decoded), rows(&buf));
}

#[test]
fn grayscale8_roundtrip() {
    let buf = filled(7, 2, PixelFormat::Grayscale8, |x, y| vec![(x * 30 + y) as u8]);
    let decoded = roundtrip(&buf);
    assert_eq!(decoded.format(), PixelFormat::Grayscale8);
    assert_eq!(rows(&decoded), rows(&buf));
}

#[test]
fn grayscale16_roundtrip() {
    let buf = filled(3, 3, PixelFormat::Grayscale16, |x, y| {
        ((x * 20000 + y * 7) as u16).to_ne_bytes().to_vec()
    });
    let decoded = roundtrip(&buf);
    assert_eq!(decoded.format(), PixelFormat::Grayscale16);
    assert_eq!(rows(&decoded), rows(&buf));
}

#[test]
fn rgba64_and_rgbx64_roundtrip() {
    let rgba = filled(3, 2, PixelFormat::Rgba64, |x, y| {
        rgba64(x as u16 * 1000, y as u16 * 3000, 0xabcd, 0x8000 + x as u16)
    });
    let decoded = roundtrip(&rgba);
    assert_eq!(decoded.format(), PixelFormat::Rgba64);
    assert_eq!(rows(&decoded), rows(&rgba));

    let rgbx = filled(3, 2, PixelFormat::Rgbx64, |x, y| {
        rgba64(x as u16, y as u16, 0x1234, 0xffff)
    });
    let decoded = roundtrip(&rgbx);
    assert_eq!(decoded.format(), PixelFormat::Rgbx64);
    assert_eq!(rows(&decoded), rows(&rgbx));
}

#[test]
fn palette_roundtrip_keeps_order_and_transparency_cutoff() {
    let table = vec![
        RGBA8::new(255, 0, 0, 255),
        RGBA8::new(0, 255, 0, 40),
        RGBA8::new(0, 0, 255, 0),
        RGBA8::new(9, 9, 9, 255),
        RGBA8::new(1, 2, 3, 255),
    ];
    let mut buf = filled(6, 2, PixelFormat::Indexed8, |x, y| vec![((x + y) % 5) as u8]);
    buf.set_color_table(table.clone()).unwrap();

    let decoded = roundtrip(&buf);
    assert_eq!(decoded.format(), PixelFormat::Indexed8);
    assert_eq!(decoded.color_table(), Some(&table[..]));
    assert_eq!(rows(&decoded), rows(&buf));
}

#[test]
fn mono_roundtrip() {
    let table = vec![RGBA8::new(255, 255, 255, 255), RGBA8::new(0, 0, 0, 255)];
    let mut buf = PixelBuffer::new(10, 2, PixelFormat::Mono).unwrap();
    buf.row_mut(0).copy_from_slice(&[0b1010_1010, 0b1100_0000]);
    buf.row_mut(1).copy_from_slice(&[0b0000_1111, 0b0100_0000]);
    buf.set_color_table(table.clone()).unwrap();

    let decoded = roundtrip(&buf);
    assert_eq!(decoded.format(), PixelFormat::Mono);
    assert_eq!(decoded.color_table(), Some(&table[..]));
    assert_eq!(rows(&decoded), rows(&buf));
}

#[test]
fn identity_gray_table_comes_back_as_grayscale8() {
    let gray: Vec<RGBA8> = (0..=255u8).map(|i| RGBA8::new(i, i, i, 255)).collect();
    let mut buf = filled(4, 1, PixelFormat::Indexed8, |x, _| vec![x as u8 * 60]);
    buf.set_color_table(gray).unwrap();

    let decoded = roundtrip(&buf);
    assert_eq!(decoded.format(), PixelFormat::Grayscale8);
    assert_eq!(decoded.row(0), &[0, 60, 120, 180]);
}

#[test]
fn premultiplied_argb32_written_straight() {
    let mut buf = filled(1, 1, PixelFormat::Argb32, |_, _| argb(128, 64, 32, 0).to_vec());
    buf.set_alpha_mode(AlphaMode::Premultiplied);

    let decoded = roundtrip(&buf);
    assert_eq!(decoded.alpha_mode(), AlphaMode::Straight);
    assert_eq!(decoded.row(0), &argb(128, 128, 64, 0));
}

#[test]
fn text_resolution_and_offset_roundtrip() {
    let mut buf = filled(2, 2, PixelFormat::Grayscale8, |_, _| vec![1]);
    buf.metadata.push("Author", "someone");
    buf.metadata.push("Comment", "x".repeat(60));
    buf.metadata.push("Title", "overridden");
    buf.dots_per_meter_x = 2835;
    buf.dots_per_meter_y = 3780;
    buf.offset = (3, -4);

    let encoded = EncodeRequest::new()
        .with_description("Title: \u{65e5}\u{672c}")
        .with_offset(1, 1)
        .encode_to_vec(&buf, Unstoppable)
        .unwrap();
    let decoded = decode(&encoded, Unstoppable).unwrap();

    let keys: Vec<&str> = decoded.metadata.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, ["Author", "Comment", "Title"]);
    assert_eq!(decoded.metadata.get("Comment"), Some("x".repeat(60).as_str()));
    assert_eq!(decoded.metadata.get("Title"), Some("\u{65e5}\u{672c}"));
    assert_eq!((decoded.dots_per_meter_x, decoded.dots_per_meter_y), (2835, 3780));
    assert_eq!(decoded.offset, (4, -3));
}

#[test]
fn animation_hints_roundtrip() {
    let buf = filled(1, 1, PixelFormat::Rgb32, |_, _| argb(255, 1, 2, 3).to_vec());
    let hints = AnimationHints {
        looping: Some(0),
        frame_delay_ms: Some(250),
        disposal: Disposal::RestorePrevious,
    };
    let encoded = EncodeRequest::new()
        .with_animation(hints)
        .encode_to_vec(&buf, Unstoppable)
        .unwrap();
    let mut session = DecodeSession::new(&encoded[..]);
    assert_eq!(session.animation_hints().unwrap(), hints);
}

#[test]
fn gamma_and_chromaticities_roundtrip() {
    let chrm = Chromaticities {
        white: (0.3127, 0.329),
        red: (0.64, 0.33),
        green: (0.3, 0.6),
        blue: (0.15, 0.06),
    };
    let mut buf = filled(1, 1, PixelFormat::Grayscale8, |_, _| vec![0]);
    buf.color_space = ColorSpace::GammaChroma {
        gamma: 0.5,
        primaries: Some(chrm),
    };
    let decoded = roundtrip(&buf);
    match decoded.color_space {
        ColorSpace::GammaChroma {
            gamma,
            primaries: Some(p),
        } => {
            assert!((gamma - 0.5).abs() < 1e-5);
            assert!((p.red.0 - 0.64).abs() < 1e-5);
            assert!((p.white.1 - 0.329).abs() < 1e-5);
        }
        other => panic!("expected gamma/chromaticities, got {other:?}"),
    }
}

#[test]
fn srgb_roundtrip() {
    let mut buf = filled(1, 1, PixelFormat::Argb32, |_, _| argb(255, 0, 0, 0).to_vec());
    buf.color_space = ColorSpace::StandardRgb;
    assert_eq!(roundtrip(&buf).color_space, ColorSpace::StandardRgb);
}

#[test]
fn encode_gamma_writes_reciprocal() {
    let buf = filled(1, 1, PixelFormat::Grayscale8, |_, _| vec![0]);
    let encoded = EncodeRequest::new()
        .with_gamma(2.0)
        .encode_to_vec(&buf, Unstoppable)
        .unwrap();
    let mut session = DecodeSession::new(&encoded[..]);
    let gamma = session.gamma().unwrap().unwrap();
    assert!((gamma - 0.5).abs() < 1e-5);
}

#[test]
fn compression_options_do_not_change_pixels() {
    let buf = filled(16, 16, PixelFormat::Argb32, |x, y| {
        argb(255, (x * 16) as u8, (y * 16) as u8, ((x ^ y) * 16) as u8).to_vec()
    });
    let diag = Rc::new(CollectingDiagnostics::new());
    for request in [
        EncodeRequest::new().with_compression_ratio(0),
        EncodeRequest::new().with_quality(30),
        EncodeRequest::new().with_level(40).with_diagnostics(diag.clone()),
    ] {
        let encoded = request.encode_to_vec(&buf, Unstoppable).unwrap();
        assert_eq!(rows(&decode(&encoded, Unstoppable).unwrap()), rows(&buf));
    }
    assert_eq!(
        diag.warnings(),
        vec![Warning::CompressionLevelOutOfRange { requested: 40 }]
    );
}

#[test]
fn every_level_decodes_to_the_same_pixels() {
    let buf = filled(40, 24, PixelFormat::Rgba64, |x, y| {
        rgba64((x * 1600) as u16, (y * 2700) as u16, 0x1234, 0xffff - (x * y) as u16)
    });
    let mut sizes = Vec::new();
    for level in 0..=9 {
        let encoded = EncodeRequest::new()
            .with_level(level)
            .encode_to_vec(&buf, Unstoppable)
            .unwrap();
        assert_eq!(rows(&decode(&encoded, Unstoppable).unwrap()), rows(&buf), "level {level}");
        sizes.push(encoded.len());
    }
    assert!(sizes[9] < sizes[0], "{sizes:?}");
}
