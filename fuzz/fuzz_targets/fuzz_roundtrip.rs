#![no_main]
use libfuzzer_sys::fuzz_target;
use pngflow::*;

fuzz_target!(|data: &[u8]| {
    // If we can decode it, re-encoding and decoding again must produce identical pixels
    let Ok(decoded) = decode(data, enough::Unstoppable) else {
        return;
    };

    let Ok(reencoded) = encode(&decoded, enough::Unstoppable) else {
        return;
    };
    let Ok(decoded2) = decode(&reencoded, enough::Unstoppable) else {
        panic!("re-encoded data failed to decode");
    };

    assert_eq!(decoded.width(), decoded2.width());
    assert_eq!(decoded.height(), decoded2.height());
    // An identity gray table legitimately comes back as Grayscale8
    if decoded.format() == decoded2.format() {
        for (a, b) in decoded.rows().zip(decoded2.rows()) {
            assert_eq!(a, b, "roundtrip pixel mismatch");
        }
    }
});
