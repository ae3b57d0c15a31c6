#![no_main]
use libfuzzer_sys::fuzz_target;
use pngflow::*;

fuzz_target!(|data: &[u8]| {
    let limits = Limits {
        max_memory_bytes: Some(64 * 1024 * 1024),
        ..Default::default()
    };

    // One-shot paths must never panic
    let _ = probe(data);
    let _ = decode(data, enough::Unstoppable);

    // Stepped session with queries between steps, plus a scaled decode
    let mut session = DecodeSession::new(data).with_limits(limits);
    let _ = session.can_read();
    let Ok((w, h)) = session.size() else {
        return;
    };
    let _ = session.description();
    let _ = session.color_space();
    let _ = session.animation_hints();
    session.set_scaled_size(w / 2, h / 3);
    session.set_gamma(2.2);
    if session.decode_image(enough::Unstoppable).is_ok() {
        assert_eq!(session.state(), ReadState::Ready);
        let _ = session.metadata();
    } else {
        assert_eq!(session.state(), ReadState::Error);
    }
});
