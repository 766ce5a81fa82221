#![no_main]

use airlink_core::frame::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic.
    let Ok(frame) = Frame::parse(data) else {
        return;
    };
    let _ = frame.security_header();
    let _ = frame.protected_body(8);
    let _ = frame.protected_body(16);
    let _ = Frame::parse(&frame.serialize());
});
