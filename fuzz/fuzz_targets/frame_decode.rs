//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must never panic the frame parser. Oversized length
//! fields, truncated payloads and bad magic all come back as errors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use otpgate_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert!(frame.encoded_len() <= data.len());
    }
});
