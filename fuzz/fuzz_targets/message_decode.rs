//! Fuzz target for handshake message decoding
//!
//! Both codecs see the same bytes. Decoding never panics, and anything that
//! decodes re-encodes to a document that decodes to the same message.

#![no_main]

use libfuzzer_sys::fuzz_target;
use otpgate_proto::{CborCodec, Codec, JsonCodec};

fn check<C: Codec>(codec: &C, data: &[u8]) {
    let Ok(message) = codec.decode(data) else {
        return;
    };
    let Ok(encoded) = codec.encode(&message) else {
        return;
    };
    assert_eq!(codec.decode(&encoded).ok(), Some(message));
}

fuzz_target!(|data: &[u8]| {
    check(&JsonCodec, data);
    check(&CborCodec, data);
});
