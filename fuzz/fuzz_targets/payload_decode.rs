//! Fuzz target for Payload::decode
//!
//! Every byte string a peer or the relay hands us goes through this decoder.
//!
//! # Invariants
//!
//! - Never panics; invalid input is an error
//! - Anything that decodes re-encodes, and decodes back to the same payload

#![no_main]

use kemlink_proto::{MessageContent, Payload, ProtocolError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = MessageContent::decode(data);

    let Ok(payload) = Payload::decode(data) else {
        return;
    };
    // Canonical re-encoding can grow a non-canonical input past the size cap.
    let encoded = match payload.encode() {
        Ok(bytes) => bytes,
        Err(ProtocolError::PayloadTooLarge { .. }) => return,
        Err(e) => panic!("decoded payload failed to re-encode: {e}"),
    };
    let again = Payload::decode(&encoded).expect("re-encoded payload must decode");
    assert_eq!(payload, again);
});
