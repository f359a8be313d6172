//! Fuzz target for GroupKeyMaterial::split
//!
//! Wrapped group keys arrive from the admin as one opaque blob that is cut
//! at the KEM ciphertext length.
//!
//! # Invariants
//!
//! - Never panics for any blob or cut point
//! - A successful split returns exactly `ciphertext_len` leading bytes

#![no_main]

use arbitrary::Arbitrary;
use kemlink_proto::{GroupId, GroupKeyMaterial};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    material: Vec<u8>,
    ciphertext_len: u16,
}

fuzz_target!(|scenario: Scenario| {
    let Ok(group_id) = GroupId::new("0123456789abcdef") else {
        return;
    };
    let material = GroupKeyMaterial { group_id, material: scenario.material };
    let ciphertext_len = usize::from(scenario.ciphertext_len);

    if let Ok((kem_ciphertext, _wrapped)) = material.split(ciphertext_len) {
        assert_eq!(kem_ciphertext.len(), ciphertext_len);
    }
});
