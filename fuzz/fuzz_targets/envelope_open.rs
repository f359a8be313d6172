//! Fuzz target for envelope authentication
//!
//! # Strategy
//!
//! - Seal arbitrary plaintext under an arbitrary key and nonce
//! - Flip one bit of the ciphertext or nonce, or open under another key
//!
//! # Invariants
//!
//! - The untouched envelope opens to the original plaintext
//! - Any single-bit change or wrong key fails to open

#![no_main]

use arbitrary::Arbitrary;
use kemlink_crypto::{NONCE_SIZE, SymmetricKey, open_envelope, seal_envelope};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Tamper {
    Ciphertext { index: usize, bit: u8 },
    Nonce { index: usize, bit: u8 },
    WrongKey([u8; 32]),
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    key: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    plaintext: Vec<u8>,
    tamper: Tamper,
}

fuzz_target!(|scenario: Scenario| {
    let key = SymmetricKey::from_bytes(scenario.key);
    let envelope = seal_envelope(&key, scenario.nonce, &scenario.plaintext);

    let opened = open_envelope(&key, &envelope).expect("untouched envelope must open");
    assert_eq!(opened, scenario.plaintext);

    let mut tampered = envelope.clone();
    let mut open_key = key.clone();
    match scenario.tamper {
        Tamper::Ciphertext { index, bit } => {
            let len = tampered.ciphertext.len();
            tampered.ciphertext[index % len] ^= 1 << (bit % 8);
        },
        Tamper::Nonce { index, bit } => {
            tampered.nonce[index % NONCE_SIZE] ^= 1 << (bit % 8);
        },
        Tamper::WrongKey(other) => {
            if other == scenario.key {
                return;
            }
            open_key = SymmetricKey::from_bytes(other);
        },
    }
    assert!(open_envelope(&open_key, &tampered).is_err());
});
