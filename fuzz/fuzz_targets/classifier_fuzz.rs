//! Fuzz test for the WARDEN severity classifier
//!
//! Any message must classify without panicking, and the result must not
//! depend on letter case.
//!
//! Run with: cargo +nightly fuzz run classifier_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_boundary::classify;

fuzz_target!(|data: &[u8]| {
    let message = String::from_utf8_lossy(data);
    let severity = classify(&message);

    assert_eq!(severity, classify(&message.to_ascii_uppercase()));
    assert_eq!(severity, classify(&message.to_ascii_lowercase()));
});
