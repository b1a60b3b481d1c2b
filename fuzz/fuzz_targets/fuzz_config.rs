//! Fuzz target for TOML configuration parsing.
//!
//! Tests that config parsing and semantic validation handle arbitrary input
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::Path;
use zi_core::config::parse_settings;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Should never panic, only return an error
    if let Ok(settings) = parse_settings(text, Path::new("fuzz.toml")) {
        for variant in zi_core::hurdle::HurdleVariant::ALL {
            assert!(settings.hurdle_spec(variant).is_ok());
        }
    }
});
