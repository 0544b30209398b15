//! Fuzz target for config.json parsing and validation.

#![no_main]

use bd_config::DetectConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(config) = DetectConfig::parse(data) {
        // Anything that validates must validate again after a round trip.
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(DetectConfig::parse(&json).is_ok());
    }
});
