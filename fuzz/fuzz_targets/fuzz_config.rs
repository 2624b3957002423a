//! Fuzz target for configuration parsing.
//!
//! Arbitrary YAML must be rejected with an error, never a panic. An accepted
//! document must produce a configuration that validates again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mirror_agent::AgentConfig;

fuzz_target!(|data: &str| {
    if let Ok(config) = AgentConfig::from_yaml_str(data) {
        assert!(config.validate().is_ok());
        assert!(config.max_poll_records > 0);
        assert!(!config.source.bootstrap_list().is_empty());
    }
});
