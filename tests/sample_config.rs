// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use latchstream::config::{load_config, validate_config, LatchstreamConfig};

#[test]
fn test_sample_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("latchstream.toml");
    let config = load_config(Some(&path), None).unwrap();
    validate_config(&config).unwrap();

    let mut expected = LatchstreamConfig::default();
    // the environment may name a port; nothing else is expected to be set
    expected.link.port = config.link.port.clone();
    assert_eq!(config, expected);
}
