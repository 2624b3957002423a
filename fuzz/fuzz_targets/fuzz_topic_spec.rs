//! Fuzz target for topic spec parsing.
//!
//! Parsing must never panic, and every accepted spec must name non-empty
//! topics with no surrounding whitespace on both clusters.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mirror_agent::{parse_topics, Direction, TopicRegistry};

fuzz_target!(|data: (&str, &str)| {
    let (push, pull) = data;

    for direction in [Direction::Push, Direction::Pull] {
        if let Ok(topics) = parse_topics(&[push], direction) {
            let topic = &topics[0];
            assert!(!topic.source_name.is_empty());
            assert!(!topic.destination_name.is_empty());
            assert_eq!(topic.source_name.trim(), topic.source_name);
            assert_eq!(topic.destination_name.trim(), topic.destination_name);
            assert!(!topic.source_name.contains(':'));
        }
    }

    // Registry validation must not panic either
    let _ = TopicRegistry::from_specs(&[push], &[pull]);
});
