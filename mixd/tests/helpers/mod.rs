//! Test helper modules for mixd integration tests
//!
//! - audio_generator: deterministic WAV fixtures
//! - harness: headless daemon on a capture device, plus polling helpers

#![allow(dead_code)]

pub mod audio_generator;
pub mod harness;

pub use audio_generator::{generate_constant_wav, generate_sine_wav};
pub use harness::{collect_events, test_config, wait_until, TestDaemon, TEST_CHANNELS, TEST_SAMPLE_RATE};
