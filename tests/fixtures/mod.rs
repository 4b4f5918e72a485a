//! Test Fixtures Module
//!
//! Shared fixtures for callbot integration tests:
//! - Telephony audio (programmatically generated)

// Not every test binary uses every fixture.
#![allow(dead_code)]

pub mod audio_fixtures;

pub use audio_fixtures::*;
