//! Database access layer
//!
//! Thin query functions over the tables owned by `streaming-common`. Table
//! creation lives in `streaming_common::db::init`; this module is the
//! query surface the rest of the crate uses.

pub mod albums;
pub mod tracks;
pub mod tts;
