//! Low-level helpers shared by the relay crates.
//!
//! Provides atomic file writes for persisted session credentials and
//! downloaded media, file-name hygiene for files served back over HTTP, and
//! a millisecond unix-time helper.

pub mod atomic_io;
pub mod file_names;
pub mod time_utils;

pub use atomic_io::{write_bytes_atomic, write_text_atomic};
pub use file_names::{is_servable_file_name, sanitize_file_name};
pub use time_utils::current_unix_timestamp_ms;
