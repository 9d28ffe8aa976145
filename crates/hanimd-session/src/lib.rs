//! # hanimd-session
//!
//! Codec for the messaging account's authentication session.
//!
//! The protocol client keeps its credentials as a directory of small key
//! files. Losing or corrupting any of them forces a full re-pairing of the
//! account, so this crate moves the whole directory around as one opaque
//! string and restores it byte for byte:
//!
//! ```text
//!  session dir ──read_dir──▶ SessionBundle ──encode──▶ "HANI-MD~<base64>"
//!  session dir ◀─write_dir── SessionBundle ◀─decode─── "HANI-MD~<base64>"
//! ```
//!
//! Unlike the store, the codec reports failures to the caller: a session
//! that does not decode cleanly is rejected as a whole.

pub mod bundle;
pub mod error;

pub use bundle::{MARKER, SessionBundle, encode_dir};
pub use error::{SessionError, SessionResult};
