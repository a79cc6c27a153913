//! Wire protocol shared between the airlift relay and its clients.
//!
//! All relay traffic is JSON text frames tagged with an `action` field.
//! The relay only models the handful of fields it routes on; everything
//! else is carried verbatim so payloads survive forwarding untouched.

pub mod envelope;
pub mod manifest;

pub use envelope::{Envelope, action};
pub use manifest::{FileEntry, FileManifest, ManifestError, MANIFEST_FIELD};
