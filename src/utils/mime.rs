//! MIME type lookup for outgoing files.

use std::path::Path;

/// Guess a file's MIME type from its extension.
///
/// Falls back to `application/octet-stream` when the extension is
/// missing or unknown — the receiver treats the type as advisory only.
pub fn mime_type(path: impl AsRef<Path>) -> String {
    mime_guess::from_path(path.as_ref())
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
