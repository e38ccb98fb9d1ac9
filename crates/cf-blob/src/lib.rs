//! Content-addressed blob store.
//!
//! The single place where remote artifacts become trusted local files.
//! Blobs live at `<blobs>/<sha256>` and are immutable once present:
//! - Downloads stream into a `.tmp.<rand>` sibling while hashing
//! - The final name appears only via atomic rename after verification
//! - A cache hit re-verifies the digest before it is trusted
//!
//! Concurrent writers for the same digest are conflict-free: each downloads
//! to its own temp file, one rename wins, losers delete their temp. No
//! inter-process coordination is needed because the target name already
//! commits to the content.

mod hash;
mod store;

pub use hash::{sha256_file, sha256_hex, HashingWriter};
pub use store::BlobStore;
