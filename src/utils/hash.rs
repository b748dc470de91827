//! Content hashing for transfer integrity.
//!
//! SHA-256, hex-encoded lowercase. The sender embeds the digest of the
//! whole file in the START frame; the receiver recomputes it over the
//! reassembled bytes and compares.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Read-window size for streaming file hashing.
const HASH_READ_BUFFER: usize = 64 * 1024;

/// Hash a file by streaming it from disk.
pub async fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = fs::File::open(path)
        .await
        .with_context(|| format!("opening {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_the_well_known_digest() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn file_and_memory_digests_agree() {
        let path = std::env::temp_dir().join("peerlink_hash_test.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        assert_eq!(hash_file(&path).await.unwrap(), hash_bytes(&data));

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        assert!(hash_file("/definitely/not/here.bin").await.is_err());
    }
}
