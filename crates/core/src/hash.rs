use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Computes a deterministic SHA-256 hash over artifact bytes.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Streams a file through SHA-256 without loading it into memory.
pub fn file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_same_content() {
        let data = b"chapter one draft";
        let left = content_hash(data);
        let right = content_hash(data);
        assert_eq!(left, right);
    }

    #[test]
    fn hash_changes_when_content_changes() {
        let one = content_hash(b"v1");
        let two = content_hash(b"v2");
        assert_ne!(one, two);
    }

    #[test]
    fn file_hash_matches_content_hash() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(tmp.path(), b"It was a dark and stormy night.").expect("write");
        let streamed = file_hash(tmp.path()).expect("hash file");
        assert_eq!(streamed, content_hash(b"It was a dark and stormy night."));
    }
}
