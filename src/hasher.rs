//! Content-addressed hashing: xxHash-64 (xxh3) over chunked file reads.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use xxhash_rust::xxh3::Xxh3;

use crate::error::AppResult;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hashes `path`'s full byte stream, returned as lowercase hex.
///
/// Non-cryptographic, chosen for throughput over collision resistance.
/// On I/O error the caller should treat the file as unique rather than
/// abort (per the dedup-fallback rule).
pub fn hash_file(path: &Path) -> AppResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:016x}", hasher.digest()))
}
