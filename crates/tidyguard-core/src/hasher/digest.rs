use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use twox_hash::XxHash64;

const PARTIAL_HASH_LENGTH: usize = 1024; // 1KB

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Xxh64,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Xxh64 => "xxh64",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "xxh64" | "xxhash" => Ok(HashAlgorithm::Xxh64),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(format!("unsupported hash algorithm '{}'", other)),
        }
    }
}

enum StreamHasher {
    Blake3(Box<blake3::Hasher>),
    Xxh64(XxHash64),
    Sha256(Sha256),
}

impl StreamHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Xxh64 => StreamHasher::Xxh64(XxHash64::with_seed(0)),
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
            StreamHasher::Xxh64(h) => h.write(data),
            StreamHasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Blake3(h) => h.finalize().to_hex().to_string(),
            StreamHasher::Xxh64(h) => format!("{:016x}", h.finish()),
            StreamHasher::Sha256(h) => h
                .finalize()
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect(),
        }
    }
}

/// Stream the file through `algorithm` in `chunk_size` reads and return the hex digest.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm, chunk_size: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; chunk_size.max(4096)];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize_hex())
}

/// XxHash64 of the first 1KB. Used only to split size buckets before full hashing.
pub fn partial_hash(path: &Path) -> io::Result<u64> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0; PARTIAL_HASH_LENGTH];
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&buffer[..filled]);
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[test]
    fn test_identical_content_identical_digest() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.bin", b"same bytes");
        let b = write(dir.path(), "b.bin", b"same bytes");
        let c = write(dir.path(), "c.bin", b"other bytes");

        for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Xxh64, HashAlgorithm::Sha256] {
            let ha = hash_file(&a, algorithm, 4).unwrap();
            assert_eq!(ha, hash_file(&b, algorithm, 64 * 1024).unwrap());
            assert_ne!(ha, hash_file(&c, algorithm, 4).unwrap());
        }
    }

    #[test]
    fn test_known_sha256_digest() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "abc.txt", b"abc");
        assert_eq!(
            hash_file(&path, HashAlgorithm::Sha256, 65536).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() {
        let dir = tempdir().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let path = write(dir.path(), "big.bin", &data);
        let small = hash_file(&path, HashAlgorithm::Blake3, 4096).unwrap();
        let large = hash_file(&path, HashAlgorithm::Blake3, 1 << 20).unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn test_partial_hash_ignores_tail() {
        let dir = tempdir().unwrap();
        let mut head = vec![7u8; PARTIAL_HASH_LENGTH];
        let a = write(dir.path(), "a.bin", &[head.clone(), b"tail-a".to_vec()].concat());
        head.extend_from_slice(b"tail-b");
        let b = write(dir.path(), "b.bin", &head);
        assert_eq!(partial_hash(&a).unwrap(), partial_hash(&b).unwrap());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("BLAKE3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert_eq!("xxhash".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Xxh64);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
