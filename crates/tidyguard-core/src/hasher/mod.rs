pub mod cache;
pub mod digest;
pub mod grouping;

pub use cache::HashCache;
pub use digest::{hash_file, partial_hash, HashAlgorithm};
pub use grouping::build_content_hash_map;
