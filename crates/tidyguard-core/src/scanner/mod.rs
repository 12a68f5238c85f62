pub mod discovery;
pub mod walk;

pub use discovery::{detect_candidate_directories, CandidateDirectory, DiscoveryOptions};
pub use walk::{build_size_to_files_map, WalkOptions};
