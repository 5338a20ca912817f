/// Filesystem helpers: atomic persistence and corpus file discovery.
pub mod fs;
