// Persistence: blob/record collaborators, the artifact cache and the original archive.

pub mod archive;
pub mod cache;
pub mod fs_blob;
pub mod json_file;
pub mod memory;
pub mod traits;
