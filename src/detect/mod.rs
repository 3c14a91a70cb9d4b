// Format detection: magic bytes, content types and URL extensions.

pub mod format;
