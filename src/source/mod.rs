// Source retrieval: pluggable fetchers for upstream images.

pub mod http_source;
pub mod traits;
