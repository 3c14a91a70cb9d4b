// Origin commerce platform: image create/delete used for swaps and reverts.

pub mod http_origin;
pub mod traits;
