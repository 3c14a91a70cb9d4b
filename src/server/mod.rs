// HTTP surface for the batch compress and revert operations.

pub mod handler;
