pub mod classify;
pub mod syncer;
pub mod target;
pub mod writer;
