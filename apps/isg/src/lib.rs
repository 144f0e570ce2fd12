//! # isg
//!
//! Host binary for `isg-core`: reads extractor batches (JSON), keeps the
//! graph in a redb snapshot store and answers architectural queries.
//!
//! The library target exposes the CLI so integration tests can drive
//! commands in-process.

pub mod cli;
