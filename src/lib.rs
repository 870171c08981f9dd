//! Buffered pipes aimed at producer-consumer problems.
//!
//! A pipe connects a writer to a reader through a shared storage region, so
//! that the producer can run ahead of the consumer up to the storage's
//! capacity while keeping classic pipe semantics: a reader blocks on an empty
//! pipe and a writer blocks on a full one. Storage backends are pluggable
//! through the [`storage::Storage`] trait.
//!
//! Two pipe flavors are provided. The primary one in [`pipe`] gates a single
//! storage region with a mutex and condition variable and speaks
//! [`std::io::Read`]/[`std::io::Write`]. The alternative in [`pipe::chunked`]
//! relays fixed-size chunks through a pair of bounded channels and speaks the
//! asynchronous I/O traits instead.
//!
//! The [`relay`] module ties a source stream to a destination stream through
//! a pipe so that both run concurrently, coupled only by the storage's
//! capacity.

pub mod pipe;
pub mod relay;
pub mod storage;

pub use crate::relay::{copy, copy_with};
pub use crate::storage::Storage;
