// src/source/mod.rs

//! Pipeline definitions that live in source repositories.
//!
//! A [`SourceDescriptor`] names a repository and an entry point inside it.
//! A [`SourceResolver`] turns that into a [`PipelineTemplate`] at fire time.
//!
//! [`PipelineTemplate`]: crate::template::PipelineTemplate

pub mod descriptor;
pub mod hash;
pub mod resolver;

pub use descriptor::{EntryPoint, SourceDescriptor, SourceLocation};
pub use hash::{cache_key, hash_bytes};
pub use resolver::{GitSourceResolver, SourceFuture, SourceResolver, parse_definition};
