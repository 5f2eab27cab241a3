#![doc = "docpub: build API documentation and publish it from the default branch."]

//! The pipeline is trigger → build → publish:
//!
//! - [`trigger::should_publish`] gates on the ref.
//! - A [`contract::ArtifactBuilder`] (by default [`build::CommandBuilder`],
//!   i.e. `cargo doc --no-deps`) produces the artifact.
//! - A [`contract::Publisher`] ([`publish::GitBranchPublisher`] or
//!   [`publish::DirectoryPublisher`]) replaces the destination content.
//! - [`pipeline::Pipeline`] sequences them and returns a
//!   [`pipeline::RunOutcome`].

pub mod build;
pub mod cli;
pub mod config;
pub mod contract;
pub mod load_config;
pub mod pipeline;
pub mod publish;
pub mod trigger;
