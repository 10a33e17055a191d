//! Anime avatar pack generation: prompts, image generation, platform variants and packaging.

#![allow(clippy::multiple_crate_versions)]
#![deny(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::complexity)]
#![deny(clippy::correctness)]
#![deny(clippy::disallowed_methods)]
#![deny(clippy::expect_used)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::panic)]
#![deny(clippy::perf)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::unreachable)]
#![deny(clippy::unwrap_used)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod avatar;
pub mod cli;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod generation;
pub mod packager;
pub mod pipeline;
pub mod prompts;
pub mod storage;
pub mod transform;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;
