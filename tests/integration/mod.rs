//! Integration tests for jar2source
//!
//! Fixtures are built on the fly: application archives with the `zip` writer and
//! container exports with the `tar` builder, so no binary files live in the repo.

pub mod common;
pub mod jar;
pub mod tar;
