// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for the ad cache crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`stage`] - Fake renderables and containers sharing a parent table
//! - [`fetcher`] - Scripted fetch collaborator with held requests

pub mod config;
pub mod fetcher;
pub mod stage;

pub use config::InMemoryConfigStore;
pub use fetcher::{FakeFetcher, Script};
pub use stage::{DirectAttach, DispatchHook, FakeContainer, FakeRenderable, Removal, Stage};
