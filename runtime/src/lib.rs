// Copyright 2026 Waitline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Waitline runtime library: collects facility wait times from heterogeneous
//! sources into one canonical status table.
//!
//! Targets describe where a facility publishes its numbers and how to read
//! them. A run fetches every target through its source adapter, formats the
//! raw values, assembles a canonical record and upserts it.

pub mod assemble;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod notify;
pub mod orchestrator;
pub mod renderer;
pub mod rules;
pub mod source;
pub mod store;
