// Copyright 2026 relink Contributors
// SPDX-License-Identifier: Apache-2.0

//! relink library — rewrite image references in nested JSON documents.
//!
//! This library crate exposes the core modules for integration testing.

pub mod config;
pub mod data_uri;
pub mod document;
pub mod fetch;
pub mod hash;
pub mod limiter;
pub mod pipeline;
pub mod progress;
pub mod urls;
