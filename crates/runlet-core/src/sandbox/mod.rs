// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandbox module - isolated execution backends.
//!
//! The control plane never runs function code itself. It hands compiled
//! artifacts to a [`Sandbox`] implementation together with per-call
//! [`ResourceLimits`].

pub mod mock;
mod traits;

pub use mock::MockSandbox;
pub use traits::*;
