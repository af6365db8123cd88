// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Runtime configuration.
//!
//! There is no on-disk config format: the host embedding this crate (or the
//! CLI in `main.rs`) builds a [`RuntimeConfig`] programmatically and passes
//! it to [`crate::runtime::Runtime::new`].

/// Tunables for a freshly booted runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Allocation count that triggers the first GC cycle.
    pub initial_gc_threshold: usize,
    /// Stack size hint for each fiber's backing OS thread.
    pub fiber_stack_size: usize,
    /// Starting capacity of the symbol-to-string table.
    pub symbol_table_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_gc_threshold: 8 * 1024,
            fiber_stack_size: 32 * 1024,
            symbol_table_capacity: 256,
        }
    }
}
