//! Purpose: Shared library crate used by the `recstore` CLI and tests.
//! Exports: `api` (public surface), `core` (storage, journal, export, errors), `notice`.
//! Role: Library backing the binary; `api` is the path callers should use.
//! Invariants: Every store mutation goes through the integrity guard in `core::guard`.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod notice;
