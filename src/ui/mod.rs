//! ui
//!
//! Terminal output.
//!
//! # Modules
//!
//! - [`output`] - Verbosity-aware printing and tree rendering
//!
//! # Design
//!
//! Every command prints through this module so `--quiet` is honored in
//! one place. Errors are always shown.

pub mod output;
