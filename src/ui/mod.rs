//! # UI Module
//!
//! User interface components and styling for feather-scan.

pub mod styles;
