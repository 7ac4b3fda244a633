//! Console output for selections and corpus reports.

pub mod console;

pub use console::*;
