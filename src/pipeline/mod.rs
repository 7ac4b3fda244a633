//! Alignment, scoring and selection of strategies per scan and per corpus.

pub mod batch;
pub mod selector;
pub mod types;
pub mod writer;

pub use batch::*;
pub use selector::*;
pub use types::*;
pub use writer::*;
