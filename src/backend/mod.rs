//! Backend driver: compiles and executes logical queries (spec §4.5).

pub mod dialect;
pub mod embedded;

pub use embedded::{EmbeddedOlapDriver, RowSet};
