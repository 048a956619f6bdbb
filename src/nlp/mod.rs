//! NL analyst pipeline: understand → retrieve → plan (spec §4.8–§4.11).

pub mod intent;
pub mod interpreter;
pub mod retriever;
pub mod synthesizer;

pub use intent::{classify, Intent, Understanding};
pub use interpreter::{interpret, Interpretation};
pub use retriever::{retrieve, RecencyContext, Retrieval};
pub use synthesizer::synthesize;
