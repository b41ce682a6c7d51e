//! Service layer behind the MCP tools, resources and prompts.

pub mod notes;
pub mod synonyms;
pub mod weather;

pub use notes::{Note, NoteEvent, NoteStore};
pub use synonyms::SynonymMap;
pub use weather::WeatherClient;
