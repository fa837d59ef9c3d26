//! Extension points
//!
//! - **Backend**: the full Ollama API surface, implemented by HTTP clients, the router
//!   itself and test doubles.

mod backend;

pub use backend::{Backend, EventStream};
