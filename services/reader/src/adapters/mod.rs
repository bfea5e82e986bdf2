pub mod client_store;
pub mod http;
pub mod memory;
#[cfg(feature = "speaker")]
pub mod speaker;

pub use client_store::{JsonFileStore, MemoryStore};
pub use http::HttpBackend;
pub use memory::{BackendCall, InMemoryBackend, Operation};
#[cfg(feature = "speaker")]
pub use speaker::SpeakerMedia;
