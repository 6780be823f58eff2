mod adapter;
mod models;

pub use adapter::{OpenAiProvider, DEFAULT_BASE_URL};
