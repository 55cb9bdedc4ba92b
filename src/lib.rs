//! EcoChat: chat with the rows of a CSV file stored on Google Drive.
//!
//! Ingest downloads the file, turns each row into a document, embeds it and
//! writes it into a vector index; questions are answered by a Gemini call
//! over the most similar rows.

pub mod core;
pub mod drive;
pub mod embedding;
pub mod llm;
pub mod loader;
pub mod rag;
pub mod server;
pub mod session;
pub mod state;
pub mod vector;
