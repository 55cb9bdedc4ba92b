//! Retrieval-augmented answering.
//!
//! This module provides:
//! - `AnswerEngine`: retrieves the top-k rows for a question and asks the LLM
//! - `build_stuff_prompt`: stuffs every retrieved row into one QA prompt

mod engine;
mod prompt;

pub use engine::AnswerEngine;
pub use prompt::build_stuff_prompt;
