//! LLM-backed goal decomposition behind the [`generator::Generator`] seam.

pub mod generator;
pub mod llm;
pub mod prompt;
