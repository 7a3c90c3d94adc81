pub mod llm;
pub mod prompts;
pub mod runner;
