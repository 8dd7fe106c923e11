pub mod assembler;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod source;
pub mod studio;
pub mod timeline;
pub mod trace;
pub mod transcript;
pub mod tts;
