pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod gmail;
pub mod pipeline;
pub mod storage;
pub mod summarize;
pub mod types;
