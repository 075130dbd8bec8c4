pub mod ai;
pub mod auth;
pub mod cli;
pub mod core;
pub mod history;
pub mod openai;
