pub mod config;
pub mod error;
pub mod http;
pub mod namespace;
pub mod security;
pub mod state;
