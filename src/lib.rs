pub mod clap;
pub mod config;
pub mod registry;
pub mod server;
pub mod sse;
