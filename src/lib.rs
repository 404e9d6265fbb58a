//! remcomp library
//!
//! Remote compression service: clients upload files to a pooled server
//! worker, which packs them with tar and a chosen compressor and streams the
//! archive back.

pub mod archiver;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod frame;
pub mod logger;
pub mod pool;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod session;
pub mod workspace;
