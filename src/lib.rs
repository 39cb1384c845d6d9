pub mod analysis;
pub mod config;
pub mod media;
pub mod provider;
pub mod server;
pub mod session;
