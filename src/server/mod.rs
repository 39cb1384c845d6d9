mod assets;
mod http;

pub use http::Server;
