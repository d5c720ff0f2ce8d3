pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod rest;
pub mod types;
pub mod websocket;
pub use error::{ChatError, Result};
pub use websocket::ChatClient;
