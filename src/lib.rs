pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod generator;
pub mod response;
pub mod retry;
pub mod security;
pub mod server;
pub mod tools;
