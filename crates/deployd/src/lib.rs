pub mod config;
pub mod credentials;
pub mod db;
pub mod deploy;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod queue;
pub mod quota;
pub mod runtime;
pub mod webhook;
