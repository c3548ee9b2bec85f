pub mod agent;
pub mod binary;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod multiplexer;
pub mod payload;
pub mod terminal;
