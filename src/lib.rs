pub mod broker;
pub mod config;
pub mod daemon;
pub mod distribution;
pub mod error;
pub mod monitor;
pub mod nodes;
pub mod protocol;
pub mod shutdown;
pub mod users;
