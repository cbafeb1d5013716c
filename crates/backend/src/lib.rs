pub mod cli;
pub mod config;
pub mod routes;
pub mod server;
