pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod http;
pub mod kafka;
pub mod models;
pub mod processor;
pub mod store;
