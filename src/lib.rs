pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod fos;
pub mod output;
pub mod pool;
pub mod quality;
pub mod registry;
pub mod search;
pub mod tui;
pub mod validate;
