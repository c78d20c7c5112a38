pub mod api;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod db;
pub mod errors;
pub mod materializer;
pub mod models;
pub mod pipeline;
pub mod preview;
pub mod rewrite;
pub mod sandbox;
pub mod server;
pub mod status;
pub mod storage;
pub mod util;
