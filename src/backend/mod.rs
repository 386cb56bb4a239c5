pub mod cache;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod dimensions;
pub mod error;
pub mod mangadex;
pub mod reader;
pub mod session;
pub mod tasks;
