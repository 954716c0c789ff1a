pub mod api;
pub mod catalog;
pub mod cli;
pub mod data;
pub mod engine;
pub mod handlers;
pub mod storage;
