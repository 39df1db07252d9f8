pub mod cli;
pub mod config;
pub mod exec;
pub mod index;
pub mod locate;
pub mod merge;
pub mod query;
pub mod reader;
