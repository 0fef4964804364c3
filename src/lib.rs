pub mod app;
pub mod biosample;
pub mod config;
pub mod dcc;
pub mod domain;
pub mod download;
pub mod error;
pub mod experiment;
pub mod file_record;
pub mod merge;
pub mod output;
pub mod selection;
pub mod store;
pub mod tools;
