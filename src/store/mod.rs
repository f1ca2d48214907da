//! libSQL persistence layer.

pub mod db;
pub mod migrations;
pub mod queries;

pub use db::Store;
