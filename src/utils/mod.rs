//! Utility functions and types

pub mod columns;
pub mod data_loader;
pub mod frame;

pub use columns::column_uniquify;
pub use data_loader::{DataLoader, DataSaver};
