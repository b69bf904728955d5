pub mod file;
pub mod upload;
