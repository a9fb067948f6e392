pub mod delete;
pub mod download;
pub mod index;
pub mod upload;
