pub mod chip;
pub mod list;
pub mod send;
pub mod upload;
