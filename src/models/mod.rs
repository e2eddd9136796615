pub mod chat;
pub mod conversion;
pub mod stream;
