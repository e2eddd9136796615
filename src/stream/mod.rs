pub mod bridge;
pub mod lines;
pub mod sse;
