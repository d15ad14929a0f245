mod commit_cursor;
mod credit_consumer;

pub use commit_cursor::*;
pub use credit_consumer::*;
