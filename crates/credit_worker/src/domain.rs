mod batch_decoder;
mod batch_processor;
mod credit_query_service;
mod idempotent_writer;

pub use batch_decoder::*;
pub use batch_processor::*;
pub use credit_query_service::*;
pub use idempotent_writer::*;
