pub mod credit_worker;
pub mod domain;
pub mod nats;

pub use credit_worker::*;
pub use domain::*;
pub use nats::*;
