mod clock;
mod credit;
mod in_memory_credit_repository;
mod repository;
mod result;

pub use clock::*;
pub use credit::*;
pub use in_memory_credit_repository::*;
pub use repository::*;
pub use result::*;
