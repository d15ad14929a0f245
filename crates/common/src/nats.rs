mod client;
mod subscription;
mod traits;

pub use client::*;
pub use subscription::*;
pub use traits::*;
