mod error;
mod listen;
mod server;
mod stats;
mod subscription;

pub use error::*;
pub use listen::*;
pub use server::*;
pub use stats::*;
pub use subscription::*;
