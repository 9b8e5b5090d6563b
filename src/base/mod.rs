//! Memory and failure primitives shared by the packet and network layers

pub mod buffer;
pub mod crash;
pub mod panic;
pub mod pool;
pub mod slice;

pub use buffer::{Buffer, BufferPool};
pub use crash::CrashHandler;
pub use pool::PoolStats;
pub use slice::Slice;
