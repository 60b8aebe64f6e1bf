pub mod lease;
pub mod pool;

pub use lease::JobLease;
pub use pool::WorkerPool;
