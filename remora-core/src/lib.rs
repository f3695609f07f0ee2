pub mod buffer;
pub mod mpmc_queue;
pub mod stream;
