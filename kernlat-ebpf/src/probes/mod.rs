pub mod block_io;
pub mod page_fault;
pub mod runqueue;
