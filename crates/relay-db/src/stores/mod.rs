//! `MessageStore` implementations

mod error;
mod memory;
mod pg;

pub use memory::MemoryMessageStore;
pub use pg::PgMessageStore;

/// Messages returned by one `read_since` call unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 500;
