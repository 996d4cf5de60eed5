#![forbid(unsafe_code)]

mod cache;
mod freelist;
pub mod meta;

pub use cache::{CachePolicy, SlotCache};
pub use freelist::{Allocation, SlotFile};
