pub mod page;
mod pattern;
mod process;
mod range;
mod scatter;
mod staging;
mod value;

pub use page::{PAGE_SIZE, Page, PageIndex, page_head, page_offset};
pub use pattern::Pattern;
pub use process::Process;
pub use range::{MemoryRange, ReadOp, ScatterOp, WriteOp};
pub use scatter::{ScatterSession, SessionState};
pub use staging::StagingQueue;
pub use value::MemoryValue;
