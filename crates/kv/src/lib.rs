pub mod driver;
pub mod key;
pub mod memory;
pub mod registry;

pub use driver::{Entry, KvDriver, KvError, ListRangeOptions, Write};
pub use key::{decode_trace_chunk_key, trace_chunk_key, trace_chunk_prefix, Path, PathSegment, Prefix, WorkflowMetaField};
pub use memory::MemoryKvDriver;
pub use registry::NameRegistry;
