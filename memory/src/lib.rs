mod system;

pub use system::{
    OS_PAGE_SIZE, map_memory, page_align, protect_memory_read_exec,
    unmap_memory,
};
