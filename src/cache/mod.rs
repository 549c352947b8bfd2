mod distributed;
mod lock;
mod memory;
mod tiered;

pub use distributed::{create_pool, DistributedCache, NoDistributedCache, RedisCache};
pub use lock::{LeaseLock, LocalLeaseLock, RedisLeaseLock};
use memory::MemoryCache;
pub use tiered::TieredCache;
