//! Rate limiting logic and window storage.

mod key;
mod limiter;
mod limits;
mod memory;
mod store;
mod window;

pub use key::{AdmissionKey, StoreKey, ANONYMOUS};
pub use limiter::{RateLimiter, DEFAULT_STORE_TIMEOUT};
pub use limits::{EndpointClass, LimiterSet};
pub use memory::MemoryStore;
pub use store::{IncrementOutcome, StoreError, WindowStore};
pub use window::{Decision, LimiterConfig, WindowRecord};
