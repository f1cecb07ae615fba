pub mod cache;
pub mod callbacks;
mod error;
pub mod llm;
pub mod retry;
pub mod search;
pub mod tools;
#[cfg(test)]
mod testing;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use cache::{CacheKey, FingerprintCache};
pub use retry::RetryPolicy;
