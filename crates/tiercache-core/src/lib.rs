pub mod error;
pub mod key;
pub mod message;
pub mod value;

pub use error::{CacheError, Disposition, Result};
pub use key::{CacheKey, Namespace, TenantId, Tier};
pub use message::{InvalidationKind, InvalidationMessage};
pub use value::{CriticalEntry, CriticalValue};
