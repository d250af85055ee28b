//! Shared-ownership infrastructure for graphdelta traversals.
//!
//! - [`RefCountCache`] / [`RefCounted`] -- one payload per identity key, held
//!   by counted handles and finalized when the last hold is released
//! - [`Pool`] / [`Borrowed`] -- scratch collections borrowed for the duration
//!   of one operation
//! - [`retire`] -- flat teardown of linked payloads

pub mod pool;
pub mod refcount;
pub mod retire;

pub use pool::{Borrowed, Pool, Recycle, ADDRESS_LISTS, ADDRESS_SETS};
pub use refcount::{Finalize, RefCountCache, RefCounted, WeakCache};
pub use retire::retire;
