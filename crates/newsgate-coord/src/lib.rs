//! Cross-process coordination primitives for the ingestion layer.
//!
//! Every component here keeps its ground truth in a [`CoordinationStore`]
//! shared by all worker processes. Local state is only a cache that is used
//! when the store cannot be reached.

pub mod circuit;
pub mod clock;
pub mod cycle;
pub mod error;
pub mod key_pool;
pub mod memory;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use circuit::{CircuitBreaker, CircuitPolicy, CircuitState, ProviderCircuit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::{CycleSlot, FetchCycle};
pub use error::{CoordError, KeyPoolError, KeyedCallError};
pub use key_pool::{ApiKey, FailureKind, KeyPool, KeyPoolSettings, KeyStatus, KeyedFailure};
pub use memory::MemoryStore;
pub use retry::retry_with_backoff;
pub use store::CoordinationStore;
