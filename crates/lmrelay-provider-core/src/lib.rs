pub mod block;
pub mod cancel;
pub mod context;
pub mod errors;
pub mod pool;
pub mod sink;
pub mod state;

pub use block::{BlockEntry, BlockKey, BlockLevel, BlockMark, BlockRecord, BlockScope};
pub use cancel::{CancelHandle, CancelSignal};
pub use context::UpstreamContext;
pub use errors::RelayError;
pub use pool::{AttemptFailure, KeyEntry, KeyPool, PoolSnapshot};
pub use sink::{BufferSink, EventSink};
pub use state::{KeyStateEvent, NoopStateSink, StateSink};
