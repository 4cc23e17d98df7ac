//! Encoding of compute dispatches into a command stream.
//!
//! ## Key Components
//! 1. **Dispatch Encoder**: [`DispatchEncoder`] turns a [`KernelDescriptor`] and a
//!    [`DispatchRequest`] into heap data, global state commands and one walker per partition.
//!    Every step lives in its own module so it can be tested on its own.
//! 2. **Size Estimator**: [`DispatchEncoder::estimate`] predicts the exact number of bytes a
//!    dispatch appends to the stream.
//! 3. **State Cache**: [`StateCache`] remembers the global state each [`CommandBuilder`] last
//!    programmed, so it is only reprogrammed when a dispatch needs different values.
//! 4. **Multi-Tile Partitioner**: [`partition`] splits a dispatch across tiles and wraps the
//!    parts in the synchronization they need.
//!
//! [`KernelDescriptor`]: crate::kernel::KernelDescriptor

use thiserror::Error;

pub use builder::{BuilderId, CommandBuilder};
pub use config::EncoderConfiguration;
pub use dispatch::{DispatchEncoder, DispatchPlan};
pub use partition::{DispatchMode, PartitionPlan, PartitionType, SubDispatch};
pub use post_sync::{PostSync, PostSyncOperation};
pub use request::{
    CompletionSignal, DispatchOutput, DispatchRequest, ImplicitArgValues, SignalKind,
};
pub use slm::SlmPolicy;
pub use state::StateCache;

use crate::loom::{heap::HeapError, stream::StreamError};

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod estimate;
pub mod heap_placement;
pub mod indirect;
pub mod local_ids;
pub mod partition;
pub mod post_sync;
pub mod request;
pub mod slm;
pub mod state;
pub mod thread;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Heap(#[from] HeapError),
}
