//! Compute-dispatch command encoding for multi-tile GPUs.
//!
//! ## Key Components
//! 1. **Kernel Metadata**: [`kernel`] describes a compiled kernel and derives the layout of its
//!    cross-thread data.
//! 2. **Hardware Abstraction**: [`hal`] holds the capability table, the per-generation
//!    [`HardwareProfile`](hal::HardwareProfile) and the bit-exact command layouts.
//! 3. **Encoding**: [`encode`] turns a kernel and its launch parameters into commands, heap data
//!    and, on multi-tile devices, a partitioned sequence.
//! 4. **Foundations**: [`loom`] provides the command stream, the heaps and small numeric helpers.
//!
//! ## Example
//! ```
//! use kernel_dispatch::{
//!     encode::{CommandBuilder, DispatchEncoder, DispatchRequest},
//!     hal::HardwareInfo,
//!     kernel::{DispatchTraits, KernelAttributes, KernelDescriptor},
//!     loom::{heap::Heaps, stream::LinearStream},
//! };
//!
//! let kernel = KernelDescriptor::builder("fill")
//!     .attributes(KernelAttributes { simd_size: 16, ..Default::default() })
//!     .dispatch_traits(DispatchTraits { work_dim: Some(0), ..Default::default() })
//!     .build();
//!
//! let encoder = DispatchEncoder::new(HardwareInfo::xe_hp(), Default::default());
//! let mut builder = CommandBuilder::new(
//!     LinearStream::new(0x10_0000, 4096),
//!     Heaps::contiguous(0x100_0000, 0x1_0000),
//! );
//! let request = DispatchRequest::new(&kernel).group_count([64, 1, 1]).group_size([16, 1, 1]);
//!
//! let estimate = encoder.estimate(&builder, &request);
//! let output = encoder.encode(&mut builder, &request)?;
//! assert_eq!(output.bytes_written, estimate);
//! # Ok::<(), kernel_dispatch::encode::EncodeError>(())
//! ```

pub mod encode;
pub mod hal;
pub mod kernel;
pub mod loom;

#[cfg(test)]
mod testing;
