//! Foundations shared by the encoder and the hardware layer.
//!
//! - [`stream`]: a linear, GPU-visible command stream and the [`Command`](stream::Command)
//!   trait every command layout implements.
//! - [`heap`]: the surface state, dynamic state and indirect object heaps of one builder.
//! - [`num`]: three-component vectors and alignment helpers.

pub mod heap;
pub mod num;
pub mod stream;
