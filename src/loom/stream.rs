use std::fmt::Debug;

use bytemuck::Pod;
use derive_more::Display;
use thiserror::Error;

/// A fixed-layout hardware command.
///
/// Implemented through `#[derive(Command)]`; the header dword of [`Command::init`] already
/// carries the opcode and the dword length.
pub trait Command: Pod + Debug {
    const NAME: &'static str;
    const OPCODE: u32;
    const OPCODE_MASK: u32;
    const SIZE: usize = size_of::<Self>();

    /// A zeroed command with its header programmed.
    fn init() -> Self;

    /// Checks if `header` belongs to this command.
    #[inline]
    fn matches(header: u32) -> bool {
        header & Self::OPCODE_MASK == Self::OPCODE
    }
}

/// Location of a command inside a [`LinearStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{offset:#x} @ {gpu_address:#x}")]
pub struct CommandRef {
    /// Byte offset from the start of the stream.
    pub offset: usize,
    /// GPU virtual address of the command.
    pub gpu_address: u64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    #[error("command stream exhausted: {requested} bytes requested, {available} available")]
    OutOfSpace { requested: usize, available: usize },
}

/// A caller-owned command buffer that is only ever appended to.
#[derive(Debug, Clone)]
pub struct LinearStream {
    buffer: Vec<u8>,
    gpu_base: u64,
    used: usize,
}

impl LinearStream {
    pub fn new(gpu_base: u64, capacity: usize) -> Self {
        let buffer = vec![0; capacity];
        Self {
            buffer,
            gpu_base,
            used: 0,
        }
    }

    #[inline]
    pub fn gpu_base(&self) -> u64 {
        self.gpu_base
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.used
    }

    /// GPU address of the next byte to be written.
    #[inline]
    pub fn current_gpu_address(&self) -> u64 {
        self.gpu_base + self.used as u64
    }

    #[inline]
    pub fn current(&self) -> CommandRef {
        CommandRef {
            offset: self.used,
            gpu_address: self.current_gpu_address(),
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.used]
    }

    /// Reserves `size` bytes and hands them out for writing.
    pub fn get_space(&mut self, size: usize) -> Result<(CommandRef, &mut [u8]), StreamError> {
        if size > self.available() {
            return Err(StreamError::OutOfSpace {
                requested: size,
                available: self.available(),
            });
        }
        let at = self.current();
        self.used += size;
        Ok((at, &mut self.buffer[at.offset..self.used]))
    }

    /// Appends a command.
    pub fn put<C: Command>(&mut self, cmd: &C) -> Result<CommandRef, StreamError> {
        let (at, space) = self.get_space(C::SIZE)?;
        space.copy_from_slice(bytemuck::bytes_of(cmd));
        Ok(at)
    }

    /// Reads back a command previously written at `offset`.
    ///
    /// # Panics
    /// If the command does not lie within the written range.
    pub fn read<C: Command>(&self, offset: usize) -> C {
        bytemuck::pod_read_unaligned(&self.data()[offset..offset + C::SIZE])
    }
}
