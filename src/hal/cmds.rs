//! Bit-exact command layouts shared by every supported generation.
//!
//! Each command is a `#[repr(C)]` array of dwords. Fields are addressed as `dword[lo, width]`;
//! 64-bit addresses span two consecutive dwords, low half first.

use derive_more::Display;
use kernel_dispatch_derive::Command;
use thiserror::Error;

pub use super::walker::{ComputeWalker, ComputeWalkerHeapless};
use crate::loom::{num::max_n_bit_value, stream::Command};

#[inline]
pub(crate) const fn field_mask(width: u32) -> u32 {
    max_n_bit_value(width) as u32
}

#[inline]
pub(crate) const fn get_bits(dword: u32, lo: u32, width: u32) -> u32 {
    (dword >> lo) & field_mask(width)
}

/// Replaces `width` bits at `lo` with `value`.
///
/// # Panics
/// If `value` does not fit into the field.
#[inline]
pub(crate) fn set_bits(dword: u32, lo: u32, width: u32, value: u32) -> u32 {
    let mask = field_mask(width);
    assert!(
        value <= mask,
        "value {value:#x} overflows a {width}-bit field"
    );
    (dword & !(mask << lo)) | (value << lo)
}

/// Generates getters and setters for bit fields of a dword-array command.
macro_rules! bitfields {
    ($($(#[$meta:meta])* $get:ident / $set:ident : $dw:literal [$lo:literal, $width:literal];)*) => {$(
        $(#[$meta])*
        #[inline]
        pub fn $get(&self) -> u32 {
            $crate::hal::cmds::get_bits(self.0[$dw], $lo, $width)
        }

        #[inline]
        pub fn $set(&mut self, value: u32) {
            self.0[$dw] = $crate::hal::cmds::set_bits(self.0[$dw], $lo, $width, value);
        }
    )*};
}

/// Generates getters and setters for 64-bit fields starting at a dword.
macro_rules! qwords {
    ($($(#[$meta:meta])* $get:ident / $set:ident : $dw:literal;)*) => {$(
        $(#[$meta])*
        #[inline]
        pub fn $get(&self) -> u64 {
            self.0[$dw] as u64 | (self.0[$dw + 1] as u64) << 32
        }

        #[inline]
        pub fn $set(&mut self, value: u64) {
            self.0[$dw] = value as u32;
            self.0[$dw + 1] = (value >> 32) as u32;
        }
    )*};
}

macro_rules! impl_bytemuck {
    ($($ty:ty),* $(,)?) => {$(
        unsafe impl ::bytemuck::Zeroable for $ty {}
        unsafe impl ::bytemuck::Pod for $ty {}
    )*};
}

pub(crate) use {bitfields, impl_bytemuck, qwords};

/// MMIO register offsets touched by the encoder.
pub mod registers {
    /// Workload partition id of the executing tile.
    pub const WPARID: u32 = 0x221c;
    /// Dispatch dimension registers read by indirect walkers.
    pub const GPGPU_DISPATCH_DIM: [u32; 3] = [0x2500, 0x2504, 0x2508];
    /// L3 partitioning between SLM and cache.
    pub const L3_CONTROL: u32 = 0xb134;

    const CS_GPR_R0: u32 = 0x2600;

    /// Low dword of general purpose register `index`.
    #[inline]
    pub const fn gpr(index: u32) -> u32 {
        CS_GPR_R0 + 8 * index
    }

    /// High dword of general purpose register `index`.
    #[inline]
    pub const fn gpr_high(index: u32) -> u32 {
        gpr(index) + 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x0000_0000, mask = 0xff80_0000, length = false)]
#[repr(C)]
pub struct MiNoop(pub [u32; 1]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x0500_0000, mask = 0xff80_0000, length = false)]
#[repr(C)]
pub struct MiBatchBufferEnd(pub [u32; 1]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x1880_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiBatchBufferStart(pub [u32; 3]);

impl MiBatchBufferStart {
    bitfields! {
        /// 1 selects the per-process GTT.
        address_space_indicator / set_address_space_indicator: 0[8, 1];
        /// Skips the jump unless the predication mask register is set.
        predication_enable / set_predication_enable: 0[15, 1];
        /// A second-level batch returns to the caller on its batch buffer end.
        second_level_batch_buffer / set_second_level_batch_buffer: 0[22, 1];
    }

    qwords! {
        address / set_address: 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x1000_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiStoreDataImm(pub [u32; 4]);

impl MiStoreDataImm {
    bitfields! {
        data / set_data: 3[0, 32];
    }

    qwords! {
        address / set_address: 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x1780_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiAtomic(pub [u32; 5]);

impl MiAtomic {
    pub const OPCODE_MOVE: u32 = 0x04;
    pub const OPCODE_INCREMENT: u32 = 0x05;

    bitfields! {
        atomic_opcode / set_atomic_opcode: 0[8, 8];
        /// 0 for dword operands, 1 for qword operands.
        data_size / set_data_size: 0[16, 2];
        inline_data / set_inline_data: 0[18, 1];
        cs_stall / set_cs_stall: 0[19, 1];
        return_data_control / set_return_data_control: 0[21, 1];
        operand1 / set_operand1: 3[0, 32];
        operand2 / set_operand2: 4[0, 32];
    }

    qwords! {
        address / set_address: 1;
    }
}

/// Comparison applied by [`MiSemaphoreWait`] between memory (SAD) and inline data (SDD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(u32)]
pub enum CompareOperation {
    GreaterThan = 0,
    GreaterThanOrEqual = 1,
    LessThan = 2,
    LessThanOrEqual = 3,
    Equal = 4,
    NotEqual = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x0e00_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiSemaphoreWait(pub [u32; 5]);

impl MiSemaphoreWait {
    bitfields! {
        compare_operation / set_compare_operation: 0[12, 3];
        /// 1 polls memory until the comparison holds.
        wait_mode / set_wait_mode: 0[15, 1];
        register_poll_mode / set_register_poll_mode: 0[16, 1];
        semaphore_data / set_semaphore_data: 1[0, 32];
    }

    qwords! {
        address / set_address: 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x1100_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiLoadRegisterImm(pub [u32; 3]);

impl MiLoadRegisterImm {
    bitfields! {
        mmio_remap_enable / set_mmio_remap_enable: 0[17, 1];
        register_offset / set_register_offset: 1[0, 32];
        data / set_data: 2[0, 32];
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x1480_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiLoadRegisterMem(pub [u32; 4]);

impl MiLoadRegisterMem {
    bitfields! {
        mmio_remap_enable / set_mmio_remap_enable: 0[17, 1];
        register_offset / set_register_offset: 1[0, 32];
    }

    qwords! {
        address / set_address: 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x1500_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiLoadRegisterReg(pub [u32; 3]);

impl MiLoadRegisterReg {
    bitfields! {
        source_register / set_source_register: 1[0, 32];
        destination_register / set_destination_register: 2[0, 32];
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x1200_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiStoreRegisterMem(pub [u32; 4]);

impl MiStoreRegisterMem {
    bitfields! {
        mmio_remap_enable / set_mmio_remap_enable: 0[17, 1];
        register_offset / set_register_offset: 1[0, 32];
    }

    qwords! {
        address / set_address: 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x0080_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiSetPredicate(pub [u32; 2]);

impl MiSetPredicate {
    pub const PREDICATE_DISABLE: u32 = 0;
    /// Predicate is set when `WPARID` equals the compare value.
    pub const PREDICATE_ON_WPARID: u32 = 1;

    bitfields! {
        predicate_enable / set_predicate_enable: 0[0, 4];
        compare_value / set_compare_value: 1[0, 32];
    }
}

/// ALU operations and operands of [`MiMath`].
pub mod alu {
    pub const LOAD: u32 = 0x080;
    pub const ADD: u32 = 0x100;
    pub const STORE: u32 = 0x180;

    pub const SRCA: u32 = 0x20;
    pub const SRCB: u32 = 0x21;
    pub const ACCU: u32 = 0x31;

    /// Packs one ALU instruction.
    #[inline]
    pub const fn instruction(opcode: u32, operand1: u32, operand2: u32) -> u32 {
        opcode << 20 | operand1 << 10 | operand2
    }
}

/// Four ALU instructions: `dst = a + b` over general purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x0d00_0000, mask = 0xff80_0000)]
#[repr(C)]
pub struct MiMath(pub [u32; 5]);

impl MiMath {
    /// `dst = a + b`, where all three are general purpose register indices.
    pub fn add(a: u32, b: u32, dst: u32) -> Self {
        let mut cmd = Self::init();
        cmd.0[1] = alu::instruction(alu::LOAD, alu::SRCA, a);
        cmd.0[2] = alu::instruction(alu::LOAD, alu::SRCB, b);
        cmd.0[3] = alu::instruction(alu::ADD, 0, 0);
        cmd.0[4] = alu::instruction(alu::STORE, dst, alu::ACCU);
        cmd
    }

    #[inline]
    pub fn instruction(&self, index: usize) -> u32 {
        self.0[1 + index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x7a00_0000)]
#[repr(C)]
pub struct PipeControl(pub [u32; 6]);

impl PipeControl {
    bitfields! {
        dc_flush_enable / set_dc_flush_enable: 1[0, 1];
        hdc_pipeline_flush / set_hdc_pipeline_flush: 1[1, 1];
        texture_cache_invalidation / set_texture_cache_invalidation: 1[2, 1];
        state_cache_invalidation / set_state_cache_invalidation: 1[3, 1];
        constant_cache_invalidation / set_constant_cache_invalidation: 1[4, 1];
        instruction_cache_invalidation / set_instruction_cache_invalidation: 1[5, 1];
        post_sync_operation / set_post_sync_operation: 1[14, 2];
        cs_stall / set_cs_stall: 1[20, 1];
        untyped_dataport_cache_flush / set_untyped_dataport_cache_flush: 1[22, 1];
    }

    qwords! {
        address / set_address: 2;
        immediate_data / set_immediate_data: 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x6101_0000)]
#[repr(C)]
pub struct StateBaseAddress(pub [u32; 22]);

impl StateBaseAddress {
    /// Set in the low bit of every base address and size the command should update.
    pub const MODIFY_ENABLE: u32 = 1;

    bitfields! {
        disable_multi_gpu_atomics / set_disable_multi_gpu_atomics: 3[0, 1];
        disable_multi_gpu_partial_writes / set_disable_multi_gpu_partial_writes: 3[1, 1];
        stateless_mocs / set_stateless_mocs: 3[16, 7];
        general_state_size / set_general_state_size: 12[0, 32];
        dynamic_state_size / set_dynamic_state_size: 13[0, 32];
        indirect_object_size / set_indirect_object_size: 14[0, 32];
        instruction_size / set_instruction_size: 15[0, 32];
        bindless_surface_state_size / set_bindless_surface_state_size: 18[0, 32];
    }

    qwords! {
        general_state_base_address / set_general_state_base_address: 1;
        surface_state_base_address / set_surface_state_base_address: 4;
        dynamic_state_base_address / set_dynamic_state_base_address: 6;
        indirect_object_base_address / set_indirect_object_base_address: 8;
        instruction_base_address / set_instruction_base_address: 10;
        bindless_surface_state_base_address / set_bindless_surface_state_base_address: 16;
        bindless_sampler_state_base_address / set_bindless_sampler_state_base_address: 19;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x7919_0000)]
#[repr(C)]
pub struct BindingTablePoolAlloc(pub [u32; 4]);

impl BindingTablePoolAlloc {
    bitfields! {
        mocs / set_mocs: 1[0, 7];
        buffer_size / set_buffer_size: 3[0, 32];
    }

    /// Sets the 4 KB aligned base address; the low dword doubles as the control bits.
    #[inline]
    pub fn set_base_address(&mut self, value: u64) {
        assert_eq!(value & 0xfff, 0, "binding table pool must be 4 KB aligned");
        self.0[1] = (self.0[1] & 0xfff) | value as u32;
        self.0[2] = (value >> 32) as u32;
    }
}

impl_bytemuck!(
    MiNoop,
    MiBatchBufferEnd,
    MiBatchBufferStart,
    MiStoreDataImm,
    MiAtomic,
    MiSemaphoreWait,
    MiLoadRegisterImm,
    MiLoadRegisterMem,
    MiLoadRegisterReg,
    MiStoreRegisterMem,
    MiSetPredicate,
    MiMath,
    PipeControl,
    StateBaseAddress,
    BindingTablePoolAlloc,
);

macro_rules! command_kinds {
    ($($ty:ident),* $(,)?) => {
        /// Every command the encoder can emit.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
        pub enum CommandKind {
            $($ty,)*
        }

        impl CommandKind {
            /// Identifies a command from its header dword.
            pub fn identify(header: u32) -> Option<Self> {
                $(if <$ty as Command>::matches(header) {
                    return Some(Self::$ty);
                })*
                None
            }

            pub const fn size(self) -> usize {
                match self {
                    $(Self::$ty => <$ty as Command>::SIZE,)*
                }
            }
        }
    };
}

command_kinds!(
    MiNoop,
    MiBatchBufferEnd,
    MiBatchBufferStart,
    MiStoreDataImm,
    MiAtomic,
    MiSemaphoreWait,
    MiLoadRegisterImm,
    MiLoadRegisterMem,
    MiLoadRegisterReg,
    MiStoreRegisterMem,
    MiSetPredicate,
    MiMath,
    PipeControl,
    StateBaseAddress,
    BindingTablePoolAlloc,
    ComputeWalker,
    ComputeWalkerHeapless,
);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command header {header:#010x} at offset {offset:#x}")]
    UnknownHeader { offset: usize, header: u32 },
    #[error("{kind} at offset {offset:#x} runs past the end of the stream")]
    Truncated { offset: usize, kind: CommandKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    pub offset: usize,
}

/// Walks a byte range command by command.
pub fn parse(bytes: &[u8]) -> Result<Vec<ParsedCommand>, ParseError> {
    let mut commands = vec![];
    let mut offset = 0;
    while offset + 4 <= bytes.len() {
        let header: u32 = bytemuck::pod_read_unaligned(&bytes[offset..offset + 4]);
        let kind =
            CommandKind::identify(header).ok_or(ParseError::UnknownHeader { offset, header })?;
        if offset + kind.size() > bytes.len() {
            return Err(ParseError::Truncated { offset, kind });
        }
        commands.push(ParsedCommand { kind, offset });
        offset += kind.size();
    }
    Ok(commands)
}
