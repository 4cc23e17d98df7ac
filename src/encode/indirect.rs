//! Indirect dispatch: group counts read by the command streamer from GPU memory.
//!
//! The counts are loaded into the dispatch dimension registers, and every payload field derived
//! from them is produced on the GPU with register stores. Global sizes need a multiplication by
//! the group size, which the ALU only offers as repeated additions.

use crate::{
    hal::cmds::{
        MiLoadRegisterImm, MiLoadRegisterMem, MiLoadRegisterReg, MiMath, MiStoreRegisterMem,
        registers,
    },
    kernel::KernelDescriptor,
    loom::{
        num::{Vec3, bit_length},
        stream::{Command, LinearStream, StreamError},
    },
};

const MULTIPLICAND: u32 = 0;
const PRODUCT: u32 = 1;

/// Bytes of the shift-add sequence multiplying a register by `factor`.
fn multiply_size(factor: u32) -> usize {
    let bits = bit_length(factor as u64) as usize;
    let adds = factor.count_ones() as usize;
    let doublings = bits.saturating_sub(1);
    MiLoadRegisterReg::SIZE
        + 3 * MiLoadRegisterImm::SIZE
        + (adds + doublings) * MiMath::SIZE
        + MiStoreRegisterMem::SIZE
}

/// Bytes [`emit_indirect_dispatch`] writes.
pub fn indirect_dispatch_size(kernel: &KernelDescriptor, group_size: Vec3<u32>) -> usize {
    let traits = kernel.dispatch_traits();
    let group_size = group_size.at_least_one().to_array();

    let loads = 3 * MiLoadRegisterMem::SIZE;
    let counts = traits.num_work_groups.iter().flatten().count() * MiStoreRegisterMem::SIZE;
    let sizes: usize = traits
        .global_work_size
        .iter()
        .zip(group_size)
        .filter(|(offset, _)| offset.is_some())
        .map(|(_, size)| multiply_size(size))
        .sum();
    loads + counts + sizes
}

fn load_register_imm(stream: &mut LinearStream, register: u32, data: u32) -> Result<(), StreamError> {
    let mut cmd = MiLoadRegisterImm::init();
    cmd.set_register_offset(register);
    cmd.set_data(data);
    stream.put(&cmd)?;
    Ok(())
}

fn store_register(stream: &mut LinearStream, register: u32, address: u64) -> Result<(), StreamError> {
    let mut cmd = MiStoreRegisterMem::init();
    cmd.set_register_offset(register);
    cmd.set_address(address);
    stream.put(&cmd)?;
    Ok(())
}

/// Stores `dispatch_dim[axis] * factor` at `address`.
fn emit_multiply(
    stream: &mut LinearStream,
    axis: usize,
    factor: u32,
    address: u64,
) -> Result<(), StreamError> {
    let mut copy = MiLoadRegisterReg::init();
    copy.set_source_register(registers::GPGPU_DISPATCH_DIM[axis]);
    copy.set_destination_register(registers::gpr(MULTIPLICAND));
    stream.put(&copy)?;
    load_register_imm(stream, registers::gpr_high(MULTIPLICAND), 0)?;
    load_register_imm(stream, registers::gpr(PRODUCT), 0)?;
    load_register_imm(stream, registers::gpr_high(PRODUCT), 0)?;

    let bits = bit_length(factor as u64);
    for bit in 0..bits {
        if factor & (1 << bit) != 0 {
            stream.put(&MiMath::add(PRODUCT, MULTIPLICAND, PRODUCT))?;
        }
        if bit + 1 < bits {
            stream.put(&MiMath::add(MULTIPLICAND, MULTIPLICAND, MULTIPLICAND))?;
        }
    }

    store_register(stream, registers::gpr(PRODUCT), address)
}

/// Loads the group counts at `counts_address` and derives the payload fields from them.
///
/// `payload_address` is the GPU address of the cross-thread data.
pub fn emit_indirect_dispatch(
    stream: &mut LinearStream,
    kernel: &KernelDescriptor,
    group_size: Vec3<u32>,
    counts_address: u64,
    payload_address: u64,
) -> Result<(), StreamError> {
    for (axis, register) in registers::GPGPU_DISPATCH_DIM.into_iter().enumerate() {
        let mut load = MiLoadRegisterMem::init();
        load.set_register_offset(register);
        load.set_address(counts_address + 4 * axis as u64);
        stream.put(&load)?;
    }

    let traits = kernel.dispatch_traits();
    for (axis, offset) in traits.num_work_groups.iter().enumerate() {
        if let Some(offset) = offset {
            store_register(
                stream,
                registers::GPGPU_DISPATCH_DIM[axis],
                payload_address + *offset as u64,
            )?;
        }
    }

    let group_size = group_size.at_least_one().to_array();
    for (axis, offset) in traits.global_work_size.iter().enumerate() {
        if let Some(offset) = offset {
            emit_multiply(stream, axis, group_size[axis], payload_address + *offset as u64)?;
        }
    }
    Ok(())
}
