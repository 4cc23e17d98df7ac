//! The two dispatch command shapes.
//!
//! [`ComputeWalker`] addresses resources through the surface and dynamic state heaps, while
//! [`ComputeWalkerHeapless`] carries absolute addresses and a larger inline payload. Shared
//! programming goes through [`WalkerFields`] so it is written once for both.

use derive_more::From;
use kernel_dispatch_derive::Command;

use super::cmds::{bitfields, impl_bytemuck, qwords};
use crate::loom::{
    num::Vec3,
    stream::{Command, CommandRef, LinearStream, StreamError},
};

/// Dispatch command for heap-indexed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x7105_0000)]
#[repr(C)]
pub struct ComputeWalker(pub [u32; 36]);

/// Dispatch command for heapless state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Command)]
#[command(crate = "crate", opcode = 0x7106_0000)]
#[repr(C)]
pub struct ComputeWalkerHeapless(pub [u32; 44]);

impl_bytemuck!(ComputeWalker, ComputeWalkerHeapless);

impl ComputeWalker {
    pub const INLINE_DATA_DWORD: usize = 28;
    pub const INLINE_DATA_SIZE: usize = 32;

    bitfields! {
        predicate_enable / set_predicate_enable: 1[0, 1];
        indirect_parameter_enable / set_indirect_parameter_enable: 1[1, 1];
        workload_partition_enable / set_workload_partition_enable: 1[2, 1];
        partition_type / set_partition_type: 1[4, 2];
        dispatch_walk_order / set_dispatch_walk_order: 1[8, 2];
        dispatch_all_mod / set_dispatch_all_mod: 1[12, 2];
        compute_dispatch_all / set_compute_dispatch_all: 1[14, 1];
        indirect_data_length / set_indirect_data_length: 2[0, 17];
        /// Offset from the indirect object base; 64-byte aligned.
        indirect_data_start_address / set_indirect_data_start_address: 3[0, 32];
        local_x_maximum / set_local_x_maximum: 4[0, 10];
        local_y_maximum / set_local_y_maximum: 4[10, 10];
        local_z_maximum / set_local_z_maximum: 4[20, 10];
        emit_local_id / set_emit_local_id: 5[0, 3];
        generate_local_id / set_generate_local_id: 5[3, 1];
        emit_inline_parameter / set_emit_inline_parameter: 5[4, 1];
        walk_order / set_walk_order: 5[5, 3];
        simd_size / set_simd_size: 5[8, 2];
        message_simd / set_message_simd: 5[10, 2];
        execution_mask / set_execution_mask: 6[0, 32];
        thread_group_id_x_dimension / set_thread_group_id_x_dimension: 7[0, 32];
        thread_group_id_y_dimension / set_thread_group_id_y_dimension: 8[0, 32];
        thread_group_id_z_dimension / set_thread_group_id_z_dimension: 9[0, 32];
        thread_group_id_starting_x / set_thread_group_id_starting_x: 10[0, 32];
        thread_group_id_starting_y / set_thread_group_id_starting_y: 11[0, 32];
        thread_group_id_starting_z / set_thread_group_id_starting_z: 12[0, 32];
        partition_size / set_partition_size: 13[0, 32];
        partition_id / set_partition_id: 14[0, 32];
        /// Offset from the surface state base; binding-table aligned.
        binding_table_pointer / set_binding_table_pointer: 17[0, 32];
        /// Offset from the dynamic state base.
        sampler_state_pointer / set_sampler_state_pointer: 18[0, 32];
        number_of_threads_in_group / set_number_of_threads_in_group: 19[0, 11];
        sampler_count / set_sampler_count: 19[15, 3];
        barrier_enable / set_barrier_enable: 19[18, 1];
        shared_local_memory_size / set_shared_local_memory_size: 19[19, 5];
        preferred_slm_allocation_size / set_preferred_slm_allocation_size: 19[24, 4];
        thread_group_dispatch_size / set_thread_group_dispatch_size: 19[28, 2];
        post_sync_operation / set_post_sync_operation: 23[0, 2];
        post_sync_dataport_pipeline_flush / set_post_sync_dataport_pipeline_flush: 23[4, 1];
        post_sync_l3_flush / set_post_sync_l3_flush: 23[5, 1];
        post_sync_system_memory_fence_request / set_post_sync_system_memory_fence_request: 23[6, 1];
        binding_table_entry_count / set_binding_table_entry_count: 20[0, 5];
        post_sync_mocs / set_post_sync_mocs: 23[8, 7];
    }

    qwords! {
        kernel_start_pointer / set_kernel_start_pointer: 15;
        post_sync_destination_address / set_post_sync_destination_address: 24;
        post_sync_immediate_data / set_post_sync_immediate_data: 26;
    }
}

impl ComputeWalkerHeapless {
    pub const INLINE_DATA_DWORD: usize = 28;
    pub const INLINE_DATA_SIZE: usize = 64;

    bitfields! {
        predicate_enable / set_predicate_enable: 1[0, 1];
        indirect_parameter_enable / set_indirect_parameter_enable: 1[1, 1];
        workload_partition_enable / set_workload_partition_enable: 1[2, 1];
        partition_type / set_partition_type: 1[4, 2];
        dispatch_walk_order / set_dispatch_walk_order: 1[8, 2];
        dispatch_all_mod / set_dispatch_all_mod: 1[12, 2];
        compute_dispatch_all / set_compute_dispatch_all: 1[14, 1];
        indirect_data_length / set_indirect_data_length: 2[0, 17];
        local_x_maximum / set_local_x_maximum: 5[0, 10];
        local_y_maximum / set_local_y_maximum: 5[10, 10];
        local_z_maximum / set_local_z_maximum: 5[20, 10];
        emit_local_id / set_emit_local_id: 6[0, 3];
        generate_local_id / set_generate_local_id: 6[3, 1];
        emit_inline_parameter / set_emit_inline_parameter: 6[4, 1];
        walk_order / set_walk_order: 6[5, 3];
        simd_size / set_simd_size: 6[8, 2];
        message_simd / set_message_simd: 6[10, 2];
        execution_mask / set_execution_mask: 7[0, 32];
        thread_group_id_x_dimension / set_thread_group_id_x_dimension: 8[0, 32];
        thread_group_id_y_dimension / set_thread_group_id_y_dimension: 9[0, 32];
        thread_group_id_z_dimension / set_thread_group_id_z_dimension: 10[0, 32];
        thread_group_id_starting_x / set_thread_group_id_starting_x: 11[0, 32];
        thread_group_id_starting_y / set_thread_group_id_starting_y: 12[0, 32];
        thread_group_id_starting_z / set_thread_group_id_starting_z: 13[0, 32];
        partition_size / set_partition_size: 14[0, 32];
        partition_id / set_partition_id: 15[0, 32];
        number_of_threads_in_group / set_number_of_threads_in_group: 20[0, 11];
        sampler_count / set_sampler_count: 20[15, 3];
        barrier_enable / set_barrier_enable: 20[18, 1];
        shared_local_memory_size / set_shared_local_memory_size: 20[19, 5];
        preferred_slm_allocation_size / set_preferred_slm_allocation_size: 20[24, 4];
        thread_group_dispatch_size / set_thread_group_dispatch_size: 20[28, 2];
        post_sync_operation / set_post_sync_operation: 22[0, 2];
        post_sync_dataport_pipeline_flush / set_post_sync_dataport_pipeline_flush: 22[4, 1];
        post_sync_l3_flush / set_post_sync_l3_flush: 22[5, 1];
        post_sync_system_memory_fence_request / set_post_sync_system_memory_fence_request: 22[6, 1];
        post_sync_mocs / set_post_sync_mocs: 22[8, 7];
    }

    qwords! {
        /// Absolute GPU address; 64-byte aligned.
        indirect_data_start_address / set_indirect_data_start_address: 3;
        kernel_start_pointer / set_kernel_start_pointer: 16;
        /// Absolute GPU address of the sampler states.
        sampler_state_base_address / set_sampler_state_base_address: 18;
        post_sync_destination_address / set_post_sync_destination_address: 23;
        post_sync_immediate_data / set_post_sync_immediate_data: 25;
    }
}

/// Field access shared by both dispatch command shapes.
pub trait WalkerFields {
    fn predicate_enable(&self) -> u32;
    fn set_predicate_enable(&mut self, value: u32);
    fn indirect_parameter_enable(&self) -> u32;
    fn set_indirect_parameter_enable(&mut self, value: u32);
    fn workload_partition_enable(&self) -> u32;
    fn set_workload_partition_enable(&mut self, value: u32);
    fn partition_type(&self) -> u32;
    fn set_partition_type(&mut self, value: u32);
    fn partition_size(&self) -> u32;
    fn set_partition_size(&mut self, value: u32);
    fn partition_id(&self) -> u32;
    fn set_partition_id(&mut self, value: u32);
    fn dispatch_walk_order(&self) -> u32;
    fn set_dispatch_walk_order(&mut self, value: u32);
    fn dispatch_all_mod(&self) -> u32;
    fn set_dispatch_all_mod(&mut self, value: u32);
    fn compute_dispatch_all(&self) -> u32;
    fn set_compute_dispatch_all(&mut self, value: u32);
    fn indirect_data_length(&self) -> u32;
    fn set_indirect_data_length(&mut self, value: u32);
    fn local_x_maximum(&self) -> u32;
    fn set_local_x_maximum(&mut self, value: u32);
    fn local_y_maximum(&self) -> u32;
    fn set_local_y_maximum(&mut self, value: u32);
    fn local_z_maximum(&self) -> u32;
    fn set_local_z_maximum(&mut self, value: u32);
    fn emit_local_id(&self) -> u32;
    fn set_emit_local_id(&mut self, value: u32);
    fn generate_local_id(&self) -> u32;
    fn set_generate_local_id(&mut self, value: u32);
    fn emit_inline_parameter(&self) -> u32;
    fn set_emit_inline_parameter(&mut self, value: u32);
    fn walk_order(&self) -> u32;
    fn set_walk_order(&mut self, value: u32);
    fn simd_size(&self) -> u32;
    fn set_simd_size(&mut self, value: u32);
    fn message_simd(&self) -> u32;
    fn set_message_simd(&mut self, value: u32);
    fn execution_mask(&self) -> u32;
    fn set_execution_mask(&mut self, value: u32);
    fn thread_group_id_x_dimension(&self) -> u32;
    fn set_thread_group_id_x_dimension(&mut self, value: u32);
    fn thread_group_id_y_dimension(&self) -> u32;
    fn set_thread_group_id_y_dimension(&mut self, value: u32);
    fn thread_group_id_z_dimension(&self) -> u32;
    fn set_thread_group_id_z_dimension(&mut self, value: u32);
    fn thread_group_id_starting_x(&self) -> u32;
    fn set_thread_group_id_starting_x(&mut self, value: u32);
    fn thread_group_id_starting_y(&self) -> u32;
    fn set_thread_group_id_starting_y(&mut self, value: u32);
    fn thread_group_id_starting_z(&self) -> u32;
    fn set_thread_group_id_starting_z(&mut self, value: u32);
    fn number_of_threads_in_group(&self) -> u32;
    fn set_number_of_threads_in_group(&mut self, value: u32);
    fn barrier_enable(&self) -> u32;
    fn set_barrier_enable(&mut self, value: u32);
    fn shared_local_memory_size(&self) -> u32;
    fn set_shared_local_memory_size(&mut self, value: u32);
    fn preferred_slm_allocation_size(&self) -> u32;
    fn set_preferred_slm_allocation_size(&mut self, value: u32);
    fn thread_group_dispatch_size(&self) -> u32;
    fn set_thread_group_dispatch_size(&mut self, value: u32);
    fn post_sync_operation(&self) -> u32;
    fn set_post_sync_operation(&mut self, value: u32);
    fn post_sync_dataport_pipeline_flush(&self) -> u32;
    fn set_post_sync_dataport_pipeline_flush(&mut self, value: u32);
    fn post_sync_l3_flush(&self) -> u32;
    fn set_post_sync_l3_flush(&mut self, value: u32);
    fn post_sync_system_memory_fence_request(&self) -> u32;
    fn set_post_sync_system_memory_fence_request(&mut self, value: u32);
    fn post_sync_mocs(&self) -> u32;
    fn set_post_sync_mocs(&mut self, value: u32);

    fn kernel_start_pointer(&self) -> u64;
    fn set_kernel_start_pointer(&mut self, value: u64);
    fn post_sync_destination_address(&self) -> u64;
    fn set_post_sync_destination_address(&mut self, value: u64);
    fn post_sync_immediate_data(&self) -> u64;
    fn set_post_sync_immediate_data(&mut self, value: u64);

    /// Capacity of the inline payload in bytes.
    fn inline_data_size(&self) -> usize;
    fn inline_data(&self) -> &[u8];
    fn inline_data_mut(&mut self) -> &mut [u8];

    fn thread_group_dimensions(&self) -> Vec3<u32> {
        Vec3::new(
            self.thread_group_id_x_dimension(),
            self.thread_group_id_y_dimension(),
            self.thread_group_id_z_dimension(),
        )
    }

    fn set_thread_group_dimensions(&mut self, value: Vec3<u32>) {
        self.set_thread_group_id_x_dimension(value.x);
        self.set_thread_group_id_y_dimension(value.y);
        self.set_thread_group_id_z_dimension(value.z);
    }

    fn thread_group_starting(&self) -> Vec3<u32> {
        Vec3::new(
            self.thread_group_id_starting_x(),
            self.thread_group_id_starting_y(),
            self.thread_group_id_starting_z(),
        )
    }

    fn set_thread_group_starting(&mut self, value: Vec3<u32>) {
        self.set_thread_group_id_starting_x(value.x);
        self.set_thread_group_id_starting_y(value.y);
        self.set_thread_group_id_starting_z(value.z);
    }

    fn set_local_maximum(&mut self, group_size: Vec3<u32>) {
        self.set_local_x_maximum(group_size.x.saturating_sub(1));
        self.set_local_y_maximum(group_size.y.saturating_sub(1));
        self.set_local_z_maximum(group_size.z.saturating_sub(1));
    }
}

macro_rules! impl_walker_fields {
    (@impl $ty:ty;
        u32: [$($get:ident / $set:ident),* $(,)?];
        u64: [$($get64:ident / $set64:ident),* $(,)?];
    ) => {
        impl WalkerFields for $ty {
            $(
                #[inline]
                fn $get(&self) -> u32 {
                    <$ty>::$get(self)
                }

                #[inline]
                fn $set(&mut self, value: u32) {
                    <$ty>::$set(self, value)
                }
            )*
            $(
                #[inline]
                fn $get64(&self) -> u64 {
                    <$ty>::$get64(self)
                }

                #[inline]
                fn $set64(&mut self, value: u64) {
                    <$ty>::$set64(self, value)
                }
            )*

            #[inline]
            fn inline_data_size(&self) -> usize {
                <$ty>::INLINE_DATA_SIZE
            }

            #[inline]
            fn inline_data(&self) -> &[u8] {
                let start = <$ty>::INLINE_DATA_DWORD;
                let end = start + <$ty>::INLINE_DATA_SIZE / 4;
                bytemuck::cast_slice(&self.0[start..end])
            }

            #[inline]
            fn inline_data_mut(&mut self) -> &mut [u8] {
                let start = <$ty>::INLINE_DATA_DWORD;
                let end = start + <$ty>::INLINE_DATA_SIZE / 4;
                bytemuck::cast_slice_mut(&mut self.0[start..end])
            }
        }
    };
    ($ty:ty) => {
        impl_walker_fields!(@impl $ty;
            u32: [
                predicate_enable / set_predicate_enable,
                indirect_parameter_enable / set_indirect_parameter_enable,
                workload_partition_enable / set_workload_partition_enable,
                partition_type / set_partition_type,
                partition_size / set_partition_size,
                partition_id / set_partition_id,
                dispatch_walk_order / set_dispatch_walk_order,
                dispatch_all_mod / set_dispatch_all_mod,
                compute_dispatch_all / set_compute_dispatch_all,
                indirect_data_length / set_indirect_data_length,
                local_x_maximum / set_local_x_maximum,
                local_y_maximum / set_local_y_maximum,
                local_z_maximum / set_local_z_maximum,
                emit_local_id / set_emit_local_id,
                generate_local_id / set_generate_local_id,
                emit_inline_parameter / set_emit_inline_parameter,
                walk_order / set_walk_order,
                simd_size / set_simd_size,
                message_simd / set_message_simd,
                execution_mask / set_execution_mask,
                thread_group_id_x_dimension / set_thread_group_id_x_dimension,
                thread_group_id_y_dimension / set_thread_group_id_y_dimension,
                thread_group_id_z_dimension / set_thread_group_id_z_dimension,
                thread_group_id_starting_x / set_thread_group_id_starting_x,
                thread_group_id_starting_y / set_thread_group_id_starting_y,
                thread_group_id_starting_z / set_thread_group_id_starting_z,
                number_of_threads_in_group / set_number_of_threads_in_group,
                barrier_enable / set_barrier_enable,
                shared_local_memory_size / set_shared_local_memory_size,
                preferred_slm_allocation_size / set_preferred_slm_allocation_size,
                thread_group_dispatch_size / set_thread_group_dispatch_size,
                post_sync_operation / set_post_sync_operation,
                post_sync_dataport_pipeline_flush / set_post_sync_dataport_pipeline_flush,
                post_sync_l3_flush / set_post_sync_l3_flush,
                post_sync_system_memory_fence_request / set_post_sync_system_memory_fence_request,
                post_sync_mocs / set_post_sync_mocs,
            ];
            u64: [
                kernel_start_pointer / set_kernel_start_pointer,
                post_sync_destination_address / set_post_sync_destination_address,
                post_sync_immediate_data / set_post_sync_immediate_data,
            ];
        );
    };
}

impl_walker_fields!(ComputeWalker);
impl_walker_fields!(ComputeWalkerHeapless);

/// A dispatch command of either shape, selected once per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, From)]
pub enum WalkerCommand {
    WithHeap(ComputeWalker),
    Heapless(ComputeWalkerHeapless),
}

impl WalkerCommand {
    pub fn new(heapless: bool) -> Self {
        match heapless {
            true => Self::Heapless(ComputeWalkerHeapless::init()),
            false => Self::WithHeap(ComputeWalker::init()),
        }
    }

    /// Size in bytes of the command shape.
    pub const fn size_for(heapless: bool) -> usize {
        match heapless {
            true => ComputeWalkerHeapless::SIZE,
            false => ComputeWalker::SIZE,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        match self {
            Self::WithHeap(_) => ComputeWalker::SIZE,
            Self::Heapless(_) => ComputeWalkerHeapless::SIZE,
        }
    }

    #[inline]
    pub fn fields(&self) -> &dyn WalkerFields {
        match self {
            Self::WithHeap(walker) => walker,
            Self::Heapless(walker) => walker,
        }
    }

    #[inline]
    pub fn fields_mut(&mut self) -> &mut dyn WalkerFields {
        match self {
            Self::WithHeap(walker) => walker,
            Self::Heapless(walker) => walker,
        }
    }

    /// Appends the command to `stream`.
    pub fn emit(&self, stream: &mut LinearStream) -> Result<CommandRef, StreamError> {
        match self {
            Self::WithHeap(walker) => stream.put(walker),
            Self::Heapless(walker) => stream.put(walker),
        }
    }

    /// Reads back a command of the given shape written at `offset`.
    pub fn read(stream: &LinearStream, offset: usize, heapless: bool) -> Self {
        match heapless {
            true => Self::Heapless(stream.read(offset)),
            false => Self::WithHeap(stream.read(offset)),
        }
    }
}
