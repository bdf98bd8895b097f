//! Per-instance bridge context
//!
//! Everything a capability call or a marshaling adapter needs is reachable
//! from `Store`: the module's memory and allocator, the cached views over that
//! memory, the handle table and the pending host exception. There is no global
//! state; each module instance owns exactly one `Store`.

use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;
use crate::error::MemoryError;
use crate::handles::{self, Handle, HandleTable};
use crate::memory::{FreeListAllocator, LinearMemory, ModuleAllocator, View, ViewCache};
use crate::value::HostValue;

/// Resource counters for leak checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    pub live_handles: usize,
    pub handle_capacity: usize,
    pub live_allocations: usize,
    pub live_bytes: usize,
    pub memory_pages: u32,
    pub memory_generation: u64,
    pub view_rebuilds: u64,
    pub pending_exception: bool,
}

pub struct Store {
    memory: LinearMemory,
    allocator: Box<dyn ModuleAllocator>,
    views: ViewCache,
    heap: HandleTable<HostValue>,
    pending_exception: Option<Handle>,
    config: BridgeConfig,
}

impl Store {
    pub fn new(config: BridgeConfig) -> Self {
        let allocator = Box::new(FreeListAllocator::new(config.stack_size));
        Self::with_allocator(config, allocator)
    }

    pub fn with_allocator(config: BridgeConfig, allocator: Box<dyn ModuleAllocator>) -> Self {
        Store {
            memory: LinearMemory::new(config.initial_pages, config.max_pages),
            allocator,
            views: ViewCache::new(),
            heap: HandleTable::with_sentinels([
                HostValue::Undefined,
                HostValue::Null,
                HostValue::Bool(true),
                HostValue::Bool(false),
            ]),
            pending_exception: None,
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    // Cached views; rebuilt when memory has grown since they were made

    pub fn bytes(&mut self) -> View<u8> {
        self.views.bytes(&self.memory)
    }

    pub fn ints(&mut self) -> View<i32> {
        self.views.ints(&self.memory)
    }

    pub fn floats32(&mut self) -> View<f32> {
        self.views.floats32(&self.memory)
    }

    pub fn floats64(&mut self) -> View<f64> {
        self.views.floats64(&self.memory)
    }

    // Module allocator exports. Any of these may grow memory.

    pub fn malloc(&mut self, size: u32, align: u32) -> Result<u32, MemoryError> {
        self.allocator.malloc(&mut self.memory, size, align)
    }

    pub fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32, MemoryError> {
        self.allocator.realloc(&mut self.memory, ptr, old_size, new_size, align)
    }

    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<(), MemoryError> {
        self.allocator.free(&mut self.memory, ptr, size, align)
    }

    pub fn add_to_stack_pointer(&mut self, delta: i32) -> Result<u32, MemoryError> {
        self.allocator.add_to_stack_pointer(delta)
    }

    // Handle table

    pub fn add_object(&mut self, value: HostValue) -> Handle {
        self.heap.insert(value)
    }

    /// # Panics
    /// On a handle that is not live.
    pub fn get_object(&self, handle: Handle) -> &HostValue {
        self.heap.get(handle)
    }

    pub fn get_object_mut(&mut self, handle: Handle) -> &mut HostValue {
        self.heap.get_mut(handle)
    }

    pub fn try_get_object(&self, handle: Handle) -> Option<&HostValue> {
        self.heap.try_get(handle)
    }

    /// Move the value out and release its slot (sentinels are copied, not released)
    pub fn take_object(&mut self, handle: Handle) -> HostValue {
        match self.heap.take(handle) {
            Some(value) => value,
            None => self.heap.get(handle).clone(),
        }
    }

    pub fn drop_object(&mut self, handle: Handle) {
        self.heap.release(handle);
    }

    /// Handle for a host boolean, using the permanent sentinels
    pub fn bool_handle(b: bool) -> Handle {
        if b {
            handles::TRUE
        } else {
            handles::FALSE
        }
    }

    // Exception slot

    /// Record a host exception for the module to pick up
    pub fn exn_store(&mut self, handle: Handle) {
        if let Some(previous) = self.pending_exception.replace(handle) {
            // an exception the module never looked at
            self.heap.release(previous);
        }
    }

    pub fn take_exception(&mut self) -> Option<Handle> {
        self.pending_exception.take()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            live_handles: self.heap.live(),
            handle_capacity: self.heap.capacity(),
            live_allocations: self.allocator.live_allocations(),
            live_bytes: self.allocator.live_bytes(),
            memory_pages: self.memory.pages(),
            memory_generation: self.memory.generation(),
            view_rebuilds: self.views.rebuilds(),
            pending_exception: self.pending_exception.is_some(),
        }
    }
}
