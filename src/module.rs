//! The module side of the boundary
//!
//! `ModuleExports` is the set of functions an instantiated module exports to
//! the host. Like real module exports they only speak the raw ABI: pointers
//! into linear memory, handle indices and scalars. Results that do not fit a
//! scalar are written to a return area (`retptr`) on the module's shadow stack.
//!
//! Return area layouts:
//! - `app_new`:  `[ptr, err_handle, is_err]`
//! - `app_tick`: `[err_handle, is_err]`
//! - `app_info`: `[str_ptr, str_len]` (string owned by the caller afterwards)

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Trap};
use crate::relay;
use crate::store::{BridgeStats, Store};

#[allow(clippy::too_many_arguments)]
pub trait ModuleExports {
    /// Construct the application state around the graphics context handle
    ///
    /// The module takes ownership of `ctx` whether or not construction succeeds.
    fn app_new(&mut self, cx: &mut Store, retptr: u32, ctx: u32) -> Result<(), Trap>;

    /// Finalize the state at `ptr`, dropping every handle it holds
    fn app_free(&mut self, cx: &mut Store, ptr: u32) -> Result<(), Trap>;

    fn app_restart_physics(&mut self, cx: &mut Store, ptr: u32) -> Result<(), Trap>;

    /// Non-zero when the change required a physics restart
    fn app_change_c(&mut self, cx: &mut Store, ptr: u32, c: f64) -> Result<u32, Trap>;

    /// String arguments are owned (and freed) by the module
    fn app_reset_charge(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap>;
    fn app_reset_grid(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap>;

    fn app_change_correct_lorentz(&mut self, cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap>;
    fn app_change_electric_on(&mut self, cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap>;
    fn app_change_magnetic_on(&mut self, cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap>;
    fn app_change_poynting_on(&mut self, cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap>;
    fn app_change_arrow_length_factor(&mut self, cx: &mut Store, ptr: u32, factor: f64) -> Result<(), Trap>;
    fn app_change_arrow_length_log(&mut self, cx: &mut Store, ptr: u32, log: u32) -> Result<(), Trap>;

    fn app_key_down(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap>;
    fn app_key_up(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap>;
    fn app_window_blur(&mut self, cx: &mut Store, ptr: u32) -> Result<(), Trap>;

    /// Coordinate arrays are `f64` buffers owned (and freed) by the module
    fn app_touch_start(
        &mut self,
        cx: &mut Store,
        ptr: u32,
        ms: f64,
        x_ptr: u32,
        x_len: u32,
        y_ptr: u32,
        y_len: u32,
    ) -> Result<(), Trap>;
    fn app_touch_move(
        &mut self,
        cx: &mut Store,
        ptr: u32,
        ms: f64,
        x_ptr: u32,
        x_len: u32,
        y_ptr: u32,
        y_len: u32,
    ) -> Result<(), Trap>;
    fn app_touch_end(&mut self, cx: &mut Store, ptr: u32, ms: f64) -> Result<(), Trap>;

    fn app_tick(&mut self, cx: &mut Store, retptr: u32, ptr: u32, timestamp: f64) -> Result<(), Trap>;
    fn app_info(&mut self, cx: &mut Store, retptr: u32, ptr: u32) -> Result<(), Trap>;
}

/// An instantiated module: its exports plus the bridge context they run against
pub struct Instance {
    store: Store,
    exports: Box<dyn ModuleExports>,
}

/// Facades created from the same instance share it
pub type SharedInstance = Rc<RefCell<Instance>>;

impl Instance {
    pub fn new(config: BridgeConfig, exports: Box<dyn ModuleExports>) -> Self {
        Instance {
            store: Store::new(config),
            exports,
        }
    }

    pub fn into_shared(self) -> SharedInstance {
        Rc::new(RefCell::new(self))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn stats(&self) -> BridgeStats {
        self.store.stats()
    }

    /// Run one export call; a trap that escapes it is decoded into a `BridgeError`
    pub fn invoke<R>(
        &mut self,
        f: impl FnOnce(&mut dyn ModuleExports, &mut Store) -> Result<R, Trap>,
    ) -> Result<R, BridgeError> {
        let result = f(self.exports.as_mut(), &mut self.store);
        result.map_err(|trap| relay::into_bridge_error(&mut self.store, trap))
    }
}

/// Borrow `size` bytes of shadow stack for a return area
///
/// The stack pointer is restored whether or not `f` succeeds.
pub fn with_stack_frame<R>(
    cx: &mut Store,
    size: u32,
    f: impl FnOnce(&mut Store, u32) -> Result<R, Trap>,
) -> Result<R, Trap> {
    let retptr = cx.add_to_stack_pointer(-(size as i32))?;
    let result = f(cx, retptr);
    cx.add_to_stack_pointer(size as i32)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;

    #[test]
    fn test_stack_frame_restored_on_error() {
        let mut cx = Store::new(BridgeConfig::default());
        let top = cx.add_to_stack_pointer(0).unwrap();

        let result: Result<(), Trap> = with_stack_frame(&mut cx, 16, |_, retptr| {
            assert_eq!(retptr, top - 16);
            Err(Trap::Memory(MemoryError::Detached))
        });
        assert!(result.is_err());
        assert_eq!(cx.add_to_stack_pointer(0).unwrap(), top);

        let value = with_stack_frame(&mut cx, 16, |_, retptr| Ok(retptr)).unwrap();
        assert_eq!(value, top - 16);
        assert_eq!(cx.add_to_stack_pointer(0).unwrap(), top);
    }
}
