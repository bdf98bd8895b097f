//! Reference module
//!
//! An implementation of the module side of the boundary, written the way a
//! compiled module would behave: it sees only raw pointers, handle indices and
//! the imported capabilities, and it owns the strings and slices passed to it.

pub mod app;
pub mod input;
pub mod math;
pub mod render;

use std::collections::HashMap;

use crate::config::BridgeConfig;
use crate::error::Trap;
use crate::handles::Handle;
use crate::imports;
use crate::marshal;
use crate::module::{Instance, ModuleExports, SharedInstance};
use crate::store::Store;
use crate::value::HostError;

use app::{Preset, Scene};
use render::Render;

/// Bytes reserved in linear memory for each live app; its address is the app pointer
const STATE_BYTES: u32 = 64;

/// Copy a module-owned string into a fresh allocation
pub(crate) fn alloc_str(cx: &mut Store, s: &str) -> Result<(u32, u32), Trap> {
    let len = s.len() as u32;
    let ptr = cx.malloc(len, 1)?;
    cx.memory_mut().write_bytes(ptr, s.as_bytes())?;
    Ok((ptr, len))
}

/// Lend `s` to an import for the duration of `f`
pub(crate) fn with_str<R>(
    cx: &mut Store,
    s: &str,
    f: impl FnOnce(&mut Store, u32, u32) -> Result<R, Trap>,
) -> Result<R, Trap> {
    let (ptr, len) = alloc_str(cx, s)?;
    let result = f(cx, ptr, len);
    cx.free(ptr, len, 1)?;
    result
}

/// An error value created by the module, ready to be put in an error slot
pub(crate) fn raise(cx: &mut Store, message: &str) -> Trap {
    match with_str(cx, message, |cx, ptr, len| imports::string_new(cx, ptr, len)) {
        Ok(raw) => Trap::Exception(Handle::from_raw(raw)),
        Err(trap) => trap,
    }
}

/// Throw an `Error` through the `throw` import
fn throw(cx: &mut Store, message: &str) -> Trap {
    match with_str(cx, message, |cx, ptr, len| Err::<(), _>(imports::throw(cx, ptr, len))) {
        Err(trap) => trap,
        Ok(()) => Trap::Throw(HostError::error(message)),
    }
}

/// Decode an owned `f64` argument buffer and free it
fn take_f64s(cx: &mut Store, ptr: u32, len: u32) -> Result<Vec<f64>, Trap> {
    let values = marshal::read_f64_slice(cx, ptr, len)?;
    cx.free(ptr, len * 8, 8)?;
    Ok(values)
}

struct GuestApp {
    scene: Scene,
    render: Render,
}

/// Module exports backed by the field visualizer
#[derive(Default)]
pub struct GuestModule {
    apps: HashMap<u32, GuestApp>,
}

impl GuestModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the module against a fresh store
    pub fn instantiate(config: BridgeConfig) -> SharedInstance {
        Instance::new(config, Box::new(GuestModule::new())).into_shared()
    }

    fn app(&mut self, ptr: u32) -> Result<&mut GuestApp, Trap> {
        self.apps
            .get_mut(&ptr)
            .ok_or_else(|| Trap::Throw(HostError::error(format!("no app state at 0x{:08x}", ptr))))
    }

    fn toggle(&mut self, ptr: u32, set: impl FnOnce(&mut Scene)) -> Result<(), Trap> {
        set(&mut self.app(ptr)?.scene);
        Ok(())
    }
}

impl ModuleExports for GuestModule {
    fn app_new(&mut self, cx: &mut Store, retptr: u32, ctx: u32) -> Result<(), Trap> {
        match Render::new(cx, ctx) {
            Ok(render) => {
                let ptr = match cx.malloc(STATE_BYTES, 8) {
                    Ok(ptr) => ptr,
                    Err(e) => {
                        render.free(cx)?;
                        return Err(e.into());
                    }
                };
                self.apps.insert(ptr, GuestApp { scene: Scene::new(), render });
                marshal::write_words(cx, retptr, &[ptr as i32, 0, 0])?;
            }
            Err(Trap::Exception(err)) => {
                marshal::write_words(cx, retptr, &[0, err.raw() as i32, 1])?;
            }
            Err(trap) => return Err(trap),
        }
        Ok(())
    }

    fn app_free(&mut self, cx: &mut Store, ptr: u32) -> Result<(), Trap> {
        let app = match self.apps.remove(&ptr) {
            Some(app) => app,
            None => return Err(throw(cx, "app freed twice")),
        };
        app.render.free(cx)?;
        cx.free(ptr, STATE_BYTES, 8)?;
        Ok(())
    }

    fn app_restart_physics(&mut self, _cx: &mut Store, ptr: u32) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.restart())
    }

    fn app_change_c(&mut self, cx: &mut Store, ptr: u32, c: f64) -> Result<u32, Trap> {
        if !(c.is_finite() && c > 0.0) {
            return Err(throw(cx, &format!("speed of light must be positive, got {}", c)));
        }
        Ok(self.app(ptr)?.scene.physics.change_c(c) as u32)
    }

    fn app_reset_charge(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap> {
        let name = marshal::take_string(cx, s_ptr, s_len)?;
        let preset = match name.parse::<Preset>() {
            Ok(preset) => preset,
            Err(message) => return Err(throw(cx, &message)),
        };
        self.toggle(ptr, |scene| scene.reset_charge(preset))
    }

    fn app_reset_grid(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap> {
        let name = marshal::take_string(cx, s_ptr, s_len)?;
        self.toggle(ptr, |scene| scene.reset_grid(&name))
    }

    fn app_change_correct_lorentz(&mut self, _cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.correct_lorentz = on != 0)
    }

    fn app_change_electric_on(&mut self, _cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.electric_on = on != 0)
    }

    fn app_change_magnetic_on(&mut self, _cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.magnetic_on = on != 0)
    }

    fn app_change_poynting_on(&mut self, _cx: &mut Store, ptr: u32, on: u32) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.poynting_on = on != 0)
    }

    fn app_change_arrow_length_factor(&mut self, _cx: &mut Store, ptr: u32, factor: f64) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.arrows.length_factor = factor)
    }

    fn app_change_arrow_length_log(&mut self, _cx: &mut Store, ptr: u32, log: u32) -> Result<(), Trap> {
        let log = log.min(u8::MAX as u32) as u8;
        self.toggle(ptr, |scene| scene.arrows.log_count = log)
    }

    fn app_key_down(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap> {
        let key = marshal::take_string(cx, s_ptr, s_len)?;
        self.toggle(ptr, |scene| scene.keys.down(key))
    }

    fn app_key_up(&mut self, cx: &mut Store, ptr: u32, s_ptr: u32, s_len: u32) -> Result<(), Trap> {
        let key = marshal::take_string(cx, s_ptr, s_len)?;
        self.toggle(ptr, |scene| scene.keys.up(&key))
    }

    fn app_window_blur(&mut self, _cx: &mut Store, ptr: u32) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.keys.clear())
    }

    fn app_touch_start(
        &mut self,
        cx: &mut Store,
        ptr: u32,
        ms: f64,
        x_ptr: u32,
        x_len: u32,
        y_ptr: u32,
        y_len: u32,
    ) -> Result<(), Trap> {
        let x = take_f64s(cx, x_ptr, x_len)?;
        let y = take_f64s(cx, y_ptr, y_len)?;
        self.toggle(ptr, |scene| scene.touches.start(ms, &x, &y))
    }

    fn app_touch_move(
        &mut self,
        cx: &mut Store,
        ptr: u32,
        ms: f64,
        x_ptr: u32,
        x_len: u32,
        y_ptr: u32,
        y_len: u32,
    ) -> Result<(), Trap> {
        let x = take_f64s(cx, x_ptr, x_len)?;
        let y = take_f64s(cx, y_ptr, y_len)?;
        self.toggle(ptr, |scene| scene.touches.moved(ms, &x, &y))
    }

    fn app_touch_end(&mut self, _cx: &mut Store, ptr: u32, ms: f64) -> Result<(), Trap> {
        self.toggle(ptr, |scene| scene.touches.end(ms))
    }

    fn app_tick(&mut self, cx: &mut Store, retptr: u32, ptr: u32, timestamp: f64) -> Result<(), Trap> {
        let app = self.app(ptr)?;
        match app.render.refresh_viewport(cx) {
            Ok(()) => {}
            Err(Trap::Exception(err)) => {
                marshal::write_words(cx, retptr, &[err.raw() as i32, 1])?;
                return Ok(());
            }
            Err(trap) => return Err(trap),
        }
        let items = app.scene.frame(timestamp, app.render.size());
        app.render.frame(cx, &items)?;
        marshal::write_words(cx, retptr, &[0, 0])?;
        Ok(())
    }

    fn app_info(&mut self, cx: &mut Store, retptr: u32, ptr: u32) -> Result<(), Trap> {
        let text = self.app(ptr)?.scene.info();
        let (s_ptr, s_len) = alloc_str(cx, &text)?;
        marshal::write_words(cx, retptr, &[s_ptr as i32, s_len as i32])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_creates_string_value() {
        let mut cx = Store::new(BridgeConfig::default());
        let trap = raise(&mut cx, "broken");
        let handle = match trap {
            Trap::Exception(h) => h,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(cx.get_object(handle).as_str(), Some("broken"));
        assert_eq!(cx.stats().live_allocations, 0);
    }

    #[test]
    fn test_throw_carries_message() {
        let mut cx = Store::new(BridgeConfig::default());
        match throw(&mut cx, "unknown charge preset: x") {
            Trap::Throw(e) => assert_eq!(e.to_string(), "Error: unknown charge preset: x"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cx.stats().live_allocations, 0);
    }

    #[test]
    fn test_unknown_pointer_throws() {
        let mut module = GuestModule::new();
        let mut cx = Store::new(BridgeConfig::default());
        assert!(matches!(module.app_restart_physics(&mut cx, 1234), Err(Trap::Throw(_))));
    }
}
