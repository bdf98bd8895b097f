//! Host-side handle on the module's application state
//!
//! `App` owns exactly one pointer into module memory. It marshals host
//! arguments into module memory, calls the matching export, and decodes the
//! result (or the error the module relayed back). Once released, or if
//! construction never completed, every method fails instead of touching the
//! module.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::{BridgeError, MarshalError, Trap};
use crate::gl::GraphicsContext;
use crate::handles::Handle;
use crate::marshal;
use crate::module::{with_stack_frame, ModuleExports, SharedInstance};
use crate::store::Store;
use crate::value::HostValue;
use crate::console_error;

/// Return area size; enough for three `i32` words with 8-byte alignment
const RET_AREA: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unconstructed,
    Active(u32),
    Released,
}

pub struct App {
    instance: SharedInstance,
    state: State,
}

/// One named simulation parameter, as set from outside (URL query, CLI, UI)
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    C(f64),
    Preset(String),
    Grid(String),
    Electric(bool),
    Magnetic(bool),
    Poynting(bool),
    CorrectLorentz(bool),
    ArrowFactor(f64),
    ArrowLog(u8),
}

fn parse_bool(name: &str, value: &str) -> Result<bool, BridgeError> {
    match value {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(BridgeError::Config(format!("{}: expected a boolean, got {:?}", name, value))),
    }
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> Result<T, BridgeError> {
    value
        .parse()
        .map_err(|_| BridgeError::Config(format!("{}: expected a number, got {:?}", name, value)))
}

impl Param {
    pub fn parse(name: &str, value: &str) -> Result<Param, BridgeError> {
        let value = value.trim();
        Ok(match name.trim() {
            "c" => {
                let c: f64 = parse_num(name, value)?;
                if !(c > 0.0 && c.is_finite()) {
                    return Err(BridgeError::Config(format!("c must be positive, got {}", c)));
                }
                Param::C(c)
            }
            "preset" => Param::Preset(value.to_string()),
            "grid" => Param::Grid(value.to_string()),
            "electric" => Param::Electric(parse_bool(name, value)?),
            "magnetic" => Param::Magnetic(parse_bool(name, value)?),
            "poynting" => Param::Poynting(parse_bool(name, value)?),
            "correct_lorentz" => Param::CorrectLorentz(parse_bool(name, value)?),
            "arrow_factor" => Param::ArrowFactor(parse_num(name, value)?),
            "arrow_log" => Param::ArrowLog(parse_num(name, value)?),
            other => return Err(BridgeError::Config(format!("unknown parameter {:?}", other))),
        })
    }
}

/// `name=value`
impl FromStr for Param {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, value)) => Param::parse(name, value),
            None => Err(BridgeError::Config(format!("expected name=value, got {:?}", s))),
        }
    }
}

impl App {
    /// Construct the module's application state around `context`
    pub fn new(instance: &SharedInstance, context: Rc<dyn GraphicsContext>) -> Result<App, BridgeError> {
        let mut app = App {
            instance: instance.clone(),
            state: State::Unconstructed,
        };

        let ptr = {
            let mut inst = instance
                .try_borrow_mut()
                .map_err(|_| BridgeError::Construction("instance is busy".into()))?;
            inst.invoke(|exports, cx| {
                with_stack_frame(cx, RET_AREA, |cx, retptr| {
                    // app_new owns the handle from here, on success or failure
                    let ctx = cx.add_object(HostValue::Context(context));
                    exports.app_new(cx, retptr, ctx.raw())?;
                    let words = marshal::read_words(cx, retptr, 3)?;
                    if words[2] != 0 {
                        return Err(Trap::Exception(Handle::from_raw(words[1] as u32)));
                    }
                    Ok(words[0] as u32)
                })
            })
        };

        match ptr {
            Ok(ptr) => {
                app.state = State::Active(ptr);
                Ok(app)
            }
            Err(BridgeError::Relayed(msg)) | Err(BridgeError::Trap(msg)) => {
                Err(BridgeError::Construction(msg))
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    pub fn is_released(&self) -> bool {
        self.state == State::Released
    }

    fn ptr(&self) -> Result<u32, BridgeError> {
        match self.state {
            State::Active(ptr) => Ok(ptr),
            State::Unconstructed => Err(BridgeError::NotConstructed),
            State::Released => Err(BridgeError::Released),
        }
    }

    fn call<R>(
        &self,
        f: impl FnOnce(&mut dyn ModuleExports, &mut Store, u32) -> Result<R, Trap>,
    ) -> Result<R, BridgeError> {
        let ptr = self.ptr()?;
        let mut inst = self
            .instance
            .try_borrow_mut()
            .map_err(|_| BridgeError::Trap("re-entrant call into the module".into()))?;
        inst.invoke(|exports, cx| f(exports, cx, ptr))
    }

    pub fn restart_physics(&mut self) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_restart_physics(cx, p))
    }

    /// Returns whether the change forced a physics restart
    pub fn change_c(&mut self, c: f64) -> Result<bool, BridgeError> {
        self.call(|m, cx, p| m.app_change_c(cx, p, c).map(|r| r != 0))
    }

    pub fn reset_charge(&mut self, preset: &str) -> Result<(), BridgeError> {
        self.call(|m, cx, p| {
            let (s_ptr, s_len) = marshal::pass_string(cx, preset)?;
            m.app_reset_charge(cx, p, s_ptr, s_len)
        })
    }

    pub fn reset_grid(&mut self, grid: &str) -> Result<(), BridgeError> {
        self.call(|m, cx, p| {
            let (s_ptr, s_len) = marshal::pass_string(cx, grid)?;
            m.app_reset_grid(cx, p, s_ptr, s_len)
        })
    }

    pub fn change_correct_lorentz(&mut self, on: bool) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_change_correct_lorentz(cx, p, on as u32))
    }

    pub fn change_electric_on(&mut self, on: bool) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_change_electric_on(cx, p, on as u32))
    }

    pub fn change_magnetic_on(&mut self, on: bool) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_change_magnetic_on(cx, p, on as u32))
    }

    pub fn change_poynting_on(&mut self, on: bool) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_change_poynting_on(cx, p, on as u32))
    }

    pub fn change_arrow_length_factor(&mut self, factor: f64) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_change_arrow_length_factor(cx, p, factor))
    }

    pub fn change_arrow_length_log(&mut self, log: u8) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_change_arrow_length_log(cx, p, log as u32))
    }

    pub fn key_down(&mut self, key: &str) -> Result<(), BridgeError> {
        self.call(|m, cx, p| {
            let (s_ptr, s_len) = marshal::pass_string(cx, key)?;
            m.app_key_down(cx, p, s_ptr, s_len)
        })
    }

    pub fn key_up(&mut self, key: &str) -> Result<(), BridgeError> {
        self.call(|m, cx, p| {
            let (s_ptr, s_len) = marshal::pass_string(cx, key)?;
            m.app_key_up(cx, p, s_ptr, s_len)
        })
    }

    pub fn window_blur(&mut self) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_window_blur(cx, p))
    }

    fn check_touch(x: &[f64], y: &[f64]) -> Result<(), BridgeError> {
        if x.len() != y.len() {
            return Err(MarshalError::LengthMismatch { left: x.len(), right: y.len() }.into());
        }
        Ok(())
    }

    pub fn touch_start(&mut self, ms: f64, x: &[f64], y: &[f64]) -> Result<(), BridgeError> {
        Self::check_touch(x, y)?;
        self.call(|m, cx, p| {
            let (x_ptr, x_len) = marshal::pass_f64_slice(cx, x)?;
            let (y_ptr, y_len) = marshal::pass_f64_slice(cx, y)?;
            m.app_touch_start(cx, p, ms, x_ptr, x_len, y_ptr, y_len)
        })
    }

    pub fn touch_move(&mut self, ms: f64, x: &[f64], y: &[f64]) -> Result<(), BridgeError> {
        Self::check_touch(x, y)?;
        self.call(|m, cx, p| {
            let (x_ptr, x_len) = marshal::pass_f64_slice(cx, x)?;
            let (y_ptr, y_len) = marshal::pass_f64_slice(cx, y)?;
            m.app_touch_move(cx, p, ms, x_ptr, x_len, y_ptr, y_len)
        })
    }

    pub fn touch_end(&mut self, ms: f64) -> Result<(), BridgeError> {
        self.call(|m, cx, p| m.app_touch_end(cx, p, ms))
    }

    /// Advance and draw one frame; an error relayed from the graphics host surfaces here
    pub fn tick(&mut self, timestamp: f64) -> Result<(), BridgeError> {
        self.call(|m, cx, p| {
            with_stack_frame(cx, RET_AREA, |cx, retptr| {
                m.app_tick(cx, retptr, p, timestamp)?;
                let words = marshal::read_words(cx, retptr, 2)?;
                if words[1] != 0 {
                    return Err(Trap::Exception(Handle::from_raw(words[0] as u32)));
                }
                Ok(())
            })
        })
    }

    pub fn info(&self) -> Result<String, BridgeError> {
        self.call(|m, cx, p| {
            with_stack_frame(cx, RET_AREA, |cx, retptr| {
                m.app_info(cx, retptr, p)?;
                let words = marshal::read_words(cx, retptr, 2)?;
                marshal::take_string(cx, words[0] as u32, words[1] as u32)
            })
        })
    }

    /// Apply a named parameter; returns whether the simulation was restarted
    pub fn set_parameter(&mut self, param: Param) -> Result<bool, BridgeError> {
        match param {
            Param::C(c) => self.change_c(c),
            Param::Preset(name) => self.reset_charge(&name).map(|_| true),
            Param::Grid(name) => self.reset_grid(&name).map(|_| false),
            Param::Electric(on) => self.change_electric_on(on).map(|_| false),
            Param::Magnetic(on) => self.change_magnetic_on(on).map(|_| false),
            Param::Poynting(on) => self.change_poynting_on(on).map(|_| false),
            Param::CorrectLorentz(on) => self.change_correct_lorentz(on).map(|_| false),
            Param::ArrowFactor(f) => self.change_arrow_length_factor(f).map(|_| false),
            Param::ArrowLog(n) => self.change_arrow_length_log(n).map(|_| false),
        }
    }

    /// Free the module state. Further calls fail with `BridgeError::Released`.
    pub fn release(&mut self) -> Result<(), BridgeError> {
        let ptr = match self.state {
            State::Active(ptr) => ptr,
            State::Unconstructed | State::Released => {
                self.state = State::Released;
                return Ok(());
            }
        };
        self.state = State::Released;
        let mut inst = self
            .instance
            .try_borrow_mut()
            .map_err(|_| BridgeError::Trap("re-entrant call into the module".into()))?;
        inst.invoke(|exports, cx| exports.app_free(cx, ptr))
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let State::Active(ptr) = self.state {
            if let Err(e) = self.release() {
                console_error!("failed to free app state at 0x{:08x}: {}", ptr, e);
            }
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("state", &self.state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_parse() {
        assert_eq!(Param::parse("c", "0.5").unwrap(), Param::C(0.5));
        assert_eq!(Param::parse("preset", "circle").unwrap(), Param::Preset("circle".into()));
        assert_eq!(Param::parse("poynting", "on").unwrap(), Param::Poynting(true));
        assert_eq!(Param::parse("arrow_log", "3").unwrap(), Param::ArrowLog(3));
        assert_eq!("electric=false".parse::<Param>().unwrap(), Param::Electric(false));
    }

    #[test]
    fn test_param_parse_rejects() {
        assert!(Param::parse("c", "-1").is_err());
        assert!(Param::parse("c", "fast").is_err());
        assert!(Param::parse("arrow_log", "300").is_err());
        assert!(Param::parse("magnetic", "maybe").is_err());
        assert!(Param::parse("gravity", "1").is_err());
        assert!("preset".parse::<Param>().is_err());
    }
}
