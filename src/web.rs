//! Browser entry point
//!
//! `WebApp` is what the page script constructs around its canvas context. Errors
//! cross into JavaScript as plain strings.

use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{HtmlCanvasElement, WebGl2RenderingContext};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::facade::{App, Param};
use crate::gl::webgl::WebGlHost;
use crate::guest::GuestModule;
use crate::module::SharedInstance;
use crate::snapshot::MemorySnapshot;
use crate::console_log;

/// Frames slower than this are logged
const SLOW_FRAME_MS: f64 = 50.0;

fn to_js(e: BridgeError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// `performance.now()`, if the page has a clock
fn now() -> Option<f64> {
    web_sys::window().and_then(|w| w.performance()).map(|p| p.now())
}

#[wasm_bindgen]
pub struct WebApp {
    instance: SharedInstance,
    app: App,
    last_frame_ms: f64,
}

#[wasm_bindgen]
impl WebApp {
    /// `config` is an optional object with `BridgeConfig` fields
    #[wasm_bindgen(constructor)]
    pub fn new(gl: WebGl2RenderingContext, config: JsValue) -> Result<WebApp, JsValue> {
        let config: BridgeConfig = if config.is_undefined() || config.is_null() {
            BridgeConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config).map_err(|e| JsValue::from_str(&e.to_string()))?
        };
        config.validate().map_err(to_js)?;
        console_log!("Creating field visualizer ({} initial pages)", config.initial_pages);

        let instance = GuestModule::instantiate(config);
        let app = App::new(&instance, Rc::new(WebGlHost::new(gl))).map_err(to_js)?;
        Ok(WebApp { instance, app, last_frame_ms: 0.0 })
    }

    /// Open a WebGL2 context on the canvas with id `canvas_id`
    pub fn from_canvas(canvas_id: &str, config: JsValue) -> Result<WebApp, JsValue> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| JsValue::from_str("no document"))?;
        let canvas: HtmlCanvasElement = document
            .get_element_by_id(canvas_id)
            .ok_or_else(|| JsValue::from_str(&format!("no element with id {:?}", canvas_id)))?
            .dyn_into()
            .map_err(|_| JsValue::from_str(&format!("{:?} is not a canvas", canvas_id)))?;
        let gl: WebGl2RenderingContext = canvas
            .get_context("webgl2")?
            .ok_or_else(|| JsValue::from_str("WebGL2 is not available"))?
            .dyn_into()
            .map_err(|_| JsValue::from_str("unexpected webgl2 context type"))?;
        WebApp::new(gl, config)
    }

    pub fn restart_physics(&mut self) -> Result<(), JsValue> {
        self.app.restart_physics().map_err(to_js)
    }

    /// Returns true when the simulation had to restart
    pub fn change_c(&mut self, c: f64) -> Result<bool, JsValue> {
        self.app.change_c(c).map_err(to_js)
    }

    pub fn reset_charge(&mut self, preset: &str) -> Result<(), JsValue> {
        self.app.reset_charge(preset).map_err(to_js)
    }

    pub fn reset_grid(&mut self, grid: &str) -> Result<(), JsValue> {
        self.app.reset_grid(grid).map_err(to_js)
    }

    pub fn change_correct_lorentz(&mut self, on: bool) -> Result<(), JsValue> {
        self.app.change_correct_lorentz(on).map_err(to_js)
    }

    pub fn change_electric_on(&mut self, on: bool) -> Result<(), JsValue> {
        self.app.change_electric_on(on).map_err(to_js)
    }

    pub fn change_magnetic_on(&mut self, on: bool) -> Result<(), JsValue> {
        self.app.change_magnetic_on(on).map_err(to_js)
    }

    pub fn change_poynting_on(&mut self, on: bool) -> Result<(), JsValue> {
        self.app.change_poynting_on(on).map_err(to_js)
    }

    pub fn change_arrow_length_factor(&mut self, factor: f64) -> Result<(), JsValue> {
        self.app.change_arrow_length_factor(factor).map_err(to_js)
    }

    pub fn change_arrow_length_log(&mut self, log: u8) -> Result<(), JsValue> {
        self.app.change_arrow_length_log(log).map_err(to_js)
    }

    pub fn key_down(&mut self, key: &str) -> Result<(), JsValue> {
        self.app.key_down(key).map_err(to_js)
    }

    pub fn key_up(&mut self, key: &str) -> Result<(), JsValue> {
        self.app.key_up(key).map_err(to_js)
    }

    pub fn window_blur(&mut self) -> Result<(), JsValue> {
        self.app.window_blur().map_err(to_js)
    }

    pub fn touch_start(&mut self, ms: f64, x: &[f64], y: &[f64]) -> Result<(), JsValue> {
        self.app.touch_start(ms, x, y).map_err(to_js)
    }

    pub fn touch_move(&mut self, ms: f64, x: &[f64], y: &[f64]) -> Result<(), JsValue> {
        self.app.touch_move(ms, x, y).map_err(to_js)
    }

    pub fn touch_end(&mut self, ms: f64) -> Result<(), JsValue> {
        self.app.touch_end(ms).map_err(to_js)
    }

    pub fn tick(&mut self, timestamp: f64) -> Result<(), JsValue> {
        let start = now();
        let result = self.app.tick(timestamp).map_err(to_js);
        if let (Some(start), Some(end)) = (start, now()) {
            self.last_frame_ms = end - start;
            if self.last_frame_ms > SLOW_FRAME_MS {
                console_log!("slow frame at {:.1}: {:.1} ms", timestamp, self.last_frame_ms);
            }
        }
        result
    }

    /// Wall time the last `tick` took, in ms
    #[wasm_bindgen(getter)]
    pub fn last_frame_ms(&self) -> f64 {
        self.last_frame_ms
    }

    pub fn info(&self) -> Result<String, JsValue> {
        self.app.info().map_err(to_js)
    }

    /// `name=value` style parameter, e.g. from the page URL
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<bool, JsValue> {
        let param = Param::parse(name, value).map_err(to_js)?;
        self.app.set_parameter(param).map_err(to_js)
    }

    pub fn release(&mut self) -> Result<(), JsValue> {
        self.app.release().map_err(to_js)
    }

    /// Handle and allocation counters
    pub fn stats(&self) -> Result<JsValue, JsValue> {
        let stats = self.instance.borrow().stats();
        serde_wasm_bindgen::to_value(&stats).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Compressed snapshot of module memory
    pub fn snapshot(&self) -> Result<Vec<u8>, JsValue> {
        let instance = self.instance.borrow();
        MemorySnapshot::capture(instance.store())
            .to_bytes()
            .map_err(|e| JsValue::from_str(&e))
    }
}
