//! Host/module interop bridge
//!
//! Lets a WebGL2 field visualizer compiled to a WebAssembly-style module drive
//! a host graphics context without ever holding a host reference. Host objects
//! live in a handle table, values cross through the module's linear memory,
//! and errors are relayed back across the boundary in both directions.
//!
//! The bridge is single-threaded: everything hangs off one `Store` per module
//! instance, shared by the facades built on it.

use wasm_bindgen::prelude::*;

pub mod config;
pub mod error;
pub mod facade;
pub mod gl;
pub mod guest;
pub mod handles;
pub mod imports;
pub mod marshal;
pub mod memory;
pub mod module;
pub mod relay;
pub mod snapshot;
pub mod store;
pub mod value;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use config::{BridgeConfig, StringEncoding};
pub use error::{BridgeError, MarshalError, MemoryError, Trap};
pub use facade::{App, Param};
pub use gl::{GraphicsContext, RecordingContext};
pub use guest::GuestModule;
pub use handles::{Handle, HandleTable};
pub use module::{Instance, ModuleExports, SharedInstance};
pub use snapshot::MemorySnapshot;
pub use store::{BridgeStats, Store};
pub use value::{HostError, HostValue};

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Log to browser console
#[cfg(target_arch = "wasm32")]
pub fn log(s: &str) {
    web_sys::console::log_1(&JsValue::from_str(s));
}

#[cfg(target_arch = "wasm32")]
pub fn error(s: &str) {
    web_sys::console::error_1(&JsValue::from_str(s));
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log(s: &str) {
    println!("LOG: {}", s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn error(s: &str) {
    eprintln!("ERROR: {}", s);
}

/// Helper macro for console logging
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::log(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_error {
    ($($t:tt)*) => ($crate::error(&format!($($t)*)))
}

/// Decode a compressed memory snapshot into its resource counters
#[wasm_bindgen]
pub fn snapshot_stats(data: &[u8]) -> Result<JsValue, JsValue> {
    let snapshot = MemorySnapshot::from_bytes(data).map_err(|e| JsValue::from_str(&e))?;
    serde_wasm_bindgen::to_value(&snapshot.stats).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_guest_instance_creation() {
        let instance = GuestModule::instantiate(BridgeConfig::default());
        let ctx = Rc::new(RecordingContext::new(320, 240));
        let mut app = App::new(&instance, ctx).unwrap();
        assert!(app.is_active());
        app.release().unwrap();
        assert_eq!(instance.borrow().stats().live_handles, 0);
    }
}
