//! Error and panic relay
//!
//! Host exceptions raised inside a catching capability are parked in the
//! handle table and announced through `Store::exn_store`; the module decides
//! whether to swallow or re-raise them. Whatever escapes a module call is
//! turned into a `BridgeError` here.

use crate::error::{BridgeError, Trap};
use crate::handles::Handle;
use crate::store::Store;
use crate::value::{debug_string, HostError, HostValue};
use crate::console_error;

/// Park a thrown host error for the module and return its handle
pub fn catch(cx: &mut Store, error: HostError) -> Handle {
    let handle = cx.add_object(HostValue::Error(error));
    cx.exn_store(handle);
    handle
}

/// Run the result of a host operation that may throw
///
/// A throw is stored for the module and `T::default()` (`0` for handles) is
/// returned in place of the result.
pub fn handle_error<T: Default>(cx: &mut Store, result: Result<T, HostError>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            if cx.config().trace_calls {
                console_error!("host exception caught for module: {}", error);
            }
            catch(cx, error);
            T::default()
        }
    }
}

/// Describe and release the value behind an error handle
pub fn describe_error(cx: &mut Store, handle: Handle) -> String {
    let value = cx.take_object(handle);
    debug_string(&value)
}

/// Convert a trap that escaped a module call
pub fn into_bridge_error(cx: &mut Store, trap: Trap) -> BridgeError {
    match trap {
        Trap::Exception(handle) => BridgeError::Relayed(describe_error(cx, handle)),
        Trap::Throw(error) => BridgeError::Trap(error.to_string()),
        Trap::TypeError(msg) => BridgeError::Trap(format!("TypeError: {}", msg)),
        Trap::Memory(e) => BridgeError::Memory(e),
        Trap::Marshal(e) => BridgeError::Marshal(e),
    }
}

/// Re-raise whatever the last catching capability stored, if anything
///
/// Used on the module side right after a catching call.
pub fn rethrow_pending(cx: &mut Store) -> Result<(), Trap> {
    match cx.take_exception() {
        Some(handle) => Err(Trap::Exception(handle)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::MemoryError;

    #[test]
    fn test_handle_error_parks_exception() {
        let mut cx = Store::new(BridgeConfig::default());
        let value: u32 = handle_error(&mut cx, Err(HostError::type_error("nope")));
        assert_eq!(value, 0);

        let handle = cx.take_exception().unwrap();
        assert!(matches!(cx.get_object(handle), HostValue::Error(e) if e.name == "TypeError"));
        assert_eq!(describe_error(&mut cx, handle), "TypeError: nope\n");
        assert_eq!(cx.stats().live_handles, 0);
    }

    #[test]
    fn test_handle_error_passes_values_through() {
        let mut cx = Store::new(BridgeConfig::default());
        assert_eq!(handle_error(&mut cx, Ok(7u32)), 7);
        assert!(cx.take_exception().is_none());
    }

    #[test]
    fn test_trap_conversion() {
        let mut cx = Store::new(BridgeConfig::default());
        let handle = cx.add_object(HostError::error("lost context").with_stack("at draw").into());
        assert_eq!(
            into_bridge_error(&mut cx, Trap::Exception(handle)),
            BridgeError::Relayed("Error: lost context\nat draw".to_string())
        );
        assert_eq!(cx.stats().live_handles, 0);

        assert_eq!(
            into_bridge_error(&mut cx, Trap::Throw(HostError::error("boom"))),
            BridgeError::Trap("Error: boom".to_string())
        );
        assert_eq!(
            into_bridge_error(&mut cx, Trap::Memory(MemoryError::StackOverflow)),
            BridgeError::Memory(MemoryError::StackOverflow)
        );
    }

    #[test]
    fn test_rethrow_pending() {
        let mut cx = Store::new(BridgeConfig::default());
        assert!(rethrow_pending(&mut cx).is_ok());
        let h = catch(&mut cx, HostError::error("x"));
        assert!(matches!(rethrow_pending(&mut cx), Err(Trap::Exception(raised)) if raised == h));
    }
}
