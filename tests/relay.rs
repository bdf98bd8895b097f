use std::rc::Rc;

use fieldbridge::gl::GlCall;
use fieldbridge::value::MemoryWindow;
use fieldbridge::{App, BridgeConfig, BridgeError, GuestModule, HostValue, RecordingContext, SharedInstance};

fn construct(ctx: RecordingContext) -> (SharedInstance, Rc<RecordingContext>, Result<App, BridgeError>) {
    let instance = GuestModule::instantiate(BridgeConfig::default());
    let ctx = Rc::new(ctx);
    let app = App::new(&instance, ctx.clone());
    (instance, ctx, app)
}

fn assert_clean(instance: &SharedInstance) {
    let stats = instance.borrow().stats();
    assert_eq!(stats.live_handles, 0, "{:?}", stats);
    assert_eq!(stats.live_allocations, 0, "{:?}", stats);
    assert!(!stats.pending_exception, "{:?}", stats);
}

#[test]
fn test_shader_compile_failure_is_a_construction_error() {
    let (instance, ctx, app) = construct(RecordingContext::new(800, 600).failing_compile());
    match app {
        Err(BridgeError::Construction(msg)) => assert!(msg.contains("shader failed to compile"), "{}", msg),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ctx.live_shaders(), 0);
    assert_clean(&instance);
}

#[test]
fn test_link_failure_is_a_construction_error() {
    let (instance, ctx, app) = construct(RecordingContext::new(800, 600).failing_link());
    match app {
        Err(BridgeError::Construction(msg)) => assert!(msg.contains("program failed to link"), "{}", msg),
        other => panic!("unexpected {:?}", other),
    }
    // shaders are deleted even though the link failed
    assert_eq!(ctx.live_shaders(), 0);
    assert_eq!(ctx.count(|c| matches!(c, GlCall::DetachShader { .. })), 2);
    assert_clean(&instance);
}

#[test]
fn test_throwing_extension_query_is_relayed() {
    let ctx = RecordingContext::new(800, 600).failing_extension("EXT_color_buffer_float");
    let (instance, _ctx, app) = construct(ctx);
    match app {
        Err(BridgeError::Construction(msg)) => {
            assert!(msg.starts_with("Error: getExtension: EXT_color_buffer_float is unavailable"), "{}", msg);
            assert!(msg.contains("at RecordingContext.getExtension"), "{}", msg);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_clean(&instance);
}

#[test]
fn test_missing_extension_is_not_an_error() {
    let (instance, _ctx, app) = construct(RecordingContext::new(800, 600));
    let mut app = app.unwrap();
    app.tick(0.0).unwrap();
    app.release().unwrap();
    assert_clean(&instance);
}

#[test]
fn test_lost_context_surfaces_from_tick() {
    let ctx = RecordingContext::new(800, 600).with_extensions(&["EXT_color_buffer_float"]);
    let (instance, ctx, app) = construct(ctx);
    let mut app = app.unwrap();
    app.tick(0.0).unwrap();

    ctx.lose_context();
    let draws = ctx.draw_count();
    match app.tick(16.0) {
        Err(BridgeError::Relayed(msg)) => assert_eq!(msg, "Error: WebGL context lost\nat RecordingContext.getParameter"),
        other => panic!("unexpected {:?}", other),
    }
    // nothing was drawn for the failed frame
    assert_eq!(ctx.draw_count(), draws);
    // the app itself is still usable
    assert!(app.info().is_ok());

    app.release().unwrap();
    assert_clean(&instance);
}

#[test]
fn test_module_throw_for_unknown_preset() {
    let (instance, _ctx, app) = construct(RecordingContext::new(800, 600));
    let mut app = app.unwrap();
    let before = instance.borrow().stats();

    let err = app.reset_charge("pendulum").unwrap_err();
    assert_eq!(err, BridgeError::Trap("Error: unknown charge preset: pendulum".to_string()));
    assert_eq!(err.to_string(), "module trapped: Error: unknown charge preset: pendulum");

    // the argument string and the message were both freed
    assert_eq!(instance.borrow().stats().live_allocations, before.live_allocations);
    app.release().unwrap();
    assert_clean(&instance);
}

/// An `Int32Array` over a buffer that has since been detached
fn detached_viewport() -> HostValue {
    HostValue::Int32View(MemoryWindow { generation: u64::MAX, byte_offset: 0, len: 4 })
}

#[test]
fn test_unreadable_viewport_fails_construction_cleanly() {
    let ctx = RecordingContext::new(800, 600);
    ctx.set_viewport_reply(Some(detached_viewport()));
    let (instance, ctx, app) = construct(ctx);
    match app {
        Err(BridgeError::Construction(msg)) => assert!(msg.contains("detached"), "{}", msg),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ctx.live_objects(), 0);
    assert_clean(&instance);
}

#[test]
fn test_unreadable_viewport_fails_tick_cleanly() {
    let (instance, ctx, app) = construct(RecordingContext::new(800, 600));
    let mut app = app.unwrap();
    app.tick(0.0).unwrap();
    let before = instance.borrow().stats();

    ctx.set_viewport_reply(Some(detached_viewport()));
    let err = app.tick(16.0).unwrap_err();
    assert_eq!(err, BridgeError::Trap("TypeError: typed array over a detached ArrayBuffer".to_string()));
    let after = instance.borrow().stats();
    assert_eq!(after.live_handles, before.live_handles);
    assert_eq!(after.live_allocations, before.live_allocations);

    // a readable viewport again, and the app carries on
    ctx.set_viewport_reply(None);
    app.tick(32.0).unwrap();
    app.release().unwrap();
    assert_clean(&instance);
}
