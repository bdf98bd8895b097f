use std::rc::Rc;

use fieldbridge::gl::GlCall;
use fieldbridge::{
    App, BridgeConfig, BridgeError, GuestModule, MarshalError, MemoryError, Param, RecordingContext, SharedInstance,
};

fn setup(ctx: RecordingContext) -> (SharedInstance, Rc<RecordingContext>, App) {
    let instance = GuestModule::instantiate(BridgeConfig::default());
    let ctx = Rc::new(ctx);
    let app = App::new(&instance, ctx.clone()).unwrap();
    (instance, ctx, app)
}

fn assert_no_leaks(instance: &SharedInstance) {
    let stats = instance.borrow().stats();
    assert_eq!(stats.live_handles, 0, "{:?}", stats);
    assert_eq!(stats.live_allocations, 0, "{:?}", stats);
    assert!(!stats.pending_exception);
}

#[test]
fn test_circle_session_then_release() {
    let (instance, ctx, mut app) = setup(RecordingContext::new(800, 600));
    ctx.take_calls();

    app.reset_charge("circle").unwrap();
    app.tick(0.0).unwrap();
    // the charge starts on the grid point (5, 0): no field drawn there, and no
    // magnetic field along its velocity
    assert_eq!(ctx.draw_count(), 1 + 288 + 272);
    assert_eq!(ctx.count(|c| matches!(c, GlCall::Flush)), 1);

    app.tick(16.6).unwrap();
    assert_eq!(ctx.count(|c| matches!(c, GlCall::Flush)), 2);

    let info = app.info().unwrap();
    assert!(info.starts_with("preset = circle\n"), "{}", info);
    assert!(info.contains("t = 0.017"), "{}", info);
    assert!(info.contains("charge 0: q = +1"), "{}", info);

    app.release().unwrap();
    assert!(app.is_released());
    assert_eq!(app.tick(33.3), Err(BridgeError::Released));
    assert_eq!(app.info(), Err(BridgeError::Released));
    // releasing twice is harmless
    app.release().unwrap();
    assert_no_leaks(&instance);
}

#[test]
fn test_touch_gestures_leave_nothing_behind() {
    let (instance, _ctx, mut app) = setup(RecordingContext::new(800, 600));
    let before = instance.borrow().stats();

    app.touch_start(1000.0, &[100.0, 200.0], &[300.0, 300.0]).unwrap();
    app.touch_move(1016.0, &[90.0, 210.0], &[300.0, 300.0]).unwrap();
    app.touch_end(1032.0).unwrap();
    app.tick(1040.0).unwrap();

    // argument buffers were freed by the module
    let after = instance.borrow().stats();
    assert_eq!(after.live_allocations, before.live_allocations);
    assert_eq!(after.live_handles, before.live_handles);

    app.release().unwrap();
    assert_no_leaks(&instance);
}

#[test]
fn test_touch_length_mismatch_is_rejected() {
    let (instance, _ctx, mut app) = setup(RecordingContext::new(800, 600));
    let err = app.touch_start(1000.0, &[1.0, 2.0], &[1.0]).unwrap_err();
    assert_eq!(err, BridgeError::Marshal(MarshalError::LengthMismatch { left: 2, right: 1 }));
    app.release().unwrap();
    assert_no_leaks(&instance);
}

#[test]
fn test_change_c_restart_rule() {
    let (_instance, _ctx, mut app) = setup(RecordingContext::new(800, 600));
    assert!(!app.change_c(2.0).unwrap());
    assert!(!app.change_c(2.0).unwrap());
    assert!(app.change_c(1.0).unwrap());
    assert!(app.change_c(-1.0).is_err());
}

#[test]
fn test_parameters_by_name() {
    let (instance, ctx, mut app) = setup(RecordingContext::new(800, 600));

    for pair in ["preset=dipole", "grid=3d", "electric=off", "magnetic=on", "arrow_log=2", "arrow_factor=0.5"] {
        let param: Param = pair.parse().unwrap();
        app.set_parameter(param).unwrap();
    }
    ctx.take_calls();
    app.tick(0.0).unwrap();
    // dipole charges both sit at the origin, which is a 3d grid point
    let markers = 2;
    assert!(ctx.draw_count() > markers);

    app.change_poynting_on(true).unwrap();
    app.key_down("W").unwrap();
    app.tick(16.0).unwrap();
    app.key_up("w").unwrap();
    app.window_blur().unwrap();
    app.reset_grid("hex").unwrap();
    assert!(app.info().unwrap().contains("grid = 3d (343 points)"));

    drop(app);
    assert_no_leaks(&instance);
}

#[test]
fn test_facades_share_one_instance() {
    let instance = GuestModule::instantiate(BridgeConfig::default());
    let left = Rc::new(RecordingContext::new(400, 300));
    let right = Rc::new(RecordingContext::new(640, 480));
    let mut a = App::new(&instance, left.clone()).unwrap();
    let mut b = App::new(&instance, right.clone()).unwrap();

    a.tick(0.0).unwrap();
    b.tick(0.0).unwrap();
    a.release().unwrap();
    b.reset_charge("random").unwrap();
    b.tick(16.0).unwrap();
    assert!(b.info().unwrap().contains("charge 9:"));
    assert!(right.draw_count() > left.draw_count());

    b.release().unwrap();
    assert_no_leaks(&instance);
}

#[test]
fn test_strings_survive_memory_growth() {
    let config = BridgeConfig {
        initial_pages: 2,
        ..BridgeConfig::default()
    };
    let instance = GuestModule::instantiate(config);
    let ctx = Rc::new(RecordingContext::new(800, 600));
    let mut app = App::new(&instance, ctx).unwrap();
    let generation = instance.borrow().stats().memory_generation;

    let long_key = "ключ".repeat(20_000);
    app.key_down(&long_key).unwrap();
    app.tick(0.0).unwrap();
    assert!(instance.borrow().stats().memory_generation > generation);
    assert!(app.info().unwrap().starts_with("preset = static"));

    app.release().unwrap();
    assert_no_leaks(&instance);
}

#[test]
fn test_two_fingers_then_one() {
    let (instance, _ctx, mut app) = setup(RecordingContext::new(800, 600));
    app.tick(0.0).unwrap();
    let before = instance.borrow().stats();

    app.touch_start(1000.0, &[10.0, 20.0], &[30.0, 40.0]).unwrap();
    app.touch_move(1016.0, &[12.0], &[22.0]).unwrap();
    app.tick(1020.0).unwrap();
    // lifting a finger is not a drag: the player has not turned
    let info = app.info().unwrap();
    assert!(info.contains("player yaw = 0.000\n"), "{}", info);

    app.touch_end(1032.0).unwrap();
    let after = instance.borrow().stats();
    assert_eq!(after.live_handles, before.live_handles);
    assert_eq!(after.live_allocations, before.live_allocations);

    app.release().unwrap();
    assert_no_leaks(&instance);
}

#[test]
fn test_one_context_outlives_its_facades() {
    let instance = GuestModule::instantiate(BridgeConfig::default());
    let ctx = Rc::new(RecordingContext::new(800, 600));

    for _ in 0..2 {
        let mut app = App::new(&instance, ctx.clone()).unwrap();
        app.tick(0.0).unwrap();
        app.release().unwrap();
    }
    let mut a = App::new(&instance, ctx.clone()).unwrap();
    let mut b = App::new(&instance, ctx.clone()).unwrap();
    a.tick(0.0).unwrap();
    b.tick(0.0).unwrap();
    assert!(ctx.live_objects() > 0);
    a.release().unwrap();
    b.release().unwrap();

    assert_eq!(ctx.live_objects(), 0);
    assert_no_leaks(&instance);
}

#[test]
fn test_no_stack_left_for_construction() {
    let instance = GuestModule::instantiate(BridgeConfig::default());
    let top = {
        let mut inst = instance.borrow_mut();
        let top = inst.store_mut().add_to_stack_pointer(0).unwrap();
        inst.store_mut().add_to_stack_pointer(-(top as i32)).unwrap();
        top
    };
    let ctx = Rc::new(RecordingContext::new(800, 600));

    let err = App::new(&instance, ctx.clone()).unwrap_err();
    assert_eq!(err, BridgeError::Memory(MemoryError::StackOverflow));
    // the context was never handed to the module
    assert_eq!(Rc::strong_count(&ctx), 1);
    assert_no_leaks(&instance);

    instance.borrow_mut().store_mut().add_to_stack_pointer(top as i32).unwrap();
    let mut app = App::new(&instance, ctx.clone()).unwrap();
    app.release().unwrap();
    assert_no_leaks(&instance);
}

#[test]
fn test_call_log_drained_each_frame() {
    let (instance, ctx, mut app) = setup(RecordingContext::new(800, 600));
    ctx.take_calls();

    let mut per_frame = Vec::new();
    for frame in 0..120 {
        app.tick(frame as f64 * 1000.0 / 60.0).unwrap();
        per_frame.push(ctx.take_calls().len());
    }
    // nothing moves in the static preset, so every frame issues the same calls
    assert!(per_frame[1] > 0);
    assert!(per_frame[1..].iter().all(|&n| n == per_frame[1]), "{:?}", per_frame);
    assert!(ctx.calls().is_empty());

    app.release().unwrap();
    assert_no_leaks(&instance);
}
