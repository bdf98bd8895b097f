//! Headless graphics context
//!
//! Keeps just enough WebGL object state (shader sources, link status,
//! attribute and uniform names) to answer the queries a module makes during
//! setup, and records every state-changing call for inspection.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use super::*;
use crate::value::{HostError, HostValue};

/// One recorded state-changing call
#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    Flush,
    Enable(u32),
    Clear(u32),
    ClearColor([f32; 4]),
    BindBuffer { target: u32, buffer: Option<GlBuffer> },
    BufferData { target: u32, bytes: usize, usage: u32 },
    ShaderSource { shader: GlShader, len: usize },
    CompileShader(GlShader),
    DeleteShader(Option<GlShader>),
    AttachShader { program: GlProgram, shader: GlShader },
    DetachShader { program: GlProgram, shader: GlShader },
    LinkProgram(GlProgram),
    UseProgram(Option<GlProgram>),
    EnableVertexAttribArray(u32),
    VertexAttribPointer { index: u32, size: i32, ty: u32, normalized: bool, stride: i32, offset: i32 },
    Uniform4fv { location: Option<GlUniformLocation>, data: Vec<f32> },
    UniformMatrix3fv { location: Option<GlUniformLocation>, data: Vec<f32> },
    UniformMatrix4fv { location: Option<GlUniformLocation>, data: Vec<f32> },
    DrawElements { mode: u32, count: i32, ty: u32, offset: i32 },
}

struct ShaderState {
    source: String,
    compiled: bool,
}

#[derive(Default)]
struct ProgramState {
    shaders: Vec<GlShader>,
    linked: bool,
    attribs: Vec<String>,
}

struct RecorderState {
    next_id: u32,
    calls: Vec<GlCall>,
    viewport: [i32; 4],
    extensions: Vec<String>,
    failing_extensions: Vec<String>,
    fail_compile: bool,
    fail_link: bool,
    lost: bool,
    viewport_reply: Option<HostValue>,
    buffers: HashSet<GlBuffer>,
    shaders: HashMap<GlShader, ShaderState>,
    programs: HashMap<GlProgram, ProgramState>,
    locations: HashSet<GlUniformLocation>,
}

impl RecorderState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// A `GraphicsContext` that draws nothing and remembers everything
pub struct RecordingContext {
    state: RefCell<RecorderState>,
}

impl RecordingContext {
    pub fn new(width: i32, height: i32) -> Self {
        RecordingContext {
            state: RefCell::new(RecorderState {
                next_id: 0,
                calls: Vec::new(),
                viewport: [0, 0, width, height],
                extensions: Vec::new(),
                failing_extensions: Vec::new(),
                fail_compile: false,
                fail_link: false,
                lost: false,
                viewport_reply: None,
                buffers: HashSet::new(),
                shaders: HashMap::new(),
                programs: HashMap::new(),
                locations: HashSet::new(),
            }),
        }
    }

    /// Advertise `names` from `getSupportedExtensions`/`getExtension`
    pub fn with_extensions(self, names: &[&str]) -> Self {
        self.state.borrow_mut().extensions = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Make `getExtension(name)` throw
    pub fn failing_extension(self, name: &str) -> Self {
        self.state.borrow_mut().failing_extensions.push(name.to_string());
        self
    }

    /// Every shader compile reports failure
    pub fn failing_compile(self) -> Self {
        self.state.borrow_mut().fail_compile = true;
        self
    }

    /// Every program link reports failure
    pub fn failing_link(self) -> Self {
        self.state.borrow_mut().fail_link = true;
        self
    }

    /// Simulate a lost context: parameter queries start throwing
    pub fn lose_context(&self) {
        self.state.borrow_mut().lost = true;
    }

    /// Answer `getParameter(VIEWPORT)` with `value` instead of the viewport; `None` restores it
    pub fn set_viewport_reply(&self, value: Option<HostValue>) {
        self.state.borrow_mut().viewport_reply = value;
    }

    pub fn set_viewport(&self, width: i32, height: i32) {
        self.state.borrow_mut().viewport = [0, 0, width, height];
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.state.borrow().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<GlCall> {
        std::mem::take(&mut self.state.borrow_mut().calls)
    }

    pub fn draw_count(&self) -> usize {
        self.count(|c| matches!(c, GlCall::DrawElements { .. }))
    }

    pub fn count(&self, pred: impl Fn(&GlCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    /// Shaders created and not yet deleted
    pub fn live_shaders(&self) -> usize {
        self.state.borrow().shaders.len()
    }

    /// Buffers, shaders, programs and uniform locations some handle still refers to
    pub fn live_objects(&self) -> usize {
        let state = self.state.borrow();
        state.buffers.len() + state.shaders.len() + state.programs.len() + state.locations.len()
    }

    fn record(&self, call: GlCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl GraphicsContext for RecordingContext {
    fn flush(&self) {
        self.record(GlCall::Flush);
    }

    fn enable(&self, cap: u32) {
        self.record(GlCall::Enable(cap));
    }

    fn clear(&self, mask: u32) {
        self.record(GlCall::Clear(mask));
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.record(GlCall::ClearColor([r, g, b, a]));
    }

    fn create_buffer(&self) -> Option<GlBuffer> {
        let mut state = self.state.borrow_mut();
        let buffer = GlBuffer(state.next_id());
        state.buffers.insert(buffer);
        Some(buffer)
    }

    fn bind_buffer(&self, target: u32, buffer: Option<GlBuffer>) {
        self.record(GlCall::BindBuffer { target, buffer });
    }

    fn buffer_data(&self, target: u32, data: &[u8], usage: u32) {
        self.record(GlCall::BufferData { target, bytes: data.len(), usage });
    }

    fn create_shader(&self, kind: u32) -> Option<GlShader> {
        if kind != VERTEX_SHADER && kind != FRAGMENT_SHADER {
            return None;
        }
        let mut state = self.state.borrow_mut();
        let shader = GlShader(state.next_id());
        state.shaders.insert(shader, ShaderState { source: String::new(), compiled: false });
        Some(shader)
    }

    fn shader_source(&self, shader: GlShader, source: &str) {
        if let Some(s) = self.state.borrow_mut().shaders.get_mut(&shader) {
            s.source = source.to_string();
        }
        self.record(GlCall::ShaderSource { shader, len: source.len() });
    }

    fn compile_shader(&self, shader: GlShader) {
        {
            let mut state = self.state.borrow_mut();
            let fail = state.fail_compile;
            if let Some(s) = state.shaders.get_mut(&shader) {
                s.compiled = !fail && !s.source.trim().is_empty();
            }
        }
        self.record(GlCall::CompileShader(shader));
    }

    fn get_shader_parameter(&self, shader: GlShader, pname: u32) -> HostValue {
        let state = self.state.borrow();
        match (state.shaders.get(&shader), pname) {
            (Some(s), COMPILE_STATUS) => HostValue::Bool(s.compiled),
            _ => HostValue::Null,
        }
    }

    fn get_shader_info_log(&self, shader: GlShader) -> Option<String> {
        let state = self.state.borrow();
        let s = state.shaders.get(&shader)?;
        if s.compiled {
            Some(String::new())
        } else {
            Some("ERROR: 0:1: shader failed to compile".to_string())
        }
    }

    fn delete_shader(&self, shader: Option<GlShader>) {
        if let Some(shader) = shader {
            self.state.borrow_mut().shaders.remove(&shader);
        }
        self.record(GlCall::DeleteShader(shader));
    }

    fn create_program(&self) -> Option<GlProgram> {
        let mut state = self.state.borrow_mut();
        let program = GlProgram(state.next_id());
        state.programs.insert(program, ProgramState::default());
        Some(program)
    }

    fn attach_shader(&self, program: GlProgram, shader: GlShader) {
        if let Some(p) = self.state.borrow_mut().programs.get_mut(&program) {
            p.shaders.push(shader);
        }
        self.record(GlCall::AttachShader { program, shader });
    }

    fn detach_shader(&self, program: GlProgram, shader: GlShader) {
        if let Some(p) = self.state.borrow_mut().programs.get_mut(&program) {
            p.shaders.retain(|&s| s != shader);
        }
        self.record(GlCall::DetachShader { program, shader });
    }

    fn link_program(&self, program: GlProgram) {
        {
            let mut state = self.state.borrow_mut();
            let fail = state.fail_link;
            let attached: Vec<GlShader> = match state.programs.get(&program) {
                Some(p) => p.shaders.clone(),
                None => Vec::new(),
            };
            let all_compiled = attached.len() == 2
                && attached
                    .iter()
                    .all(|s| state.shaders.get(s).map_or(false, |s| s.compiled));
            if let Some(p) = state.programs.get_mut(&program) {
                p.linked = !fail && all_compiled;
            }
        }
        self.record(GlCall::LinkProgram(program));
    }

    fn get_program_parameter(&self, program: GlProgram, pname: u32) -> HostValue {
        let state = self.state.borrow();
        match (state.programs.get(&program), pname) {
            (Some(p), LINK_STATUS) => HostValue::Bool(p.linked),
            _ => HostValue::Null,
        }
    }

    fn get_program_info_log(&self, program: GlProgram) -> Option<String> {
        let state = self.state.borrow();
        let p = state.programs.get(&program)?;
        if p.linked {
            Some(String::new())
        } else {
            Some("ERROR: program failed to link".to_string())
        }
    }

    fn use_program(&self, program: Option<GlProgram>) {
        self.record(GlCall::UseProgram(program));
    }

    fn get_attrib_location(&self, program: GlProgram, name: &str) -> i32 {
        let mut state = self.state.borrow_mut();
        let p = match state.programs.get_mut(&program) {
            Some(p) if p.linked => p,
            _ => return -1,
        };
        match p.attribs.iter().position(|a| a == name) {
            Some(idx) => idx as i32,
            None => {
                p.attribs.push(name.to_string());
                (p.attribs.len() - 1) as i32
            }
        }
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        self.record(GlCall::EnableVertexAttribArray(index));
    }

    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        self.record(GlCall::VertexAttribPointer { index, size, ty, normalized, stride, offset });
    }

    fn get_uniform_location(&self, program: GlProgram, _name: &str) -> Option<GlUniformLocation> {
        let mut state = self.state.borrow_mut();
        let linked = state.programs.get(&program).map_or(false, |p| p.linked);
        if !linked {
            return None;
        }
        // a new location object per lookup, as WebGL does
        let loc = GlUniformLocation(state.next_id());
        state.locations.insert(loc);
        Some(loc)
    }

    fn uniform4fv(&self, location: Option<GlUniformLocation>, data: &[f32]) {
        self.record(GlCall::Uniform4fv { location, data: data.to_vec() });
    }

    fn uniform_matrix3fv(&self, location: Option<GlUniformLocation>, _transpose: bool, data: &[f32]) {
        self.record(GlCall::UniformMatrix3fv { location, data: data.to_vec() });
    }

    fn uniform_matrix4fv(&self, location: Option<GlUniformLocation>, _transpose: bool, data: &[f32]) {
        self.record(GlCall::UniformMatrix4fv { location, data: data.to_vec() });
    }

    fn draw_elements(&self, mode: u32, count: i32, ty: u32, offset: i32) {
        self.record(GlCall::DrawElements { mode, count, ty, offset });
    }

    fn get_parameter(&self, pname: u32) -> Result<HostValue, HostError> {
        if self.state.borrow().lost {
            return Err(HostError::error("WebGL context lost").with_stack("at RecordingContext.getParameter"));
        }
        let state = self.state.borrow();
        match pname {
            VIEWPORT => Ok(state
                .viewport_reply
                .clone()
                .unwrap_or_else(|| HostValue::Int32Array(state.viewport.to_vec()))),
            MAX_TEXTURE_SIZE => Ok(HostValue::Number(4096.0)),
            VERSION => Ok(HostValue::String("WebGL 2.0 (headless)".to_string())),
            RENDERER => Ok(HostValue::String("fieldbridge recording context".to_string())),
            other => Err(HostError::type_error(format!(
                "getParameter: invalid parameter name 0x{:04x}",
                other
            ))
            .with_stack("at RecordingContext.getParameter")),
        }
    }

    fn get_extension(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        let state = self.state.borrow();
        if state.failing_extensions.iter().any(|n| n == name) {
            return Err(HostError::error(format!("getExtension: {} is unavailable", name))
                .with_stack("at RecordingContext.getExtension"));
        }
        if state.extensions.iter().any(|n| n == name) {
            Ok(Some(HostValue::Extension(name.to_string())))
        } else {
            Ok(None)
        }
    }

    fn get_supported_extensions(&self) -> Option<Vec<String>> {
        Some(self.state.borrow().extensions.clone())
    }

    fn forget(&self, object: GlObject) {
        let mut state = self.state.borrow_mut();
        match object {
            GlObject::Buffer(b) => {
                state.buffers.remove(&b);
            }
            GlObject::Program(p) => {
                state.programs.remove(&p);
            }
            GlObject::Shader(s) => {
                state.shaders.remove(&s);
            }
            GlObject::UniformLocation(l) => {
                state.locations.remove(&l);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked_program(ctx: &RecordingContext) -> GlProgram {
        let vs = ctx.create_shader(VERTEX_SHADER).unwrap();
        let fs = ctx.create_shader(FRAGMENT_SHADER).unwrap();
        ctx.shader_source(vs, "void main() {}");
        ctx.shader_source(fs, "void main() {}");
        ctx.compile_shader(vs);
        ctx.compile_shader(fs);
        let program = ctx.create_program().unwrap();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.link_program(program);
        program
    }

    #[test]
    fn test_link_and_locations() {
        let ctx = RecordingContext::new(800, 600);
        let program = linked_program(&ctx);
        assert!(matches!(ctx.get_program_parameter(program, LINK_STATUS), HostValue::Bool(true)));

        assert_eq!(ctx.get_attrib_location(program, "position"), 0);
        assert_eq!(ctx.get_attrib_location(program, "normal"), 1);
        assert_eq!(ctx.get_attrib_location(program, "position"), 0);

        let a = ctx.get_uniform_location(program, "color");
        let b = ctx.get_uniform_location(program, "color");
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn test_forget_removes_objects() {
        let ctx = RecordingContext::new(1, 1);
        let program = linked_program(&ctx);
        let buffer = ctx.create_buffer().unwrap();
        let location = ctx.get_uniform_location(program, "color").unwrap();
        // two shaders, a program, a buffer and a location
        assert_eq!(ctx.live_objects(), 5);

        ctx.forget(GlObject::UniformLocation(location));
        ctx.forget(GlObject::Buffer(buffer));
        ctx.forget(GlObject::Program(program));
        assert_eq!(ctx.live_objects(), 2);
        assert!(matches!(ctx.get_program_parameter(program, LINK_STATUS), HostValue::Null));
    }

    #[test]
    fn test_viewport_reply_override() {
        let ctx = RecordingContext::new(640, 480);
        ctx.set_viewport_reply(Some(HostValue::Null));
        assert!(matches!(ctx.get_parameter(VIEWPORT).unwrap(), HostValue::Null));
        ctx.set_viewport_reply(None);
        assert!(matches!(ctx.get_parameter(VIEWPORT).unwrap(), HostValue::Int32Array(v) if v == [0, 0, 640, 480]));
    }

    #[test]
    fn test_compile_failure_injection() {
        let ctx = RecordingContext::new(1, 1).failing_compile();
        let program = linked_program(&ctx);
        assert!(matches!(ctx.get_program_parameter(program, LINK_STATUS), HostValue::Bool(false)));
        assert_eq!(ctx.get_attrib_location(program, "position"), -1);
        assert!(ctx.get_uniform_location(program, "color").is_none());
    }

    #[test]
    fn test_viewport_and_invalid_parameter() {
        let ctx = RecordingContext::new(640, 480);
        match ctx.get_parameter(VIEWPORT).unwrap() {
            HostValue::Int32Array(v) => assert_eq!(v, vec![0, 0, 640, 480]),
            other => panic!("unexpected {:?}", other),
        }
        let err = ctx.get_parameter(0xdead).unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[test]
    fn test_extensions() {
        let ctx = RecordingContext::new(1, 1)
            .with_extensions(&["EXT_color_buffer_float"])
            .failing_extension("WEBGL_lose_context");
        assert!(ctx.get_extension("EXT_color_buffer_float").unwrap().is_some());
        assert!(ctx.get_extension("OES_texture_float_linear").unwrap().is_none());
        assert!(ctx.get_extension("WEBGL_lose_context").is_err());
        assert_eq!(ctx.get_supported_extensions().unwrap().len(), 1);
    }

    #[test]
    fn test_records_draw_calls() {
        let ctx = RecordingContext::new(1, 1);
        ctx.clear(COLOR_BUFFER_BIT);
        ctx.draw_elements(TRIANGLES, 36, UNSIGNED_INT, 0);
        ctx.flush();
        assert_eq!(ctx.draw_count(), 1);
        assert_eq!(ctx.take_calls().len(), 3);
        assert!(ctx.calls().is_empty());
    }
}
