//! Browser graphics context
//!
//! Maps the opaque ids handed to the module onto real `web_sys` objects. An
//! entry lives until no handle refers to its id.

use std::cell::RefCell;
use std::collections::HashMap;

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    WebGl2RenderingContext, WebGlBuffer, WebGlProgram, WebGlShader, WebGlUniformLocation,
};

use super::*;
use crate::value::{HostError, HostValue};

struct Objects {
    next_id: u32,
    buffers: HashMap<u32, WebGlBuffer>,
    shaders: HashMap<u32, WebGlShader>,
    programs: HashMap<u32, WebGlProgram>,
    uniforms: HashMap<u32, WebGlUniformLocation>,
}

impl Objects {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct WebGlHost {
    gl: WebGl2RenderingContext,
    objects: RefCell<Objects>,
}

fn js_error(value: JsValue) -> HostError {
    match value.dyn_into::<js_sys::Error>() {
        Ok(err) => HostError::new(
            &String::from(err.name()),
            String::from(err.message()),
        ),
        Err(other) => HostError::error(format!("{:?}", other)),
    }
}

impl WebGlHost {
    /// Registry entries still referenced from the module
    pub fn live_objects(&self) -> usize {
        let objects = self.objects.borrow();
        objects.buffers.len() + objects.shaders.len() + objects.programs.len() + objects.uniforms.len()
    }

    pub fn new(gl: WebGl2RenderingContext) -> Self {
        WebGlHost {
            gl,
            objects: RefCell::new(Objects {
                next_id: 0,
                buffers: HashMap::new(),
                shaders: HashMap::new(),
                programs: HashMap::new(),
                uniforms: HashMap::new(),
            }),
        }
    }

    fn buffer(&self, id: Option<GlBuffer>) -> Option<WebGlBuffer> {
        id.and_then(|b| self.objects.borrow().buffers.get(&b.0).cloned())
    }

    fn shader(&self, id: GlShader) -> Option<WebGlShader> {
        self.objects.borrow().shaders.get(&id.0).cloned()
    }

    fn program(&self, id: GlProgram) -> Option<WebGlProgram> {
        self.objects.borrow().programs.get(&id.0).cloned()
    }

    fn uniform(&self, id: Option<GlUniformLocation>) -> Option<WebGlUniformLocation> {
        id.and_then(|u| self.objects.borrow().uniforms.get(&u.0).cloned())
    }
}

fn to_host_value(value: JsValue) -> HostValue {
    if value.is_undefined() {
        HostValue::Undefined
    } else if value.is_null() {
        HostValue::Null
    } else if let Some(b) = value.as_bool() {
        HostValue::Bool(b)
    } else if let Some(n) = value.as_f64() {
        HostValue::Number(n)
    } else if let Some(s) = value.as_string() {
        HostValue::String(s)
    } else if let Some(array) = value.dyn_ref::<js_sys::Int32Array>() {
        HostValue::Int32Array(array.to_vec())
    } else {
        HostValue::Object(serde_wasm_bindgen::from_value(value).unwrap_or(serde_json::Value::Null))
    }
}

impl GraphicsContext for WebGlHost {
    fn flush(&self) {
        self.gl.flush();
    }

    fn enable(&self, cap: u32) {
        self.gl.enable(cap);
    }

    fn clear(&self, mask: u32) {
        self.gl.clear(mask);
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.gl.clear_color(r, g, b, a);
    }

    fn create_buffer(&self) -> Option<GlBuffer> {
        let buffer = self.gl.create_buffer()?;
        let mut objects = self.objects.borrow_mut();
        let id = objects.next_id();
        objects.buffers.insert(id, buffer);
        Some(GlBuffer(id))
    }

    fn bind_buffer(&self, target: u32, buffer: Option<GlBuffer>) {
        self.gl.bind_buffer(target, self.buffer(buffer).as_ref());
    }

    fn buffer_data(&self, target: u32, data: &[u8], usage: u32) {
        self.gl.buffer_data_with_u8_array(target, data, usage);
    }

    fn create_shader(&self, kind: u32) -> Option<GlShader> {
        let shader = self.gl.create_shader(kind)?;
        let mut objects = self.objects.borrow_mut();
        let id = objects.next_id();
        objects.shaders.insert(id, shader);
        Some(GlShader(id))
    }

    fn shader_source(&self, shader: GlShader, source: &str) {
        if let Some(s) = self.shader(shader) {
            self.gl.shader_source(&s, source);
        }
    }

    fn compile_shader(&self, shader: GlShader) {
        if let Some(s) = self.shader(shader) {
            self.gl.compile_shader(&s);
        }
    }

    fn get_shader_parameter(&self, shader: GlShader, pname: u32) -> HostValue {
        match self.shader(shader) {
            Some(s) => to_host_value(self.gl.get_shader_parameter(&s, pname)),
            None => HostValue::Null,
        }
    }

    fn get_shader_info_log(&self, shader: GlShader) -> Option<String> {
        self.gl.get_shader_info_log(&self.shader(shader)?)
    }

    fn delete_shader(&self, shader: Option<GlShader>) {
        let s = shader.and_then(|id| self.shader(id));
        self.gl.delete_shader(s.as_ref());
    }

    fn create_program(&self) -> Option<GlProgram> {
        let program = self.gl.create_program()?;
        let mut objects = self.objects.borrow_mut();
        let id = objects.next_id();
        objects.programs.insert(id, program);
        Some(GlProgram(id))
    }

    fn attach_shader(&self, program: GlProgram, shader: GlShader) {
        if let (Some(p), Some(s)) = (self.program(program), self.shader(shader)) {
            self.gl.attach_shader(&p, &s);
        }
    }

    fn detach_shader(&self, program: GlProgram, shader: GlShader) {
        if let (Some(p), Some(s)) = (self.program(program), self.shader(shader)) {
            self.gl.detach_shader(&p, &s);
        }
    }

    fn link_program(&self, program: GlProgram) {
        if let Some(p) = self.program(program) {
            self.gl.link_program(&p);
        }
    }

    fn get_program_parameter(&self, program: GlProgram, pname: u32) -> HostValue {
        match self.program(program) {
            Some(p) => to_host_value(self.gl.get_program_parameter(&p, pname)),
            None => HostValue::Null,
        }
    }

    fn get_program_info_log(&self, program: GlProgram) -> Option<String> {
        self.gl.get_program_info_log(&self.program(program)?)
    }

    fn use_program(&self, program: Option<GlProgram>) {
        let p = program.and_then(|id| self.program(id));
        self.gl.use_program(p.as_ref());
    }

    fn get_attrib_location(&self, program: GlProgram, name: &str) -> i32 {
        match self.program(program) {
            Some(p) => self.gl.get_attrib_location(&p, name),
            None => -1,
        }
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        self.gl.enable_vertex_attrib_array(index);
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
        self.gl
            .vertex_attrib_pointer_with_i32(index, size, ty, normalized, stride, offset);
    }

    fn get_uniform_location(&self, program: GlProgram, name: &str) -> Option<GlUniformLocation> {
        let location = self.gl.get_uniform_location(&self.program(program)?, name)?;
        let mut objects = self.objects.borrow_mut();
        let id = objects.next_id();
        objects.uniforms.insert(id, location);
        Some(GlUniformLocation(id))
    }

    fn uniform4fv(&self, location: Option<GlUniformLocation>, data: &[f32]) {
        self.gl
            .uniform4fv_with_f32_array(self.uniform(location).as_ref(), data);
    }

    fn uniform_matrix3fv(&self, location: Option<GlUniformLocation>, transpose: bool, data: &[f32]) {
        self.gl
            .uniform_matrix3fv_with_f32_array(self.uniform(location).as_ref(), transpose, data);
    }

    fn uniform_matrix4fv(&self, location: Option<GlUniformLocation>, transpose: bool, data: &[f32]) {
        self.gl
            .uniform_matrix4fv_with_f32_array(self.uniform(location).as_ref(), transpose, data);
    }

    fn draw_elements(&self, mode: u32, count: i32, ty: u32, offset: i32) {
        self.gl.draw_elements_with_i32(mode, count, ty, offset);
    }

    fn get_parameter(&self, pname: u32) -> Result<HostValue, HostError> {
        self.gl.get_parameter(pname).map(to_host_value).map_err(js_error)
    }

    fn get_extension(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        let ext = self.gl.get_extension(name).map_err(js_error)?;
        Ok(ext.map(|_| HostValue::Extension(name.to_string())))
    }

    fn get_supported_extensions(&self) -> Option<Vec<String>> {
        let list = self.gl.get_supported_extensions()?;
        Some(list.iter().filter_map(|v| v.as_string()).collect())
    }

    fn forget(&self, object: GlObject) {
        let mut objects = self.objects.borrow_mut();
        match object {
            GlObject::Buffer(b) => {
                objects.buffers.remove(&b.0);
            }
            GlObject::Program(p) => {
                objects.programs.remove(&p.0);
            }
            GlObject::Shader(s) => {
                objects.shaders.remove(&s.0);
            }
            GlObject::UniformLocation(l) => {
                objects.uniforms.remove(&l.0);
            }
        }
    }
}
