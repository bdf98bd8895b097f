//! Graphics capability the host lends to the module
//!
//! `GraphicsContext` is the WebGL2 subset the module is allowed to reach.
//! Objects it creates are opaque ids; the module only ever sees handles to them.

pub mod recording;
#[cfg(target_arch = "wasm32")]
pub mod webgl;

pub use recording::{GlCall, RecordingContext};

use std::fmt;
use std::rc::{Rc, Weak};

use crate::value::{HostError, HostValue};

// Enums used by the module (WebGL2 constant values)
pub const DEPTH_BUFFER_BIT: u32 = 0x0100;
pub const COLOR_BUFFER_BIT: u32 = 0x4000;
pub const TRIANGLES: u32 = 0x0004;
pub const DEPTH_TEST: u32 = 0x0B71;
pub const VIEWPORT: u32 = 0x0BA2;
pub const MAX_TEXTURE_SIZE: u32 = 0x0D33;
pub const RENDERER: u32 = 0x1F01;
pub const VERSION: u32 = 0x1F02;
pub const UNSIGNED_SHORT: u32 = 0x1403;
pub const UNSIGNED_INT: u32 = 0x1405;
pub const FLOAT: u32 = 0x1406;
pub const ARRAY_BUFFER: u32 = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: u32 = 0x8893;
pub const STATIC_DRAW: u32 = 0x88E4;
pub const FRAGMENT_SHADER: u32 = 0x8B30;
pub const VERTEX_SHADER: u32 = 0x8B31;
pub const COMPILE_STATUS: u32 = 0x8B81;
pub const LINK_STATUS: u32 = 0x8B82;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlBuffer(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlProgram(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlShader(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlUniformLocation(pub u32);

/// Any object a context can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlObject {
    Buffer(GlBuffer),
    Program(GlProgram),
    Shader(GlShader),
    UniformLocation(GlUniformLocation),
}

impl GlObject {
    pub fn type_name(self) -> &'static str {
        match self {
            GlObject::Buffer(_) => "WebGLBuffer",
            GlObject::Program(_) => "WebGLProgram",
            GlObject::Shader(_) => "WebGLShader",
            GlObject::UniformLocation(_) => "WebGLUniformLocation",
        }
    }
}

struct Registration {
    object: GlObject,
    owner: Weak<dyn GraphicsContext>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.forget(self.object);
        }
    }
}

/// A context object as the handle table holds it
///
/// Clones share one registration. When the last clone goes, the owning
/// context is told to forget the object.
#[derive(Clone)]
pub struct GlRef(Rc<Registration>);

impl GlRef {
    pub fn new(owner: &Rc<dyn GraphicsContext>, object: GlObject) -> Self {
        GlRef(Rc::new(Registration { object, owner: Rc::downgrade(owner) }))
    }

    pub fn object(&self) -> GlObject {
        self.0.object
    }
}

impl fmt::Debug for GlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.object.fmt(f)
    }
}

/// The WebGL2 operations reachable through the capability surface
///
/// Methods take `&self`: a context is shared between the host and every
/// handle the module holds to it, and the host never runs concurrently
/// with the module.
pub trait GraphicsContext {
    fn flush(&self);
    fn enable(&self, cap: u32);
    fn clear(&self, mask: u32);
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);

    fn create_buffer(&self) -> Option<GlBuffer>;
    fn bind_buffer(&self, target: u32, buffer: Option<GlBuffer>);
    fn buffer_data(&self, target: u32, data: &[u8], usage: u32);

    fn create_shader(&self, kind: u32) -> Option<GlShader>;
    fn shader_source(&self, shader: GlShader, source: &str);
    fn compile_shader(&self, shader: GlShader);
    fn get_shader_parameter(&self, shader: GlShader, pname: u32) -> HostValue;
    fn get_shader_info_log(&self, shader: GlShader) -> Option<String>;
    fn delete_shader(&self, shader: Option<GlShader>);

    fn create_program(&self) -> Option<GlProgram>;
    fn attach_shader(&self, program: GlProgram, shader: GlShader);
    fn detach_shader(&self, program: GlProgram, shader: GlShader);
    fn link_program(&self, program: GlProgram);
    fn get_program_parameter(&self, program: GlProgram, pname: u32) -> HostValue;
    fn get_program_info_log(&self, program: GlProgram) -> Option<String>;
    fn use_program(&self, program: Option<GlProgram>);

    fn get_attrib_location(&self, program: GlProgram, name: &str) -> i32;
    fn enable_vertex_attrib_array(&self, index: u32);
    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    );

    fn get_uniform_location(&self, program: GlProgram, name: &str) -> Option<GlUniformLocation>;
    fn uniform4fv(&self, location: Option<GlUniformLocation>, data: &[f32]);
    fn uniform_matrix3fv(&self, location: Option<GlUniformLocation>, transpose: bool, data: &[f32]);
    fn uniform_matrix4fv(&self, location: Option<GlUniformLocation>, transpose: bool, data: &[f32]);

    fn draw_elements(&self, mode: u32, count: i32, ty: u32, offset: i32);

    /// May throw (e.g. an invalid parameter name)
    fn get_parameter(&self, pname: u32) -> Result<HostValue, HostError>;
    /// May throw; `Ok(None)` for an unsupported extension
    fn get_extension(&self, name: &str) -> Result<Option<HostValue>, HostError>;
    fn get_supported_extensions(&self) -> Option<Vec<String>>;

    /// No handle refers to `object` any more
    fn forget(&self, object: GlObject);
}
