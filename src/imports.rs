//! Capability call surface
//!
//! The functions a module may import, one per host operation. Arguments use
//! the raw ABI: objects arrive as handle indices, booleans as `u32`, strings
//! and numeric slices as `(ptr, len)` into module memory (borrowed, never
//! freed here). Results are primitives or freshly inserted handles, with `0`
//! meaning "absent" for optional objects.
//!
//! Catching capabilities (`get_parameter`, `get_extension`) never trap on a
//! host exception: they park it via `relay::handle_error` and return `0`.

use std::rc::Rc;

use crate::error::{MemoryError, Trap};
use crate::gl::{GlBuffer, GlObject, GlProgram, GlRef, GlShader, GlUniformLocation, GraphicsContext};
use crate::handles::{self, Handle};
use crate::marshal;
use crate::relay;
use crate::store::Store;
use crate::value::{self, HostError, HostValue, MemoryWindow};
use crate::console_log;

macro_rules! trace_call {
    ($cx:expr, $($t:tt)*) => {
        if $cx.config().trace_calls {
            console_log!("[import] {}", format_args!($($t)*));
        }
    };
}

#[inline(always)]
fn handle(raw: u32) -> Handle {
    Handle::from_raw(raw)
}

fn type_error(expected: &str, got: &HostValue) -> Trap {
    Trap::TypeError(format!("expected {}, got {}", expected, got.type_name()))
}

fn context(cx: &Store, raw: u32) -> Result<Rc<dyn GraphicsContext>, Trap> {
    match cx.get_object(handle(raw)) {
        HostValue::Context(ctx) => Ok(ctx.clone()),
        other => Err(type_error("WebGL2RenderingContext", other)),
    }
}

/// A context object argument of the kind `pick` accepts; `undefined`/`null` is `None`
fn gl_arg<T>(cx: &Store, raw: u32, expected: &str, pick: impl Fn(GlObject) -> Option<T>) -> Result<Option<T>, Trap> {
    let value = cx.get_object(handle(raw));
    if value.is_nullish() {
        return Ok(None);
    }
    let picked = match value {
        HostValue::Gl(r) => pick(r.object()),
        _ => None,
    };
    picked.map(Some).ok_or_else(|| type_error(expected, value))
}

fn required<T>(cx: &Store, raw: u32, expected: &str, arg: Option<T>) -> Result<T, Trap> {
    arg.ok_or_else(|| type_error(expected, cx.get_object(handle(raw))))
}

fn buffer(cx: &Store, raw: u32) -> Result<Option<GlBuffer>, Trap> {
    gl_arg(cx, raw, "WebGLBuffer", |o| match o {
        GlObject::Buffer(b) => Some(b),
        _ => None,
    })
}

fn opt_shader(cx: &Store, raw: u32) -> Result<Option<GlShader>, Trap> {
    gl_arg(cx, raw, "WebGLShader", |o| match o {
        GlObject::Shader(s) => Some(s),
        _ => None,
    })
}

fn shader(cx: &Store, raw: u32) -> Result<GlShader, Trap> {
    let s = opt_shader(cx, raw)?;
    required(cx, raw, "WebGLShader", s)
}

fn opt_program(cx: &Store, raw: u32) -> Result<Option<GlProgram>, Trap> {
    gl_arg(cx, raw, "WebGLProgram", |o| match o {
        GlObject::Program(p) => Some(p),
        _ => None,
    })
}

fn program(cx: &Store, raw: u32) -> Result<GlProgram, Trap> {
    let p = opt_program(cx, raw)?;
    required(cx, raw, "WebGLProgram", p)
}

fn uniform_location(cx: &Store, raw: u32) -> Result<Option<GlUniformLocation>, Trap> {
    gl_arg(cx, raw, "WebGLUniformLocation", |o| match o {
        GlObject::UniformLocation(l) => Some(l),
        _ => None,
    })
}

/// Insert an optional result, `0` when absent
fn add_optional<T>(cx: &mut Store, value: Option<T>, wrap: impl FnOnce(T) -> HostValue) -> u32 {
    match value {
        Some(v) => cx.add_object(wrap(v)).raw(),
        None => 0,
    }
}

/// Insert a freshly created context object tied to `gl`, `0` when creation failed
fn add_gl<T>(cx: &mut Store, gl: &Rc<dyn GraphicsContext>, created: Option<T>, kind: impl FnOnce(T) -> GlObject) -> u32 {
    add_optional(cx, created, |v| HostValue::Gl(GlRef::new(gl, kind(v))))
}

/// A window over memory is only usable while memory has not grown since it was made
fn live_window(cx: &Store, window: &MemoryWindow, width: u32) -> Result<(), Trap> {
    if window.generation != cx.memory().generation() {
        return Err(Trap::TypeError("typed array over a detached ArrayBuffer".into()));
    }
    let end = window.byte_offset as usize + (window.len * width) as usize;
    if end > cx.memory().size() {
        return Err(MemoryError::OutOfBounds {
            ptr: window.byte_offset,
            len: window.len * width,
            size: cx.memory().size(),
        }
        .into());
    }
    Ok(())
}

/// Elements of any Int32Array-like value
fn int32_elements(cx: &mut Store, value: &HostValue) -> Result<Vec<i32>, Trap> {
    match value {
        HostValue::Int32Array(v) => Ok(v.clone()),
        HostValue::Int32View(w) => {
            live_window(cx, w, 4)?;
            Ok(marshal::read_words(cx, w.byte_offset, w.len)?)
        }
        HostValue::Array(items) => Ok(items
            .iter()
            .map(|v| v.as_f64().map_or(0, |n| n as i32))
            .collect()),
        other => Err(type_error("Int32Array", other)),
    }
}

// Intrinsics

pub fn object_drop_ref(cx: &mut Store, idx: u32) {
    cx.drop_object(handle(idx));
}

/// `1` for true, `0` for false, `2` for anything that is not a boolean
pub fn boolean_get(cx: &mut Store, idx: u32) -> u32 {
    match cx.get_object(handle(idx)).as_bool() {
        Some(true) => 1,
        Some(false) => 0,
        None => 2,
    }
}

pub fn number_get(cx: &mut Store, retptr: u32, idx: u32) -> Result<(), Trap> {
    let n = cx.get_object(handle(idx)).as_f64();
    marshal::write_opt_f64(cx, retptr, n)?;
    Ok(())
}

pub fn string_get(cx: &mut Store, retptr: u32, idx: u32) -> Result<(), Trap> {
    let s = cx.get_object(handle(idx)).as_str().map(str::to_owned);
    marshal::write_opt_string(cx, retptr, s.as_deref())?;
    Ok(())
}

pub fn string_new(cx: &mut Store, ptr: u32, len: u32) -> Result<u32, Trap> {
    let s = marshal::read_string(cx, ptr, len)?;
    Ok(cx.add_object(HostValue::String(s)).raw())
}

/// Describe a value into a fresh `(ptr, len)` pair at `retptr`; the module frees it
pub fn debug_string(cx: &mut Store, retptr: u32, idx: u32) -> Result<(), Trap> {
    let s = value::debug_string(cx.get_object(handle(idx)));
    let (ptr, len) = marshal::pass_string(cx, &s)?;
    marshal::write_words(cx, retptr, &[ptr as i32, len as i32])?;
    Ok(())
}

/// Raise an `Error` carrying the module's message
pub fn throw(cx: &mut Store, ptr: u32, len: u32) -> Trap {
    match marshal::read_string(cx, ptr, len) {
        Ok(message) => Trap::Throw(HostError::error(message)),
        Err(trap) => trap,
    }
}

pub fn memory(cx: &mut Store) -> u32 {
    cx.add_object(HostValue::Memory).raw()
}

/// `memory.buffer`
pub fn buffer_of(cx: &mut Store, idx: u32) -> Result<u32, Trap> {
    match cx.get_object(handle(idx)) {
        HostValue::Memory => {}
        other => return Err(type_error("Memory", other)),
    }
    let generation = cx.memory().generation();
    Ok(cx.add_object(HostValue::ArrayBuffer { generation }).raw())
}

/// `new Uint8Array(buffer, byte_offset, len)`
pub fn uint8_array_view(cx: &mut Store, buffer: u32, byte_offset: u32, len: u32) -> Result<u32, Trap> {
    let generation = match cx.get_object(handle(buffer)) {
        HostValue::ArrayBuffer { generation } => *generation,
        other => return Err(type_error("ArrayBuffer", other)),
    };
    let window = MemoryWindow { generation, byte_offset, len };
    live_window(cx, &window, 1)?;
    Ok(cx.add_object(HostValue::Uint8View(window)).raw())
}

pub fn int32_array_instanceof(cx: &mut Store, idx: u32) -> u32 {
    matches!(
        cx.get_object(handle(idx)),
        HostValue::Int32Array(_) | HostValue::Int32View(_)
    ) as u32
}

pub fn int32_array_length(cx: &mut Store, idx: u32) -> Result<u32, Trap> {
    match cx.get_object(handle(idx)) {
        HostValue::Int32Array(v) => Ok(v.len() as u32),
        HostValue::Int32View(w) => Ok(w.len),
        other => Err(type_error("Int32Array", other)),
    }
}

/// `new Int32Array(value)`: a view over a whole `ArrayBuffer`, or a copy of an array-like
pub fn int32_array_new(cx: &mut Store, idx: u32) -> Result<u32, Trap> {
    let value = cx.get_object(handle(idx)).clone();
    let created = match value {
        HostValue::ArrayBuffer { generation } => {
            let len = (cx.memory().size() / 4) as u32;
            let window = MemoryWindow { generation, byte_offset: 0, len };
            live_window(cx, &window, 4)?;
            HostValue::Int32View(window)
        }
        other => HostValue::Int32Array(int32_elements(cx, &other)?),
    };
    Ok(cx.add_object(created).raw())
}

/// `target.set(source, offset)`
pub fn int32_array_set(cx: &mut Store, target: u32, source: u32, offset: u32) -> Result<(), Trap> {
    let src = cx.get_object(handle(source)).clone();
    let values = int32_elements(cx, &src)?;

    let target = handle(target);
    match cx.get_object(target).clone() {
        HostValue::Int32View(w) => {
            live_window(cx, &w, 4)?;
            if offset as usize + values.len() > w.len as usize {
                return Err(Trap::Throw(HostError::new("RangeError", "offset is out of bounds")));
            }
            marshal::write_words(cx, w.byte_offset + offset * 4, &values)?;
        }
        HostValue::Int32Array(v) => {
            let start = offset as usize;
            if start + values.len() > v.len() {
                return Err(Trap::Throw(HostError::new("RangeError", "offset is out of bounds")));
            }
            if let HostValue::Int32Array(v) = cx.get_object_mut(target) {
                v[start..start + values.len()].copy_from_slice(&values);
            }
        }
        other => return Err(type_error("Int32Array", &other)),
    }
    Ok(())
}

pub fn array_length(cx: &mut Store, idx: u32) -> Result<u32, Trap> {
    match cx.get_object(handle(idx)) {
        HostValue::Array(items) => Ok(items.len() as u32),
        other => Err(type_error("Array", other)),
    }
}

/// `array[i]`; out of range yields `undefined`
pub fn array_get(cx: &mut Store, idx: u32, i: u32) -> Result<u32, Trap> {
    let item = match cx.get_object(handle(idx)) {
        HostValue::Array(items) => items.get(i as usize).cloned(),
        other => return Err(type_error("Array", other)),
    };
    Ok(match item {
        Some(v) => cx.add_object(v).raw(),
        None => handles::UNDEFINED.raw(),
    })
}

// Graphics

pub fn flush(cx: &mut Store, ctx: u32) -> Result<(), Trap> {
    trace_call!(cx, "flush()");
    context(cx, ctx)?.flush();
    Ok(())
}

pub fn enable(cx: &mut Store, ctx: u32, cap: u32) -> Result<(), Trap> {
    trace_call!(cx, "enable(0x{:04x})", cap);
    context(cx, ctx)?.enable(cap);
    Ok(())
}

pub fn clear(cx: &mut Store, ctx: u32, mask: u32) -> Result<(), Trap> {
    trace_call!(cx, "clear(0x{:04x})", mask);
    context(cx, ctx)?.clear(mask);
    Ok(())
}

pub fn clear_color(cx: &mut Store, ctx: u32, r: f32, g: f32, b: f32, a: f32) -> Result<(), Trap> {
    trace_call!(cx, "clearColor({}, {}, {}, {})", r, g, b, a);
    context(cx, ctx)?.clear_color(r, g, b, a);
    Ok(())
}

pub fn create_buffer(cx: &mut Store, ctx: u32) -> Result<u32, Trap> {
    let gl = context(cx, ctx)?;
    let created = gl.create_buffer();
    trace_call!(cx, "createBuffer() -> {:?}", created);
    Ok(add_gl(cx, &gl, created, GlObject::Buffer))
}

pub fn bind_buffer(cx: &mut Store, ctx: u32, target: u32, buf: u32) -> Result<(), Trap> {
    let b = buffer(cx, buf)?;
    trace_call!(cx, "bindBuffer(0x{:04x}, {:?})", target, b);
    context(cx, ctx)?.bind_buffer(target, b);
    Ok(())
}

/// Upload from a `Uint8Array` view over module memory
pub fn buffer_data(cx: &mut Store, ctx: u32, target: u32, data: u32, usage: u32) -> Result<(), Trap> {
    let window = match cx.get_object(handle(data)) {
        HostValue::Uint8View(w) => *w,
        other => return Err(type_error("Uint8Array", other)),
    };
    live_window(cx, &window, 1)?;
    trace_call!(cx, "bufferData(0x{:04x}, {} bytes, 0x{:04x})", target, window.len, usage);
    let gl = context(cx, ctx)?;
    let bytes = cx.memory().slice(window.byte_offset, window.len)?;
    gl.buffer_data(target, bytes, usage);
    Ok(())
}

pub fn create_shader(cx: &mut Store, ctx: u32, kind: u32) -> Result<u32, Trap> {
    let gl = context(cx, ctx)?;
    let created = gl.create_shader(kind);
    trace_call!(cx, "createShader(0x{:04x}) -> {:?}", kind, created);
    Ok(add_gl(cx, &gl, created, GlObject::Shader))
}

pub fn shader_source(cx: &mut Store, ctx: u32, sh: u32, ptr: u32, len: u32) -> Result<(), Trap> {
    let s = shader(cx, sh)?;
    let source = marshal::read_string(cx, ptr, len)?;
    trace_call!(cx, "shaderSource({:?}, {} bytes)", s, source.len());
    context(cx, ctx)?.shader_source(s, &source);
    Ok(())
}

pub fn compile_shader(cx: &mut Store, ctx: u32, sh: u32) -> Result<(), Trap> {
    let s = shader(cx, sh)?;
    trace_call!(cx, "compileShader({:?})", s);
    context(cx, ctx)?.compile_shader(s);
    Ok(())
}

pub fn get_shader_parameter(cx: &mut Store, ctx: u32, sh: u32, pname: u32) -> Result<u32, Trap> {
    let s = shader(cx, sh)?;
    let value = context(cx, ctx)?.get_shader_parameter(s, pname);
    Ok(cx.add_object(value).raw())
}

pub fn get_shader_info_log(cx: &mut Store, retptr: u32, ctx: u32, sh: u32) -> Result<(), Trap> {
    let s = shader(cx, sh)?;
    let log = context(cx, ctx)?.get_shader_info_log(s);
    marshal::write_opt_string(cx, retptr, log.as_deref())?;
    Ok(())
}

pub fn delete_shader(cx: &mut Store, ctx: u32, sh: u32) -> Result<(), Trap> {
    let s = opt_shader(cx, sh)?;
    trace_call!(cx, "deleteShader({:?})", s);
    context(cx, ctx)?.delete_shader(s);
    Ok(())
}

pub fn create_program(cx: &mut Store, ctx: u32) -> Result<u32, Trap> {
    let gl = context(cx, ctx)?;
    let created = gl.create_program();
    trace_call!(cx, "createProgram() -> {:?}", created);
    Ok(add_gl(cx, &gl, created, GlObject::Program))
}

pub fn attach_shader(cx: &mut Store, ctx: u32, prog: u32, sh: u32) -> Result<(), Trap> {
    let (p, s) = (program(cx, prog)?, shader(cx, sh)?);
    trace_call!(cx, "attachShader({:?}, {:?})", p, s);
    context(cx, ctx)?.attach_shader(p, s);
    Ok(())
}

pub fn detach_shader(cx: &mut Store, ctx: u32, prog: u32, sh: u32) -> Result<(), Trap> {
    let (p, s) = (program(cx, prog)?, shader(cx, sh)?);
    trace_call!(cx, "detachShader({:?}, {:?})", p, s);
    context(cx, ctx)?.detach_shader(p, s);
    Ok(())
}

pub fn link_program(cx: &mut Store, ctx: u32, prog: u32) -> Result<(), Trap> {
    let p = program(cx, prog)?;
    trace_call!(cx, "linkProgram({:?})", p);
    context(cx, ctx)?.link_program(p);
    Ok(())
}

pub fn get_program_parameter(cx: &mut Store, ctx: u32, prog: u32, pname: u32) -> Result<u32, Trap> {
    let p = program(cx, prog)?;
    let value = context(cx, ctx)?.get_program_parameter(p, pname);
    Ok(cx.add_object(value).raw())
}

pub fn get_program_info_log(cx: &mut Store, retptr: u32, ctx: u32, prog: u32) -> Result<(), Trap> {
    let p = program(cx, prog)?;
    let log = context(cx, ctx)?.get_program_info_log(p);
    marshal::write_opt_string(cx, retptr, log.as_deref())?;
    Ok(())
}

pub fn use_program(cx: &mut Store, ctx: u32, prog: u32) -> Result<(), Trap> {
    let p = opt_program(cx, prog)?;
    trace_call!(cx, "useProgram({:?})", p);
    context(cx, ctx)?.use_program(p);
    Ok(())
}

pub fn get_attrib_location(cx: &mut Store, ctx: u32, prog: u32, ptr: u32, len: u32) -> Result<i32, Trap> {
    let p = program(cx, prog)?;
    let name = marshal::read_string(cx, ptr, len)?;
    Ok(context(cx, ctx)?.get_attrib_location(p, &name))
}

pub fn enable_vertex_attrib_array(cx: &mut Store, ctx: u32, index: u32) -> Result<(), Trap> {
    trace_call!(cx, "enableVertexAttribArray({})", index);
    context(cx, ctx)?.enable_vertex_attrib_array(index);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn vertex_attrib_pointer(
    cx: &mut Store,
    ctx: u32,
    index: u32,
    size: i32,
    ty: u32,
    normalized: u32,
    stride: i32,
    offset: i32,
) -> Result<(), Trap> {
    trace_call!(cx, "vertexAttribPointer({}, {}, 0x{:04x}, {}, {}, {})", index, size, ty, normalized != 0, stride, offset);
    context(cx, ctx)?.vertex_attrib_pointer(index, size, ty, normalized != 0, stride, offset);
    Ok(())
}

pub fn get_uniform_location(cx: &mut Store, ctx: u32, prog: u32, ptr: u32, len: u32) -> Result<u32, Trap> {
    let p = program(cx, prog)?;
    let name = marshal::read_string(cx, ptr, len)?;
    let gl = context(cx, ctx)?;
    let location = gl.get_uniform_location(p, &name);
    Ok(add_gl(cx, &gl, location, GlObject::UniformLocation))
}

pub fn uniform4fv(cx: &mut Store, ctx: u32, loc: u32, ptr: u32, len: u32) -> Result<(), Trap> {
    let l = uniform_location(cx, loc)?;
    let data = marshal::read_f32_slice(cx, ptr, len)?;
    context(cx, ctx)?.uniform4fv(l, &data);
    Ok(())
}

pub fn uniform_matrix3fv(cx: &mut Store, ctx: u32, loc: u32, transpose: u32, ptr: u32, len: u32) -> Result<(), Trap> {
    let l = uniform_location(cx, loc)?;
    let data = marshal::read_f32_slice(cx, ptr, len)?;
    context(cx, ctx)?.uniform_matrix3fv(l, transpose != 0, &data);
    Ok(())
}

pub fn uniform_matrix4fv(cx: &mut Store, ctx: u32, loc: u32, transpose: u32, ptr: u32, len: u32) -> Result<(), Trap> {
    let l = uniform_location(cx, loc)?;
    let data = marshal::read_f32_slice(cx, ptr, len)?;
    context(cx, ctx)?.uniform_matrix4fv(l, transpose != 0, &data);
    Ok(())
}

pub fn draw_elements(cx: &mut Store, ctx: u32, mode: u32, count: i32, ty: u32, offset: i32) -> Result<(), Trap> {
    trace_call!(cx, "drawElements(0x{:04x}, {}, 0x{:04x}, {})", mode, count, ty, offset);
    context(cx, ctx)?.draw_elements(mode, count, ty, offset);
    Ok(())
}

/// Catching: a throw is parked for the module and `0` returned
pub fn get_parameter(cx: &mut Store, ctx: u32, pname: u32) -> Result<u32, Trap> {
    let result = context(cx, ctx)?.get_parameter(pname);
    trace_call!(cx, "getParameter(0x{:04x}) -> {}", pname, if result.is_ok() { "ok" } else { "threw" });
    let result = result.map(|v| cx.add_object(v).raw());
    Ok(relay::handle_error(cx, result))
}

/// Catching; an unsupported extension is `0` without an exception
pub fn get_extension(cx: &mut Store, ctx: u32, ptr: u32, len: u32) -> Result<u32, Trap> {
    let name = marshal::read_string(cx, ptr, len)?;
    let result = context(cx, ctx)?.get_extension(&name);
    trace_call!(cx, "getExtension({:?}) -> {}", name, match &result {
        Ok(Some(_)) => "supported",
        Ok(None) => "unsupported",
        Err(_) => "threw",
    });
    let result = result.map(|ext| add_optional(cx, ext, |v| v));
    Ok(relay::handle_error(cx, result))
}

pub fn get_supported_extensions(cx: &mut Store, ctx: u32) -> Result<u32, Trap> {
    let names = context(cx, ctx)?.get_supported_extensions();
    Ok(add_optional(cx, names, |names| {
        HostValue::Array(names.into_iter().map(HostValue::String).collect())
    }))
}
