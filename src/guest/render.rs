//! GL setup and drawing, done entirely through imported capabilities
//!
//! Every host object lives behind a handle. Construction tracks what it has
//! acquired so a failure part way through can give all of it back, including
//! the context handle it was handed.

use super::app::{DrawItem, Mesh};
use super::{raise, with_str};
use crate::error::Trap;
use crate::gl::{
    ARRAY_BUFFER, COLOR_BUFFER_BIT, COMPILE_STATUS, DEPTH_BUFFER_BIT, DEPTH_TEST, ELEMENT_ARRAY_BUFFER, FLOAT,
    FRAGMENT_SHADER, LINK_STATUS, STATIC_DRAW, TRIANGLES, UNSIGNED_INT, VERTEX_SHADER, VIEWPORT,
};
use crate::imports;
use crate::marshal;
use crate::module::with_stack_frame;
use crate::relay;
use crate::store::Store;

const VERTEX_SOURCE: &str = r#"#version 300 es
in vec3 a_position;
in vec3 a_normal;
uniform mat4 u_mvp;
uniform mat3 u_normal;
out vec3 v_normal;
void main() {
    v_normal = u_normal * a_normal;
    gl_Position = u_mvp * vec4(a_position, 1.0);
}
"#;

const FRAGMENT_SOURCE: &str = r#"#version 300 es
precision mediump float;
in vec3 v_normal;
uniform vec4 u_color;
out vec4 out_color;
void main() {
    float light = 0.4 + 0.6 * max(dot(normalize(v_normal), vec3(0.0, 0.0, 1.0)), 0.0);
    out_color = vec4(u_color.rgb * light, u_color.a);
}
"#;

/// Probed at startup; rendering works without it
const OPTIONAL_EXTENSION: &str = "EXT_color_buffer_float";

/// position + normal, both vec3 of f32
const VERTEX_STRIDE: i32 = 24;

/// Room for the largest uniform upload (a mat4)
const SCRATCH_BYTES: u32 = 16 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MeshRange {
    count: i32,
    /// Byte offset into the index buffer
    offset: i32,
}

struct Geometry {
    vertices: Vec<f32>,
    indices: Vec<u32>,
    marker: MeshRange,
    arrow: MeshRange,
}

/// An octahedron for charges and a thin pyramid along +z for field arrows
fn geometry() -> Geometry {
    let mut vertices = Vec::new();
    let mut vertex = |p: [f32; 3], n: [f32; 3]| {
        vertices.extend_from_slice(&p);
        vertices.extend_from_slice(&n);
    };

    for p in [
        [1.0, 0.0, 0.0],
        [-1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, -1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0],
    ] {
        vertex(p, p);
    }
    let w = 0.05;
    for (x, y) in [(w, w), (-w, w), (-w, -w), (w, -w)] {
        vertex([x, y, 0.0], [x * 10.0, y * 10.0, -0.5]);
    }
    vertex([0.0, 0.0, 1.0], [0.0, 0.0, 1.0]);

    let mut indices: Vec<u32> = vec![
        0, 2, 4, 2, 1, 4, 1, 3, 4, 3, 0, 4, //
        2, 0, 5, 1, 2, 5, 3, 1, 5, 0, 3, 5,
    ];
    let marker = MeshRange { count: indices.len() as i32, offset: 0 };
    let arrow_start = indices.len();
    indices.extend_from_slice(&[6, 7, 10, 7, 8, 10, 8, 9, 10, 9, 6, 10, 6, 8, 7, 6, 9, 8]);
    let arrow = MeshRange {
        count: (indices.len() - arrow_start) as i32,
        offset: (arrow_start * 4) as i32,
    };

    Geometry { vertices, indices, marker, arrow }
}

/// Drop handles in reverse order of acquisition
fn release(cx: &mut Store, held: Vec<u32>) {
    for h in held.into_iter().rev() {
        imports::object_drop_ref(cx, h);
    }
}

/// Copy `bytes` into module memory and hand them to `bufferData` through a `Uint8Array` view
fn upload(cx: &mut Store, ctx: u32, target: u32, bytes: &[u8]) -> Result<(), Trap> {
    let len = bytes.len() as u32;
    let ptr = cx.malloc(len, 8)?;
    let mut held = Vec::with_capacity(3);
    let result = upload_from(cx, ctx, target, ptr, bytes, &mut held);
    release(cx, held);
    cx.free(ptr, len, 8)?;
    result
}

fn upload_from(
    cx: &mut Store,
    ctx: u32,
    target: u32,
    ptr: u32,
    bytes: &[u8],
    held: &mut Vec<u32>,
) -> Result<(), Trap> {
    cx.memory_mut().write_bytes(ptr, bytes)?;
    let memory = imports::memory(cx);
    held.push(memory);
    let buffer = imports::buffer_of(cx, memory)?;
    held.push(buffer);
    let view = imports::uint8_array_view(cx, buffer, ptr, bytes.len() as u32)?;
    held.push(view);
    imports::buffer_data(cx, ctx, target, view, STATIC_DRAW)
}

/// Fetch an info log through an out-param slot
fn info_log(
    cx: &mut Store,
    fetch: impl FnOnce(&mut Store, u32) -> Result<(), Trap>,
) -> Result<Option<String>, Trap> {
    with_stack_frame(cx, 8, |cx, retptr| {
        fetch(cx, retptr)?;
        marshal::read_opt_string(cx, retptr)
    })
}

/// `getParameter(VIEWPORT)` copied into module memory
///
/// A throw from the host is re-raised as `Trap::Exception`. Whatever the
/// outcome, every handle and the copy buffer are given back.
fn read_viewport(cx: &mut Store, ctx: u32) -> Result<[i32; 4], Trap> {
    let value = imports::get_parameter(cx, ctx, VIEWPORT)?;
    relay::rethrow_pending(cx)?;
    let mut held = vec![value];
    let result = copy_viewport(cx, value, &mut held);
    release(cx, held);
    result
}

fn copy_viewport(cx: &mut Store, value: u32, held: &mut Vec<u32>) -> Result<[i32; 4], Trap> {
    if imports::int32_array_instanceof(cx, value) == 0 {
        return Err(raise(cx, "viewport query did not return an Int32Array"));
    }
    if imports::int32_array_length(cx, value)? != 4 {
        return Err(raise(cx, "viewport query returned the wrong number of elements"));
    }

    let dst = cx.malloc(16, 4)?;
    let copied = copy_ints(cx, value, dst, held);
    cx.free(dst, 16, 4)?;
    copied
}

/// `new Int32Array(memory.buffer).set(value, dst / 4)`, read back
fn copy_ints(cx: &mut Store, value: u32, dst: u32, held: &mut Vec<u32>) -> Result<[i32; 4], Trap> {
    let memory = imports::memory(cx);
    held.push(memory);
    let buffer = imports::buffer_of(cx, memory)?;
    held.push(buffer);
    let ints = imports::int32_array_new(cx, buffer)?;
    held.push(ints);
    imports::int32_array_set(cx, ints, value, dst / 4)?;
    let words = marshal::read_words(cx, dst, 4)?;
    Ok([words[0], words[1], words[2], words[3]])
}

fn compile(cx: &mut Store, ctx: u32, kind: u32, source: &str, held: &mut Vec<u32>) -> Result<u32, Trap> {
    let shader = imports::create_shader(cx, ctx, kind)?;
    if shader == 0 {
        return Err(raise(cx, "unable to create shader object"));
    }
    held.push(shader);

    with_str(cx, source, |cx, ptr, len| imports::shader_source(cx, ctx, shader, ptr, len))?;
    imports::compile_shader(cx, ctx, shader)?;

    let status = imports::get_shader_parameter(cx, ctx, shader, COMPILE_STATUS)?;
    let compiled = imports::boolean_get(cx, status) == 1;
    imports::object_drop_ref(cx, status);
    if compiled {
        return Ok(shader);
    }

    let log = info_log(cx, |cx, retptr| imports::get_shader_info_log(cx, retptr, ctx, shader))?;
    imports::delete_shader(cx, ctx, shader)?;
    Err(raise(cx, &log.unwrap_or_else(|| "unknown error creating shader".to_string())))
}

fn link(cx: &mut Store, ctx: u32, held: &mut Vec<u32>) -> Result<u32, Trap> {
    let vs = compile(cx, ctx, VERTEX_SHADER, VERTEX_SOURCE, held)?;
    let fs = match compile(cx, ctx, FRAGMENT_SHADER, FRAGMENT_SOURCE, held) {
        Ok(fs) => fs,
        Err(trap) => {
            imports::delete_shader(cx, ctx, vs)?;
            return Err(trap);
        }
    };

    let program = imports::create_program(cx, ctx)?;
    if program == 0 {
        return Err(raise(cx, "unable to create program object"));
    }
    held.push(program);
    imports::attach_shader(cx, ctx, program, vs)?;
    imports::attach_shader(cx, ctx, program, fs)?;
    imports::link_program(cx, ctx, program)?;

    // shaders are not needed once the program is linked (or has failed to)
    for shader in [vs, fs] {
        imports::detach_shader(cx, ctx, program, shader)?;
        imports::delete_shader(cx, ctx, shader)?;
        imports::object_drop_ref(cx, shader);
        held.retain(|&h| h != shader);
    }

    let status = imports::get_program_parameter(cx, ctx, program, LINK_STATUS)?;
    let linked = imports::boolean_get(cx, status) == 1;
    imports::object_drop_ref(cx, status);
    if linked {
        return Ok(program);
    }
    let log = info_log(cx, |cx, retptr| imports::get_program_info_log(cx, retptr, ctx, program))?;
    Err(raise(cx, &log.unwrap_or_else(|| "unknown error creating program".to_string())))
}

fn attrib(cx: &mut Store, ctx: u32, program: u32, name: &str) -> Result<u32, Trap> {
    let location = with_str(cx, name, |cx, ptr, len| imports::get_attrib_location(cx, ctx, program, ptr, len))?;
    if location < 0 {
        return Err(raise(cx, &format!("attribute {} not found", name)));
    }
    Ok(location as u32)
}

fn uniform(cx: &mut Store, ctx: u32, program: u32, name: &str, held: &mut Vec<u32>) -> Result<u32, Trap> {
    let location = with_str(cx, name, |cx, ptr, len| imports::get_uniform_location(cx, ctx, program, ptr, len))?;
    if location == 0 {
        return Err(raise(cx, &format!("uniform {} not found", name)));
    }
    held.push(location);
    Ok(location)
}

fn create_buffer(cx: &mut Store, ctx: u32, held: &mut Vec<u32>) -> Result<u32, Trap> {
    let buffer = imports::create_buffer(cx, ctx)?;
    if buffer == 0 {
        return Err(raise(cx, "unable to create buffer object"));
    }
    held.push(buffer);
    Ok(buffer)
}

pub struct Render {
    ctx: u32,
    program: u32,
    vertex_buffer: u32,
    index_buffer: u32,
    u_color: u32,
    u_mvp: u32,
    u_normal: u32,
    /// `0` when the extension is unsupported
    extension: u32,
    scratch: u32,
    marker: MeshRange,
    arrow: MeshRange,
    viewport: [i32; 4],
}

impl Render {
    /// Takes ownership of `ctx`; on failure every handle acquired so far is dropped
    ///
    /// Errors the module raises itself, and host exceptions it re-raises,
    /// come back as `Trap::Exception`.
    pub fn new(cx: &mut Store, ctx: u32) -> Result<Render, Trap> {
        let mut held = vec![ctx];
        match Self::setup(cx, ctx, &mut held) {
            Ok(render) => Ok(render),
            Err(trap) => {
                release(cx, held);
                Err(trap)
            }
        }
    }

    fn setup(cx: &mut Store, ctx: u32, held: &mut Vec<u32>) -> Result<Render, Trap> {
        let program = link(cx, ctx, held)?;
        let position = attrib(cx, ctx, program, "a_position")?;
        let normal = attrib(cx, ctx, program, "a_normal")?;

        let geometry = geometry();
        let vertex_bytes: Vec<u8> = geometry.vertices.iter().flat_map(|v| v.to_le_bytes()).collect();
        let index_bytes: Vec<u8> = geometry.indices.iter().flat_map(|i| i.to_le_bytes()).collect();

        let vertex_buffer = create_buffer(cx, ctx, held)?;
        imports::bind_buffer(cx, ctx, ARRAY_BUFFER, vertex_buffer)?;
        upload(cx, ctx, ARRAY_BUFFER, &vertex_bytes)?;
        let index_buffer = create_buffer(cx, ctx, held)?;
        imports::bind_buffer(cx, ctx, ELEMENT_ARRAY_BUFFER, index_buffer)?;
        upload(cx, ctx, ELEMENT_ARRAY_BUFFER, &index_bytes)?;

        imports::enable_vertex_attrib_array(cx, ctx, position)?;
        imports::vertex_attrib_pointer(cx, ctx, position, 3, FLOAT, 0, VERTEX_STRIDE, 0)?;
        imports::enable_vertex_attrib_array(cx, ctx, normal)?;
        imports::vertex_attrib_pointer(cx, ctx, normal, 3, FLOAT, 0, VERTEX_STRIDE, 12)?;

        let u_color = uniform(cx, ctx, program, "u_color", held)?;
        let u_mvp = uniform(cx, ctx, program, "u_mvp", held)?;
        let u_normal = uniform(cx, ctx, program, "u_normal", held)?;
        imports::use_program(cx, ctx, program)?;

        let viewport = read_viewport(cx, ctx)?;

        let extension = with_str(cx, OPTIONAL_EXTENSION, |cx, ptr, len| imports::get_extension(cx, ctx, ptr, len))?;
        relay::rethrow_pending(cx)?;
        if extension != 0 {
            held.push(extension);
        }

        imports::enable(cx, ctx, DEPTH_TEST)?;
        imports::clear_color(cx, ctx, 0.05, 0.05, 0.08, 1.0)?;

        let scratch = cx.malloc(SCRATCH_BYTES, 8)?;
        Ok(Render {
            ctx,
            program,
            vertex_buffer,
            index_buffer,
            u_color,
            u_mvp,
            u_normal,
            extension,
            scratch,
            marker: geometry.marker,
            arrow: geometry.arrow,
            viewport,
        })
    }

    pub fn size(&self) -> (f64, f64) {
        (self.viewport[2] as f64, self.viewport[3] as f64)
    }

    pub fn has_extension(&self) -> bool {
        self.extension != 0
    }

    /// Re-read the viewport; the host may have resized the canvas
    pub fn refresh_viewport(&mut self, cx: &mut Store) -> Result<(), Trap> {
        self.viewport = read_viewport(cx, self.ctx)?;
        Ok(())
    }

    fn upload_uniform(&self, cx: &mut Store, data: &[f32]) -> Result<(), Trap> {
        let floats = cx.floats32();
        floats.write(cx.memory_mut(), (self.scratch / 4) as usize, data)?;
        Ok(())
    }

    fn draw(&self, cx: &mut Store, item: &DrawItem) -> Result<(), Trap> {
        let ctx = self.ctx;
        self.upload_uniform(cx, &item.color)?;
        imports::uniform4fv(cx, ctx, self.u_color, self.scratch, 4)?;
        self.upload_uniform(cx, &item.mvp)?;
        imports::uniform_matrix4fv(cx, ctx, self.u_mvp, 0, self.scratch, 16)?;
        self.upload_uniform(cx, &item.normal)?;
        imports::uniform_matrix3fv(cx, ctx, self.u_normal, 0, self.scratch, 9)?;

        let range = match item.mesh {
            Mesh::Marker => self.marker,
            Mesh::Arrow => self.arrow,
        };
        imports::draw_elements(cx, ctx, TRIANGLES, range.count, UNSIGNED_INT, range.offset)
    }

    pub fn frame(&self, cx: &mut Store, items: &[DrawItem]) -> Result<(), Trap> {
        imports::clear(cx, self.ctx, COLOR_BUFFER_BIT | DEPTH_BUFFER_BIT)?;
        for item in items {
            self.draw(cx, item)?;
        }
        imports::flush(cx, self.ctx)
    }

    /// Drop every handle, the context last, and give back the scratch block
    pub fn free(self, cx: &mut Store) -> Result<(), Trap> {
        let mut handles = vec![self.u_normal, self.u_mvp, self.u_color, self.index_buffer, self.vertex_buffer];
        if self.extension != 0 {
            handles.push(self.extension);
        }
        handles.extend([self.program, self.ctx]);
        for h in handles {
            imports::object_drop_ref(cx, h);
        }
        cx.free(self.scratch, SCRATCH_BYTES, 8)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::config::BridgeConfig;
    use crate::gl::{GlCall, RecordingContext};
    use crate::value::HostValue;

    fn store_with(ctx: RecordingContext) -> (Store, Rc<RecordingContext>, u32) {
        let mut cx = Store::new(BridgeConfig::default());
        let ctx = Rc::new(ctx);
        let handle = cx.add_object(HostValue::Context(ctx.clone())).raw();
        (cx, ctx, handle)
    }

    #[test]
    fn test_geometry_ranges() {
        let g = geometry();
        assert_eq!(g.vertices.len(), 11 * 6);
        assert_eq!(g.marker, MeshRange { count: 24, offset: 0 });
        assert_eq!(g.arrow, MeshRange { count: 18, offset: 96 });
        assert!(g.indices.iter().all(|&i| (i as usize) < g.vertices.len() / 6));
    }

    #[test]
    fn test_setup_and_free_release_everything() {
        let (mut cx, recorder, ctx) = store_with(RecordingContext::new(640, 480).with_extensions(&["EXT_color_buffer_float"]));
        let before = cx.stats();

        let render = Render::new(&mut cx, ctx).unwrap();
        assert_eq!(render.size(), (640.0, 480.0));
        assert!(render.has_extension());
        assert_eq!(recorder.live_shaders(), 0);
        assert_eq!(recorder.count(|c| matches!(c, GlCall::BufferData { .. })), 2);

        render.free(&mut cx).unwrap();
        let after = cx.stats();
        assert_eq!(after.live_handles, 0);
        assert_eq!(after.live_allocations, before.live_allocations);
    }

    #[test]
    fn test_compile_failure_drops_handles() {
        let (mut cx, recorder, ctx) = store_with(RecordingContext::new(1, 1).failing_compile());
        let err = match Render::new(&mut cx, ctx) {
            Err(Trap::Exception(h)) => h,
            other => panic!("unexpected {:?}", other.map(|_| ())),
        };
        assert_eq!(relay::describe_error(&mut cx, err), "\"ERROR: 0:1: shader failed to compile\"");
        assert_eq!(cx.stats().live_handles, 0);
        assert_eq!(cx.stats().live_allocations, 0);
        assert_eq!(recorder.live_shaders(), 0);
    }
}
