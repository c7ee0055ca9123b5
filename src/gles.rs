//! Instanced triangles drawn with OpenGL ES 3.
//!
//! A ring of `num_instances` triangles is generated entirely in the vertex shader from
//! `gl_InstanceID` and `gl_VertexID`. Parameters come from a std140 uniform block refreshed
//! every frame.

use crate::{AppError, AppResult};
use imgui_glow_renderer::glow::{self, HasContext};
use std::{f32::consts::TAU, mem::size_of, ops::RangeInclusive};

/// Name of the uniform block, in the shader and in the host query.
pub const UNIFORM_BLOCK_NAME: &str = "Uniforms";

/// Binding point the uniform block and buffer are attached to.
pub const UNIFORM_BINDING: u32 = 0;

pub const INSTANCES_RANGE: RangeInclusive<i32> = 6..=360;
pub const ROTATION_RANGE: RangeInclusive<f32> = 0.0..=TAU;
pub const RADIUS_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const SIZE_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Triangle in instance space, indexed by `gl_VertexID`.
pub const TRIANGLE: [[f32; 2]; 3] = [[-1.0, -1.0], [0.0, 2.0], [1.0, -1.0]];

pub const VERTEX_SHADER: &str = r#"#version 300 es
precision highp float;

layout(std140) uniform Uniforms {
    int numInstances;
    float rotation;
    float radius;
    float size;
};

const vec2 TRIANGLE[3] = vec2[3](
    vec2(-1.0, -1.0),
    vec2( 0.0,  2.0),
    vec2( 1.0, -1.0)
);

const float TAU = 6.28318530718;

out float vColor;

void main() {
    float r = float(gl_InstanceID) * TAU / float(numInstances) + rotation;
    float c = cos(r);
    float s = sin(r);
    mat2 m = mat2(c, s, -s, c);
    vec2 v = vec2(c, s) * radius + m * TRIANGLE[gl_VertexID] * size;
    gl_Position = vec4(v, 0.0, 1.0);
    vColor = sin((r - rotation) / 2.0);
}
"#;

pub const FRAGMENT_SHADER: &str = r#"#version 300 es
precision highp float;

in float vColor;
out vec4 fragColor;

void main() {
    fragColor = vec4(1.0, vColor, 1.0 - vColor, 1.0);
}
"#;

/// Host copy of the uniform block. Field order and sizes follow the std140 layout of the
/// shader block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniforms {
    pub num_instances: i32,
    pub rotation: f32,
    pub radius: f32,
    pub size: f32,
}

impl Default for Uniforms {
    fn default() -> Self {
        Self {
            num_instances: 60,
            rotation: 0.0,
            radius: 0.9,
            size: 0.025,
        }
    }
}

/// One triangle of the ring, as computed by the vertex and fragment shaders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    /// Angle of the instance, rotation included.
    pub angle: f32,
    pub center: [f32; 2],
    pub vertices: [[f32; 2]; 3],
    pub color: [f32; 4],
}

impl Uniforms {
    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self as *const Self as *const u8, size_of::<Self>())
        }
    }

    /// CPU evaluation of the shaders for instance `index`.
    pub fn instance(&self, index: i32) -> Instance {
        let angle = index as f32 * TAU / self.num_instances as f32 + self.rotation;
        let (s, c) = angle.sin_cos();
        let center = [c * self.radius, s * self.radius];

        // Column major mat2(c, s, -s, c)
        let vertices = TRIANGLE.map(|[x, y]| {
            [
                center[0] + (c * x - s * y) * self.size,
                center[1] + (s * x + c * y) * self.size,
            ]
        });

        let t = ((angle - self.rotation) / 2.0).sin();
        Instance {
            angle,
            center,
            vertices,
            color: [1.0, t, 1.0 - t, 1.0],
        }
    }

    /// Clamp every parameter into its slider range.
    pub fn clamped(self) -> Self {
        Self {
            num_instances: self
                .num_instances
                .clamp(*INSTANCES_RANGE.start(), *INSTANCES_RANGE.end()),
            rotation: self
                .rotation
                .clamp(*ROTATION_RANGE.start(), *ROTATION_RANGE.end()),
            radius: self.radius.clamp(*RADIUS_RANGE.start(), *RADIUS_RANGE.end()),
            size: self.size.clamp(*SIZE_RANGE.start(), *SIZE_RANGE.end()),
        }
    }
}

/// Program, uniform buffer and empty vertex array drawing the ring.
pub struct TrianglesProgram {
    program: glow::Program,
    uniform_buffer: glow::Buffer,
    vertex_array: glow::VertexArray,
}

impl TrianglesProgram {
    /// Compile and link the shaders and set up the uniform buffer.
    ///
    /// # Errors
    ///
    /// * [`AppError::Gl`] - With the info log if a shader fails to compile or the program to
    ///   link, or if a GL object cannot be created.
    pub fn new(gl: &glow::Context) -> AppResult<Self> {
        log::debug!("Creating triangles program");
        let program = create_program(gl)?;

        unsafe {
            let block_index = match gl.get_uniform_block_index(program, UNIFORM_BLOCK_NAME) {
                Some(index) => index,
                None => {
                    gl.delete_program(program);
                    return Err(AppError::Gl(format!(
                        "Uniform block {} not found",
                        UNIFORM_BLOCK_NAME
                    )));
                }
            };
            gl.uniform_block_binding(program, block_index, UNIFORM_BINDING);

            let uniform_buffer = match gl.create_buffer() {
                Ok(buffer) => buffer,
                Err(error) => {
                    gl.delete_program(program);
                    return Err(AppError::Gl(error));
                }
            };
            let vertex_array = match gl.create_vertex_array() {
                Ok(vertex_array) => vertex_array,
                Err(error) => {
                    gl.delete_buffer(uniform_buffer);
                    gl.delete_program(program);
                    return Err(AppError::Gl(error));
                }
            };

            Ok(Self {
                program,
                uniform_buffer,
                vertex_array,
            })
        }
    }

    /// Upload `uniforms` and draw `num_instances` triangles.
    ///
    /// Bindings are restored each call since the gui renderer changes them.
    pub fn draw(&self, gl: &glow::Context, uniforms: &Uniforms) {
        unsafe {
            gl.use_program(Some(self.program));
            gl.bind_vertex_array(Some(self.vertex_array));
            gl.bind_buffer(glow::UNIFORM_BUFFER, Some(self.uniform_buffer));
            gl.bind_buffer_base(
                glow::UNIFORM_BUFFER,
                UNIFORM_BINDING,
                Some(self.uniform_buffer),
            );
            gl.buffer_data_u8_slice(glow::UNIFORM_BUFFER, uniforms.as_bytes(), glow::STREAM_DRAW);

            gl.draw_arrays_instanced(glow::TRIANGLES, 0, 3, uniforms.num_instances);

            gl.bind_vertex_array(None);
            gl.use_program(None);
        }
    }

    pub fn destroy(self, gl: &glow::Context) {
        log::debug!("Destroying triangles program");
        unsafe {
            gl.delete_vertex_array(self.vertex_array);
            gl.delete_buffer(self.uniform_buffer);
            gl.delete_program(self.program);
        }
    }
}

fn compile_shader(gl: &glow::Context, kind: u32, source: &str) -> AppResult<glow::Shader> {
    unsafe {
        let shader = gl.create_shader(kind).map_err(AppError::Gl)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(AppError::Gl(format!("Compile shader failed: {}", log)));
        }
        Ok(shader)
    }
}

fn create_program(gl: &glow::Context) -> AppResult<glow::Program> {
    let vertex = compile_shader(gl, glow::VERTEX_SHADER, VERTEX_SHADER)?;
    let fragment = match compile_shader(gl, glow::FRAGMENT_SHADER, FRAGMENT_SHADER) {
        Ok(shader) => shader,
        Err(error) => {
            unsafe { gl.delete_shader(vertex) };
            return Err(error);
        }
    };

    unsafe {
        let program = match gl.create_program() {
            Ok(program) => program,
            Err(error) => {
                gl.delete_shader(vertex);
                gl.delete_shader(fragment);
                return Err(AppError::Gl(error));
            }
        };
        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        gl.link_program(program);

        let linked = gl.get_program_link_status(program);
        gl.detach_shader(program, vertex);
        gl.detach_shader(program, fragment);
        gl.delete_shader(vertex);
        gl.delete_shader(fragment);

        if !linked {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(AppError::Gl(format!("Link program failed: {}", log)));
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-5, "{} != {}", a, b);
    }

    #[test]
    fn uniforms_match_the_std140_block() {
        assert_eq!(size_of::<Uniforms>(), 16);
        assert_eq!(Uniforms::default().as_bytes().len(), 16);

        let bytes = Uniforms::default().as_bytes().to_vec();
        assert_eq!(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 60);
        assert_eq!(
            f32::from_ne_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            0.9
        );
    }

    #[test]
    fn block_name_is_the_one_declared_by_the_shader() {
        let declaration = format!("uniform {} {{", UNIFORM_BLOCK_NAME);
        assert!(VERTEX_SHADER.contains(&declaration));
    }

    #[test]
    fn default_ring_is_evenly_spaced() {
        let uniforms = Uniforms::default();
        let step = TAU / 60.0;

        for index in 0..uniforms.num_instances {
            let instance = uniforms.instance(index);
            assert_close(instance.angle, index as f32 * step);

            let [x, y] = instance.center;
            assert_close((x * x + y * y).sqrt(), 0.9);

            let t = (instance.angle / 2.0).sin();
            assert_eq!(instance.color[0], 1.0);
            assert_close(instance.color[1], t);
            assert_close(instance.color[2], 1.0 - t);
            assert_eq!(instance.color[3], 1.0);
        }
    }

    #[test]
    fn triangles_are_scaled_by_size() {
        let uniforms = Uniforms::default();
        let instance = uniforms.instance(0);

        // No rotation at angle 0
        assert_close(instance.vertices[0][0], 0.9 - 0.025);
        assert_close(instance.vertices[0][1], -0.025);
        assert_close(instance.vertices[1][0], 0.9);
        assert_close(instance.vertices[1][1], 0.05);
        assert_close(instance.vertices[2][0], 0.9 + 0.025);
        assert_close(instance.vertices[2][1], -0.025);
    }

    #[test]
    fn triangles_point_along_their_angle() {
        let uniforms = Uniforms::default();
        let instance = uniforms.instance(15);

        // A quarter turn maps the apex (0, 2) onto (-2, 0)
        assert_close(instance.angle, TAU / 4.0);
        assert_close(instance.vertices[1][0], -2.0 * 0.025);
        assert_close(instance.vertices[1][1], 0.9);
    }

    #[test]
    fn rotation_moves_positions_but_not_colors() {
        let still = Uniforms::default();
        let rotated = Uniforms {
            rotation: 1.0,
            ..still
        };

        let a = still.instance(7);
        let b = rotated.instance(7);
        assert_close(b.angle, a.angle + 1.0);
        for (a, b) in a.color.iter().zip(b.color) {
            assert_close(*a, b);
        }
        assert!((a.center[0] - b.center[0]).abs() > 1e-3);
    }

    #[test]
    fn parameters_are_clamped_to_the_sliders() {
        let uniforms = Uniforms {
            num_instances: 1000,
            rotation: -1.0,
            radius: 2.0,
            size: 0.5,
        }
        .clamped();

        assert_eq!(uniforms.num_instances, 360);
        assert_eq!(uniforms.rotation, 0.0);
        assert_eq!(uniforms.radius, 1.0);
        assert_eq!(uniforms.size, 0.5);
        assert_eq!(Uniforms::default().clamped(), Uniforms::default());
    }
}
