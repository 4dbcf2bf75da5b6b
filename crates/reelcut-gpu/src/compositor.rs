//! Passthrough texture compositor.
//!
//! Draws the decoder's external texture as a single full-frame quad into
//! whatever surface the bridge has current. One program and one texture are
//! created up front and reused for every frame of the run.

use glam::Mat4;
use reelcut_core::Result;
use tracing::debug;

use crate::bridge::{RenderSurfaceBridge, SurfaceRole};
use crate::device::{ProgramHandle, TextureHandle};

/// Full-frame quad; texture coordinates pass through `tex_matrix`.
pub const PASSTHROUGH_SHADER: &str = r#"
struct Uniforms {
    tex_matrix: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var frame_texture: texture_2d<f32>;
@group(0) @binding(2) var frame_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    // Two triangles covering clip space, uv origin at the top-left.
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
    );
    let corner = corners[index];
    var out: VertexOutput;
    out.position = vec4<f32>(corner.x * 2.0 - 1.0, 1.0 - corner.y * 2.0, 0.0, 1.0);
    out.uv = (uniforms.tex_matrix * vec4<f32>(corner, 0.0, 1.0)).xy;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(frame_texture, frame_sampler, in.uv);
}
"#;

/// Owns the program and the external texture for one export run.
pub struct TextureCompositor {
    program: ProgramHandle,
    texture: TextureHandle,
    released: bool,
}

impl TextureCompositor {
    /// Create the program and texture in the bridge's context.
    pub fn new(bridge: &mut RenderSurfaceBridge) -> Result<Self> {
        let device = bridge.device_mut()?;
        let texture = device.create_texture()?;
        let program = match device.create_program(PASSTHROUGH_SHADER) {
            Ok(p) => p,
            Err(e) => {
                device.destroy_texture(texture);
                return Err(e);
            }
        };
        debug!(program = program.id(), texture = texture.id(), "compositor ready");
        Ok(Self {
            program,
            texture,
            released: false,
        })
    }

    /// The texture decoded frames are uploaded into.
    pub fn external_texture(&self) -> TextureHandle {
        self.texture
    }

    /// Draw the external texture into the encoder surface.
    pub fn draw(&self, bridge: &mut RenderSurfaceBridge, tex_matrix: &Mat4) -> Result<()> {
        bridge.require_role(SurfaceRole::Encoder, "draw")?;
        bridge
            .device_mut()?
            .draw_quad(self.program, self.texture, tex_matrix)
    }

    /// Delete the program and texture. Idempotent.
    pub fn release(&mut self, bridge: &mut RenderSurfaceBridge) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(device) = bridge.device_mut() {
            device.destroy_program(self.program);
            device.destroy_texture(self.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::{FailPoint, SoftwareDevice};
    use crate::testing::CaptureSink;
    use reelcut_core::FrameBuffer;

    #[test]
    fn test_draw_reaches_encoder_sink() {
        let device = SoftwareDevice::new();
        let stats = device.stats();
        let (sink, frames) = CaptureSink::new(4, 2);
        let mut bridge = RenderSurfaceBridge::new(Box::new(device), Box::new(sink)).unwrap();
        let mut compositor = TextureCompositor::new(&mut bridge).unwrap();

        let frame = FrameBuffer::test_pattern(4, 2);
        bridge.make_current(SurfaceRole::Decoder).unwrap();
        let matrix = bridge
            .update_tex_image(compositor.external_texture(), &frame, Mat4::IDENTITY)
            .unwrap();
        bridge.make_current(SurfaceRole::Encoder).unwrap();
        compositor.draw(&mut bridge, &matrix).unwrap();
        bridge.set_presentation_time(1_000_000);
        bridge.swap_buffers().unwrap();

        let captured = frames.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, frame);
        assert_eq!(captured[0].1, 1_000_000);
        drop(captured);

        compositor.release(&mut bridge);
        compositor.release(&mut bridge);
        bridge.release();
        assert_eq!(stats.live_objects(), 0);
        assert_eq!(stats.draws(), 1);
    }

    #[test]
    fn test_draw_requires_encoder_role() {
        let (sink, _) = CaptureSink::new(2, 2);
        let mut bridge =
            RenderSurfaceBridge::new(Box::new(SoftwareDevice::new()), Box::new(sink)).unwrap();
        let compositor = TextureCompositor::new(&mut bridge).unwrap();
        bridge.make_current(SurfaceRole::Decoder).unwrap();
        assert!(compositor.draw(&mut bridge, &Mat4::IDENTITY).is_err());
    }

    #[test]
    fn test_program_failure_releases_texture() {
        let device = SoftwareDevice::new().fail_at(FailPoint::CreateProgram);
        let stats = device.stats();
        let (sink, _) = CaptureSink::new(2, 2);
        let mut bridge = RenderSurfaceBridge::new(Box::new(device), Box::new(sink)).unwrap();
        assert!(TextureCompositor::new(&mut bridge).is_err());
        assert_eq!(stats.live_textures(), 0);
        bridge.release();
        assert_eq!(stats.live_objects(), 0);
    }
}
