//! Render surface bridge.
//!
//! One graphics context is shared by two surfaces: a window surface bound to
//! the video encoder's input, and a 1x1 pbuffer surface that is current while
//! decoded frames are uploaded. Switching between them always unbinds first
//! and then binds the requested surface under the same context.

use glam::Mat4;
use reelcut_core::{FrameBuffer, FrameSink, ReelError, Result};
use std::fmt;
use tracing::{debug, trace, warn};

use crate::device::{
    ContextHandle, GraphicsDevice, SurfaceHandle, SurfaceKind, TextureHandle,
};

/// Which surface is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRole {
    /// The pbuffer; used while uploading decoder output
    Decoder,
    /// The window surface feeding the encoder
    Encoder,
}

impl fmt::Display for SurfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceRole::Decoder => f.write_str("decoder"),
            SurfaceRole::Encoder => f.write_str("encoder"),
        }
    }
}

fn gpu_error(step: &str, err: ReelError) -> ReelError {
    match err {
        ReelError::Gpu(msg) => ReelError::Gpu(format!("{}: {}", step, msg)),
        other => ReelError::Gpu(format!("{}: {}", step, other)),
    }
}

/// Objects created so far during construction.
#[derive(Default)]
struct Partial {
    context: Option<ContextHandle>,
    window: Option<SurfaceHandle>,
    pbuffer: Option<SurfaceHandle>,
}

impl Partial {
    fn unwind(self, device: &mut dyn GraphicsDevice) {
        if let Some(s) = self.pbuffer {
            device.destroy_surface(s);
        }
        if let Some(s) = self.window {
            device.destroy_surface(s);
        }
        if let Some(c) = self.context {
            device.destroy_context(c);
        }
    }
}

/// Owns the context, both surfaces and the encoder's input sink for one run.
pub struct RenderSurfaceBridge {
    device: Option<Box<dyn GraphicsDevice>>,
    context: ContextHandle,
    window: SurfaceHandle,
    pbuffer: SurfaceHandle,
    sink: Option<Box<dyn FrameSink>>,
    width: u32,
    height: u32,
    role: Option<SurfaceRole>,
    presentation_time_ns: Option<i64>,
    frames_swapped: u64,
}

impl RenderSurfaceBridge {
    /// Build the context and surfaces around `sink`. On failure everything
    /// created so far, the sink included, is released before returning.
    pub fn new(mut device: Box<dyn GraphicsDevice>, mut sink: Box<dyn FrameSink>) -> Result<Self> {
        let (width, height) = (sink.width(), sink.height());
        let mut partial = Partial::default();
        if let Err(e) = Self::build(device.as_mut(), width, height, &mut partial) {
            partial.unwind(device.as_mut());
            sink.release();
            return Err(e);
        }
        let (Some(context), Some(window), Some(pbuffer)) =
            (partial.context, partial.window, partial.pbuffer)
        else {
            partial.unwind(device.as_mut());
            sink.release();
            return Err(ReelError::Internal("bridge construction incomplete".into()));
        };
        debug!(
            device = device.name(),
            width,
            height,
            context = context.id(),
            "render surface bridge created"
        );
        Ok(Self {
            device: Some(device),
            context,
            window,
            pbuffer,
            sink: Some(sink),
            width,
            height,
            role: None,
            presentation_time_ns: None,
            frames_swapped: 0,
        })
    }

    fn build(
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        partial: &mut Partial,
    ) -> Result<()> {
        let config = device
            .choose_config()
            .map_err(|e| gpu_error("choose config", e))?;
        let context = device
            .create_context(config)
            .map_err(|e| gpu_error("create context", e))?;
        partial.context = Some(context);
        partial.window = Some(
            device
                .create_surface(context, SurfaceKind::Window, width, height)
                .map_err(|e| gpu_error("create window surface", e))?,
        );
        partial.pbuffer = Some(
            device
                .create_surface(context, SurfaceKind::Pbuffer, 1, 1)
                .map_err(|e| gpu_error("create pbuffer surface", e))?,
        );
        Ok(())
    }

    pub(crate) fn device_mut(&mut self) -> Result<&mut dyn GraphicsDevice> {
        match self.device.as_mut() {
            Some(device) => Ok(device.as_mut()),
            None => Err(ReelError::InvalidState("bridge already released".into())),
        }
    }

    pub(crate) fn require_role(&self, role: SurfaceRole, op: &str) -> Result<()> {
        if self.role == Some(role) {
            Ok(())
        } else {
            Err(ReelError::InvalidState(format!(
                "{} needs the {} surface current, have {:?}",
                op, role, self.role
            )))
        }
    }

    /// Currently bound role.
    pub fn role(&self) -> Option<SurfaceRole> {
        self.role
    }

    /// Size of the encoder surface.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames_swapped(&self) -> u64 {
        self.frames_swapped
    }

    /// Unbind, then bind the surface for `role`.
    pub fn make_current(&mut self, role: SurfaceRole) -> Result<()> {
        let context = self.context;
        let surface = match role {
            SurfaceRole::Decoder => self.pbuffer,
            SurfaceRole::Encoder => self.window,
        };
        let device = self.device_mut()?;
        device
            .make_current(None)
            .map_err(|e| gpu_error("unbind", e))?;
        device
            .make_current(Some((context, surface)))
            .map_err(|e| gpu_error("make current", e))?;
        trace!(from = ?self.role, to = %role, "surface switch");
        self.role = Some(role);
        Ok(())
    }

    /// Upload a decoded frame into `texture`, returning its texture matrix.
    pub fn update_tex_image(
        &mut self,
        texture: TextureHandle,
        frame: &FrameBuffer,
        transform: Mat4,
    ) -> Result<Mat4> {
        self.require_role(SurfaceRole::Decoder, "update_tex_image")?;
        self.device_mut()?.upload_texture(texture, frame)?;
        Ok(transform)
    }

    /// Timestamp for the next swap.
    pub fn set_presentation_time(&mut self, presentation_time_ns: i64) {
        self.presentation_time_ns = Some(presentation_time_ns);
    }

    /// Hand the rendered encoder surface to the encoder.
    pub fn swap_buffers(&mut self) -> Result<()> {
        self.require_role(SurfaceRole::Encoder, "swap_buffers")?;
        let pts = self.presentation_time_ns.take().ok_or_else(|| {
            ReelError::InvalidState("swap_buffers without a presentation time".into())
        })?;
        let window = self.window;
        let frame = self.device_mut()?.read_surface(window)?;
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| ReelError::InvalidState("bridge already released".into()))?;
        sink.submit(&frame, pts)?;
        self.frames_swapped += 1;
        Ok(())
    }

    fn teardown(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if let Err(e) = device.make_current(None) {
            warn!("unbinding surfaces during teardown failed: {}", e);
        }
        device.destroy_surface(self.pbuffer);
        device.destroy_surface(self.window);
        device.destroy_context(self.context);
        if let Some(mut sink) = self.sink.take() {
            sink.release();
        }
        self.role = None;
        debug!(frames = self.frames_swapped, "render surface bridge released");
    }

    /// Release surfaces, context and the encoder sink.
    pub fn release(mut self) {
        self.teardown();
    }
}

impl Drop for RenderSurfaceBridge {
    fn drop(&mut self) {
        self.teardown();
    }
}
