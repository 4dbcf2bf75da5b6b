//! The graphics device seam.
//!
//! Modelled on an EGL/GLES style API: a config is chosen, a context is
//! created from it, surfaces are created against the context and exactly one
//! (context, surface) pair is current at a time. Objects are referred to by
//! opaque handles that are only meaningful to the device that issued them.

use glam::Mat4;
use reelcut_core::{FrameBuffer, Result};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw id, for logging.
            pub fn id(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// A framebuffer configuration.
    ConfigHandle
);
handle!(
    /// A rendering context.
    ContextHandle
);
handle!(
    /// A window or pbuffer surface.
    SurfaceHandle
);
handle!(
    /// A linked shader program.
    ProgramHandle
);
handle!(
    /// A texture sampled by the compositor.
    TextureHandle
);

/// Monotonic id source shared by device implementations.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub(crate) fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

/// What a surface renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// On-screen (here: encoder input) surface
    Window,
    /// Off-screen surface
    Pbuffer,
}

/// A graphics backend.
///
/// Every method runs on the thread that owns the device. Creation methods
/// return handles, destruction methods consume them; destroying an unknown
/// handle is a no-op.
pub trait GraphicsDevice: Send {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Pick an RGBA8, renderable configuration.
    fn choose_config(&mut self) -> Result<ConfigHandle>;

    fn create_context(&mut self, config: ConfigHandle) -> Result<ContextHandle>;

    fn create_surface(
        &mut self,
        context: ContextHandle,
        kind: SurfaceKind,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle>;

    /// Bind `surface` under `context`, or unbind everything with `None`.
    fn make_current(&mut self, binding: Option<(ContextHandle, SurfaceHandle)>) -> Result<()>;

    /// Compile and link a program from WGSL source with `vs_main` and
    /// `fs_main` entry points.
    fn create_program(&mut self, source: &str) -> Result<ProgramHandle>;

    fn create_texture(&mut self) -> Result<TextureHandle>;

    /// Replace the texture's contents with `frame`.
    fn upload_texture(&mut self, texture: TextureHandle, frame: &FrameBuffer) -> Result<()>;

    /// Draw a full-surface quad sampling `texture` into the current surface.
    /// Texture coordinates are transformed by `tex_matrix`.
    fn draw_quad(
        &mut self,
        program: ProgramHandle,
        texture: TextureHandle,
        tex_matrix: &Mat4,
    ) -> Result<()>;

    /// Read the contents of `surface` back to the CPU.
    fn read_surface(&mut self, surface: SurfaceHandle) -> Result<FrameBuffer>;

    fn destroy_program(&mut self, program: ProgramHandle);

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn destroy_surface(&mut self, surface: SurfaceHandle);

    fn destroy_context(&mut self, context: ContextHandle);
}

/// Sample `source` at texture coordinate (`u`, `v`) with nearest filtering
/// and clamp-to-edge addressing.
pub(crate) fn sample_nearest(source: &FrameBuffer, u: f32, v: f32) -> [u8; 4] {
    if source.width == 0 || source.height == 0 {
        return [0, 0, 0, 0];
    }
    let x = (u * source.width as f32).floor().clamp(0.0, (source.width - 1) as f32) as u32;
    let y = (v * source.height as f32).floor().clamp(0.0, (source.height - 1) as f32) as u32;
    source.pixel(x, y)
}
