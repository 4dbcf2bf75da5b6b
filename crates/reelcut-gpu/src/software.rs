//! CPU implementation of [`GraphicsDevice`].
//!
//! Renders with nearest-neighbour sampling into in-memory surfaces and keeps
//! live-object counters that outlive the device, so callers can check for
//! leaks after the device has been handed off and dropped.

use glam::{Mat4, Vec4};
use parking_lot::Mutex;
use reelcut_core::{FrameBuffer, ReelError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::device::{
    sample_nearest, ConfigHandle, ContextHandle, GraphicsDevice, HandleAllocator, ProgramHandle,
    SurfaceHandle, SurfaceKind, TextureHandle,
};

/// Device operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ChooseConfig,
    CreateContext,
    CreateWindowSurface,
    CreatePbufferSurface,
    MakeCurrent,
    CreateProgram,
    CreateTexture,
    Draw,
}

/// Live-object counters shared with the creator of a [`SoftwareDevice`].
#[derive(Debug, Default)]
pub struct DeviceStats {
    contexts: AtomicI64,
    surfaces: AtomicI64,
    programs: AtomicI64,
    textures: AtomicI64,
    draws: AtomicU64,
    readbacks: AtomicU64,
    rebinds: AtomicU64,
}

impl DeviceStats {
    pub fn live_contexts(&self) -> i64 {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn live_surfaces(&self) -> i64 {
        self.surfaces.load(Ordering::SeqCst)
    }

    pub fn live_programs(&self) -> i64 {
        self.programs.load(Ordering::SeqCst)
    }

    pub fn live_textures(&self) -> i64 {
        self.textures.load(Ordering::SeqCst)
    }

    /// Sum of every live object.
    pub fn live_objects(&self) -> i64 {
        self.live_contexts() + self.live_surfaces() + self.live_programs() + self.live_textures()
    }

    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn readbacks(&self) -> u64 {
        self.readbacks.load(Ordering::SeqCst)
    }

    /// Number of `make_current` calls that bound a surface.
    pub fn rebinds(&self) -> u64 {
        self.rebinds.load(Ordering::SeqCst)
    }
}

struct Surface {
    context: ContextHandle,
    pixels: FrameBuffer,
}

/// A [`GraphicsDevice`] that renders on the CPU.
pub struct SoftwareDevice {
    ids: HandleAllocator,
    stats: Arc<DeviceStats>,
    failures: Arc<Mutex<HashSet<FailPoint>>>,
    configs: HashSet<ConfigHandle>,
    contexts: HashSet<ContextHandle>,
    surfaces: HashMap<SurfaceHandle, Surface>,
    programs: HashSet<ProgramHandle>,
    textures: HashMap<TextureHandle, FrameBuffer>,
    current: Option<(ContextHandle, SurfaceHandle)>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            ids: HandleAllocator::default(),
            stats: Arc::new(DeviceStats::default()),
            failures: Arc::new(Mutex::new(HashSet::new())),
            configs: HashSet::new(),
            contexts: HashSet::new(),
            surfaces: HashMap::new(),
            programs: HashSet::new(),
            textures: HashMap::new(),
            current: None,
        }
    }

    /// Make `point` fail from now on.
    pub fn fail_at(self, point: FailPoint) -> Self {
        self.failures.lock().insert(point);
        self
    }

    /// Shared counters; stays valid after the device is dropped.
    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }

    /// Handle for toggling fail points after the device is handed off.
    pub fn failures(&self) -> Arc<Mutex<HashSet<FailPoint>>> {
        Arc::clone(&self.failures)
    }

    /// The currently bound (context, surface) pair.
    pub fn current(&self) -> Option<(ContextHandle, SurfaceHandle)> {
        self.current
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if self.failures.lock().contains(&point) {
            Err(ReelError::Gpu(format!("injected failure at {:?}", point)))
        } else {
            Ok(())
        }
    }
}

const REQUIRED_ENTRY_POINTS: [&str; 2] = ["fn vs_main", "fn fs_main"];

impl GraphicsDevice for SoftwareDevice {
    fn name(&self) -> &str {
        "software"
    }

    fn choose_config(&mut self) -> Result<ConfigHandle> {
        self.check(FailPoint::ChooseConfig)?;
        let config = ConfigHandle(self.ids.next());
        self.configs.insert(config);
        Ok(config)
    }

    fn create_context(&mut self, config: ConfigHandle) -> Result<ContextHandle> {
        self.check(FailPoint::CreateContext)?;
        if !self.configs.contains(&config) {
            return Err(ReelError::Gpu(format!("unknown config {}", config.id())));
        }
        let context = ContextHandle(self.ids.next());
        self.contexts.insert(context);
        self.stats.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(context)
    }

    fn create_surface(
        &mut self,
        context: ContextHandle,
        kind: SurfaceKind,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle> {
        self.check(match kind {
            SurfaceKind::Window => FailPoint::CreateWindowSurface,
            SurfaceKind::Pbuffer => FailPoint::CreatePbufferSurface,
        })?;
        if !self.contexts.contains(&context) {
            return Err(ReelError::Gpu(format!("unknown context {}", context.id())));
        }
        if width == 0 || height == 0 {
            return Err(ReelError::Gpu(format!(
                "surface size {}x{} is empty",
                width, height
            )));
        }
        let surface = SurfaceHandle(self.ids.next());
        self.surfaces.insert(
            surface,
            Surface {
                context,
                pixels: FrameBuffer::new(width, height),
            },
        );
        self.stats.surfaces.fetch_add(1, Ordering::SeqCst);
        Ok(surface)
    }

    fn make_current(&mut self, binding: Option<(ContextHandle, SurfaceHandle)>) -> Result<()> {
        self.check(FailPoint::MakeCurrent)?;
        if let Some((context, surface)) = binding {
            let owner = self
                .surfaces
                .get(&surface)
                .map(|s| s.context)
                .ok_or_else(|| ReelError::Gpu(format!("unknown surface {}", surface.id())))?;
            if owner != context {
                return Err(ReelError::Gpu(format!(
                    "surface {} belongs to another context",
                    surface.id()
                )));
            }
            self.stats.rebinds.fetch_add(1, Ordering::SeqCst);
        }
        self.current = binding;
        Ok(())
    }

    fn create_program(&mut self, source: &str) -> Result<ProgramHandle> {
        self.check(FailPoint::CreateProgram)?;
        if let Some(missing) = REQUIRED_ENTRY_POINTS.iter().find(|e| !source.contains(*e)) {
            return Err(ReelError::Shader(format!("missing `{}`", missing)));
        }
        let program = ProgramHandle(self.ids.next());
        self.programs.insert(program);
        self.stats.programs.fetch_add(1, Ordering::SeqCst);
        Ok(program)
    }

    fn create_texture(&mut self) -> Result<TextureHandle> {
        self.check(FailPoint::CreateTexture)?;
        let texture = TextureHandle(self.ids.next());
        self.textures.insert(texture, FrameBuffer::new(1, 1));
        self.stats.textures.fetch_add(1, Ordering::SeqCst);
        Ok(texture)
    }

    fn upload_texture(&mut self, texture: TextureHandle, frame: &FrameBuffer) -> Result<()> {
        let slot = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| ReelError::Gpu(format!("unknown texture {}", texture.id())))?;
        slot.clone_from(frame);
        Ok(())
    }

    fn draw_quad(
        &mut self,
        program: ProgramHandle,
        texture: TextureHandle,
        tex_matrix: &Mat4,
    ) -> Result<()> {
        self.check(FailPoint::Draw)?;
        if !self.programs.contains(&program) {
            return Err(ReelError::Gpu(format!("unknown program {}", program.id())));
        }
        let (_, target) = self
            .current
            .ok_or_else(|| ReelError::Gpu("draw with no current surface".into()))?;
        let source = self
            .textures
            .get(&texture)
            .ok_or_else(|| ReelError::Gpu(format!("unknown texture {}", texture.id())))?;
        let surface = self
            .surfaces
            .get_mut(&target)
            .ok_or_else(|| ReelError::Gpu(format!("unknown surface {}", target.id())))?;

        let out = &mut surface.pixels;
        let (w, h) = (out.width as f32, out.height as f32);
        for y in 0..out.height {
            for x in 0..out.width {
                let base = Vec4::new((x as f32 + 0.5) / w, (y as f32 + 0.5) / h, 0.0, 1.0);
                let uv = *tex_matrix * base;
                out.set_pixel(x, y, sample_nearest(source, uv.x, uv.y));
            }
        }
        self.stats.draws.fetch_add(1, Ordering::SeqCst);
        trace!(surface = target.id(), "software draw");
        Ok(())
    }

    fn read_surface(&mut self, surface: SurfaceHandle) -> Result<FrameBuffer> {
        let s = self
            .surfaces
            .get(&surface)
            .ok_or_else(|| ReelError::Gpu(format!("unknown surface {}", surface.id())))?;
        self.stats.readbacks.fetch_add(1, Ordering::SeqCst);
        Ok(s.pixels.clone())
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program) {
            self.stats.programs.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.stats.textures.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        if self.surfaces.remove(&surface).is_some() {
            self.stats.surfaces.fetch_sub(1, Ordering::SeqCst);
            if self.current.map(|(_, s)| s) == Some(surface) {
                self.current = None;
            }
        }
    }

    fn destroy_context(&mut self, context: ContextHandle) {
        if self.contexts.remove(&context) {
            self.stats.contexts.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(device: &mut SoftwareDevice, w: u32, h: u32) -> (ContextHandle, SurfaceHandle) {
        let config = device.choose_config().unwrap();
        let ctx = device.create_context(config).unwrap();
        let surface = device.create_surface(ctx, SurfaceKind::Window, w, h).unwrap();
        device.make_current(Some((ctx, surface))).unwrap();
        (ctx, surface)
    }

    const SHADER: &str = "fn vs_main() {} fn fs_main() {}";

    #[test]
    fn test_identity_draw_copies_pixels() {
        let mut device = SoftwareDevice::new();
        let (_, surface) = setup(&mut device, 8, 4);
        let program = device.create_program(SHADER).unwrap();
        let texture = device.create_texture().unwrap();
        let frame = FrameBuffer::test_pattern(8, 4);
        device.upload_texture(texture, &frame).unwrap();
        device.draw_quad(program, texture, &Mat4::IDENTITY).unwrap();
        assert_eq!(device.read_surface(surface).unwrap(), frame);
    }

    #[test]
    fn test_draw_scales_to_surface() {
        let mut device = SoftwareDevice::new();
        let (_, surface) = setup(&mut device, 4, 4);
        let program = device.create_program(SHADER).unwrap();
        let texture = device.create_texture().unwrap();
        device
            .upload_texture(texture, &FrameBuffer::solid(2, 2, [9, 8, 7, 255]))
            .unwrap();
        device.draw_quad(program, texture, &Mat4::IDENTITY).unwrap();
        let out = device.read_surface(surface).unwrap();
        assert_eq!(out.width, 4);
        assert_eq!(out.pixel(3, 3), [9, 8, 7, 255]);
    }

    #[test]
    fn test_matrix_flips_vertically() {
        let mut device = SoftwareDevice::new();
        let (_, surface) = setup(&mut device, 1, 2);
        let program = device.create_program(SHADER).unwrap();
        let texture = device.create_texture().unwrap();
        let mut frame = FrameBuffer::new(1, 2);
        frame.set_pixel(0, 0, [255, 0, 0, 255]);
        frame.set_pixel(0, 1, [0, 0, 255, 255]);
        device.upload_texture(texture, &frame).unwrap();
        let flip = Mat4::from_translation(glam::Vec3::new(0.0, 1.0, 0.0))
            * Mat4::from_scale(glam::Vec3::new(1.0, -1.0, 1.0));
        device.draw_quad(program, texture, &flip).unwrap();
        let out = device.read_surface(surface).unwrap();
        assert_eq!(out.pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(out.pixel(0, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn test_stats_track_lifetimes() {
        let mut device = SoftwareDevice::new();
        let stats = device.stats();
        let (ctx, surface) = setup(&mut device, 2, 2);
        let texture = device.create_texture().unwrap();
        assert_eq!(stats.live_objects(), 3);
        device.destroy_texture(texture);
        device.destroy_texture(texture);
        device.destroy_surface(surface);
        assert!(device.current().is_none());
        device.destroy_context(ctx);
        drop(device);
        assert_eq!(stats.live_objects(), 0);
    }

    #[test]
    fn test_fail_points() {
        let mut device = SoftwareDevice::new().fail_at(FailPoint::CreatePbufferSurface);
        let config = device.choose_config().unwrap();
        let ctx = device.create_context(config).unwrap();
        assert!(device.create_surface(ctx, SurfaceKind::Window, 2, 2).is_ok());
        let err = device
            .create_surface(ctx, SurfaceKind::Pbuffer, 1, 1)
            .unwrap_err();
        assert!(matches!(err, ReelError::Gpu(_)));
    }

    #[test]
    fn test_program_requires_entry_points() {
        let mut device = SoftwareDevice::new();
        assert!(matches!(
            device.create_program("fn vs_main() {}"),
            Err(ReelError::Shader(_))
        ));
    }

    #[test]
    fn test_draw_without_current_surface() {
        let mut device = SoftwareDevice::new();
        let program = device.create_program(SHADER).unwrap();
        let texture = device.create_texture().unwrap();
        assert!(device.draw_quad(program, texture, &Mat4::IDENTITY).is_err());
    }
}
