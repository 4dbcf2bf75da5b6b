//! Reelcut GPU - render surface bridge and texture compositor
//!
//! Decoded frames are uploaded into one texture and drawn into a surface
//! bound to the video encoder's input. Two devices implement the graphics
//! seam: wgpu for real exports and a CPU device used by tests and headless
//! runs.

pub mod bridge;
pub mod compositor;
pub mod device;
pub mod software;
pub mod testing;
pub mod wgpu_device;

pub use bridge::{RenderSurfaceBridge, SurfaceRole};
pub use compositor::TextureCompositor;
pub use device::{GraphicsDevice, SurfaceKind, TextureHandle};
pub use software::{DeviceStats, FailPoint, SoftwareDevice};
pub use wgpu_device::WgpuDevice;
