// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use basalt_render::{PresentTarget, RenderSize, Resize, WindowHost};
use tracing::{debug, info, warn};

use crate::buffer::VertexBuffer;
use crate::catalog::enumerate_capabilities;
use crate::commands::{CommandPool, DrawPass};
use crate::config::UserConfig;
use crate::device::{Device, DeviceConfig};
use crate::error::{BuildError, Error, Result};
use crate::frame::{Acquire, FrameBackend, FrameDriver, FrameOutcome, Present};
use crate::framebuffer::Framebuffers;
use crate::instance::{Instance, InstanceConfig};
use crate::negotiate::{negotiate, DefaultPolicy, SelectedHardware, SelectionPolicy};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::recreate::{recreate, Recreation, SwapchainHost, Trigger};
use crate::shader::ShaderRegistry;
use crate::surface::Surface;
use crate::swapchain::{ExtentBounds, Swapchain, SwapchainConfig};
use crate::sync::{FrameSlot, FrameSlots};

/// Vertices drawn when no vertex buffer is bound. The vertex shader builds
/// them from `gl_VertexIndex`.
pub const GENERATED_VERTEX_COUNT: u32 = 3;

pub enum ShaderSource {
    Bytes { key: String, bytes: Vec<u8> },
    File { key: String, path: PathBuf },
}

impl ShaderSource {
    pub fn bytes(key: impl Into<String>, bytes: &[u8]) -> Self {
        ShaderSource::Bytes {
            key: key.into(),
            bytes: bytes.to_vec(),
        }
    }

    pub fn file(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ShaderSource::File {
            key: key.into(),
            path: path.into(),
        }
    }
}

/// Raw vertex bytes plus how many vertices they hold.
pub struct VertexData {
    pub bytes: Vec<u8>,
    pub count: u32,
}

impl VertexData {
    pub fn from_slice<T: bytemuck::Pod>(vertices: &[T]) -> Self {
        Self {
            bytes: bytemuck::cast_slice(vertices).to_vec(),
            count: vertices.len() as u32,
        }
    }
}

/// Everything the renderer needs besides the window and `UserConfig`.
pub struct RendererSetup {
    pub instance: InstanceConfig,
    pub pipeline: PipelineConfig,
    pub shaders: Vec<ShaderSource>,
    pub vertices: Option<VertexData>,
    pub policy: Box<dyn SelectionPolicy>,
    pub clear_color: [f32; 4],
}

impl RendererSetup {
    pub fn new(pipeline: PipelineConfig) -> Self {
        Self {
            instance: InstanceConfig::default(),
            pipeline,
            shaders: Vec::new(),
            vertices: None,
            policy: Box::new(DefaultPolicy),
            clear_color: [0.02, 0.02, 0.03, 1.0],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The swapchain was rebuilt instead of drawing.
    Recreated,
    /// The surface went stale during a rebuild; retried next call.
    Skipped,
    Closed,
}

/// Device-level objects plus the swapchain-dependent chain. Fields drop
/// top to bottom, children before the objects they were created from.
struct GpuState {
    frames: Option<FrameSlots>,
    framebuffers: Option<Framebuffers>,
    pipeline: Option<Pipeline>,
    swapchain: Option<Swapchain>,
    commands: CommandPool,
    vertices: Option<VertexBuffer>,
    shaders: ShaderRegistry,
    pipeline_config: PipelineConfig,
    clear: [f32; 4],
    device: Arc<Device>,
    surface: Arc<Surface>,
    // Kept so the instance outlives everything above even if the device
    // is the last other owner.
    _instance: Arc<Instance>,
}

fn missing(context: &'static str) -> Error {
    Error::Fatal {
        context,
        result: vk::Result::ERROR_INITIALIZATION_FAILED,
    }
}

/// A swapchain created against a surface that changed underneath it.
fn stale_on_out_of_date(err: Error) -> Error {
    match err {
        Error::Build(BuildError::CreationFailure {
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
            ..
        }) => Error::SurfaceStale,
        err => err,
    }
}

/// A suboptimal image is still drawn and presented. Its semaphore is
/// signaled and only a submit waits it off, so the frame goes ahead and
/// present reports the swapchain stale.
fn classify_acquire(acquired: ash::prelude::VkResult<(u32, bool)>) -> Result<Acquire> {
    match acquired {
        Ok((image, suboptimal)) => {
            if suboptimal {
                debug!(image, "acquired suboptimal image");
            }
            Ok(Acquire::Image(image))
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
        Err(result) => Err(Error::Fatal {
            context: "acquire_next_image",
            result,
        }),
    }
}

fn classify_present(presented: ash::prelude::VkResult<bool>) -> Result<Present> {
    match presented {
        Ok(false) => Ok(Present::Done),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
        Err(result) => Err(Error::Fatal {
            context: "queue_present",
            result,
        }),
    }
}

impl GpuState {
    fn frame_slot(&self, slot: usize) -> Result<FrameSlot> {
        self.frames
            .as_ref()
            .and_then(|f| f.get(slot))
            .copied()
            .ok_or_else(|| missing("frame slot"))
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(|| missing("swapchain"))
    }
}

impl FrameBackend for GpuState {
    fn slot_count(&self) -> usize {
        self.frames.as_ref().map_or(0, FrameSlots::len)
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.frames
            .as_ref()
            .ok_or_else(|| missing("frame slots"))?
            .wait(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
        let s = self.frame_slot(slot)?;
        let raw = self.swapchain()?.raw();
        let acquired = unsafe {
            self.device.swapchain_loader().acquire_next_image(
                raw,
                u64::MAX,
                s.image_available,
                vk::Fence::null(),
            )
        };
        let outcome = classify_acquire(acquired)?;
        if let Acquire::Image(_) = outcome {
            self.frames
                .as_ref()
                .ok_or_else(|| missing("frame slots"))?
                .reset(slot)?;
        }
        Ok(outcome)
    }

    fn record(&mut self, slot: usize, image: u32) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| missing("pipeline"))?;
        let framebuffer = self
            .framebuffers
            .as_ref()
            .and_then(|f| f.get(image))
            .ok_or_else(|| missing("framebuffer for image"))?;
        let pass = DrawPass {
            pipeline,
            framebuffer,
            clear: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            },
            vertices: self.vertices.as_ref(),
            vertex_count: self
                .vertices
                .as_ref()
                .map_or(GENERATED_VERTEX_COUNT, VertexBuffer::vertex_count),
        };
        self.commands.record_draw(slot, &pass)?;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let s = self.frame_slot(slot)?;
        let cmd = self
            .commands
            .buffer(slot)
            .ok_or_else(|| missing("command buffer"))?;
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device.raw().queue_submit(
                self.device.queue(),
                std::slice::from_ref(&submit),
                s.in_flight,
            )
        }
        .map_err(Error::fatal("queue_submit"))
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
        let s = self.frame_slot(slot)?;
        let raw = self.swapchain()?.raw();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.render_finished,
            swapchain_count: 1,
            p_swapchains: &raw,
            p_image_indices: &image,
            ..Default::default()
        };
        classify_present(unsafe {
            self.device
                .swapchain_loader()
                .queue_present(self.device.queue(), &present)
        })
    }
}

impl SwapchainHost for GpuState {
    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn surface_bounds(&mut self) -> Result<ExtentBounds> {
        self.surface
            .extent_bounds(self.device.hardware().physical_device)
    }

    fn destroy_swapchain_resources(&mut self) {
        self.frames = None;
        self.framebuffers = None;
        self.pipeline = None;
        self.swapchain = None;
    }

    fn rebuild_pipeline(&mut self, config: &UserConfig) -> Result<()> {
        let format = self.device.hardware().surface_format.format;
        self.pipeline = Some(Pipeline::new(
            &self.device,
            &self.shaders,
            &self.pipeline_config,
            format,
            config.resolution,
        )?);
        Ok(())
    }

    fn rebuild_swapchain(&mut self, config: &UserConfig) -> Result<usize> {
        let hardware = self.device.hardware();
        let sc_config = SwapchainConfig {
            backbuffer_count: config.backbuffer_count,
            surface_format: hardware.surface_format,
            present_mode: hardware.present_mode,
            extent: config.resolution,
        };
        let swapchain =
            Swapchain::new(&self.device, &self.surface, &sc_config).map_err(stale_on_out_of_date)?;
        let pipeline = self.pipeline.as_ref().ok_or_else(|| missing("pipeline"))?;
        let framebuffers = Framebuffers::new(&swapchain, pipeline)?;

        let count = swapchain.image_count();
        self.commands.allocate(count)?;
        let frames = FrameSlots::new(&self.device, count)?;

        self.swapchain = Some(swapchain);
        self.framebuffers = Some(framebuffers);
        self.frames = Some(frames);
        Ok(count)
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("device did not idle before teardown: {e}");
        }
    }
}

/// Vulkan renderer bound to one window surface.
pub struct VkRenderer {
    driver: FrameDriver,
    gpu: GpuState,
    config: UserConfig,
    pending: Option<Trigger>,
}

impl VkRenderer {
    pub fn new<W: PresentTarget>(
        window: &mut W,
        config: UserConfig,
        setup: RendererSetup,
    ) -> Result<Self> {
        config.validate()?;

        let instance = Instance::new(&setup.instance, &*window)?;
        let surface = Surface::new(&instance, &*window)?;

        let candidates = enumerate_capabilities(&instance, &surface)?;
        let hardware = negotiate(&candidates, config.backbuffer_format, setup.policy.as_ref())?;

        let mut device_config = DeviceConfig::new(hardware);
        device_config
            .extensions
            .extend(setup.policy.required_extensions());
        let device = Device::new(&instance, &device_config)?;

        let mut shaders = ShaderRegistry::new(&device);
        for source in &setup.shaders {
            match source {
                ShaderSource::Bytes { key, bytes } => shaders.load_bytes(key, bytes)?,
                ShaderSource::File { key, path } => shaders.load_file(key, path)?,
            }
        }

        let vertices = setup
            .vertices
            .as_ref()
            .map(|v| VertexBuffer::new(&device, &v.bytes, v.count))
            .transpose()?;
        let commands = CommandPool::new(&device)?;

        let mut renderer = Self {
            driver: FrameDriver::new(),
            gpu: GpuState {
                frames: None,
                framebuffers: None,
                pipeline: None,
                swapchain: None,
                commands,
                vertices,
                shaders,
                pipeline_config: setup.pipeline,
                clear: setup.clear_color,
                device,
                surface,
                _instance: instance,
            },
            config,
            pending: None,
        };

        match recreate(&mut renderer.gpu, window, &mut renderer.config, Trigger::Initial)? {
            Recreation::Rebuilt { .. } => {}
            Recreation::WindowClosed => {
                info!("window closed before the first swapchain was built");
                renderer.pending = Some(Trigger::Initial);
            }
        }
        Ok(renderer)
    }

    /// Schedules a rebuild for the next [`VkRenderer::render_frame`]. Later
    /// notifications replace earlier ones.
    pub fn notify_resize(&mut self, resize: Resize) {
        self.pending = Some(Trigger::Resize(resize));
    }

    pub fn render_frame<W: WindowHost + ?Sized>(&mut self, window: &mut W) -> Result<FrameStatus> {
        if window.should_close() {
            return Ok(FrameStatus::Closed);
        }
        if let Some(trigger) = self.pending.take() {
            return self.rebuild(window, trigger);
        }
        match self.driver.run_frame(&mut self.gpu)? {
            FrameOutcome::Presented { .. } => Ok(FrameStatus::Presented),
            FrameOutcome::Stale { .. } => self.rebuild(window, Trigger::Stale),
        }
    }

    fn rebuild<W: WindowHost + ?Sized>(
        &mut self,
        window: &mut W,
        trigger: Trigger,
    ) -> Result<FrameStatus> {
        match recreate(&mut self.gpu, window, &mut self.config, trigger) {
            Ok(Recreation::Rebuilt { .. }) => Ok(FrameStatus::Recreated),
            Ok(Recreation::WindowClosed) => {
                self.pending = Some(trigger);
                Ok(FrameStatus::Closed)
            }
            Err(e) if e.is_recoverable() => {
                warn!("surface changed during rebuild, retrying: {e}");
                self.pending = Some(Trigger::Stale);
                Ok(FrameStatus::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    /// Frames presented so far.
    pub fn frame_index(&self) -> u64 {
        self.driver.frame()
    }

    pub fn slot_index(&self) -> usize {
        self.driver.slot(self.gpu.slot_count())
    }

    pub fn image_count(&self) -> usize {
        self.gpu.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    pub fn extent(&self) -> RenderSize {
        self.config.resolution
    }

    pub fn config(&self) -> &UserConfig {
        &self.config
    }

    pub fn hardware(&self) -> &SelectedHardware {
        self.gpu.device.hardware()
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.gpu.clear = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_swapchain_creation_is_stale() {
        let err = stale_on_out_of_date(
            BuildError::from_vk("swapchain", vk::Result::ERROR_OUT_OF_DATE_KHR).into(),
        );
        assert!(matches!(err, Error::SurfaceStale));
        assert!(err.is_recoverable());
    }

    #[test]
    fn other_creation_failures_stay_fatal() {
        let err = stale_on_out_of_date(
            BuildError::from_vk("swapchain", vk::Result::ERROR_SURFACE_LOST_KHR).into(),
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn suboptimal_acquire_still_yields_the_image() {
        assert_eq!(classify_acquire(Ok((2, true))).unwrap(), Acquire::Image(2));
        assert_eq!(classify_acquire(Ok((0, false))).unwrap(), Acquire::Image(0));
    }

    #[test]
    fn out_of_date_acquire_is_stale() {
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Acquire::Stale
        );
    }

    #[test]
    fn device_lost_on_acquire_is_fatal() {
        let err = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert!(matches!(
            err,
            Error::Fatal {
                context: "acquire_next_image",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
    }

    #[test]
    fn suboptimal_present_requests_recreation() {
        assert_eq!(classify_present(Ok(true)).unwrap(), Present::Stale);
        assert_eq!(classify_present(Ok(false)).unwrap(), Present::Done);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Present::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn vertex_data_counts_vertices() {
        let data = VertexData::from_slice(&[[0.0f32; 5]; 3]);
        assert_eq!(data.count, 3);
        assert_eq!(data.bytes.len(), 3 * 5 * 4);
    }

    #[test]
    fn setup_defaults() {
        let setup = RendererSetup::new(PipelineConfig::new("a.vert", "a.frag"));
        assert!(setup.shaders.is_empty());
        assert!(setup.vertices.is_none());
        assert!(!setup.instance.debug_messenger);
    }
}
