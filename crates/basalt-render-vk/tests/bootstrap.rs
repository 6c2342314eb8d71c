// SPDX-License-Identifier: CEPL-1.0
//! Bootstrap scenarios driven through the public API with hand-built
//! capability snapshots and scripted backends.

use basalt_render::{RenderSize, Resize, WindowHost};
use basalt_render_vk::catalog::SurfaceSupport;
use basalt_render_vk::vk::{self, Handle};
use basalt_render_vk::{
    build_per_image, negotiate, recreate, requested_image_count, Acquire, DefaultPolicy,
    ExtentBounds, FrameBackend, FrameDriver, PhysicalDeviceCandidate, Present, QueueCaps,
    QueueFamilyCandidate, Recreation, Result, SwapchainHost, Trigger, UserConfig,
};

fn discrete_gpu() -> PhysicalDeviceCandidate {
    PhysicalDeviceCandidate {
        handle: vk::PhysicalDevice::from_raw(0x1000),
        name: "Test Discrete".into(),
        device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
        api_version: vk::API_VERSION_1_0,
        features: vk::PhysicalDeviceFeatures::default(),
        queue_families: vec![
            QueueFamilyCandidate {
                index: 0,
                caps: QueueCaps::TRANSFER,
                count: 2,
            },
            QueueFamilyCandidate {
                index: 1,
                caps: QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::PRESENT,
                count: 16,
            },
        ],
        extensions: vec![c"VK_KHR_swapchain".to_owned()],
        surface: SurfaceSupport {
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
        },
    }
}

#[test]
fn default_config_negotiates_single_discrete_gpu() {
    let config = UserConfig::default();
    config.validate().unwrap();
    assert_eq!(config.resolution, RenderSize::new(1280, 720));
    assert_eq!(config.backbuffer_count, 3);

    let gpu = discrete_gpu();
    let hw = negotiate(
        std::slice::from_ref(&gpu),
        config.backbuffer_format,
        &DefaultPolicy,
    )
    .unwrap();

    assert_eq!(hw.physical_device, gpu.handle);
    assert_eq!(hw.queue_family_index, 1);
    assert_eq!(hw.surface_format.format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!(hw.present_mode, vk::PresentModeKHR::FIFO);

    let bounds = ExtentBounds::from_caps(&gpu.surface.capabilities);
    assert_eq!(bounds.current, None);
    assert_eq!(bounds.resolve(config.resolution), config.resolution);
}

#[test]
fn per_image_resources_follow_granted_count() {
    let gpu = discrete_gpu();
    let config = UserConfig::default();
    let requested = requested_image_count(&gpu.surface.capabilities, config.backbuffer_count);
    assert_eq!(requested, 3);

    // The driver may hand back more images than asked for.
    for granted in [3usize, 4] {
        let images: Vec<vk::Image> = (1..=granted as u64).map(vk::Image::from_raw).collect();
        let views = build_per_image(
            &images,
            |i, image| Ok::<_, ()>((i, image)),
            |_| panic!("nothing to undo"),
        )
        .unwrap();
        assert_eq!(views.len(), granted);
        assert!(views.iter().enumerate().all(|(i, (j, _))| i == *j));
    }
}

struct ScriptedGpu {
    slots: usize,
    images: u32,
    next: u32,
    presented: Vec<(usize, u32)>,
}

impl FrameBackend for ScriptedGpu {
    fn slot_count(&self) -> usize {
        self.slots
    }

    fn wait_for_slot(&mut self, _slot: usize) -> Result<()> {
        Ok(())
    }

    fn acquire_image(&mut self, _slot: usize) -> Result<Acquire> {
        let image = self.next;
        self.next = (self.next + 1) % self.images;
        Ok(Acquire::Image(image))
    }

    fn record(&mut self, _slot: usize, _image: u32) -> Result<()> {
        Ok(())
    }

    fn submit(&mut self, _slot: usize) -> Result<()> {
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
        self.presented.push((slot, image));
        Ok(Present::Done)
    }
}

#[test]
fn frames_cycle_through_slots() {
    let mut gpu = ScriptedGpu {
        slots: 3,
        images: 3,
        next: 0,
        presented: Vec::new(),
    };
    let mut driver = FrameDriver::new();
    for _ in 0..10 {
        driver.run_frame(&mut gpu).unwrap();
    }
    assert_eq!(driver.frame(), 10);
    assert_eq!(driver.slot(3), 1);
    assert_eq!(gpu.presented.len(), 10);
    assert_eq!(gpu.presented[4], (1, 1));
}

struct FakeHost {
    bounds: ExtentBounds,
    builds: u32,
}

impl SwapchainHost for FakeHost {
    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }

    fn surface_bounds(&mut self) -> Result<ExtentBounds> {
        Ok(self.bounds)
    }

    fn destroy_swapchain_resources(&mut self) {}

    fn rebuild_pipeline(&mut self, _config: &UserConfig) -> Result<()> {
        Ok(())
    }

    fn rebuild_swapchain(&mut self, config: &UserConfig) -> Result<usize> {
        self.builds += 1;
        Ok(config.backbuffer_count as usize)
    }
}

struct FixedWindow(RenderSize);

impl WindowHost for FixedWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.0
    }

    fn poll_events(&mut self) {}

    fn should_close(&self) -> bool {
        false
    }
}

#[test]
fn initial_build_then_resize() {
    let gpu = discrete_gpu();
    let mut host = FakeHost {
        bounds: ExtentBounds::from_caps(&gpu.surface.capabilities),
        builds: 0,
    };
    let mut window = FixedWindow(RenderSize::new(1280, 720));
    let mut config = UserConfig::default();

    let first = recreate(&mut host, &mut window, &mut config, Trigger::Initial).unwrap();
    assert_eq!(
        first,
        Recreation::Rebuilt {
            extent: RenderSize::new(1280, 720),
            image_count: 3,
            minimized_polls: 0,
        }
    );

    window.0 = RenderSize::new(800, 600);
    let resized = recreate(
        &mut host,
        &mut window,
        &mut config,
        Trigger::Resize(Resize::To(RenderSize::new(800, 600))),
    )
    .unwrap();
    assert!(matches!(resized, Recreation::Rebuilt { .. }));
    assert_eq!(config.resolution, RenderSize::new(800, 600));
    assert_eq!(host.builds, 2);
}
