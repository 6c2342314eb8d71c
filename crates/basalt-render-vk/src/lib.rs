// SPDX-License-Identifier: CEPL-1.0
//! Vulkan surface bootstrapping: capability discovery, hardware
//! negotiation, the swapchain resource chain, the frame loop and swapchain
//! recreation.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod instance;
pub mod negotiate;
pub mod pipeline;
pub mod recreate;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use ash::vk;

pub use catalog::{enumerate_capabilities, PhysicalDeviceCandidate, QueueCaps, QueueFamilyCandidate};
pub use config::UserConfig;
pub use error::{BuildError, Error, ErrorKind, Result};
pub use frame::{Acquire, FrameBackend, FrameDriver, FrameOutcome, FrameState, Present};
pub use instance::{InstanceConfig, LayerRequest};
pub use negotiate::{
    negotiate, DefaultPolicy, PresentModePolicy, SelectedHardware, SelectionPolicy, Verdict,
};
pub use pipeline::{PipelineConfig, VertexLayout};
pub use recreate::{recreate, Recreation, SwapchainHost, Trigger};
pub use renderer::{FrameStatus, RendererSetup, ShaderSource, VertexData, VkRenderer};
pub use shader::ShaderError;
pub use swapchain::{ExtentBounds, build_per_image, requested_image_count};
