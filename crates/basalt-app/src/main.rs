// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::cell::Cell;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use basalt_core::init_tracing;
use basalt_platform::PlatformWindow;
use basalt_render::{RenderSize, Resize, WindowHost};
use basalt_render_vk::{
    vk, FrameStatus, InstanceConfig, PipelineConfig, PresentModePolicy, RendererSetup,
    ShaderSource, UserConfig, VertexData, VertexLayout, VkRenderer,
};
use bytemuck::{Pod, Zeroable};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

const VERT_KEY: &str = "simple2d.vert";
const FRAG_KEY: &str = "color_passthrough.frag";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; defaults apply when it does not exist
    #[arg(long, default_value = "basalt.toml")]
    config: PathBuf,

    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,

    /// Enable the Khronos validation layer
    #[arg(long, overrides_with = "no_validation")]
    validation: bool,

    #[arg(long = "no-validation")]
    no_validation: bool,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,
}

impl Args {
    fn validation(&self) -> Option<bool> {
        match (self.validation, self.no_validation) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "basalt".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum BackbufferFormat {
    #[default]
    Bgra8Srgb,
    Bgra8Unorm,
    Rgba8Srgb,
    Rgba8Unorm,
}

impl BackbufferFormat {
    fn to_vk(self) -> vk::Format {
        match self {
            BackbufferFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            BackbufferFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            BackbufferFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            BackbufferFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum PresentModeCfg {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

impl PresentModeCfg {
    fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModeCfg::Fifo => vk::PresentModeKHR::FIFO,
            PresentModeCfg::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModeCfg::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct RenderCfg {
    backbuffer_format: BackbufferFormat,
    backbuffer_count: u32,
    samples: u32,
    present_mode: PresentModeCfg,
    clear_color: [f32; 4],
    validation: bool,
    vertex_shader: Option<PathBuf>,
    fragment_shader: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            backbuffer_format: BackbufferFormat::default(),
            backbuffer_count: 3,
            samples: 1,
            present_mode: PresentModeCfg::default(),
            clear_color: default_clear(),
            validation: cfg!(debug_assertions),
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s)
            .with_context(|| format!("parsing config {}", path.display())),
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            Ok(AppCfg::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading config {}", path.display())),
    }
}

fn sample_count(samples: u32) -> Result<vk::SampleCountFlags> {
    Ok(match samples {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        n => bail!("samples = {n} is not a power of two up to 64"),
    })
}

fn user_config(cfg: &AppCfg) -> Result<UserConfig> {
    Ok(UserConfig {
        resolution: RenderSize::new(cfg.window.width, cfg.window.height),
        backbuffer_format: cfg.render.backbuffer_format.to_vk(),
        sample_count: sample_count(cfg.render.samples)?,
        backbuffer_count: cfg.render.backbuffer_count,
    })
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Vertex {
    pos: [f32; 2],
    color: [f32; 3],
}

// Clockwise on screen, which is the front face.
const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: [0.0, -0.5],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [-0.5, 0.5],
        color: [0.0, 0.0, 1.0],
    },
];

fn shader(key: &str, path: Option<&PathBuf>, builtin: &[u8]) -> ShaderSource {
    match path {
        Some(p) => ShaderSource::file(key, p),
        None => ShaderSource::bytes(key, builtin),
    }
}

fn renderer_setup(cfg: &AppCfg, validation: bool) -> Result<RendererSetup> {
    let mut pipeline = PipelineConfig::new(VERT_KEY, FRAG_KEY);
    pipeline.vertex_layout = Some(VertexLayout::for_vertex::<Vertex>(&[
        vk::Format::R32G32_SFLOAT,
        vk::Format::R32G32B32_SFLOAT,
    ])?);

    let mut instance = InstanceConfig {
        application_name: c"basalt-app".to_owned(),
        ..Default::default()
    };
    if validation {
        instance = instance.with_validation(false);
    }

    let mut setup = RendererSetup::new(pipeline);
    setup.instance = instance;
    setup.shaders = vec![
        shader(
            VERT_KEY,
            cfg.render.vertex_shader.as_ref(),
            include_bytes!(concat!(env!("OUT_DIR"), "/simple2d.vert.spv")),
        ),
        shader(
            FRAG_KEY,
            cfg.render.fragment_shader.as_ref(),
            include_bytes!(concat!(env!("OUT_DIR"), "/color_passthrough.frag.spv")),
        ),
    ];
    setup.vertices = Some(VertexData::from_slice(&TRIANGLE));
    setup.policy = Box::new(PresentModePolicy(cfg.render.present_mode.to_vk()));
    setup.clear_color = cfg.render.clear_color;
    Ok(setup)
}

fn run(args: Args) -> Result<()> {
    let mut cfg = load_cfg(&args.config)?;
    if let Some(w) = args.width {
        cfg.window.width = w;
    }
    if let Some(h) = args.height {
        cfg.window.height = h;
    }
    let validation = args.validation().unwrap_or(cfg.render.validation);
    let config = user_config(&cfg)?;

    let mut window = PlatformWindow::new(&cfg.window.title, config.resolution)?;
    let resized: Rc<Cell<Option<Resize>>> = Rc::default();
    {
        let resized = Rc::clone(&resized);
        window.set_resize_callback(move |r| resized.set(Some(r)));
    }

    let mut renderer = match VkRenderer::new(&mut window, config, renderer_setup(&cfg, validation)?) {
        Ok(r) => r,
        Err(e) => {
            error!(kind = ?e.kind(), configuration = e.is_configuration(), "vk init failed: {e}");
            return Err(e.into());
        }
    };
    info!(
        "rendering on {} ({:?}), {} images at {}",
        renderer.hardware().device_name,
        renderer.hardware().present_mode,
        renderer.image_count(),
        renderer.extent()
    );

    let mut presented = 0u64;
    let mut fps_frames = 0u32;
    let mut last_fps = Instant::now();
    loop {
        window.poll_events();
        if let Some(r) = resized.take() {
            renderer.notify_resize(r);
        }

        match renderer.render_frame(&mut window) {
            Ok(FrameStatus::Presented) => {
                presented += 1;
                fps_frames = fps_frames.saturating_add(1);
            }
            Ok(FrameStatus::Recreated) => {
                info!("swapchain now {} images at {}", renderer.image_count(), renderer.extent());
            }
            Ok(FrameStatus::Skipped) => {}
            Ok(FrameStatus::Closed) => break,
            Err(e) => {
                error!(kind = ?e.kind(), frame = renderer.frame_index(), "render error: {e}");
                return Err(e.into());
            }
        }

        if args.frames.is_some_and(|n| presented >= n) {
            info!(presented, "frame limit reached");
            break;
        }

        let now = Instant::now();
        if now.duration_since(last_fps).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", fps_frames);
            fps_frames = 0;
            last_fps = now;
        }
    }

    // The surface must go before the window it was created from.
    drop(renderer);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    run(Args::parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        let uc = user_config(&cfg).unwrap();
        assert_eq!(uc.resolution, RenderSize::new(1280, 720));
        assert_eq!(uc.backbuffer_format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(uc.backbuffer_count, 3);
        uc.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            width = 800

            [render]
            backbuffer_format = "rgba8_unorm"
            present_mode = "mailbox"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.backbuffer_format.to_vk(), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(cfg.render.present_mode.to_vk(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(cfg.render.backbuffer_count, 3);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let parsed = toml::from_str::<AppCfg>("[render]\nbackbuffer_format = \"rgb565\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = load_cfg(Path::new("definitely/not/here/basalt.toml")).unwrap();
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn malformed_file_names_path() {
        let path = std::env::temp_dir().join(format!("basalt-bad-{}.toml", std::process::id()));
        fs::write(&path, "[render\nsamples = ").unwrap();
        let err = load_cfg(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(format!("{err:#}").contains(&path.display().to_string()));
    }

    #[test]
    fn multisampling_is_mapped_then_refused() {
        assert_eq!(sample_count(4).unwrap(), vk::SampleCountFlags::TYPE_4);
        assert!(sample_count(3).is_err());

        let mut cfg = AppCfg::default();
        cfg.render.samples = 4;
        let uc = user_config(&cfg).unwrap();
        assert!(uc.validate().is_err());
    }

    #[test]
    fn triangle_matches_vertex_layout() {
        let layout = VertexLayout::for_vertex::<Vertex>(&[
            vk::Format::R32G32_SFLOAT,
            vk::Format::R32G32B32_SFLOAT,
        ])
        .unwrap();
        assert_eq!(layout.stride, 20);
        assert_eq!(layout.attributes[1].offset, 8);
        let data = VertexData::from_slice(&TRIANGLE);
        assert_eq!(data.count, 3);
    }

    #[test]
    fn validation_flags() {
        let on = Args::parse_from(["basalt", "--validation"]);
        assert_eq!(on.validation(), Some(true));
        let off = Args::parse_from(["basalt", "--no-validation"]);
        assert_eq!(off.validation(), Some(false));
        let unset = Args::parse_from(["basalt"]);
        assert_eq!(unset.validation(), None);
    }
}
