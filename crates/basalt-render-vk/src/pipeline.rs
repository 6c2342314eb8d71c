// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use basalt_render::RenderSize;
use tracing::debug;

use crate::device::Device;
use crate::error::{build_err, BuildError, Result};
use crate::shader::ShaderRegistry;

/// Byte size of the vertex attribute formats a linear layout can walk.
pub fn format_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R32G32_SFLOAT => Some(8),
        vk::Format::R32G32B32_SFLOAT => Some(12),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM => Some(4),
        _ => None,
    }
}

/// Interleaved per-vertex data on binding 0.
#[derive(Clone, Debug)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// Locations follow declaration order, offsets are the running sum of
    /// attribute sizes.
    pub fn linear(formats: &[vk::Format]) -> Result<Self, BuildError> {
        let mut offset = 0;
        let mut attributes = Vec::with_capacity(formats.len());
        for (location, &format) in formats.iter().enumerate() {
            let size = format_size(format).ok_or(BuildError::UnsupportedVertexFormat(format))?;
            attributes.push(vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format,
                offset,
            });
            offset += size;
        }
        Ok(Self {
            stride: offset,
            attributes,
        })
    }

    /// [`VertexLayout::linear`] that also checks the Rust vertex type is
    /// exactly as large as its attributes.
    pub fn for_vertex<T>(formats: &[vk::Format]) -> Result<Self, BuildError> {
        let layout = Self::linear(formats)?;
        let declared = std::mem::size_of::<T>() as u32;
        if declared != layout.stride {
            return Err(BuildError::StrideMismatch {
                declared,
                derived: layout.stride,
            });
        }
        Ok(layout)
    }

    fn binding(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub topology: vk::PrimitiveTopology,
    pub vertex_layout: Option<VertexLayout>,
}

impl PipelineConfig {
    pub fn new(vertex_shader: impl Into<String>, fragment_shader: impl Into<String>) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            vertex_layout: None,
        }
    }
}

/// Fullscreen viewport for `resolution`.
pub fn fullscreen_viewport(resolution: RenderSize) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: resolution.width as f32,
        height: resolution.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Render area covering the viewport.
pub fn render_area(viewport: &vk::Viewport) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: viewport.x as i32,
            y: viewport.y as i32,
        },
        extent: vk::Extent2D {
            width: viewport.width as u32,
            height: viewport.height as u32,
        },
    }
}

/// Render pass, layout and graphics pipeline, rebuilt together with the
/// swapchain.
pub struct Pipeline {
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    format: vk::Format,
    render_area: vk::Rect2D,
    device: Arc<Device>,
}

impl Pipeline {
    pub fn new(
        device: &Arc<Device>,
        shaders: &ShaderRegistry,
        config: &PipelineConfig,
        format: vk::Format,
        resolution: RenderSize,
    ) -> Result<Self> {
        let vert = shaders.get(&config.vertex_shader)?;
        let frag = shaders.get(&config.fragment_shader)?;
        let d = device.raw();

        let render_pass = create_render_pass(d, format)?;
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = match unsafe { d.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { d.destroy_render_pass(render_pass, None) };
                return Err(BuildError::from_vk("pipeline layout", e).into());
            }
        };

        let viewport = fullscreen_viewport(resolution);
        let area = render_area(&viewport);

        // Partially built pipeline owns the pass and layout from here on.
        let mut pipeline = Pipeline {
            raw: vk::Pipeline::null(),
            layout,
            render_pass,
            format,
            render_area: area,
            device: Arc::clone(device),
        };

        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vert,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: frag,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let bindings: Vec<vk::VertexInputBindingDescription> =
            config.vertex_layout.iter().map(VertexLayout::binding).collect();
        let attributes: &[vk::VertexInputAttributeDescription] = config
            .vertex_layout
            .as_ref()
            .map(|l| l.attributes.as_slice())
            .unwrap_or_default();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: bindings.len() as u32,
            p_vertex_binding_descriptions: bindings.as_ptr(),
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: config.topology,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &area,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: vk::FALSE,
            ..Default::default()
        };
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            ..Default::default()
        };
        let blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &blend,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        pipeline.raw = match unsafe {
            d.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
        } {
            Ok(mut pipelines) => pipelines.remove(0),
            Err((_, err)) => return Err(BuildError::from_vk("graphics pipeline", err).into()),
        };

        debug!(
            ?format,
            %resolution,
            topology = ?config.topology,
            vertex_stride = config.vertex_layout.as_ref().map(|l| l.stride),
            "pipeline built"
        );
        Ok(pipeline)
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Format of the single color attachment.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let d = self.device.raw();
        unsafe {
            if self.raw != vk::Pipeline::null() {
                d.destroy_pipeline(self.raw, None);
            }
            d.destroy_pipeline_layout(self.layout, None);
            d.destroy_render_pass(self.render_pass, None);
        }
        debug!("pipeline destroyed");
    }
}

/// One color attachment, cleared and stored, ending presentable. The
/// external dependency orders this pass after image acquisition.
fn create_render_pass(d: &ash::Device, format: vk::Format) -> Result<vk::RenderPass, BuildError> {
    let color = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { d.create_render_pass(&info, None) }.map_err(build_err("render pass"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_layout_sums_offsets_in_order() {
        let layout = VertexLayout::linear(&[
            vk::Format::R32G32_SFLOAT,
            vk::Format::R32G32B32_SFLOAT,
            vk::Format::R32_SFLOAT,
        ])
        .unwrap();
        assert_eq!(layout.stride, 24);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(offsets, vec![0, 8, 20]);
        assert_eq!(locations, vec![0, 1, 2]);
        assert!(layout.attributes.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = VertexLayout::linear(&[vk::Format::R32G32_SFLOAT, vk::Format::D32_SFLOAT])
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnsupportedVertexFormat(vk::Format::D32_SFLOAT)
        ));
    }

    #[repr(C)]
    struct PosColor {
        _pos: [f32; 2],
        _color: [f32; 3],
    }

    #[test]
    fn typed_layout_checks_stride() {
        let ok = VertexLayout::for_vertex::<PosColor>(&[
            vk::Format::R32G32_SFLOAT,
            vk::Format::R32G32B32_SFLOAT,
        ])
        .unwrap();
        assert_eq!(ok.stride, 20);

        let err = VertexLayout::for_vertex::<PosColor>(&[vk::Format::R32G32_SFLOAT]).unwrap_err();
        assert!(matches!(
            err,
            BuildError::StrideMismatch {
                declared: 20,
                derived: 8
            }
        ));
    }

    #[test]
    fn empty_layout_has_zero_stride() {
        let layout = VertexLayout::linear(&[]).unwrap();
        assert_eq!(layout.stride, 0);
        assert!(layout.attributes.is_empty());
    }

    #[test]
    fn render_area_matches_fullscreen_viewport() {
        let vp = fullscreen_viewport(RenderSize::new(1280, 720));
        let area = render_area(&vp);
        assert_eq!(area.offset.x, 0);
        assert_eq!(area.offset.y, 0);
        assert_eq!(area.extent.width, 1280);
        assert_eq!(area.extent.height, 720);
    }

    #[test]
    fn config_carries_layout_by_value() {
        let layout = VertexLayout::linear(&[vk::Format::R32G32B32A32_SFLOAT]).unwrap();
        let mut cfg = PipelineConfig::new("a.vert", "a.frag");
        cfg.vertex_layout = Some(layout.clone());
        let copy = cfg.clone();
        let kept = copy.vertex_layout.as_ref().unwrap();
        assert_eq!(kept.stride, layout.stride);
        assert_eq!(kept.attributes.len(), 1);
        assert_eq!(kept.attributes[0].format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(kept.binding().stride, 16);
    }

    #[test]
    fn default_config_draws_triangle_lists() {
        let cfg = PipelineConfig::new("simple2d.vert", "color_passthrough.frag");
        assert_eq!(cfg.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert!(cfg.vertex_layout.is_none());
    }
}
