// SPDX-License-Identifier: CEPL-1.0
//! Shader loading and the single 2D graphics pipeline.
//!
//! Missing or malformed shaders do not abort startup: the builder is left in
//! degraded mode and frames are cleared but nothing is drawn.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::util::read_spv;
use ash::vk;
use rpg_render::Vertex;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{RenderError, VkResultExt};

pub const VERT_SHADER: &str = "vert.spv";
pub const FRAG_SHADER: &str = "frag.spv";

#[derive(Debug, Error)]
pub enum ShaderLoadError {
    #[error("cannot read shader {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid SPIR-V: {source}", path.display())]
    InvalidSpirv {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads one SPIR-V blob as aligned words.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, ShaderLoadError> {
    let bytes = fs::read(path).map_err(|source| ShaderLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| ShaderLoadError::InvalidSpirv {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub struct ShaderPair {
    pub vert: Vec<u32>,
    pub frag: Vec<u32>,
}

pub fn load_shader_pair(dir: &Path) -> Result<ShaderPair, ShaderLoadError> {
    Ok(ShaderPair {
        vert: load_spirv(&dir.join(VERT_SHADER))?,
        frag: load_spirv(&dir.join(FRAG_SHADER))?,
    })
}

/// Binding 0, per-vertex: position (vec2) at location 0, color (vec3) at location 1.
pub fn vertex_input_layout() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 2],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: Vertex::STRIDE as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: Vertex::POSITION_OFFSET as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: Vertex::COLOR_OFFSET as u32,
        },
    ];
    (binding, attributes)
}

/// Straight alpha over the destination; alpha channel takes the source value.
pub fn blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
    }
}

pub struct GraphicsPipeline {
    device: ash::Device,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) pipeline: vk::Pipeline,
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Owns every shader module it ever created; they live until device teardown.
pub struct PipelineBuilder {
    device: ash::Device,
    modules: Vec<vk::ShaderModule>,
    stages: Option<(vk::ShaderModule, vk::ShaderModule)>,
}

impl PipelineBuilder {
    /// Loads `vert.spv`/`frag.spv` from `shader_dir`. Never fails; a load or
    /// module error leaves the builder degraded.
    pub(crate) unsafe fn new(device: &ash::Device, shader_dir: &Path) -> Self {
        let mut builder = Self {
            device: device.clone(),
            modules: Vec::new(),
            stages: None,
        };

        let pair = match load_shader_pair(shader_dir) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("{e}; rendering without a pipeline");
                return builder;
            }
        };

        let stages = builder
            .create_module(&pair.vert, "vertex")
            .and_then(|vs| Ok((vs, builder.create_module(&pair.frag, "fragment")?)));
        match stages {
            Ok(stages) => builder.stages = Some(stages),
            Err(e) => warn!("{e}; rendering without a pipeline"),
        }
        builder
    }

    unsafe fn create_module(&mut self, code: &[u32], what: &str) -> Result<vk::ShaderModule, RenderError> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: std::mem::size_of_val(code),
            ..Default::default()
        };
        let module = self
            .device
            .create_shader_module(&ci, None)
            .op("create_shader_module")?;
        info!("{what} shader module: {} words", code.len());
        self.modules.push(module);
        Ok(module)
    }

    pub fn is_degraded(&self) -> bool {
        self.stages.is_none()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Builds the pipeline against `render_pass`; `None` when degraded or when
    /// the driver rejects it (logged).
    pub(crate) unsafe fn build(&self, render_pass: vk::RenderPass) -> Option<GraphicsPipeline> {
        let (vs, fs) = self.stages?;
        match self.create_pipeline(vs, fs, render_pass) {
            Ok(p) => {
                info!("graphics pipeline ready");
                Some(p)
            }
            Err(e) => {
                warn!("{e}; rendering without a pipeline");
                None
            }
        }
    }

    unsafe fn create_pipeline(
        &self,
        vs: vk::ShaderModule,
        fs: vk::ShaderModule,
        render_pass: vk::RenderPass,
    ) -> Result<GraphicsPipeline, RenderError> {
        let device = &self.device;
        let entry = c"main";

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let (vb, va) = vertex_input_layout();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &vb,
            vertex_attribute_description_count: va.len() as u32,
            p_vertex_attribute_descriptions: va.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        // Viewport and scissor are set per frame.
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
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
            ..Default::default()
        };
        let color_blend_att = blend_attachment();
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        // No descriptors or push constants.
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .op("create_pipeline_layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = match device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => p,
            Err((_, err)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(RenderError::from_vk("create_graphics_pipelines", err));
            }
        };

        Ok(GraphicsPipeline {
            device: device.clone(),
            layout,
            pipeline: pipelines[0],
        })
    }
}

impl Drop for PipelineBuilder {
    fn drop(&mut self) {
        for module in self.modules.drain(..) {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn write_words(path: &Path, words: &[u32]) {
        let mut f = fs::File::create(path).unwrap();
        for w in words {
            f.write_all(&w.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn loads_valid_pair() {
        let dir = tempfile::tempdir().unwrap();
        write_words(&dir.path().join(VERT_SHADER), &[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        write_words(&dir.path().join(FRAG_SHADER), &[SPIRV_MAGIC, 0x0001_0000, 0, 2, 0]);

        let pair = load_shader_pair(dir.path()).unwrap();
        assert_eq!(pair.vert.len(), 5);
        assert_eq!(pair.vert[0], SPIRV_MAGIC);
        assert_eq!(pair.frag[3], 2);
    }

    #[test]
    fn missing_fragment_shader_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        write_words(&dir.path().join(VERT_SHADER), &[SPIRV_MAGIC, 0, 0, 0, 0]);

        let err = load_shader_pair(dir.path()).unwrap_err();
        match &err {
            ShaderLoadError::Io { path, .. } => assert!(path.ends_with(FRAG_SHADER)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains(FRAG_SHADER));
    }

    #[test]
    fn truncated_blob_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VERT_SHADER);
        fs::write(&path, [0x03, 0x02, 0x23]).unwrap();
        assert!(matches!(
            load_spirv(&path),
            Err(ShaderLoadError::InvalidSpirv { .. })
        ));
    }

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        let (binding, attrs) = vertex_input_layout();
        assert_eq!(binding.stride, 28);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[1].offset, 8);
    }

    #[test]
    fn blending_is_straight_alpha() {
        let b = blend_attachment();
        assert_eq!(b.blend_enable, vk::TRUE);
        assert_eq!(b.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(b.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(b.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(b.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert!(b.color_write_mask.contains(vk::ColorComponentFlags::A));
    }
}
