// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, its per-image views and framebuffers, and the render pass they target.

use ash::khr::swapchain;
use ash::vk;
use rpg_render::{PresentPolicy, RenderSize};
use tracing::info;

use crate::device::{DeviceContext, ImageSharing};
use crate::error::{RenderError, VkResultExt};
use crate::teardown::{create_each, destroy_rev};

/// What the surface supports, as reported by the driver.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub(crate) unsafe fn query(ctx: &DeviceContext) -> Result<Self, RenderError> {
        let loader = &ctx.surface_loader;
        Ok(Self {
            caps: loader
                .get_physical_device_surface_capabilities(ctx.phys, ctx.surface)
                .op("get_physical_device_surface_capabilities")?,
            formats: loader
                .get_physical_device_surface_formats(ctx.phys, ctx.surface)
                .op("get_physical_device_surface_formats")?,
            present_modes: loader
                .get_physical_device_surface_present_modes(ctx.phys, ctx.surface)
                .op("get_physical_device_surface_present_modes")?,
        })
    }
}

/// Resolved swapchain parameters; pure function of support + window size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        support: &SwapchainSupport,
        window: RenderSize,
        policy: PresentPolicy,
    ) -> Result<Self, RenderError> {
        let format = choose_surface_format(&support.formats)?;
        Ok(Self {
            format: format.format,
            color_space: format.color_space,
            present_mode: choose_present_mode(&support.present_modes, policy),
            extent: choose_extent(&support.caps, window),
            image_count: choose_image_count(&support.caps),
            transform: support.caps.current_transform,
        })
    }

    pub fn is_zero_sized(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

/// BGRA8 sRGB with a nonlinear sRGB color space, else whatever comes first.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RenderError> {
    let first = formats.first().copied().ok_or(RenderError::NoSurfaceFormats)?;
    Ok(formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(first))
}

/// FIFO is always available, so it is the floor for every policy.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    policy: PresentPolicy,
) -> vk::PresentModeKHR {
    match policy {
        PresentPolicy::LowLatency if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; a zero maximum means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

// Info only
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

pub(crate) struct RenderPass {
    device: ash::Device,
    pub(crate) handle: vk::RenderPass,
    pub(crate) format: vk::Format,
}

impl RenderPass {
    /// Single color attachment: cleared on load, stored, handed to present.
    pub(crate) unsafe fn new(device: &ash::Device, format: vk::Format) -> Result<Self, RenderError> {
        let color_att = vk::AttachmentDescription {
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
        let att_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &att_ref,
            ..Default::default()
        };
        // Layout transition waits for the acquire semaphore stage.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_att,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let handle = device
            .create_render_pass(&rp_info, None)
            .op("create_render_pass")?;
        Ok(Self {
            device: device.clone(),
            handle,
            format,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.handle, None) };
    }
}

/// One swapchain generation. Views and framebuffers are index-aligned with
/// `images`; all three lists always have the same length.
struct SwapchainImages {
    device: ash::Device,
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    plan: SwapchainPlan,
}

impl SwapchainImages {
    unsafe fn create(
        ctx: &DeviceContext,
        loader: &swapchain::Device,
        plan: &SwapchainPlan,
        render_pass: vk::RenderPass,
        old: vk::SwapchainKHR,
    ) -> Result<Self, RenderError> {
        let sharing = ctx.families.image_sharing();
        let (image_sharing_mode, families): (_, &[u32]) = match &sharing {
            ImageSharing::Exclusive => (vk::SharingMode::EXCLUSIVE, &[][..]),
            ImageSharing::Concurrent(f) => (vk::SharingMode::CONCURRENT, f.as_slice()),
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: plan.image_count,
            image_format: plan.format,
            image_color_space: plan.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode,
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: plan.transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let handle = loader
            .create_swapchain(&swap_info, None)
            .op("create_swapchain")?;
        // From here on Drop owns the swapchain and whatever lists get filled.
        let mut out = Self {
            device: ctx.device.clone(),
            loader: loader.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            plan: *plan,
        };

        let images = loader
            .get_swapchain_images(handle)
            .op("get_swapchain_images")?;
        let device = &ctx.device;

        out.views = create_each(
            images.iter().copied(),
            |image| {
                let iv_info = vk::ImageViewCreateInfo {
                    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: plan.format,
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                device.create_image_view(&iv_info, None).op("create_image_view")
            },
            |view| device.destroy_image_view(view, None),
        )?;

        out.framebuffers = create_each(
            out.views.iter().copied(),
            |view| {
                let fb_info = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass,
                    attachment_count: 1,
                    p_attachments: &view,
                    width: plan.extent.width,
                    height: plan.extent.height,
                    layers: 1,
                    ..Default::default()
                };
                device.create_framebuffer(&fb_info, None).op("create_framebuffer")
            },
            |fb| device.destroy_framebuffer(fb, None),
        )?;
        out.images = images;

        Ok(out)
    }
}

impl Drop for SwapchainImages {
    fn drop(&mut self) {
        let device = &self.device;
        unsafe {
            destroy_rev(&mut self.framebuffers, |fb| device.destroy_framebuffer(fb, None));
            destroy_rev(&mut self.views, |v| device.destroy_image_view(v, None));
            // Images belong to the swapchain.
            self.images.clear();
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rebuilt {
    pub format_changed: bool,
    pub image_count: usize,
}

/// Runs `create` only for a plan with a drawable extent. A zero-sized
/// surface cannot back a swapchain, so creation waits for a later rebuild.
fn unless_zero_sized<T, E>(
    plan: &SwapchainPlan,
    create: impl FnOnce(&SwapchainPlan) -> Result<T, E>,
) -> Result<Option<T>, E> {
    if plan.is_zero_sized() {
        return Ok(None);
    }
    create(plan).map(Some)
}

/// Owns the presentable images and everything sized to them.
///
/// `images` is `None` until the surface first reports a non-zero extent.
pub struct Swapchain {
    // Field order is drop order: images (framebuffers) before the render pass.
    images: Option<SwapchainImages>,
    render_pass: RenderPass,
    loader: swapchain::Device,
    policy: PresentPolicy,
}

impl Swapchain {
    pub(crate) unsafe fn new(
        ctx: &DeviceContext,
        window: RenderSize,
        policy: PresentPolicy,
    ) -> Result<Self, RenderError> {
        let loader = swapchain::Device::new(&ctx.instance, &ctx.device);
        let support = SwapchainSupport::query(ctx)?;
        let plan = SwapchainPlan::new(&support, window, policy)?;
        let render_pass = RenderPass::new(&ctx.device, plan.format)?;
        let images = unless_zero_sized(&plan, |plan| {
            SwapchainImages::create(ctx, &loader, plan, render_pass.handle, vk::SwapchainKHR::null())
        })?;
        match &images {
            Some(images) => log_plan("swapchain", &plan, images.images.len()),
            None => info!("swapchain: surface is 0x0, deferred until resize"),
        }
        Ok(Self {
            images,
            render_pass,
            loader,
            policy,
        })
    }

    /// Replaces the whole image set. Idles the device first; on failure the
    /// previous set stays intact. `None` when the surface is currently zero-sized.
    pub(crate) unsafe fn rebuild(
        &mut self,
        ctx: &DeviceContext,
        window: RenderSize,
    ) -> Result<Option<Rebuilt>, RenderError> {
        ctx.wait_idle()?;

        let support = SwapchainSupport::query(ctx)?;
        let plan = SwapchainPlan::new(&support, window, self.policy)?;
        if plan.is_zero_sized() {
            return Ok(None);
        }

        let format_changed = plan.format != self.render_pass.format;
        let new_pass = if format_changed {
            Some(RenderPass::new(&ctx.device, plan.format)?)
        } else {
            None
        };
        let pass_handle = new_pass
            .as_ref()
            .map_or(self.render_pass.handle, |rp| rp.handle);

        let next = SwapchainImages::create(ctx, &self.loader, &plan, pass_handle, self.handle())?;
        let image_count = next.images.len();
        // Old generation (framebuffers, views, retired swapchain) drops here.
        self.images = Some(next);
        if let Some(rp) = new_pass {
            self.render_pass = rp;
        }

        log_plan("swapchain rebuilt", &plan, image_count);
        Ok(Some(Rebuilt {
            format_changed,
            image_count,
        }))
    }

    /// False while creation is deferred on a zero-sized surface.
    pub fn is_ready(&self) -> bool {
        self.images.is_some()
    }

    /// Null while not ready.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.images
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |i| i.handle)
    }

    pub(crate) fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.images
            .as_ref()
            .map_or(vk::Extent2D::default(), |i| i.plan.extent)
    }

    pub fn format(&self) -> vk::Format {
        self.render_pass.format
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.images.as_ref().map(|i| i.plan.present_mode)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle
    }

    pub fn framebuffer(&self, image: u32) -> Option<vk::Framebuffer> {
        self.images
            .as_ref()
            .and_then(|i| i.framebuffers.get(image as usize).copied())
    }

    pub fn image_count(&self) -> usize {
        self.images.as_ref().map_or(0, |i| i.images.len())
    }
}

fn log_plan(what: &str, plan: &SwapchainPlan, images: usize) {
    info!(
        "{what}: {}x{}, {:?}/{:?}, present={}, images={images}",
        plan.extent.width,
        plan.extent.height,
        plan.format,
        plan.color_space,
        pm_name(plan.present_mode)
    );
}
