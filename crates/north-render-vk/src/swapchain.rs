// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, its image views, the main render pass and per-image
//! framebuffers, plus the rules for rebuilding them.
use ash::khr::swapchain;
use ash::vk;
use north_render::RenderSize;
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::SwapchainError;
use crate::VkVsyncMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SwapchainPhase {
    /// No presentable chain exists.
    #[default]
    Uninitialized,
    /// Chain, views, render pass and framebuffers are all valid.
    Ready,
    /// Resources are being replaced.
    Rebuilding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildPlan {
    /// Nothing to do; current resources (if any) stay.
    Skip,
    Build,
}

/// Decides whether a rebuild is due. `stale` is set when acquire or present
/// reported the chain out of date or suboptimal.
pub fn plan_rebuild(
    phase: SwapchainPhase,
    current: vk::Extent2D,
    want: RenderSize,
    stale: bool,
) -> RebuildPlan {
    if want.is_zero_area() {
        return RebuildPlan::Skip;
    }
    let same_size = current.width == want.width && current.height == want.height;
    match phase {
        SwapchainPhase::Ready if same_size && !stale => RebuildPlan::Skip,
        _ => RebuildPlan::Build,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentSettings {
    pub vsync: bool,
    pub mode: VkVsyncMode,
}

pub(crate) fn pick_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<(vk::SurfaceFormatKHR, &'static str)> {
    let find = |pred: &dyn Fn(&vk::SurfaceFormatKHR) -> bool| formats.iter().copied().find(pred);

    if let Some(f) = find(&|f| f.format == vk::Format::B8G8R8A8_SRGB) {
        return Some((f, "bgra8_srgb"));
    }
    if let Some(f) = find(&|f| f.format == vk::Format::R8G8B8A8_SRGB) {
        return Some((f, "rgba8_srgb"));
    }
    if let Some(f) = find(&|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }) {
        return Some((f, "bgra8_unorm_srgbcs"));
    }
    formats.first().map(|&f| (f, "driver_default"))
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    settings: PresentSettings,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (settings.vsync, settings.mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VkVsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VkVsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    // FIFO is the one mode every implementation must expose.
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum for overlap, capped by the maximum (0 = no max).
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

unsafe fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<vk::RenderPass, vk::Result> {
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
    // The image-acquired semaphore is waited at COLOR_ATTACHMENT_OUTPUT; the
    // layout transition must not start before that.
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
    unsafe { device.create_render_pass(&info, None) }
}

/// Owns the presentable chain. All mutation happens in [`rebuild`] and only
/// after the caller has idled the device.
///
/// [`rebuild`]: Swapchain::rebuild
pub struct Swapchain {
    loader: swapchain::Device,
    device: ash::Device,
    phase: SwapchainPhase,

    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,

    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    pub(crate) fn new(ctx: &DeviceContext) -> Result<Self, SwapchainError> {
        if ctx.surface().is_none() {
            return Err(SwapchainError::NoSurface);
        }
        Ok(Self {
            loader: swapchain::Device::new(ctx.instance(), ctx.device()),
            device: ctx.device().clone(),
            phase: SwapchainPhase::Uninitialized,
            handle: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            images: Vec::new(),
            views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        })
    }

    pub fn phase(&self) -> SwapchainPhase {
        self.phase
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub(crate) fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub(crate) fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub(crate) fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub(crate) fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Brings the chain to `want`. Returns whether anything was rebuilt.
    ///
    /// A zero-area request leaves the current chain alone. Errors are
    /// returned, never retried. If the failure happens after the previous
    /// chain was handed to the driver as `old_swapchain`, everything is torn
    /// down and the phase drops to `Uninitialized`.
    pub(crate) fn rebuild(
        &mut self,
        ctx: &DeviceContext,
        want: RenderSize,
        settings: PresentSettings,
        stale: bool,
    ) -> Result<bool, SwapchainError> {
        if plan_rebuild(self.phase, self.extent, want, stale) == RebuildPlan::Skip {
            return Ok(false);
        }
        let Some(surface) = ctx.surface() else {
            return Err(SwapchainError::NoSurface);
        };
        let phys = ctx.physical_device();
        let previous = self.phase;
        self.phase = SwapchainPhase::Rebuilding;

        // --- Surface queries (old chain still intact on failure) ---
        let queried = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(phys, surface.handle)
                .and_then(|caps| {
                    let formats = surface
                        .loader
                        .get_physical_device_surface_formats(phys, surface.handle)?;
                    let modes = surface
                        .loader
                        .get_physical_device_surface_present_modes(phys, surface.handle)?;
                    Ok((caps, formats, modes))
                })
        };
        let (caps, formats, modes) = match queried {
            Ok(q) => q,
            Err(e) => {
                self.phase = previous;
                return Err(SwapchainError::SurfaceQuery(e));
            }
        };
        let Some((surf_format, reason)) = pick_surface_format(&formats) else {
            self.phase = previous;
            return Err(SwapchainError::NoSurfaceFormats);
        };
        let present_mode = choose_present_mode(&modes, settings);
        let extent = extent_from_caps(&caps, want);
        if extent.width == 0 || extent.height == 0 {
            // Surface shrank to nothing between the resize event and now.
            self.phase = previous;
            return Ok(false);
        }

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let families = ctx.queue_families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, qf_count, qf_ptr) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (vk::SharingMode::CONCURRENT, 2, family_indices.as_ptr())
        };

        let old_swapchain = self.handle;
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle,
            min_image_count: image_count(&caps),
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: qf_count,
            p_queue_family_indices: qf_ptr,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };

        // Past this call the old chain is retired whether or not it succeeds.
        let created = unsafe { self.loader.create_swapchain(&swap_info, None) };
        self.destroy_image_resources();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
            self.handle = vk::SwapchainKHR::null();
        }
        let new_handle = match created {
            Ok(h) => h,
            Err(e) => {
                self.destroy();
                return Err(SwapchainError::Create(e));
            }
        };
        self.handle = new_handle;

        let format_changed = self.format.format != surf_format.format;
        self.format = surf_format;
        self.extent = extent;
        self.present_mode = present_mode;

        if let Err(e) = unsafe { self.build_image_resources(format_changed) } {
            self.destroy();
            return Err(e);
        }

        self.phase = SwapchainPhase::Ready;
        info!(
            reason,
            format = ?surf_format.format,
            color_space = ?surf_format.color_space,
            present_mode = pm_name(present_mode),
            extent = format_args!("{}x{}", extent.width, extent.height),
            images = self.images.len(),
            "swapchain built"
        );
        Ok(true)
    }

    unsafe fn build_image_resources(&mut self, format_changed: bool) -> Result<(), SwapchainError> {
        let d = &self.device;
        self.images = unsafe { self.loader.get_swapchain_images(self.handle) }
            .map_err(SwapchainError::Images)?;

        for &image in &self.images {
            let info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view =
                unsafe { d.create_image_view(&info, None) }.map_err(SwapchainError::ImageView)?;
            self.views.push(view);
        }

        if format_changed || self.render_pass == vk::RenderPass::null() {
            if self.render_pass != vk::RenderPass::null() {
                debug!("surface format changed; recreating render pass");
                unsafe { d.destroy_render_pass(self.render_pass, None) };
                self.render_pass = vk::RenderPass::null();
            }
            self.render_pass = unsafe { create_render_pass(d, self.format.format) }
                .map_err(SwapchainError::RenderPass)?;
        }

        for &view in &self.views {
            let attachments = [view];
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { d.create_framebuffer(&info, None) }
                .map_err(SwapchainError::Framebuffer)?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    fn destroy_image_resources(&mut self) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(fb, None);
            }
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
        }
        // Images belong to the swapchain itself.
        self.images.clear();
    }

    /// Tears everything down and returns to `Uninitialized`. The caller must
    /// have idled the device.
    pub(crate) fn destroy(&mut self) {
        self.destroy_image_resources();
        unsafe {
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
        }
        if self.phase != SwapchainPhase::Uninitialized {
            debug!(phase = ?self.phase, "swapchain torn down");
        }
        self.render_pass = vk::RenderPass::null();
        self.handle = vk::SwapchainKHR::null();
        self.format = vk::SurfaceFormatKHR::default();
        self.extent = vk::Extent2D::default();
        self.phase = SwapchainPhase::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: ext(u32::MAX, u32::MAX),
            min_image_extent: ext(1, 1),
            max_image_extent: ext(4096, 2048),
            ..Default::default()
        }
    }

    #[test]
    fn zero_area_never_rebuilds() {
        for phase in [
            SwapchainPhase::Uninitialized,
            SwapchainPhase::Ready,
            SwapchainPhase::Rebuilding,
        ] {
            assert_eq!(
                plan_rebuild(phase, ext(800, 600), RenderSize::new(0, 0), true),
                RebuildPlan::Skip
            );
            assert_eq!(
                plan_rebuild(phase, ext(800, 600), RenderSize::new(800, 0), false),
                RebuildPlan::Skip
            );
        }
    }

    #[test]
    fn ready_with_matching_extent_skips_unless_stale() {
        let want = RenderSize::new(800, 600);
        assert_eq!(
            plan_rebuild(SwapchainPhase::Ready, ext(800, 600), want, false),
            RebuildPlan::Skip
        );
        assert_eq!(
            plan_rebuild(SwapchainPhase::Ready, ext(800, 600), want, true),
            RebuildPlan::Build
        );
        assert_eq!(
            plan_rebuild(SwapchainPhase::Ready, ext(640, 480), want, false),
            RebuildPlan::Build
        );
    }

    #[test]
    fn uninitialized_always_builds() {
        assert_eq!(
            plan_rebuild(
                SwapchainPhase::Uninitialized,
                ext(0, 0),
                RenderSize::new(1, 1),
                false
            ),
            RebuildPlan::Build
        );
    }

    #[test]
    fn surface_format_preference() {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let all = [
            sf(vk::Format::B8G8R8A8_UNORM, srgb),
            sf(vk::Format::R8G8B8A8_SRGB, srgb),
            sf(vk::Format::B8G8R8A8_SRGB, srgb),
        ];
        assert_eq!(pick_surface_format(&all).unwrap().0.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(
            pick_surface_format(&all[..2]).unwrap().0.format,
            vk::Format::R8G8B8A8_SRGB
        );
        assert_eq!(
            pick_surface_format(&all[..1]).unwrap().0.format,
            vk::Format::B8G8R8A8_UNORM
        );

        let odd = [sf(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT)];
        assert_eq!(pick_surface_format(&odd).unwrap().1, "driver_default");
        assert!(pick_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_choice() {
        use vk::PresentModeKHR as P;
        let all = [P::FIFO, P::MAILBOX, P::IMMEDIATE];
        let vs = |mode| PresentSettings { vsync: true, mode };
        let novs = PresentSettings {
            vsync: false,
            mode: VkVsyncMode::Fifo,
        };

        assert_eq!(choose_present_mode(&all, vs(VkVsyncMode::Mailbox)), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO], vs(VkVsyncMode::Mailbox)), P::FIFO);
        assert_eq!(choose_present_mode(&all, vs(VkVsyncMode::Fifo)), P::FIFO);
        assert_eq!(choose_present_mode(&all, novs), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX], novs), P::MAILBOX);
        assert_eq!(choose_present_mode(&[], novs), P::FIFO);
    }

    #[test]
    fn extent_follows_surface_or_clamps_request() {
        let mut c = caps(2, 3);
        assert_eq!(extent_from_caps(&c, RenderSize::new(8000, 0)), ext(4096, 1));
        assert_eq!(extent_from_caps(&c, RenderSize::new(800, 600)), ext(800, 600));
        c.current_extent = ext(1024, 768);
        assert_eq!(extent_from_caps(&c, RenderSize::new(800, 600)), ext(1024, 768));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(image_count(&caps(2, 0)), 3);
        assert_eq!(image_count(&caps(2, 8)), 3);
        assert_eq!(image_count(&caps(3, 3)), 3);
    }
}
