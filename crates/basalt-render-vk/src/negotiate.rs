// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::khr::swapchain;
use ash::vk;
use tracing::{debug, info, warn};

use crate::catalog::{PhysicalDeviceCandidate, QueueFamilyCandidate};
use crate::error::{Error, Result};

/// Outcome of a selection hook: a decision, or a native error that stops
/// negotiation as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict<T> {
    Continue(T),
    Abort(vk::Result),
}

impl<T> Verdict<T> {
    fn into_result(self) -> Result<T> {
        match self {
            Verdict::Continue(v) => Ok(v),
            Verdict::Abort(code) => Err(Error::PolicyAborted(code)),
        }
    }
}

/// Hardware chosen for rendering. The logical device is created from this
/// by [`crate::device::Device::new`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedHardware {
    pub physical_device: vk::PhysicalDevice,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_family_index: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

/// Ranks device types: discrete, then integrated, then the rest.
pub fn device_type_rank(kind: vk::PhysicalDeviceType) -> u8 {
    match kind {
        vk::PhysicalDeviceType::DISCRETE_GPU => 2,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        _ => 0,
    }
}

/// Pluggable selection. Every hook has the default behaviour, so custom
/// policies override only what they care about.
///
/// Candidates reaching `prefer` have already passed the hard filters:
/// swapchain support, every [`SelectionPolicy::required_extensions`] entry,
/// and at least one graphics+present queue family.
pub trait SelectionPolicy {
    /// Device extensions beyond `VK_KHR_swapchain`.
    fn required_extensions(&self) -> Vec<&'static CStr> {
        Vec::new()
    }

    /// Whether `candidate` should replace `current` as the chosen device.
    fn prefer(
        &self,
        current: Option<&PhysicalDeviceCandidate>,
        candidate: &PhysicalDeviceCandidate,
    ) -> Verdict<bool> {
        let better = match current {
            None => true,
            Some(cur) => device_type_rank(candidate.device_type) > device_type_rank(cur.device_type),
        };
        Verdict::Continue(better)
    }

    fn queue_family<'c>(
        &self,
        device: &'c PhysicalDeviceCandidate,
    ) -> Verdict<Option<&'c QueueFamilyCandidate>> {
        Verdict::Continue(device.render_present_families().next())
    }

    fn surface_format(
        &self,
        device: &PhysicalDeviceCandidate,
        preferred: vk::Format,
    ) -> Verdict<Option<vk::SurfaceFormatKHR>> {
        Verdict::Continue(
            device
                .surface
                .formats
                .iter()
                .copied()
                .find(|f| f.format == preferred),
        )
    }

    fn present_mode(&self, _device: &PhysicalDeviceCandidate) -> Verdict<vk::PresentModeKHR> {
        Verdict::Continue(vk::PresentModeKHR::FIFO)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPolicy;

impl SelectionPolicy for DefaultPolicy {}

/// Default policy with a different present mode, falling back to FIFO
/// when the device lacks it.
#[derive(Clone, Copy, Debug)]
pub struct PresentModePolicy(pub vk::PresentModeKHR);

impl SelectionPolicy for PresentModePolicy {
    fn present_mode(&self, _device: &PhysicalDeviceCandidate) -> Verdict<vk::PresentModeKHR> {
        Verdict::Continue(self.0)
    }
}

fn passes_hard_filters(candidate: &PhysicalDeviceCandidate, extra: &[&'static CStr]) -> bool {
    if !candidate.has_extension(swapchain::NAME) {
        debug!("skipping {}: missing VK_KHR_swapchain", candidate.name);
        return false;
    }
    if let Some(missing) = extra.iter().find(|e| !candidate.has_extension(e)) {
        debug!("skipping {}: missing {:?}", candidate.name, missing);
        return false;
    }
    if candidate.render_present_families().next().is_none() {
        debug!("skipping {}: no graphics+present queue family", candidate.name);
        return false;
    }
    true
}

pub fn negotiate(
    candidates: &[PhysicalDeviceCandidate],
    preferred_format: vk::Format,
    policy: &dyn SelectionPolicy,
) -> Result<SelectedHardware> {
    let extra = policy.required_extensions();

    let mut chosen: Option<&PhysicalDeviceCandidate> = None;
    for candidate in candidates.iter().filter(|c| passes_hard_filters(c, &extra)) {
        if policy.prefer(chosen, candidate).into_result()? {
            chosen = Some(candidate);
        }
    }
    let device = chosen.ok_or(Error::NoSuitableDevice)?;

    let family = policy
        .queue_family(device)
        .into_result()?
        .ok_or(Error::NoSuitableQueueFamily)?;

    let surface_format = policy
        .surface_format(device, preferred_format)
        .into_result()?
        .ok_or(Error::NoSurfaceFormat {
            wanted: preferred_format,
        })?;

    let mut present_mode = policy.present_mode(device).into_result()?;
    if !device.surface.present_modes.contains(&present_mode) {
        warn!(
            "{} does not offer {:?}, using FIFO",
            device.name, present_mode
        );
        present_mode = vk::PresentModeKHR::FIFO;
    }

    info!(
        device = %device.name,
        kind = ?device.device_type,
        queue_family = family.index,
        format = ?surface_format.format,
        ?present_mode,
        "negotiated hardware"
    );
    Ok(SelectedHardware {
        physical_device: device.handle,
        device_name: device.name.clone(),
        device_type: device.device_type,
        queue_family_index: family.index,
        surface_format,
        present_mode,
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::catalog::QueueCaps;

    const BGRA: vk::Format = vk::Format::B8G8R8A8_SRGB;

    #[test]
    fn discrete_wins_in_either_order() {
        let integrated = gpu(1, vk::PhysicalDeviceType::INTEGRATED_GPU);
        let discrete = gpu(2, vk::PhysicalDeviceType::DISCRETE_GPU);

        for set in [
            vec![integrated.clone(), discrete.clone()],
            vec![discrete.clone(), integrated.clone()],
        ] {
            let hw = negotiate(&set, BGRA, &DefaultPolicy).unwrap();
            assert_eq!(hw.physical_device, discrete.handle);
        }
    }

    #[test]
    fn first_of_equal_rank_wins() {
        let a = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        let b = gpu(2, vk::PhysicalDeviceType::DISCRETE_GPU);
        let hw = negotiate(&[a.clone(), b], BGRA, &DefaultPolicy).unwrap();
        assert_eq!(hw.physical_device, a.handle);
    }

    #[test]
    fn no_swapchain_support_means_no_device() {
        let mut a = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        let mut b = gpu(2, vk::PhysicalDeviceType::INTEGRATED_GPU);
        a.extensions.clear();
        b.extensions = vec![c"VK_KHR_maintenance1".to_owned()];
        assert!(matches!(
            negotiate(&[a, b], BGRA, &DefaultPolicy),
            Err(Error::NoSuitableDevice)
        ));
    }

    #[test]
    fn device_without_present_family_is_skipped() {
        let mut discrete = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        discrete.queue_families = vec![
            family(0, vk::QueueFlags::GRAPHICS, false),
            family(1, vk::QueueFlags::COMPUTE, true),
        ];
        let integrated = gpu(2, vk::PhysicalDeviceType::INTEGRATED_GPU);
        let hw = negotiate(&[discrete, integrated.clone()], BGRA, &DefaultPolicy).unwrap();
        assert_eq!(hw.physical_device, integrated.handle);
    }

    #[test]
    fn picks_first_graphics_present_family() {
        let mut dev = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        dev.queue_families = vec![
            family(0, vk::QueueFlags::TRANSFER, true),
            family(1, vk::QueueFlags::GRAPHICS, false),
            family(2, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
            family(3, vk::QueueFlags::GRAPHICS, true),
        ];
        let hw = negotiate(&[dev], BGRA, &DefaultPolicy).unwrap();
        assert_eq!(hw.queue_family_index, 2);
    }

    #[test]
    fn missing_format_has_no_fallback() {
        let mut dev = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        dev.surface.formats = vec![srgb(vk::Format::R8G8B8A8_UNORM)];
        match negotiate(&[dev], BGRA, &DefaultPolicy) {
            Err(Error::NoSurfaceFormat { wanted }) => assert_eq!(wanted, BGRA),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_present_mode_is_fifo() {
        let mut dev = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        dev.surface.present_modes = vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        let hw = negotiate(&[dev], BGRA, &DefaultPolicy).unwrap();
        assert_eq!(hw.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn unavailable_present_mode_falls_back_to_fifo() {
        let dev = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        let policy = PresentModePolicy(vk::PresentModeKHR::MAILBOX);
        let hw = negotiate(&[dev.clone()], BGRA, &policy).unwrap();
        assert_eq!(hw.present_mode, vk::PresentModeKHR::FIFO);

        let mut mailbox = dev;
        mailbox.surface.present_modes.push(vk::PresentModeKHR::MAILBOX);
        let hw = negotiate(&[mailbox], BGRA, &policy).unwrap();
        assert_eq!(hw.present_mode, vk::PresentModeKHR::MAILBOX);
    }

    struct DiscreteOnly;

    impl SelectionPolicy for DiscreteOnly {
        fn prefer(
            &self,
            current: Option<&PhysicalDeviceCandidate>,
            candidate: &PhysicalDeviceCandidate,
        ) -> Verdict<bool> {
            Verdict::Continue(
                current.is_none() && candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
            )
        }
    }

    #[test]
    fn custom_policy_can_reject_everything() {
        let integrated = gpu(1, vk::PhysicalDeviceType::INTEGRATED_GPU);
        assert!(matches!(
            negotiate(&[integrated], BGRA, &DiscreteOnly),
            Err(Error::NoSuitableDevice)
        ));
    }

    struct NeedsCompute;

    impl SelectionPolicy for NeedsCompute {
        fn queue_family<'c>(
            &self,
            device: &'c PhysicalDeviceCandidate,
        ) -> Verdict<Option<&'c QueueFamilyCandidate>> {
            Verdict::Continue(
                device
                    .render_present_families()
                    .find(|q| q.caps.contains(QueueCaps::COMPUTE)),
            )
        }
    }

    #[test]
    fn custom_queue_policy_without_match_fails() {
        let dev = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        assert!(matches!(
            negotiate(&[dev], BGRA, &NeedsCompute),
            Err(Error::NoSuitableQueueFamily)
        ));
    }

    struct Aborting;

    impl SelectionPolicy for Aborting {
        fn prefer(
            &self,
            _: Option<&PhysicalDeviceCandidate>,
            _: &PhysicalDeviceCandidate,
        ) -> Verdict<bool> {
            Verdict::Abort(vk::Result::ERROR_INCOMPATIBLE_DRIVER)
        }
    }

    #[test]
    fn abort_propagates_native_code_unmodified() {
        let dev = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        match negotiate(&[dev], BGRA, &Aborting) {
            Err(Error::PolicyAborted(code)) => {
                assert_eq!(code, vk::Result::ERROR_INCOMPATIBLE_DRIVER)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    struct WantsRayTracing;

    impl SelectionPolicy for WantsRayTracing {
        fn required_extensions(&self) -> Vec<&'static CStr> {
            vec![c"VK_KHR_ray_tracing_pipeline"]
        }
    }

    #[test]
    fn policy_extensions_are_a_hard_filter() {
        let plain = gpu(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        let mut rt = gpu(2, vk::PhysicalDeviceType::INTEGRATED_GPU);
        rt.extensions.push(c"VK_KHR_ray_tracing_pipeline".to_owned());
        let hw = negotiate(&[plain, rt.clone()], BGRA, &WantsRayTracing).unwrap();
        assert_eq!(hw.physical_device, rt.handle);
    }
}
