// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::shader::ShaderError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("driver could not enumerate {what}: {result}")]
    Enumeration {
        what: &'static str,
        result: vk::Result,
    },

    #[error("required {kind} missing: {}", names.join(", "))]
    MissingLayerOrExtension {
        kind: &'static str,
        names: Vec<String>,
    },

    #[error("no physical device satisfies the selection policy")]
    NoSuitableDevice,

    #[error("selected device has no usable graphics+present queue family")]
    NoSuitableQueueFamily,

    #[error("surface does not offer backbuffer format {wanted:?}")]
    NoSurfaceFormat { wanted: vk::Format },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("swapchain is out of date or suboptimal")]
    SurfaceStale,

    #[error("selection policy aborted negotiation: {0}")]
    PolicyAborted(vk::Result),

    #[error("{context} failed: {result}")]
    Fatal {
        context: &'static str,
        result: vk::Result,
    },

    #[error("frame slot {slot} out of range for {count} slots")]
    SlotOutOfRange { slot: usize, count: usize },

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

/// Failure of one stage of the resource builder chain.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("out of memory while creating {what}: {result}")]
    OutOfMemory {
        what: &'static str,
        result: vk::Result,
    },

    #[error("creating {what} failed: {result}")]
    CreationFailure {
        what: &'static str,
        result: vk::Result,
    },

    #[error("no suitable {what} found")]
    NoSuitableResource { what: &'static str },

    #[error("render pass targets {render_pass:?} but the swapchain is {swapchain:?}")]
    FormatMismatch {
        render_pass: vk::Format,
        swapchain: vk::Format,
    },

    #[error("render area {area:?} exceeds swapchain extent {extent:?}")]
    RenderAreaTooLarge {
        area: vk::Extent2D,
        extent: vk::Extent2D,
    },

    #[error("vertex attribute format {0:?} has no known byte size")]
    UnsupportedVertexFormat(vk::Format),

    #[error("vertex type is {declared} bytes but its attributes cover {derived}")]
    StrideMismatch { declared: u32, derived: u32 },
}

impl BuildError {
    /// Splits a native creation result into memory exhaustion and everything else.
    pub fn from_vk(what: &'static str, result: vk::Result) -> Self {
        if is_out_of_memory(result) {
            BuildError::OutOfMemory { what, result }
        } else {
            BuildError::CreationFailure { what, result }
        }
    }
}

pub(crate) fn is_out_of_memory(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    EnumerationFailure,
    RequiredLayerOrExtensionMissing,
    NoSuitableDeviceFound,
    NoSuitableQueueFamilyFound,
    NoSurfaceFormatFound,
    DeviceOrSwapchainCreationFailure,
    NoSuitableResourceFound,
    OutOfHostOrDeviceMemory,
    SurfaceStale,
    InvalidConfiguration,
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Enumeration { result, .. } if is_out_of_memory(*result) => {
                ErrorKind::OutOfHostOrDeviceMemory
            }
            Error::Enumeration { .. } => ErrorKind::EnumerationFailure,
            Error::MissingLayerOrExtension { .. } => ErrorKind::RequiredLayerOrExtensionMissing,
            Error::NoSuitableDevice => ErrorKind::NoSuitableDeviceFound,
            Error::NoSuitableQueueFamily => ErrorKind::NoSuitableQueueFamilyFound,
            Error::NoSurfaceFormat { .. } => ErrorKind::NoSurfaceFormatFound,
            Error::Build(b) => match b {
                BuildError::OutOfMemory { .. } => ErrorKind::OutOfHostOrDeviceMemory,
                BuildError::CreationFailure { .. } => ErrorKind::DeviceOrSwapchainCreationFailure,
                BuildError::NoSuitableResource { .. } => ErrorKind::NoSuitableResourceFound,
                BuildError::FormatMismatch { .. }
                | BuildError::RenderAreaTooLarge { .. }
                | BuildError::UnsupportedVertexFormat(_)
                | BuildError::StrideMismatch { .. } => ErrorKind::Fatal,
            },
            Error::SurfaceStale => ErrorKind::SurfaceStale,
            Error::Fatal { result, .. } if is_out_of_memory(*result) => {
                ErrorKind::OutOfHostOrDeviceMemory
            }
            Error::Shader(ShaderError::OutOfMemory { .. }) => ErrorKind::OutOfHostOrDeviceMemory,
            Error::PolicyAborted(_)
            | Error::Fatal { .. }
            | Error::SlotOutOfRange { .. }
            | Error::Shader(_) => ErrorKind::Fatal,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfiguration,
            Error::WindowHandle(_) => ErrorKind::Fatal,
        }
    }

    /// Only a stale surface is handled locally, by recreating the swapchain.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::SurfaceStale
    }

    /// Errors the user fixes by changing hardware, drivers or config.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RequiredLayerOrExtensionMissing
                | ErrorKind::NoSuitableDeviceFound
                | ErrorKind::NoSuitableQueueFamilyFound
                | ErrorKind::NoSurfaceFormatFound
                | ErrorKind::InvalidConfiguration
        )
    }

    pub(crate) fn fatal(context: &'static str) -> impl FnOnce(vk::Result) -> Error {
        move |result| Error::Fatal { context, result }
    }

    pub(crate) fn enumeration(what: &'static str) -> impl FnOnce(vk::Result) -> Error {
        move |result| Error::Enumeration { what, result }
    }
}

pub(crate) fn build_err(what: &'static str) -> impl FnOnce(vk::Result) -> BuildError {
    move |result| BuildError::from_vk(what, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_codes_classify_as_out_of_memory() {
        for code in [
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        ] {
            let err = BuildError::from_vk("swapchain", code);
            assert!(matches!(err, BuildError::OutOfMemory { what: "swapchain", .. }));
            assert_eq!(Error::from(err).kind(), ErrorKind::OutOfHostOrDeviceMemory);
        }
    }

    #[test]
    fn other_codes_classify_as_creation_failure() {
        let err = BuildError::from_vk("device", vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(matches!(err, BuildError::CreationFailure { .. }));
        assert_eq!(
            Error::from(err).kind(),
            ErrorKind::DeviceOrSwapchainCreationFailure
        );
    }

    #[test]
    fn only_stale_surface_is_recoverable() {
        assert!(Error::SurfaceStale.is_recoverable());
        assert!(!Error::NoSuitableDevice.is_recoverable());
        assert!(!Error::Fatal {
            context: "queue_submit",
            result: vk::Result::ERROR_DEVICE_LOST
        }
        .is_recoverable());
    }

    #[test]
    fn startup_errors_are_configuration_errors() {
        let missing = Error::MissingLayerOrExtension {
            kind: "layer",
            names: vec!["VK_LAYER_KHRONOS_validation".into()],
        };
        assert!(missing.is_configuration());
        assert!(Error::NoSuitableDevice.is_configuration());
        assert!(Error::NoSurfaceFormat {
            wanted: vk::Format::B8G8R8A8_SRGB
        }
        .is_configuration());
        assert!(!Error::SurfaceStale.is_configuration());
    }

    #[test]
    fn policy_abort_is_fatal_and_keeps_code() {
        let err = Error::PolicyAborted(vk::Result::ERROR_FEATURE_NOT_PRESENT);
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains(&vk::Result::ERROR_FEATURE_NOT_PRESENT.to_string()));
    }

    #[test]
    fn missing_names_are_listed() {
        let err = Error::MissingLayerOrExtension {
            kind: "instance extension",
            names: vec!["VK_KHR_surface".into(), "VK_EXT_debug_utils".into()],
        };
        assert_eq!(
            err.to_string(),
            "required instance extension missing: VK_KHR_surface, VK_EXT_debug_utils"
        );
    }

    #[test]
    fn unavailable_window_handle_is_fatal_with_source() {
        let err = Error::from(raw_window_handle::HandleError::Unavailable);
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.is_recoverable());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("window handle unavailable"));
    }
}
