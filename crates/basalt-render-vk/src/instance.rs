// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::{vk, Entry};
use raw_window_handle::HasDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{build_err, Error, Result};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerRequest {
    pub name: &'static CStr,
    /// Optional layers are skipped with a warning when absent.
    pub required: bool,
}

#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub application_name: CString,
    pub application_version: u32,
    pub engine_name: CString,
    pub engine_version: u32,
    pub api_version: u32,
    pub layers: Vec<LayerRequest>,
    /// Extra instance extensions on top of what the window system needs.
    pub extensions: Vec<&'static CStr>,
    pub debug_messenger: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            application_name: c"basalt".to_owned(),
            application_version: 0,
            engine_name: c"basalt".to_owned(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            layers: Vec::new(),
            extensions: Vec::new(),
            debug_messenger: false,
        }
    }
}

impl InstanceConfig {
    /// Khronos validation plus a debug messenger routed into `tracing`.
    pub fn with_validation(mut self, required: bool) -> Self {
        self.layers.push(LayerRequest {
            name: VALIDATION_LAYER,
            required,
        });
        self.debug_messenger = true;
        self
    }
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    raw: vk::DebugUtilsMessengerEXT,
}

/// Root of the ownership chain. Everything else holds an `Arc<Instance>`.
pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    debug: Option<DebugMessenger>,
    enabled_layers: Vec<&'static CStr>,
}

impl Instance {
    pub fn new(config: &InstanceConfig, display: &dyn HasDisplayHandle) -> Result<Arc<Self>> {
        let entry = Entry::linked();
        let display_raw = display.display_handle()?.as_raw();

        let available_layers = enumerate_instance_layers(&entry)?;
        let layers = validate_layers(&config.layers, &available_layers)?;

        let mut extensions: Vec<&'static CStr> =
            ash_window::enumerate_required_extensions(display_raw)
                .map_err(Error::enumeration("window system instance extensions"))?
                .iter()
                // SAFETY: ash-window hands out pointers to static, nul-terminated names.
                .map(|&p| unsafe { CStr::from_ptr(p) })
                .collect();
        for &ext in &config.extensions {
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        let available_extensions = enumerate_instance_extensions(&entry)?;
        let debug_messenger = debug_messenger_enabled(config, &available_extensions);
        if debug_messenger && !extensions.contains(&debug_utils::NAME) {
            extensions.push(debug_utils::NAME);
        }
        check_extensions("instance extension", &extensions, &available_extensions)?;

        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();
        let ext_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: config.application_name.as_ptr(),
            application_version: config.application_version,
            p_engine_name: config.engine_name.as_ptr(),
            engine_version: config.engine_version,
            api_version: config.api_version,
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            ..Default::default()
        };

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(build_err("instance"))?;

        let mut instance = Instance {
            entry,
            raw,
            debug: None,
            enabled_layers: layers,
        };
        if debug_messenger {
            // Dropping `instance` on error destroys the VkInstance.
            instance.debug = Some(instance.create_debug_messenger()?);
        }

        info!(
            layers = ?instance.enabled_layers,
            extensions = extensions.len(),
            debug_messenger = instance.debug.is_some(),
            "Vulkan instance created"
        );
        Ok(Arc::new(instance))
    }

    fn create_debug_messenger(&self) -> Result<DebugMessenger> {
        let loader = debug_utils::Instance::new(&self.entry, &self.raw);
        let info = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let raw = unsafe { loader.create_debug_utils_messenger(&info, None) }
            .map_err(Error::fatal("create_debug_utils_messenger"))?;
        Ok(DebugMessenger { loader, raw })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn enabled_layers(&self) -> &[&'static CStr] {
        &self.enabled_layers
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.raw, None);
            }
            self.raw.destroy_instance(None);
        }
        debug!("Vulkan instance destroyed");
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(?types, "[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(?types, "[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(?types, "[vulkan] {msg}");
    } else {
        trace!(?types, "[vulkan] {msg}");
    }
    vk::FALSE
}

pub fn enumerate_instance_layers(entry: &Entry) -> Result<Vec<String>> {
    let props = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(Error::enumeration("instance layers"))?;
    Ok(props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(|n| n.to_string_lossy().into_owned())
        .collect())
}

pub fn enumerate_instance_extensions(entry: &Entry) -> Result<Vec<String>> {
    let props = unsafe { entry.enumerate_instance_extension_properties(None) }
        .map_err(Error::enumeration("instance extensions"))?;
    Ok(props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|n| n.to_string_lossy().into_owned())
        .collect())
}

/// Returns the layers to enable. Missing required layers fail, missing
/// optional ones are dropped.
pub fn validate_layers(
    requests: &[LayerRequest],
    available: &[String],
) -> Result<Vec<&'static CStr>> {
    let mut enabled = Vec::with_capacity(requests.len());
    let mut missing = Vec::new();
    for req in requests {
        let name = req.name.to_string_lossy();
        if available.iter().any(|a| *a == name) {
            enabled.push(req.name);
        } else if req.required {
            missing.push(name.into_owned());
        } else {
            warn!("optional layer {name} not present, continuing without it");
        }
    }
    if !missing.is_empty() {
        return Err(Error::MissingLayerOrExtension {
            kind: "layer",
            names: missing,
        });
    }
    Ok(enabled)
}

/// Whether to enable debug utils and the messenger. Without the extension
/// they are dropped, unless validation was requested as required, in which
/// case the extension stays wanted and the extension check fails.
fn debug_messenger_enabled(config: &InstanceConfig, available: &[String]) -> bool {
    if !config.debug_messenger {
        return false;
    }
    let name = debug_utils::NAME.to_string_lossy();
    if available.iter().any(|a| *a == name) {
        return true;
    }
    let required = config
        .layers
        .iter()
        .any(|l| l.required && l.name == VALIDATION_LAYER);
    if !required {
        warn!("{name} not present, continuing without a debug messenger");
    }
    required
}

pub fn check_extensions(kind: &'static str, wanted: &[&CStr], available: &[String]) -> Result<()> {
    let missing: Vec<String> = wanted
        .iter()
        .map(|w| w.to_string_lossy())
        .filter(|w| !available.iter().any(|a| a == w))
        .map(|w| w.into_owned())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingLayerOrExtension {
            kind,
            names: missing,
        })
    }
}
