//! Event names exchanged with the control plane

/// Handshake step 1: config schema announcement (acked).
pub const MODULE_SEND_CONFIG_SCHEMA: &str = "MODULE:SEND_CONFIG_SCHEMA";
/// Handshake step 2: requirements announcement (acked).
pub const MODULE_SEND_REQUIREMENTS: &str = "MODULE:SEND_REQUIREMENTS";
/// Readiness announcement carrying the backend declaration (acked).
pub const MODULE_READY: &str = "MODULE:READY";

/// Remote config push.
pub const CONFIG_SEND_CONFIG_CHANGED: &str = "CONFIG:SEND_CONFIG_CHANGED";
/// Routing catalog push.
pub const CONFIG_SEND_ROUTES_CHANGED: &str = "CONFIG:SEND_ROUTES_CHANGED";

/// Side-channel session errors pushed by the control plane.
pub const ERROR_CONNECTION: &str = "ERROR_CONNECTION";
pub const ERROR_CONFIG: &str = "ERROR_CONFIG";

const MODULE_CONNECTED_SUFFIX: &str = "_MODULE_CONNECTED";

/// Event carrying the host list of a required module.
pub fn module_connected(module_name: &str) -> String {
    format!("{}{}", module_name, MODULE_CONNECTED_SUFFIX)
}

/// Events whose payloads carry configuration and are redacted before logging.
pub fn is_config_bearing(event: &str) -> bool {
    matches!(event, MODULE_SEND_CONFIG_SCHEMA | CONFIG_SEND_CONFIG_CHANGED)
}
