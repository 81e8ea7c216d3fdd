use blazer_process::LaunchConfig;

use crate::error::LifecycleError;

const MAX_NAME_LEN: usize = 255;
const MAX_MEMORY_LEN: usize = 50;

/// Instance names become directory names, so keep them filesystem-safe.
pub fn validate_name(name: &str) -> Result<(), LifecycleError> {
    if name.trim().is_empty() {
        return Err(LifecycleError::Invalid(
            "instance_name must be non-empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(LifecycleError::Invalid(format!(
            "instance_name must be at most {MAX_NAME_LEN} bytes"
        )));
    }
    if name == "." || name == ".." {
        return Err(LifecycleError::Invalid("invalid instance_name".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(LifecycleError::Invalid(format!(
            "invalid instance_name: {name} (allowed: letters, digits, '-', '_', '.')"
        )));
    }
    Ok(())
}

pub fn validate_port(port: u16) -> Result<(), LifecycleError> {
    if port == 0 {
        return Err(LifecycleError::Invalid(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}

/// JVM heap size: digits with an optional k/m/g suffix, e.g. `512m`, `2G`.
pub fn validate_memory(field: &str, value: &str) -> Result<(), LifecycleError> {
    let v = value.trim();
    let digits = v.strip_suffix(['k', 'K', 'm', 'M', 'g', 'G']).unwrap_or(v);
    if v.len() > MAX_MEMORY_LEN || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return Err(LifecycleError::Invalid(format!(
            "invalid {field}: {value} (expected e.g. 512m or 2g)"
        )));
    }
    Ok(())
}

pub fn validate_launch_config(config: &LaunchConfig) -> Result<(), LifecycleError> {
    if config.install_path.trim().is_empty() {
        return Err(LifecycleError::Invalid(
            "install_path must be non-empty".to_string(),
        ));
    }
    if config.ip_address.trim().is_empty() {
        return Err(LifecycleError::Invalid(
            "ip_address must be non-empty".to_string(),
        ));
    }
    if let Some(min) = config.min_memory.as_deref() {
        validate_memory("min_memory", min)?;
    }
    if let Some(max) = config.max_memory.as_deref() {
        validate_memory("max_memory", max)?;
    }
    Ok(())
}
