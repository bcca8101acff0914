//! Plugin name validation.

/// Check that a plugin name can be used as a single directory name.
///
/// Returns `Ok(())` if valid, or `Err(message)` describing the problem.
pub fn validate_plugin_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }

    if name.contains('/') || name.contains('\\') {
        return Err("Name cannot contain path separators".into());
    }

    if name.contains('\0') {
        return Err("Name cannot contain null characters".into());
    }

    if name == "." || name == ".." {
        return Err("'.' and '..' are reserved names".into());
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err("Name cannot start or end with spaces".into());
    }

    if name.ends_with('.') {
        return Err("Name cannot end with a dot".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_plugin_name_valid() {
        assert!(validate_plugin_name("demo").is_ok());
        assert!(validate_plugin_name("impact-explorer").is_ok());
        assert!(validate_plugin_name("lca_tools.v2").is_ok());
    }

    #[test]
    fn test_validate_plugin_name_invalid() {
        assert!(validate_plugin_name("").is_err());
        assert!(validate_plugin_name("a/b").is_err());
        assert!(validate_plugin_name("a\\b").is_err());
        assert!(validate_plugin_name("..").is_err());
        assert!(validate_plugin_name(" demo").is_err());
        assert!(validate_plugin_name("demo.").is_err());
    }
}
