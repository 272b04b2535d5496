//! Value parsers for CLI arguments.

use std::fs;
use std::path::PathBuf;

/// The file must exist and be readable.
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }
    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Cache kinds become a key segment, so no separators or glob characters.
pub fn validate_kind(kind: &str) -> Result<String, String> {
    let kind = kind.trim();
    if kind.is_empty() {
        return Err("Cache kind cannot be empty".to_string());
    }
    if !crate::cache::is_valid_kind(kind) {
        return Err(format!(
            "Cache kind '{}' must not contain ':', whitespace or glob characters",
            kind
        ));
    }
    Ok(kind.to_string())
}

/// Circuit names and cache keys: anything non-blank.
pub fn validate_name(name: &str) -> Result<String, String> {
    if name.trim().is_empty() {
        return Err("Value cannot be empty".to_string());
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_config_file_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]").unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(validate_config_file_path(path).unwrap(), file.path());

        let dir = tempfile::tempdir().unwrap();
        assert!(validate_config_file_path(dir.path().to_str().unwrap()).is_err());
        assert!(validate_config_file_path("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_validate_kind() {
        assert_eq!(validate_kind(" site ").unwrap(), "site");
        assert!(validate_kind("").is_err());
        assert!(validate_kind("a:b").is_err());
        assert!(validate_kind("pa*ge").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("ai:provider").is_ok());
        assert!(validate_name("   ").is_err());
    }
}
