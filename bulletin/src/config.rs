//! Locating the configuration file.

use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "BULLETIN_CONFIG";

/// Environment variable overriding the relay password.
pub const PASSWORD_ENV: &str = "BULLETIN_SMTP_PASSWORD";

/// Searched in order when neither a flag nor [`CONFIG_ENV`] is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./bulletin.toml", "/etc/bulletin/bulletin.toml"];

/// Find the configuration file using the following precedence:
/// 1. `--config` on the command line
/// 2. `BULLETIN_CONFIG` environment variable
/// 3. ./bulletin.toml (current working directory)
/// 4. /etc/bulletin/bulletin.toml (system-wide config)
///
/// # Errors
///
/// Returns an error if an explicitly named file does not exist or no
/// default location has one.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let defaults: Vec<PathBuf> = DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect();
    resolve_config_path(explicit, std::env::var(CONFIG_ENV).ok(), &defaults)
}

/// [`find_config_file`] with the environment and defaults supplied.
///
/// # Errors
///
/// See [`find_config_file`].
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env_value: Option<String>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Some(env_path) = env_value {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    for path in defaults {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config flag\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        let from_env = dir.path().join("env.toml");
        std::fs::write(&explicit, "").unwrap();
        std::fs::write(&from_env, "").unwrap();

        let found = resolve_config_path(
            Some(&explicit),
            Some(from_env.display().to_string()),
            &[],
        )
        .unwrap();
        assert_eq!(found, explicit);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_config_path(Some(&dir.path().join("missing.toml")), None, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_before_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let from_env = dir.path().join("env.toml");
        let default = dir.path().join("default.toml");
        std::fs::write(&from_env, "").unwrap();
        std::fs::write(&default, "").unwrap();

        let found = resolve_config_path(
            None,
            Some(from_env.display().to_string()),
            std::slice::from_ref(&default),
        )
        .unwrap();
        assert_eq!(found, from_env);
    }

    #[test]
    fn test_first_existing_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("present.toml");
        std::fs::write(&present, "").unwrap();

        let found = resolve_config_path(None, None, &[missing, present.clone()]).unwrap();
        assert_eq!(found, present);
    }

    #[test]
    fn test_nothing_found_lists_locations() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");

        let err = resolve_config_path(None, None, std::slice::from_ref(&missing)).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
        assert!(err.to_string().contains(CONFIG_ENV));
    }
}
