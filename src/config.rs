use std::time::Duration;

use anyhow::Context as _;

pub const AUTOSAVE_ENV: &str = "RECIPE_PRODUCER_AUTOSAVE_MS";
pub const MAX_IMAGE_BYTES_ENV: &str = "RECIPE_PRODUCER_MAX_IMAGE_BYTES";
pub const BLOB_QUOTA_ENV: &str = "RECIPE_PRODUCER_BLOB_QUOTA_BYTES";

pub const DEFAULT_AUTOSAVE_MS: u64 = 1_000;
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Image extensions accepted by attachment uploads.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorConfig {
    pub autosave_debounce: Duration,
    pub max_image_bytes: u64,
    /// Byte budget for the workspace blob directory; `None` is unbounded.
    pub blob_quota_bytes: Option<u64>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            autosave_debounce: Duration::from_millis(DEFAULT_AUTOSAVE_MS),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            blob_quota_bytes: None,
        }
    }
}

impl EditorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; unset or blank values keep
    /// their defaults, unparsable values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse_u64(&lookup, AUTOSAVE_ENV)? {
            config.autosave_debounce = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_u64(&lookup, MAX_IMAGE_BYTES_ENV)? {
            if bytes == 0 {
                anyhow::bail!("{MAX_IMAGE_BYTES_ENV} must be greater than zero");
            }
            config.max_image_bytes = bytes;
        }
        config.blob_quota_bytes = parse_u64(&lookup, BLOB_QUOTA_ENV)?;
        Ok(config)
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .with_context(|| format!("invalid {name}={raw:?}. expected a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() -> anyhow::Result<()> {
        let config = EditorConfig::from_lookup(lookup(&[]))?;
        assert_eq!(config, EditorConfig::default());
        assert_eq!(config.max_image_bytes, 10 * 1024 * 1024);
        assert_eq!(config.autosave_debounce, Duration::from_secs(1));
        Ok(())
    }

    #[test]
    fn overrides_are_parsed() -> anyhow::Result<()> {
        let config = EditorConfig::from_lookup(lookup(&[
            (AUTOSAVE_ENV, " 250 "),
            (MAX_IMAGE_BYTES_ENV, "2048"),
            (BLOB_QUOTA_ENV, "4096"),
        ]))?;
        assert_eq!(config.autosave_debounce, Duration::from_millis(250));
        assert_eq!(config.max_image_bytes, 2048);
        assert_eq!(config.blob_quota_bytes, Some(4096));
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EditorConfig::from_lookup(lookup(&[(AUTOSAVE_ENV, "soon")])).unwrap_err();
        assert!(format!("{err:#}").contains(AUTOSAVE_ENV));

        let err = EditorConfig::from_lookup(lookup(&[(MAX_IMAGE_BYTES_ENV, "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
