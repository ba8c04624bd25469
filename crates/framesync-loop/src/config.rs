//! Frame loop configuration.
//!
//! Settings live in the `[loop]` table of a TOML file.  Every key is
//! optional; missing keys fall back to [`LoopConfig::default`].
//!
//! ```toml
//! [loop]
//! name = "main"
//! frame_interval_ms = 16
//! max_callbacks_per_frame = 0   # 0 = drain everything queued at frame start
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoopError, Result};

/// Settings for [`FrameLoop`](crate::FrameLoop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Name used in log output.
    pub name: String,
    /// Sleep between frames when the loop is pumped by `run_*`.
    pub frame_interval_ms: u64,
    /// Upper bound on posted callbacks executed per frame (0 = unbounded).
    pub max_callbacks_per_frame: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            frame_interval_ms: 16,
            max_callbacks_per_frame: 0,
        }
    }
}

/// On-disk layout: the loop settings sit under `[loop]`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(rename = "loop")]
    frame_loop: LoopConfig,
}

impl LoopConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Parse from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.frame_loop)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LoopError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), ?config, "loop config loaded");
        Ok(config)
    }

    /// Render as TOML, `[loop]` table included.
    pub fn to_toml_string(&self) -> Result<String> {
        let file = ConfigFile {
            frame_loop: self.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_keys_use_defaults() {
        let config = LoopConfig::from_toml_str("[loop]\nframe_interval_ms = 5\n").unwrap();
        assert_eq!(config.frame_interval(), Duration::from_millis(5));
        assert_eq!(config.name, "main");
        assert_eq!(config.max_callbacks_per_frame, 0);
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(LoopConfig::from_toml_str("").unwrap(), LoopConfig::default());
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let err = LoopConfig::from_toml_str("[loop]\nframe_interval_ms = \"fast\"\n").unwrap_err();
        assert!(matches!(err, LoopError::ConfigParse(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[loop]\nname = \"render\"\nmax_callbacks_per_frame = 8").unwrap();

        let config = LoopConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "render");
        assert_eq!(config.max_callbacks_per_frame, 8);
        assert_eq!(config.frame_interval_ms, 16);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        match LoopConfig::load(&path) {
            Err(LoopError::ConfigRead { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn renders_back_to_toml() {
        let config = LoopConfig {
            name: "x".into(),
            frame_interval_ms: 1,
            max_callbacks_per_frame: 2,
        };
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[loop]"));
        assert_eq!(LoopConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn unrepresentable_value_fails_to_render() {
        let config = LoopConfig {
            max_callbacks_per_frame: usize::MAX,
            ..LoopConfig::default()
        };
        let err = config.to_toml_string().unwrap_err();
        assert!(matches!(err, LoopError::ConfigRender(_)));
    }
}
