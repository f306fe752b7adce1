use std::path::Path;
use std::sync::LazyLock;

use decoder_bus::EngineConfig;
use decoder_bus::inspect::InspectConfig;
use decoder_bus::temporal_unit::DEFAULT_MAX_OBU_SIZE;
use serde::Deserialize;

use crate::cli::HookKind;

pub const CONFIG_ENV: &str = "AV1_PIPE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub inspect: InspectConfig,
    pub hook: HookKind,
    /// FFmpeg decoder name tried before the built-in candidates.
    pub decoder: Option<String>,
    /// OBUs declaring a larger payload are skipped as corrupt.
    pub max_obu_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            inspect: InspectConfig::default(),
            hook: HookKind::default(),
            decoder: None,
            max_obu_size: DEFAULT_MAX_OBU_SIZE,
        }
    }
}

impl AppConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).map_err(|e| anyhow::anyhow!("invalid config: {}", e))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        Self::from_json(&text)
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> = LazyLock::new(|| match std::env::var(CONFIG_ENV) {
        Ok(path) => AppConfig::load(Path::new(&path)).unwrap_or_else(|e| {
            log::warn!("{}, using defaults", e);
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    });
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = AppConfig::from_json(
            r#"{"engine": {"num_output_buffers": 8}, "hook": "ffmpeg", "decoder": "libdav1d"}"#,
        )
        .unwrap();
        assert_eq!(config.engine.num_input_buffers, 4);
        assert_eq!(config.engine.num_output_buffers, 8);
        assert_eq!(config.engine.initial_input_size, 768 * 1024);
        assert_eq!(config.inspect.max_pending, 8);
        assert_eq!(config.hook, HookKind::Ffmpeg);
        assert_eq!(config.decoder.as_deref(), Some("libdav1d"));
        assert_eq!(config.max_obu_size, DEFAULT_MAX_OBU_SIZE);

        let config = AppConfig::from_json(r#"{"max_obu_size": 4096}"#).unwrap();
        assert_eq!(config.max_obu_size, 4096);
    }

    #[test]
    fn test_invalid_config() {
        assert!(AppConfig::from_json(r#"{"hook": "vaapi"}"#).is_err());
        assert!(AppConfig::load(Path::new("/nonexistent/av1-pipe.json")).is_err());
    }
}
