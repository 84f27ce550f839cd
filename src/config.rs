use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub home_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                // Config file (optional)
                .add_source(File::with_name("config").required(false)),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder
            // Default settings
            .set_default("home_dir", ".")?
            .set_default("log_level", "info")?
            // Environment variables (e.g. THUMBNAILER_URLS=https://a/x.jpg,https://b/y.png)
            .add_source(
                Environment::with_prefix("THUMBNAILER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("urls"),
            )
            .build()?
            .try_deserialize()
    }

    /// Directory that receives freshly downloaded images.
    pub fn staging_dir(&self) -> PathBuf {
        self.home_dir.join("incoming")
    }

    /// Directory that receives the resized variants.
    pub fn output_dir(&self) -> PathBuf {
        self.home_dir.join("outgoing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_builder(Config::builder()).unwrap();
        assert_eq!(settings.home_dir, PathBuf::from("."));
        assert_eq!(settings.log_level, "info");
        assert!(settings.log_file.is_none());
        assert!(settings.urls.is_empty());
    }

    #[test]
    fn test_areas_derive_from_home() {
        let builder = Config::builder().add_source(File::from_str(
            "home_dir = \"/srv/thumbs\"\nurls = [\"https://example.com/a.png\"]",
            FileFormat::Toml,
        ));
        let settings = Settings::from_builder(builder).unwrap();
        assert_eq!(settings.staging_dir(), PathBuf::from("/srv/thumbs/incoming"));
        assert_eq!(settings.output_dir(), PathBuf::from("/srv/thumbs/outgoing"));
        assert_eq!(settings.urls, vec!["https://example.com/a.png".to_string()]);
    }
}
