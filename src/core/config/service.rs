use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::RetrievalConfig;
use super::validation::validate_config;
use crate::rag::RetrievalError;

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("DOCS_ASSISTANT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    /// Raw, validated configuration document. A missing file is an empty document.
    pub fn load_config(&self) -> Result<Value, RetrievalError> {
        let config = load_yaml_file(&self.config_path())?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Typed retrieval configuration with process environment overrides applied.
    pub fn retrieval_config(&self) -> Result<RetrievalConfig, RetrievalError> {
        let raw = self.load_config()?;
        let mut config = RetrievalConfig::from_value(&raw, &self.paths);
        config.apply_overrides(&self.paths, |key| env::var(key).ok());
        Ok(config)
    }
}

fn load_yaml_file(path: &Path) -> Result<Value, RetrievalError> {
    if !path.exists() {
        tracing::debug!("No config file at {}, using defaults", path.display());
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path).map_err(|source| RetrievalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let value = serde_yaml::from_str::<Value>(&contents).map_err(|err| {
        RetrievalError::Config(format!("Failed to parse {}: {}", path.display(), err))
    })?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(RetrievalError::Config(format!(
            "Config root in {} must be a mapping",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_config(yaml: Option<&str>) -> (tempfile::TempDir, ConfigService) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_dirs(tmp.path().to_path_buf(), tmp.path().join("data"));
        if let Some(yaml) = yaml {
            fs::write(tmp.path().join("config.yml"), yaml).unwrap();
        }
        (tmp, ConfigService::new(Arc::new(paths)))
    }

    #[test]
    fn missing_file_is_empty_document() {
        let (_tmp, service) = service_with_config(None);
        let path = service.paths().project_root.join("config.yml");
        assert_eq!(load_yaml_file(&path).unwrap(), Value::Object(Map::new()));
    }

    #[test]
    fn yaml_file_is_parsed() {
        let (tmp, service) = service_with_config(Some(
            "vector_store:\n  search_top_k: 4\n  docs_dir: corpus\nembedding:\n  model: hashing\n",
        ));
        let raw = load_yaml_file(&tmp.path().join("config.yml")).unwrap();
        validate_config(&raw).unwrap();
        let config = RetrievalConfig::from_value(&raw, service.paths());
        assert_eq!(config.top_k, 4);
        assert_eq!(config.docs_dir, tmp.path().join("corpus"));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let (tmp, _service) = service_with_config(Some("vector_store: [unclosed"));
        let err = load_yaml_file(&tmp.path().join("config.yml")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn scalar_root_is_rejected() {
        let (tmp, _service) = service_with_config(Some("just a string"));
        let err = load_yaml_file(&tmp.path().join("config.yml")).unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }
}
