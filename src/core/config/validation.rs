use serde_json::{Map, Value};

use super::defaults;
use crate::rag::{RetrievalError, StartProfile};

pub fn validate_config(config: &Value) -> Result<(), RetrievalError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(store) = expect_optional_object(root, "vector_store")? {
        validate_optional_string_field(store, "vector_store.docs_dir", "docs_dir")?;
        validate_optional_string_field(store, "vector_store.index_path", "index_path")?;
        validate_optional_string_field(store, "vector_store.docs_base_url", "docs_base_url")?;
        validate_u64_field(store, "vector_store.search_top_k", "search_top_k", 1, 50)?;
        validate_f64_field(
            store,
            "vector_store.search_threshold",
            "search_threshold",
            -1.0,
            1.0,
        )?;
        validate_u64_field(
            store,
            "vector_store.context_max_chars",
            "context_max_chars",
            1,
            1_000_000,
        )?;
        validate_u64_field(
            store,
            "vector_store.chunk_min_chars",
            "chunk_min_chars",
            1,
            100_000,
        )?;
        validate_u64_field(
            store,
            "vector_store.chunk_max_chars",
            "chunk_max_chars",
            1,
            100_000,
        )?;
        validate_u64_field(
            store,
            "vector_store.min_document_chars",
            "min_document_chars",
            0,
            100_000,
        )?;
        validate_string_array_field(store, "vector_store.extensions", "extensions")?;
        validate_string_array_field(store, "vector_store.exclude_dirs", "exclude_dirs")?;
        validate_string_array_field(store, "vector_store.exclude_files", "exclude_files")?;
        validate_bool_field(store, "vector_store.rebuild_when_stale", "rebuild_when_stale")?;
        validate_bool_field(store, "vector_store.force_rebuild", "force_rebuild")?;

        validate_profile_field(store)?;

        let min = store.get("chunk_min_chars").and_then(Value::as_u64);
        let max = store.get("chunk_max_chars").and_then(Value::as_u64);
        if min.is_some() || max.is_some() {
            let min = min.unwrap_or(defaults::CHUNK_MIN_CHARS as u64);
            let max = max.unwrap_or(defaults::CHUNK_MAX_CHARS as u64);
            if min > max {
                return Err(RetrievalError::Config(format!(
                    "Invalid config at 'vector_store.chunk_min_chars': {} exceeds chunk_max_chars {}",
                    min, max
                )));
            }
        }
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.dimension", "dimension", 1, 65_536)?;
        validate_optional_string_field(embedding, "embedding.model_path", "model_path")?;
        validate_optional_string_field(embedding, "embedding.tokenizer_path", "tokenizer_path")?;
        validate_u64_field(embedding, "embedding.batch_size", "batch_size", 1, 4096)?;
        validate_u64_field(embedding, "embedding.threads", "threads", 1, 256)?;
    }

    validate_string_array_field(root, "default_citations", "default_citations")?;

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, RetrievalError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RetrievalError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), RetrievalError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(RetrievalError::Config(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), RetrievalError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !(min..=max).contains(&number) {
        return Err(RetrievalError::Config(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RetrievalError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RetrievalError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(RetrievalError::Config(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn validate_profile_field(store: &Map<String, Value>) -> Result<(), RetrievalError> {
    validate_optional_string_field(store, "vector_store.profile", "profile")?;
    match store.get("profile").and_then(Value::as_str) {
        Some(raw) if StartProfile::parse(raw).is_none() => Err(RetrievalError::Config(format!(
            "Invalid config at 'vector_store.profile': '{}' is not one of {}",
            raw,
            StartProfile::NAMES.join(", ")
        ))),
        _ => Ok(()),
    }
}

fn config_type_error(path: &str, expected: &str) -> RetrievalError {
    RetrievalError::Config(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
