//! Start-up reachability checks for the optional backends.
//!
//! * Ollama: `GET /api/tags` also lists the locally downloaded models, so the
//!   banner can say whether the configured embedding model is present.
//! * Qdrant: `GET /readyz` answers 200 once the server accepts requests.

use std::time::Duration;

use serde::Deserialize;

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<OllamaModel>,
}

fn client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// List the models of the Ollama server at `base_url`.
pub async fn ollama_models(base_url: &str, timeout: Duration) -> Result<Vec<OllamaModel>, String> {
    let url = endpoint(base_url, "/api/tags");
    let response = client(timeout)?
        .get(&url)
        .send()
        .await
        .map_err(|e| format!("Ollama unreachable at {}: {}", url, e))?;
    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }
    let tags: TagsResponse = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;
    Ok(tags.models)
}

/// Whether `model` (with or without a `:tag` suffix) is among `models`.
pub fn has_model(models: &[OllamaModel], model: &str) -> bool {
    models
        .iter()
        .any(|m| m.name == model || m.name.split(':').next() == Some(model))
}

/// Succeeds when the Qdrant server at `base_url` reports ready.
pub async fn qdrant_ready(base_url: &str, timeout: Duration) -> Result<(), String> {
    let url = endpoint(base_url, "/readyz");
    let response = client(timeout)?
        .get(&url)
        .send()
        .await
        .map_err(|e| format!("Qdrant unreachable at {}: {}", url, e))?;
    if !response.status().is_success() {
        return Err(format!("Qdrant returned HTTP {}", response.status()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(endpoint("http://localhost:6333/", "/readyz"), "http://localhost:6333/readyz");
        assert_eq!(
            endpoint("http://localhost:11434", "/api/tags"),
            "http://localhost:11434/api/tags",
        );
    }

    #[test]
    fn tags_response_parses_model_names() {
        let raw =
            r#"{"models":[{"name":"all-minilm:latest","size":45960996},{"name":"llama3:8b"}]}"#;
        let tags: TagsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(tags.models.len(), 2);
        assert!(has_model(&tags.models, "all-minilm"));
        assert!(has_model(&tags.models, "llama3:8b"));
        assert!(!has_model(&tags.models, "nomic-embed-text"));
    }
}
