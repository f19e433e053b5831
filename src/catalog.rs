//! Canned model metadata for the native discovery endpoints.
//!
//! Only one model is ever advertised: the configured backend model, presented under a
//! short display family so native clients can select it by a familiar tag.

use serde::Serialize;

pub const ROOT_MESSAGE: &str = "Ollama is running";

const MODIFIED_AT: &str = "2024-01-01T10:00:00Z";
const EXPIRES_AT: &str = "2024-12-31T23:59:59Z";
const ADVERTISED_SIZE: u64 = 4_800_000_000;
const ADVERTISED_DIGEST: &str = "sha256:abcd1234";

/// Display identity derived once from the backend model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentity {
    pub family: String,
    pub tag: String,
}

impl ModelIdentity {
    pub fn from_backend_model(backend_model: &str) -> Self {
        let family = backend_model
            .split('-')
            .next()
            .filter(|family| !family.is_empty())
            .unwrap_or(backend_model)
            .to_owned();
        let tag = format!("{family}:latest");

        Self {
            family,
            tag,
        }
    }

    pub fn details(&self) -> ModelDetails {
        ModelDetails {
            parent_model: String::new(),
            format: "gguf".to_owned(),
            family: self.family.clone(),
            families: vec![self.family.clone()],
            parameter_size: "7B".to_owned(),
            quantization_level: "Q4_0".to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ModelDetails {
    pub parent_model: String,
    pub format: String,
    pub family: String,
    pub families: Vec<String>,
    pub parameter_size: String,
    pub quantization_level: String,
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub models: Vec<TagEntry>,
}

#[derive(Debug, Serialize)]
pub struct TagEntry {
    pub name: String,
    pub model: String,
    pub modified_at: String,
    pub size: u64,
    pub digest: String,
    pub details: ModelDetails,
}

#[derive(Debug, Serialize)]
pub struct ShowResponse {
    pub license: String,
    pub modelfile: String,
    pub parameters: String,
    pub template: String,
    pub details: ModelDetails,
}

#[derive(Debug, Serialize)]
pub struct PsResponse {
    pub models: Vec<PsEntry>,
}

#[derive(Debug, Serialize)]
pub struct PsEntry {
    pub name: String,
    pub model: String,
    pub size: u64,
    pub digest: String,
    pub details: ModelDetails,
    pub expires_at: String,
}

pub fn tags(identity: &ModelIdentity) -> TagsResponse {
    TagsResponse {
        models: vec![TagEntry {
            name: identity.tag.clone(),
            model: identity.tag.clone(),
            modified_at: MODIFIED_AT.to_owned(),
            size: ADVERTISED_SIZE,
            digest: ADVERTISED_DIGEST.to_owned(),
            details: identity.details(),
        }],
    }
}

pub fn show(identity: &ModelIdentity) -> ShowResponse {
    ShowResponse {
        license: "Apache 2.0".to_owned(),
        modelfile: format!("FROM {}", identity.tag),
        parameters: "temperature 0.7\ntop_p 0.8".to_owned(),
        template: "{{ .System }}{{ .Prompt }}".to_owned(),
        details: identity.details(),
    }
}

pub fn running(identity: &ModelIdentity) -> PsResponse {
    PsResponse {
        models: vec![PsEntry {
            name: identity.tag.clone(),
            model: identity.tag.clone(),
            size: ADVERTISED_SIZE,
            digest: ADVERTISED_DIGEST.to_owned(),
            details: identity.details(),
            expires_at: EXPIRES_AT.to_owned(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_is_prefix_before_first_dash() {
        let identity = ModelIdentity::from_backend_model("qwen-3-235b-a22b-instruct-2507");

        assert_eq!(identity.family, "qwen");
        assert_eq!(identity.tag, "qwen:latest");
    }

    #[test]
    fn model_without_dash_is_its_own_family() {
        let identity = ModelIdentity::from_backend_model("gpt4");
        assert_eq!(identity.tag, "gpt4:latest");
    }

    #[test]
    fn leading_dash_falls_back_to_full_name() {
        let identity = ModelIdentity::from_backend_model("-odd");
        assert_eq!(identity.family, "-odd");
    }

    #[test]
    fn endpoints_share_the_same_tag() {
        let identity = ModelIdentity::from_backend_model("llama-3.3-70b");

        let tags = serde_json::to_value(tags(&identity)).expect("json");
        let running = serde_json::to_value(running(&identity)).expect("json");
        let show = serde_json::to_value(show(&identity)).expect("json");

        assert_eq!(tags["models"][0]["name"], "llama:latest");
        assert_eq!(tags["models"][0]["details"]["families"], serde_json::json!(["llama"]));
        assert_eq!(running["models"][0]["model"], "llama:latest");
        assert_eq!(running["models"][0]["expires_at"], EXPIRES_AT);
        assert_eq!(show["modelfile"], "FROM llama:latest");
        assert_eq!(show["details"]["family"], "llama");
    }
}
