//! Mapping between the inbound surfaces and the backend's chat-completions shapes.
//!
//! Everything here is pure except for the id and timestamps stamped into
//! [`ResponseContext`].

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    backend::BackendError,
    errors::{OllamaErrorEnvelope, OpenAiErrorEnvelope},
    models::{
        AssistantMessage, BackendCompletion, BackendRequest, BackendStreamEvent, ChatCompletionsChunk,
        ChatCompletionsRequest, ChatCompletionsResponse, ChatMessage, GenerationParams, MessageRole,
        OllamaChatRequest, OllamaChatResponse, OllamaGenerateRequest, OllamaGenerateResponse,
        TimingMetrics,
    },
};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.8;
pub const DEFAULT_MAX_TOKENS: u32 = 20_000;

/// Generate responses carry a context array clients may echo back; it encodes nothing.
pub const PLACEHOLDER_CONTEXT: [u32; 5] = [1, 2, 3, 4, 5];

/// Which outbound surface a response is shaped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenAi,
    OllamaChat,
    OllamaGenerate,
}

impl Flavor {
    pub fn label(self) -> &'static str {
        match self {
            Flavor::OpenAi => "openai",
            Flavor::OllamaChat => "ollama_chat",
            Flavor::OllamaGenerate => "ollama_generate",
        }
    }
}

/// Identity shared by every chunk of one response.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub flavor: Flavor,
    pub id: String,
    pub created: i64,
    /// Model name echoed to the client; not necessarily the backend model.
    pub model: String,
    pub started: Instant,
}

impl ResponseContext {
    pub fn new(flavor: Flavor, model: impl Into<String>, started: Instant) -> Self {
        Self {
            flavor,
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: unix_timestamp(),
            model: model.into(),
            started,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutboundResponse {
    OpenAi(ChatCompletionsResponse),
    OllamaChat(OllamaChatResponse),
    OllamaGenerate(OllamaGenerateResponse),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutboundChunk {
    OpenAi(ChatCompletionsChunk),
    OllamaChat(OllamaChatResponse),
    OllamaGenerate(OllamaGenerateResponse),
    OpenAiError(OpenAiErrorEnvelope),
    OllamaError(OllamaErrorEnvelope),
}

impl OutboundChunk {
    /// True for the single completion-marking chunk that ends a successful stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            OutboundChunk::OpenAi(chunk) => chunk.is_finish(),
            OutboundChunk::OllamaChat(chunk) => chunk.done,
            OutboundChunk::OllamaGenerate(chunk) => chunk.done,
            OutboundChunk::OpenAiError(_) | OutboundChunk::OllamaError(_) => false,
        }
    }
}

pub fn chat_completions_to_backend(
    request: ChatCompletionsRequest,
    backend_model: &str,
) -> Result<BackendRequest, String> {
    let generation = GenerationParams {
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
    };
    build_backend_request(backend_model, request.messages, generation, request.stream)
}

pub fn ollama_chat_to_backend(
    request: OllamaChatRequest,
    backend_model: &str,
) -> Result<BackendRequest, String> {
    let generation = request
        .options
        .as_ref()
        .map(|options| options.generation())
        .unwrap_or_default();
    build_backend_request(backend_model, request.messages, generation, request.stream)
}

pub fn ollama_generate_to_backend(
    request: OllamaGenerateRequest,
    backend_model: &str,
) -> Result<BackendRequest, String> {
    let generation = request
        .options
        .as_ref()
        .map(|options| options.generation())
        .unwrap_or_default();

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.filter(|system| !system.is_empty()) {
        messages.push(ChatMessage::new(MessageRole::System, system));
    }
    messages.push(ChatMessage::new(MessageRole::User, request.prompt));

    build_backend_request(backend_model, messages, generation, request.stream)
}

fn build_backend_request(
    backend_model: &str,
    messages: Vec<ChatMessage>,
    generation: GenerationParams,
    stream: bool,
) -> Result<BackendRequest, String> {
    if messages.is_empty() {
        return Err("messages must not be empty".to_owned());
    }

    Ok(BackendRequest {
        model: backend_model.to_owned(),
        messages,
        stream,
        max_completion_tokens: generation.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: generation.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        top_p: generation.top_p.unwrap_or(DEFAULT_TOP_P),
    })
}

pub fn to_unary_response(
    completion: BackendCompletion,
    context: &ResponseContext,
) -> Result<OutboundResponse, BackendError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("missing choices in response".to_owned()))?;
    let content = choice.message.content.unwrap_or_default();
    let finish_reason = choice.finish_reason.unwrap_or_else(|| "stop".to_owned());

    let response = match context.flavor {
        Flavor::OpenAi => OutboundResponse::OpenAi(ChatCompletionsResponse::new(
            context.id.clone(),
            context.created,
            context.model.clone(),
            content,
            finish_reason,
        )),
        Flavor::OllamaChat => OutboundResponse::OllamaChat(OllamaChatResponse {
            model: context.model.clone(),
            created_at: iso_timestamp(),
            message: AssistantMessage::new(content),
            done: true,
            done_reason: Some(finish_reason),
            timing: Some(TimingMetrics::placeholder(context.started)),
        }),
        Flavor::OllamaGenerate => OutboundResponse::OllamaGenerate(OllamaGenerateResponse {
            model: context.model.clone(),
            created_at: iso_timestamp(),
            response: content,
            done: true,
            done_reason: Some(finish_reason),
            context: Some(PLACEHOLDER_CONTEXT.to_vec()),
            timing: Some(TimingMetrics::placeholder(context.started)),
        }),
    };
    Ok(response)
}

/// Returns `None` for events without text so the outbound stream carries no empty chunks.
pub fn to_stream_chunk(event: &BackendStreamEvent, context: &ResponseContext) -> Option<OutboundChunk> {
    let content = event.content()?.to_owned();

    let chunk = match context.flavor {
        Flavor::OpenAi => OutboundChunk::OpenAi(ChatCompletionsChunk::delta(
            &context.id,
            context.created,
            &context.model,
            content,
        )),
        Flavor::OllamaChat => OutboundChunk::OllamaChat(OllamaChatResponse {
            model: context.model.clone(),
            created_at: iso_timestamp(),
            message: AssistantMessage::new(content),
            done: false,
            done_reason: None,
            timing: None,
        }),
        Flavor::OllamaGenerate => OutboundChunk::OllamaGenerate(OllamaGenerateResponse {
            model: context.model.clone(),
            created_at: iso_timestamp(),
            response: content,
            done: false,
            done_reason: None,
            context: None,
            timing: None,
        }),
    };
    Some(chunk)
}

pub fn terminal_chunk(context: &ResponseContext) -> OutboundChunk {
    match context.flavor {
        Flavor::OpenAi => OutboundChunk::OpenAi(ChatCompletionsChunk::finish(
            &context.id,
            context.created,
            &context.model,
            "stop".to_owned(),
        )),
        Flavor::OllamaChat => OutboundChunk::OllamaChat(OllamaChatResponse {
            model: context.model.clone(),
            created_at: iso_timestamp(),
            message: AssistantMessage::new(String::new()),
            done: true,
            done_reason: Some("stop".to_owned()),
            timing: Some(TimingMetrics::placeholder(context.started)),
        }),
        Flavor::OllamaGenerate => OutboundChunk::OllamaGenerate(OllamaGenerateResponse {
            model: context.model.clone(),
            created_at: iso_timestamp(),
            response: String::new(),
            done: true,
            done_reason: Some("stop".to_owned()),
            context: Some(PLACEHOLDER_CONTEXT.to_vec()),
            timing: Some(TimingMetrics::placeholder(context.started)),
        }),
    }
}

pub fn error_chunk(flavor: Flavor, message: impl Into<String>) -> OutboundChunk {
    match flavor {
        Flavor::OpenAi => OutboundChunk::OpenAiError(OpenAiErrorEnvelope::new("api_error", message)),
        Flavor::OllamaChat | Flavor::OllamaGenerate => {
            OutboundChunk::OllamaError(OllamaErrorEnvelope {
                error: message.into(),
            })
        }
    }
}

pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn unix_timestamp() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::models::OllamaOptions;

    const BACKEND_MODEL: &str = "qwen-3-235b-a22b-instruct-2507";

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(MessageRole::System, "be brief"),
            ChatMessage::new(MessageRole::User, "hi"),
            ChatMessage::new(MessageRole::Assistant, "hello"),
            ChatMessage::new(MessageRole::User, "again"),
        ]
    }

    fn chat_request(stream: bool) -> OllamaChatRequest {
        OllamaChatRequest {
            model: "whatever-the-client-says".to_owned(),
            messages: conversation(),
            stream,
            options: None,
        }
    }

    fn event(json: &str) -> BackendStreamEvent {
        serde_json::from_str(json).expect("valid event")
    }

    #[test]
    fn chat_messages_are_copied_in_order() {
        let request = ollama_chat_to_backend(chat_request(false), BACKEND_MODEL).expect("valid");

        assert_eq!(request.messages, conversation());
        assert!(!request.stream);
    }

    #[test]
    fn backend_model_overrides_caller_model() {
        let request = ollama_chat_to_backend(chat_request(true), BACKEND_MODEL).expect("valid");

        assert_eq!(request.model, BACKEND_MODEL);
        assert!(request.stream);
    }

    #[test]
    fn defaults_fill_missing_generation_parameters() {
        let request = chat_completions_to_backend(
            ChatCompletionsRequest {
                model: "gpt-4o".to_owned(),
                messages: conversation(),
                max_tokens: None,
                temperature: None,
                top_p: None,
                stream: false,
                user: None,
            },
            BACKEND_MODEL,
        )
        .expect("valid");

        assert_eq!(request.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(request.top_p, DEFAULT_TOP_P);
        assert_eq!(request.max_completion_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn caller_parameters_win_over_defaults() {
        let request = chat_completions_to_backend(
            ChatCompletionsRequest {
                model: "gpt-4o".to_owned(),
                messages: conversation(),
                max_tokens: Some(64),
                temperature: Some(0.1),
                top_p: Some(0.5),
                stream: true,
                user: Some("u".to_owned()),
            },
            BACKEND_MODEL,
        )
        .expect("valid");

        assert_eq!(request.max_completion_tokens, 64);
        assert_eq!(request.temperature, 0.1);
        assert_eq!(request.top_p, 0.5);
    }

    #[test]
    fn native_options_map_to_generation_parameters() {
        let mut request = chat_request(false);
        request.options = Some(OllamaOptions {
            temperature: Some(0.2),
            num_predict: Some(256),
            ..OllamaOptions::default()
        });

        let backend = ollama_chat_to_backend(request, BACKEND_MODEL).expect("valid");

        assert_eq!(backend.temperature, 0.2);
        assert_eq!(backend.top_p, DEFAULT_TOP_P);
        assert_eq!(backend.max_completion_tokens, 256);
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let mut request = chat_request(false);
        request.messages.clear();

        let error = ollama_chat_to_backend(request, BACKEND_MODEL).expect_err("must fail");
        assert_eq!(error, "messages must not be empty");
    }

    #[test]
    fn generate_prompt_is_preceded_by_system_prompt() {
        let request = ollama_generate_to_backend(
            OllamaGenerateRequest {
                model: "m".to_owned(),
                prompt: "why is the sky blue".to_owned(),
                system: Some("answer like a pirate".to_owned()),
                stream: true,
                context: Some(vec![1, 2, 3]),
                options: None,
            },
            BACKEND_MODEL,
        )
        .expect("valid");

        assert_eq!(
            request.messages,
            vec![
                ChatMessage::new(MessageRole::System, "answer like a pirate"),
                ChatMessage::new(MessageRole::User, "why is the sky blue"),
            ]
        );
    }

    #[test]
    fn generate_without_system_sends_only_the_prompt() {
        let request = ollama_generate_to_backend(
            OllamaGenerateRequest {
                model: "m".to_owned(),
                prompt: "hi".to_owned(),
                system: None,
                stream: false,
                context: None,
                options: None,
            },
            BACKEND_MODEL,
        )
        .expect("valid");

        assert_eq!(request.messages, vec![ChatMessage::new(MessageRole::User, "hi")]);
    }

    #[test]
    fn unary_chat_response_wraps_first_choice() {
        let context = ResponseContext::new(Flavor::OllamaChat, "qwen:latest", Instant::now());
        let response = to_unary_response(BackendCompletion::from_content("hello"), &context)
            .expect("has a choice");
        let value = serde_json::to_value(&response).expect("serializable");

        assert_eq!(value["model"], "qwen:latest");
        assert_eq!(value["message"]["role"], "assistant");
        assert_eq!(value["message"]["content"], "hello");
        assert_eq!(value["done"], true);
        assert_eq!(value["done_reason"], "stop");
        assert_eq!(value["load_duration"], 1_000_000);
        assert!(value.get("context").is_none());
    }

    #[test]
    fn unary_generate_response_carries_placeholder_context() {
        let context = ResponseContext::new(Flavor::OllamaGenerate, "qwen:latest", Instant::now());
        let response = to_unary_response(BackendCompletion::from_content("blue"), &context)
            .expect("has a choice");
        let value = serde_json::to_value(&response).expect("serializable");

        assert_eq!(value["response"], "blue");
        assert_eq!(value["context"], serde_json::json!([1, 2, 3, 4, 5]));
        assert_eq!(value["eval_count"], 20);
    }

    #[test]
    fn unary_openai_response_uses_placeholder_usage() {
        let context = ResponseContext::new(Flavor::OpenAi, "gpt-4o", Instant::now());
        let response = to_unary_response(BackendCompletion::from_content("hey"), &context)
            .expect("has a choice");
        let value = serde_json::to_value(&response).expect("serializable");

        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["choices"][0]["message"]["content"], "hey");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["total_tokens"], 0);
        assert!(value["id"].as_str().unwrap_or_default().starts_with("chatcmpl-"));
    }

    #[test]
    fn unary_response_without_choices_is_invalid() {
        let context = ResponseContext::new(Flavor::OllamaChat, "qwen:latest", Instant::now());
        let error = to_unary_response(BackendCompletion { choices: vec![] }, &context)
            .expect_err("no choice");

        assert!(matches!(error, BackendError::InvalidResponse(_)));
    }

    #[test]
    fn stream_chunk_is_skipped_without_content() {
        let context = ResponseContext::new(Flavor::OllamaChat, "qwen:latest", Instant::now());

        assert!(to_stream_chunk(&event(r#"{"choices":[]}"#), &context).is_none());
        assert!(to_stream_chunk(
            &event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
            &context
        )
        .is_none());
    }

    #[test]
    fn stream_chunk_shapes_follow_flavor() {
        let delta = event(r#"{"choices":[{"delta":{"content":"he"}}]}"#);

        let chat = ResponseContext::new(Flavor::OllamaChat, "qwen:latest", Instant::now());
        let generate = ResponseContext::new(Flavor::OllamaGenerate, "qwen:latest", Instant::now());
        let openai = ResponseContext::new(Flavor::OpenAi, "gpt-4o", Instant::now());

        let chat: Value =
            serde_json::to_value(to_stream_chunk(&delta, &chat).expect("chunk")).expect("json");
        let generate: Value =
            serde_json::to_value(to_stream_chunk(&delta, &generate).expect("chunk")).expect("json");
        let openai: Value =
            serde_json::to_value(to_stream_chunk(&delta, &openai).expect("chunk")).expect("json");

        assert_eq!(chat["message"]["content"], "he");
        assert_eq!(chat["done"], false);
        assert_eq!(generate["response"], "he");
        assert_eq!(generate["done"], false);
        assert_eq!(openai["choices"][0]["delta"]["content"], "he");
        assert!(openai["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn terminal_chunks_mark_completion() {
        let openai = ResponseContext::new(Flavor::OpenAi, "gpt-4o", Instant::now());
        let generate = ResponseContext::new(Flavor::OllamaGenerate, "qwen:latest", Instant::now());

        let openai_chunk = terminal_chunk(&openai);
        let generate_chunk = terminal_chunk(&generate);
        assert!(openai_chunk.is_terminal());
        assert!(generate_chunk.is_terminal());

        let openai_value = serde_json::to_value(&openai_chunk).expect("json");
        assert_eq!(openai_value["choices"][0]["finish_reason"], "stop");
        assert_eq!(openai_value["choices"][0]["delta"], serde_json::json!({}));

        let generate_value = serde_json::to_value(&generate_chunk).expect("json");
        assert_eq!(generate_value["done"], true);
        assert_eq!(generate_value["response"], "");
        assert_eq!(generate_value["context"], serde_json::json!([1, 2, 3, 4, 5]));
        assert_eq!(generate_value["prompt_eval_count"], 10);
    }

    #[test]
    fn error_chunks_follow_flavor_shape() {
        let native = serde_json::to_value(error_chunk(Flavor::OllamaChat, "boom")).expect("json");
        let openai = serde_json::to_value(error_chunk(Flavor::OpenAi, "boom")).expect("json");

        assert_eq!(native, serde_json::json!({ "error": "boom" }));
        assert_eq!(openai["error"]["message"], "boom");
        assert_eq!(openai["error"]["type"], "api_error");
    }

    #[test]
    fn iso_timestamps_are_utc() {
        assert!(iso_timestamp().ends_with('Z'));
    }
}
