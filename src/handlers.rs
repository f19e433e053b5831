use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, info, warn};

use crate::{
    catalog::{self, VersionResponse},
    errors::AppError,
    models::{
        BackendRequest, ChatCompletionsRequest, OllamaChatRequest, OllamaGenerateRequest,
        OllamaOptions, OllamaShowRequest,
    },
    state::AppState,
    transcoder,
    translate::{self, Flavor, ResponseContext},
};

pub async fn root() -> &'static str {
    catalog::ROOT_MESSAGE
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.config.ollama_version.clone(),
    })
}

pub async fn tags(State(state): State<AppState>) -> Json<catalog::TagsResponse> {
    Json(catalog::tags(&state.model))
}

pub async fn running(State(state): State<AppState>) -> Json<catalog::PsResponse> {
    Json(catalog::running(&state.model))
}

pub async fn show(
    State(state): State<AppState>,
    payload: Result<Json<OllamaShowRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => {
            debug!(
                requested = %request.model.or(request.name).unwrap_or_default(),
                "show request"
            );
            Json(catalog::show(&state.model)).into_response()
        }
        Err(rejection) => AppError::BadRequest(rejection.body_text()).into_ollama_response(),
    }
}

pub async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionsRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let stream = requested_stream(&payload, |request| request.stream);
    let _inflight = state.metrics.inflight_guard();

    let response = match process_chat_completions(&state, payload, started).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };

    state.metrics.observe_request(
        "/v1/chat/completions",
        "POST",
        stream,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

pub async fn ollama_chat(
    State(state): State<AppState>,
    payload: Result<Json<OllamaChatRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let stream = requested_stream(&payload, |request| request.stream);
    let _inflight = state.metrics.inflight_guard();

    let response = match process_ollama_chat(&state, payload, started).await {
        Ok(response) => response,
        Err(error) => error.into_ollama_response(),
    };

    state.metrics.observe_request(
        "/api/chat",
        "POST",
        stream,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

pub async fn ollama_generate(
    State(state): State<AppState>,
    payload: Result<Json<OllamaGenerateRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let stream = requested_stream(&payload, |request| request.stream);
    let _inflight = state.metrics.inflight_guard();

    let response = match process_ollama_generate(&state, payload, started).await {
        Ok(response) => response,
        Err(error) => error.into_ollama_response(),
    };

    state.metrics.observe_request(
        "/api/generate",
        "POST",
        stream,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn process_chat_completions(
    state: &AppState,
    payload: Result<Json<ChatCompletionsRequest>, JsonRejection>,
    started: Instant,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    // The OpenAI surface echoes the caller's model name back, as the upstream API does.
    let context = ResponseContext::new(Flavor::OpenAi, request.model.clone(), started);
    let client_user = request.user.clone();
    let backend_request =
        translate::chat_completions_to_backend(request, &state.config.backend.model)
            .map_err(AppError::BadRequest)?;

    info!(
        request_id = %context.id,
        flavor = Flavor::OpenAi.label(),
        requested_model = %context.model,
        messages = backend_request.messages.len(),
        stream = backend_request.stream,
        client_user = %client_user.unwrap_or_default(),
        "chat request accepted"
    );

    dispatch(state, backend_request, context).await
}

async fn process_ollama_chat(
    state: &AppState,
    payload: Result<Json<OllamaChatRequest>, JsonRejection>,
    started: Instant,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let context = ResponseContext::new(Flavor::OllamaChat, state.model.tag.clone(), started);
    let requested_model = request.model.clone();
    log_ignored_options(request.options.as_ref());
    let backend_request = translate::ollama_chat_to_backend(request, &state.config.backend.model)
        .map_err(AppError::BadRequest)?;

    info!(
        request_id = %context.id,
        flavor = Flavor::OllamaChat.label(),
        requested_model = %requested_model,
        messages = backend_request.messages.len(),
        stream = backend_request.stream,
        "chat request accepted"
    );

    dispatch(state, backend_request, context).await
}

async fn process_ollama_generate(
    state: &AppState,
    payload: Result<Json<OllamaGenerateRequest>, JsonRejection>,
    started: Instant,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let context = ResponseContext::new(Flavor::OllamaGenerate, state.model.tag.clone(), started);
    let requested_model = request.model.clone();
    let has_system = request.system.is_some();
    if request.context.is_some() {
        debug!("generate context supplied; the backend is stateless so it is not replayed");
    }
    log_ignored_options(request.options.as_ref());
    let backend_request =
        translate::ollama_generate_to_backend(request, &state.config.backend.model)
            .map_err(AppError::BadRequest)?;

    info!(
        request_id = %context.id,
        flavor = Flavor::OllamaGenerate.label(),
        requested_model = %requested_model,
        has_system,
        stream = backend_request.stream,
        "generate request accepted"
    );

    dispatch(state, backend_request, context).await
}

/// Sends a translated request to the backend and frames the answer for the caller's surface.
async fn dispatch(
    state: &AppState,
    request: BackendRequest,
    context: ResponseContext,
) -> Result<Response, AppError> {
    if request.stream {
        let flavor = context.flavor;
        let chunks = transcoder::transcode(
            state.backend.clone(),
            request,
            context,
            state.metrics.clone(),
        );
        return Ok(match flavor {
            Flavor::OpenAi => transcoder::sse_response(chunks),
            Flavor::OllamaChat | Flavor::OllamaGenerate => transcoder::ndjson_response(chunks),
        });
    }

    let completion = state.backend.complete(request).await.map_err(|error| {
        state.metrics.observe_backend_error("unary", error.kind());
        warn!(request_id = %context.id, error = %error, "backend call failed");
        AppError::from(error)
    })?;
    let payload = translate::to_unary_response(completion, &context).map_err(|error| {
        state.metrics.observe_backend_error("unary", error.kind());
        AppError::from(error)
    })?;

    Ok(Json(payload).into_response())
}

fn requested_stream<T>(payload: &Result<Json<T>, JsonRejection>, stream: impl Fn(&T) -> bool) -> bool {
    payload
        .as_ref()
        .map(|Json(request)| stream(request))
        .unwrap_or(false)
}

fn log_ignored_options(options: Option<&OllamaOptions>) {
    let Some(options) = options else {
        return;
    };
    if !options.ignored.is_empty() {
        let keys = options
            .ignored
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        debug!(options = %keys, "ignoring options the backend does not support");
    }
}
