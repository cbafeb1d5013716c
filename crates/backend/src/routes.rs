use std::{sync::Arc, time::Instant};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, Method, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, instrument, warn};
use tts_engine::{TtsEngine, TtsEngineError, TtsRequest, TtsResponse, VoiceEntry};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<dyn TtsEngine>,
}

impl ApiState {
    pub fn new(engine: Arc<dyn TtsEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    model: &'a str,
}

#[derive(Serialize)]
struct VoicesResponse {
    voices: &'static [VoiceEntry],
}

#[derive(Debug, Deserialize)]
pub struct SynthesizePayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub instruct: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<TtsEngineError> for ApiError {
    fn from(err: TtsEngineError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

fn parse_payload(
    payload: Result<Json<SynthesizePayload>, JsonRejection>,
) -> Result<TtsRequest, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        debug!(target = "local_tts::api", %rejection, "rejected request body");
        ApiError::bad_request(rejection.body_text())
    })?;
    let text = payload
        .text
        .ok_or_else(|| ApiError::bad_request("Missing 'text' field"))?;
    Ok(TtsRequest {
        text,
        speaker: payload.speaker,
        language: payload.language,
        instruct: payload.instruct,
    })
}

fn engine_failure(err: TtsEngineError) -> ApiError {
    if err.is_client_error() {
        warn!(target = "local_tts::api", error = %err, "invalid tts request");
    } else {
        error!(target = "local_tts::api", error = %err, "tts request failed");
    }
    ApiError::from(err)
}

#[instrument(skip(state))]
async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    debug!(
        target = "local_tts::api",
        engine = %state.engine.kind(),
        loaded = state.engine.is_loaded(),
        "health check"
    );
    Json(HealthResponse {
        status: "ok",
        model: state.engine.model_name(),
    })
    .into_response()
}

#[instrument(skip(state))]
async fn list_voices(State(state): State<ApiState>) -> impl IntoResponse {
    Json(VoicesResponse {
        voices: state.engine.voices().entries(),
    })
}

#[instrument(skip(state, payload))]
async fn synthesize(
    State(state): State<ApiState>,
    payload: Result<Json<SynthesizePayload>, JsonRejection>,
) -> Result<Json<TtsResponse>, ApiError> {
    let request = parse_payload(payload)?;
    let started_at = Instant::now();
    let chars = request.text.chars().count();

    let response = state
        .engine
        .synthesize(request)
        .await
        .map_err(engine_failure)?;

    info!(
        target = "local_tts::api",
        engine = %state.engine.kind(),
        chars,
        sample_rate = response.sample_rate,
        duration_secs = response.duration,
        elapsed_ms = started_at.elapsed().as_millis(),
        "tts synthesis complete"
    );
    Ok(Json(response))
}

#[instrument(skip(state, payload))]
async fn synthesize_stream(
    State(state): State<ApiState>,
    payload: Result<Json<SynthesizePayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = parse_payload(payload)?;
    let handle = state
        .engine
        .synthesize_stream(request)
        .map_err(engine_failure)?;

    let events = handle
        .into_stream()
        .map(|event| Event::default().json_data(event.payload()));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events),
    )
        .into_response())
}

pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/voices", get(list_voices))
        .route("/tts", post(synthesize))
        .route("/tts/stream", post(synthesize_stream))
        .with_state(state)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;

    use anyhow::anyhow;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use tts_engine::{
        pocket::{ChunkCallback, POCKET_SAMPLE_RATE},
        qwen::DEFAULT_QWEN_MODEL,
        voices::POCKET_VOICES,
        CustomVoiceRequest, PocketEngine, PocketModel, QwenEngine, QwenModel, Waveform,
    };

    struct ToneModel;

    impl PocketModel for ToneModel {
        type VoiceState = ();

        fn voice_state_for_prompt(&self, _prompt: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn generate_audio(&self, _state: &(), _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.5; 4_800])
        }

        fn generate_audio_stream(
            &self,
            _state: &(),
            _text: &str,
            on_chunk: &mut ChunkCallback<'_>,
        ) -> anyhow::Result<()> {
            for _ in 0..2 {
                if let ControlFlow::Break(()) = on_chunk(vec![0.5; 2_400]) {
                    break;
                }
            }
            Ok(())
        }
    }

    struct ClipModel;

    impl QwenModel for ClipModel {
        fn generate_custom_voice(
            &self,
            _request: &CustomVoiceRequest<'_>,
        ) -> anyhow::Result<Waveform> {
            Ok(Waveform::new(vec![0.1; 12_000], 24_000))
        }
    }

    fn pocket_app() -> Router {
        build_router(ApiState::new(Arc::new(PocketEngine::new(|| Ok(ToneModel), 4))))
    }

    fn broken_app() -> Router {
        let engine: PocketEngine<ToneModel> =
            PocketEngine::new(|| Err(anyhow!("model weights missing")), 4);
        build_router(ApiState::new(Arc::new(engine)))
    }

    fn qwen_app() -> Router {
        let engine = QwenEngine::new(DEFAULT_QWEN_MODEL, |_: &str| Ok(ClipModel), 4);
        build_router(ApiState::new(Arc::new(engine)))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn sse_frames(response: Response) -> Vec<Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.split("\n\n")
            .filter(|frame| !frame.trim().is_empty())
            .map(|frame| {
                let data = frame.strip_prefix("data: ").expect("data frame");
                serde_json::from_str(data).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn health_reports_model_name() {
        let response = pocket_app().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "ok", "model": "pocket-tts" })
        );

        let response = qwen_app().oneshot(get("/health")).await.unwrap();
        assert_eq!(json_body(response).await["model"], json!(DEFAULT_QWEN_MODEL));
    }

    #[tokio::test]
    async fn voices_are_static() {
        let app = pocket_app();
        let expected: Vec<Value> = POCKET_VOICES
            .entries()
            .iter()
            .map(|v| {
                json!({
                    "id": v.id,
                    "name": v.name,
                    "description": v.description,
                    "language": v.language,
                })
            })
            .collect();

        let before = json_body(app.clone().oneshot(get("/voices")).await.unwrap()).await;
        app.clone()
            .oneshot(post_json("/tts", json!({ "text": "hello", "speaker": "jean" })))
            .await
            .unwrap();
        let after = json_body(app.oneshot(get("/voices")).await.unwrap()).await;

        assert_eq!(before, json!({ "voices": expected }));
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn qwen_voices_include_languages() {
        let body = json_body(qwen_app().oneshot(get("/voices")).await.unwrap()).await;
        let voices = body["voices"].as_array().unwrap();
        assert_eq!(voices.len(), 6);
        assert_eq!(
            voices[4],
            json!({
                "id": "Ono_Anna",
                "name": "Ono Anna",
                "description": "Playful Japanese female voice",
                "language": "Japanese",
            })
        );
    }

    #[tokio::test]
    async fn tts_returns_wav_payload() {
        let response = pocket_app()
            .oneshot(post_json("/tts", json!({ "text": "Hello world", "speaker": "ryan" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["sample_rate"], json!(POCKET_SAMPLE_RATE));
        assert_eq!(body["duration"], json!(0.2));
        let wav = BASE64
            .decode(body["audio_base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(wav.len(), 44 + 4_800 * 2);
    }

    #[tokio::test]
    async fn blank_text_is_a_client_error() {
        for uri in ["/tts", "/tts/stream"] {
            for text in ["", "   ", "\n"] {
                let response = pocket_app()
                    .oneshot(post_json(uri, json!({ "text": text })))
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri} {text:?}");
                assert_eq!(json_body(response).await, json!({ "error": "Empty text" }));
            }
        }
    }

    #[tokio::test]
    async fn missing_or_malformed_body_is_rejected() {
        let response = pocket_app()
            .oneshot(post_json("/tts", json!({ "speaker": "alba" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Missing 'text' field" })
        );

        let request = Request::builder()
            .method("POST")
            .uri("/tts/stream")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = pocket_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn model_failure_is_a_server_error() {
        let response = broken_app()
            .oneshot(post_json("/tts", json!({ "text": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "model weights missing" })
        );
    }

    #[tokio::test]
    async fn stream_relays_chunks_and_done_marker() {
        let response = pocket_app()
            .oneshot(post_json("/tts/stream", json!({ "text": "Hello", "speaker": "aiden" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()["x-accel-buffering"], "no");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let frames = sse_frames(response).await;
        assert_eq!(frames.len(), 3);
        for frame in &frames[..2] {
            assert_eq!(frame["done"], json!(false));
            assert_eq!(frame["duration"], json!(0.1));
            assert!(frame["audio_base64"].is_string());
        }
        assert_eq!(frames[2], json!({ "done": true }));
    }

    #[tokio::test]
    async fn stream_errors_are_in_band() {
        let response = broken_app()
            .oneshot(post_json("/tts/stream", json!({ "text": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            sse_frames(response).await,
            vec![json!({ "error": "model weights missing" })]
        );
    }

    #[tokio::test]
    async fn qwen_stream_is_a_single_done_chunk() {
        let response = qwen_app()
            .oneshot(post_json(
                "/tts/stream",
                json!({ "text": "Hi", "speaker": "Vivian", "language": "Chinese" }),
            ))
            .await
            .unwrap();
        let frames = sse_frames(response).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["done"], json!(true));
        assert_eq!(frames[0]["duration"], json!(0.5));
        assert_eq!(frames[0]["sample_rate"], json!(24_000));
    }
}
