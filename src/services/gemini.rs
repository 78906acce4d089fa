//! Gemini 生成服务模块
//! 管理单个对话会话，支持一次性回复和流式回复，以及底层的 HTTP 调用

use crate::services::prompt::AssembledPrompt;
use async_stream::stream;
use base64::{engine::general_purpose, Engine as _};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 服务返回空内容时的提示文本
pub const NO_RESPONSE_TEXT: &str = "No response received";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const BASE_SYSTEM_INSTRUCTION: &str = "You are my teacher. Determine the subject of the notes and provide a json with possible questions relating to the notes BASED ON THE EXAMPLE JSON I GIVE YOU. You may be asked to provide an explanation for a question or be asked to generate an entire quiz (more likely). For Multiple choice questions, you can mark as many answers as true, but if all answers are true and you decide to use \"all of the above\", PLEASE MAKE THE OTHER ANSWERS FALSE. Also, make sure to use the exact same property names, but just change the contents/values of each property based on the notes provided. Also make sure that all the information is true and taken purely from the notes.";

/// 生成错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("session has not been initialized")]
    NotInitialized,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("service returned {code}: {message}")]
    Service { code: u16, message: String },
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl GenerationError {
    /// 给界面显示的文本
    pub fn display_text(&self) -> String {
        format!("Error: {}", self)
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Transport(e.to_string())
    }
}

/// 把结果转换成界面文本，错误以 `Error: ...` 形式出现
pub fn display_result(result: Result<String, GenerationError>) -> String {
    match result {
        Ok(text) => text,
        Err(e) => e.display_text(),
    }
}

// ==================== 请求/响应结构 ====================

/// 生成参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 8192,
            response_mime_type: "application/json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockThreshold {
    #[serde(rename = "BLOCK_NONE")]
    BlockNone,
    #[serde(rename = "BLOCK_MEDIUM_AND_ABOVE")]
    BlockMediumAndAbove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: BlockThreshold,
}

/// 内联数据（图片）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// 消息片段：文本或内联数据
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn image(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(Blob {
                mime_type: sniff_image_mime(bytes).to_string(),
                data: general_purpose::STANDARD.encode(bytes),
            }),
        }
    }
}

/// 一轮对话内容
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts: vec![Part::text(text)],
        }
    }

    /// 拼接所有文本片段
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .concat()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationParams,
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(Content::model(text)),
                finish_reason: None,
            }],
            prompt_feedback: None,
        }
    }

    /// 第一个候选的文本，没有文本时返回 None
    pub fn text(&self) -> Option<String> {
        let text = self.candidates.first()?.content.as_ref()?.joined_text();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// 提示词被拦截，或候选因安全原因终止且没有文本
    pub fn block_reason(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            return Some(reason);
        }
        let candidate = self.candidates.first()?;
        match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT")) if self.text().is_none() => {
                Some(reason.to_string())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// 根据文件头判断图片类型，无法识别时按 JPEG 处理
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.len() >= 12
        && &bytes[4..8] == b"ftyp"
        && matches!(&bytes[8..12], b"heic" | b"heix" | b"heif" | b"mif1")
    {
        "image/heic"
    } else {
        "image/jpeg"
    }
}

// ==================== 后端 ====================

/// 模型标识和密钥
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHandle {
    pub api_key: String,
    pub model_name: String,
}

pub type ChunkStream = BoxStream<'static, Result<GenerateContentResponse, GenerationError>>;

/// 累积文本流：每一项都是到目前为止的完整回复
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

/// 生成服务后端
pub trait GenerationBackend: Send + Sync + 'static {
    fn generate(
        &self,
        model: &ModelHandle,
        request: GenerateContentRequest,
    ) -> BoxFuture<'static, Result<GenerateContentResponse, GenerationError>>;

    fn generate_stream(&self, model: &ModelHandle, request: GenerateContentRequest) -> ChunkStream;
}

/// 基于 reqwest 的 Gemini REST 后端
#[derive(Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, model: &ModelHandle, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model.model_name, method)
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// 非 2xx 响应转换为服务错误
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(parse_error_body(status.as_u16(), &body))
}

fn parse_error_body(status: u16, body: &str) -> GenerationError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => GenerationError::Service {
            code: if parsed.error.code == 0 { status } else { parsed.error.code },
            message: parsed.error.message,
        },
        Err(_) => GenerationError::Service {
            code: status,
            message: body.trim().to_string(),
        },
    }
}

/// 解析一行 SSE，非数据行返回 None
pub fn parse_sse_line(line: &str) -> Option<Result<GenerateContentResponse, GenerationError>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(GenerationError::Decode(e.to_string()))),
    };

    if value.get("error").is_some() {
        return Some(Err(parse_error_body(0, data)));
    }

    Some(serde_json::from_value(value).map_err(|e| GenerationError::Decode(e.to_string())))
}

impl GenerationBackend for HttpBackend {
    fn generate(
        &self,
        model: &ModelHandle,
        request: GenerateContentRequest,
    ) -> BoxFuture<'static, Result<GenerateContentResponse, GenerationError>> {
        let client = self.http_client.clone();
        let url = self.endpoint(model, "generateContent");
        let api_key = model.api_key.clone();

        Box::pin(async move {
            let response = client
                .post(&url)
                .header("x-goog-api-key", api_key)
                .json(&request)
                .send()
                .await?;
            let body = check_status(response).await?.text().await?;
            serde_json::from_str(&body).map_err(|e| GenerationError::Decode(e.to_string()))
        })
    }

    fn generate_stream(&self, model: &ModelHandle, request: GenerateContentRequest) -> ChunkStream {
        let client = self.http_client.clone();
        let url = format!("{}?alt=sse", self.endpoint(model, "streamGenerateContent"));
        let api_key = model.api_key.clone();

        Box::pin(stream! {
            let response = match client
                .post(&url)
                .header("x-goog-api-key", api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield Err(GenerationError::from(e));
                    return;
                }
            };
            let response = match check_status(response).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(e) => {
                        yield Err(GenerationError::from(e));
                        return;
                    }
                }

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        Some(Ok(parsed)) => {
                            yield Ok(parsed);
                        }
                        Some(Err(e)) => {
                            yield Err(e);
                            return;
                        }
                        None => {}
                    }
                }
            }

            // 最后一行可能没有换行符
            if let Some(parsed) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                yield parsed;
            }
        })
    }
}

// ==================== 会话 ====================

/// 会话配置
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub api_key: String,
    pub model_name: String,
    pub language: String,
    pub safety_enabled: bool,
    pub question_count: u32,
    pub generation: GenerationParams,
}

impl SessionConfig {
    pub fn new(api_key: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_name: model_name.into(),
            language: "English".to_string(),
            safety_enabled: false,
            question_count: 5,
            generation: GenerationParams::default(),
        }
    }

    /// 固定的系统指令，附加语言和题目数量要求
    pub fn system_instruction(&self) -> String {
        format!(
            "{} Write every question, option and answer in {}. Generate exactly {} questions unless you are asked for an explanation.",
            BASE_SYSTEM_INSTRUCTION, self.language, self.question_count
        )
    }

    /// 关闭安全设置时全部放行，开启时按类别拦截
    pub fn safety_settings(&self) -> Vec<SafetySetting> {
        let threshold = if self.safety_enabled {
            BlockThreshold::BlockMediumAndAbove
        } else {
            BlockThreshold::BlockNone
        };
        [
            HarmCategory::Harassment,
            HarmCategory::HateSpeech,
            HarmCategory::SexuallyExplicit,
            HarmCategory::DangerousContent,
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category,
            threshold,
        })
        .collect()
    }

    fn model_handle(&self) -> ModelHandle {
        ModelHandle {
            api_key: self.api_key.clone(),
            model_name: self.model_name.clone(),
        }
    }
}

struct ChatState {
    config: SessionConfig,
    history: Vec<Content>,
    epoch: u64,
}

#[derive(Default)]
struct SessionInner {
    chat: Option<ChatState>,
    epochs: u64,
}

/// 一次发送的准备结果
struct PreparedTurn {
    model: ModelHandle,
    request: GenerateContentRequest,
    user_content: Content,
    epoch: u64,
}

/// 发送结果：一次性文本或累积文本流
pub enum Reply {
    Complete(String),
    Stream(TextStream),
}

impl Reply {
    /// 等待完整文本；流没有任何内容时返回 NO_RESPONSE_TEXT
    pub async fn into_text(self) -> Result<String, GenerationError> {
        match self {
            Reply::Complete(text) => Ok(text),
            Reply::Stream(mut stream) => {
                let mut last = None;
                while let Some(item) = stream.next().await {
                    last = Some(item?);
                }
                Ok(last.unwrap_or_else(|| NO_RESPONSE_TEXT.to_string()))
            }
        }
    }
}

/// Gemini 对话会话
///
/// 克隆共享同一个会话；同一会话上的发送需要由调用方串行化，
/// 但每次发送的累积缓冲区互相独立。
pub struct GeminiSession<B> {
    backend: Arc<B>,
    inner: Arc<Mutex<SessionInner>>,
}

impl<B> Clone for GeminiSession<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl GeminiSession<HttpBackend> {
    pub fn with_http() -> Self {
        Self::new(HttpBackend::new())
    }
}

impl<B: GenerationBackend> GeminiSession<B> {
    /// 创建未初始化的会话
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            inner: Arc::new(Mutex::new(SessionInner::default())),
        }
    }

    /// (重新)初始化会话，丢弃之前的历史
    pub async fn initialize(&self, config: SessionConfig) {
        let mut inner = self.inner.lock().await;
        inner.epochs += 1;
        let epoch = inner.epochs;
        log::info!(
            "Initializing generation session: model={}, language={}, safety={}, questions={}",
            config.model_name,
            config.language,
            config.safety_enabled,
            config.question_count
        );
        inner.chat = Some(ChatState {
            config,
            history: Vec::new(),
            epoch,
        });
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.lock().await.chat.is_some()
    }

    pub async fn config(&self) -> Option<SessionConfig> {
        self.inner.lock().await.chat.as_ref().map(|c| c.config.clone())
    }

    /// 当前对话历史（用户和模型交替）
    pub async fn history(&self) -> Vec<Content> {
        self.inner
            .lock()
            .await
            .chat
            .as_ref()
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    async fn prepare(
        &self,
        prompt: &AssembledPrompt,
        images: Option<&[Vec<u8>]>,
    ) -> Result<PreparedTurn, GenerationError> {
        let inner = self.inner.lock().await;
        let chat = inner.chat.as_ref().ok_or(GenerationError::NotInitialized)?;

        let mut parts: Vec<Part> = prompt.parts().iter().map(Part::text).collect();
        if let Some(images) = images {
            parts.extend(images.iter().map(|bytes| Part::image(bytes)));
        }
        let user_content = Content::user(parts);

        let mut contents = chat.history.clone();
        contents.push(user_content.clone());

        log::debug!(
            "Prepared turn: {} history entries, {} images",
            chat.history.len(),
            images.map(|i| i.len()).unwrap_or(0)
        );

        Ok(PreparedTurn {
            model: chat.config.model_handle(),
            request: GenerateContentRequest {
                contents,
                system_instruction: Some(Content {
                    role: None,
                    parts: vec![Part::text(chat.config.system_instruction())],
                }),
                generation_config: chat.config.generation.clone(),
                safety_settings: chat.config.safety_settings(),
            },
            user_content,
            epoch: chat.epoch,
        })
    }

    /// 按参数选择一次性或流式发送
    pub async fn send(
        &self,
        prompt: &AssembledPrompt,
        images: Option<&[Vec<u8>]>,
        streaming: bool,
    ) -> Result<Reply, GenerationError> {
        if streaming {
            self.send_message_stream(prompt, images).await.map(Reply::Stream)
        } else {
            self.send_message(prompt, images).await.map(Reply::Complete)
        }
    }

    /// 一次性发送，等待完整回复
    pub async fn send_message(
        &self,
        prompt: &AssembledPrompt,
        images: Option<&[Vec<u8>]>,
    ) -> Result<String, GenerationError> {
        let turn = self.prepare(prompt, images).await?;

        let response = self
            .backend
            .generate(&turn.model, turn.request)
            .await
            .map_err(|e| {
                log::error!("Generation request failed: {}", e);
                e
            })?;

        if let Some(reason) = response.block_reason() {
            log::warn!("Generation blocked: {}", reason);
            return Err(GenerationError::Blocked(reason));
        }

        match response.text() {
            Some(text) => {
                record_turn(&self.inner, turn.epoch, turn.user_content, &text).await;
                Ok(text)
            }
            None => {
                log::warn!("Generation returned no text");
                Ok(NO_RESPONSE_TEXT.to_string())
            }
        }
    }

    /// 流式发送，返回累积文本流
    pub async fn send_message_stream(
        &self,
        prompt: &AssembledPrompt,
        images: Option<&[Vec<u8>]>,
    ) -> Result<TextStream, GenerationError> {
        let turn = self.prepare(prompt, images).await?;
        let mut chunks = self.backend.generate_stream(&turn.model, turn.request);
        let inner = self.inner.clone();
        let user_content = turn.user_content;
        let epoch = turn.epoch;

        Ok(Box::pin(stream! {
            let mut accumulated = String::new();

            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(response) => {
                        if let Some(reason) = response.block_reason() {
                            log::warn!("Generation stream blocked: {}", reason);
                            yield Err(GenerationError::Blocked(reason));
                            return;
                        }
                        if let Some(text) = response.text() {
                            accumulated.push_str(&text);
                            yield Ok(accumulated.clone());
                        }
                    }
                    Err(e) => {
                        log::error!("Generation stream failed: {}", e);
                        yield Err(e);
                        return;
                    }
                }
            }

            if !accumulated.is_empty() {
                record_turn(&inner, epoch, user_content, &accumulated).await;
            }
        }))
    }
}

/// 成功的一轮写入历史；会话在此期间被重新初始化则丢弃
async fn record_turn(inner: &Mutex<SessionInner>, epoch: u64, user: Content, reply: &str) {
    let mut inner = inner.lock().await;
    match inner.chat.as_mut() {
        Some(chat) if chat.epoch == epoch => {
            chat.history.push(user);
            chat.history.push(Content::model(reply));
        }
        _ => log::debug!("Session was re-initialized, dropping finished turn"),
    }
}
