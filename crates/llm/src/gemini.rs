use crate::{
    recording::{APIRecorder, PlaybackState},
    streaming::{ChunkStream, HttpChunkStream, PlaybackChunkStream},
    types::*,
    utils, ApiError, LLMProvider, RateLimitHandler, StreamingCallback, StreamingChunk,
};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Debug, Serialize)]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<GeminiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Parts,
}

#[derive(Debug, Serialize)]
struct Parts {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    cached_content_token_count: Option<u32>,
}

impl From<GeminiUsageMetadata> for Usage {
    fn from(usage: GeminiUsageMetadata) -> Self {
        Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            cache_read_input_tokens: usage.cached_content_token_count.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

/// Rate limit information extracted from response headers
#[derive(Debug)]
struct GeminiRateLimitInfo {
    retry_after: Option<Duration>,
}

impl RateLimitHandler for GeminiRateLimitInfo {
    fn from_response(response: &Response) -> Self {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);
        Self { retry_after }
    }

    fn get_retry_delay(&self) -> Duration {
        self.retry_after.unwrap_or(Duration::from_secs(2))
    }

    fn log_status(&self) {
        debug!(
            "Gemini rate limits - retry after: {}",
            self.retry_after
                .map_or("n/a".to_string(), |d| format!("{}s", d.as_secs()))
        );
    }
}

/// Accumulates content blocks while SSE lines arrive, forwarding deltas to the callback
struct SseAccumulator {
    blocks: Vec<ContentBlock>,
    usage: Option<GeminiUsageMetadata>,
    tool_counter: u32,
    request_id: u64,
}

impl SseAccumulator {
    fn new(request_id: u64) -> Self {
        Self {
            blocks: Vec::new(),
            usage: None,
            tool_counter: 0,
            request_id,
        }
    }

    fn process_line(
        &mut self,
        line: &str,
        callback: &StreamingCallback,
        recorder: Option<&APIRecorder>,
    ) -> Result<()> {
        let line = line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix("data: ") else {
            if !line.trim().is_empty() {
                warn!("Received line without 'data' prefix: {}", line);
            }
            return Ok(());
        };

        trace!("Received data line: {}", data);
        if let Some(recorder) = recorder {
            recorder.record_chunk(data)?;
        }

        let response: GeminiResponse = match serde_json::from_str(data) {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to parse Gemini response from data: {} ({})", data, e);
                return Ok(());
            }
        };

        self.apply(response, callback)
    }

    fn apply(&mut self, response: GeminiResponse, callback: &StreamingCallback) -> Result<()> {
        if let Some(usage) = response.usage_metadata {
            self.usage = Some(usage);
        }

        let parts = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default();

        for part in parts {
            if let Some(function_call) = part.function_call {
                self.tool_counter += 1;
                let tool_id = format!("tool-{}-{}", self.request_id, self.tool_counter);
                let args = serde_json::to_string(&function_call.args)?;
                self.blocks.push(ContentBlock::ToolUse {
                    id: tool_id.clone(),
                    name: function_call.name.clone(),
                    input: function_call.args,
                });
                callback(&StreamingChunk::InputJson {
                    content: args,
                    tool_name: Some(function_call.name),
                    tool_id: Some(tool_id),
                })?;
            } else if let Some(text) = part.text {
                if part.thought == Some(true) {
                    match self.blocks.last_mut() {
                        Some(ContentBlock::Thinking {
                            thinking,
                            signature,
                        }) => {
                            thinking.push_str(&text);
                            if let Some(new_signature) = part.thought_signature {
                                *signature = new_signature;
                            }
                        }
                        _ => self.blocks.push(ContentBlock::Thinking {
                            thinking: text.clone(),
                            signature: part.thought_signature.unwrap_or_default(),
                        }),
                    }
                    callback(&StreamingChunk::Thinking(text))?;
                } else {
                    match self.blocks.last_mut() {
                        Some(ContentBlock::Text { text: last_text }) => last_text.push_str(&text),
                        _ => self.blocks.push(ContentBlock::Text { text: text.clone() }),
                    }
                    callback(&StreamingChunk::Text(text))?;
                }
            }
        }
        Ok(())
    }

    fn into_response(self) -> LLMResponse {
        LLMResponse {
            content: self.blocks,
            usage: self.usage.map(Usage::from).unwrap_or_default(),
        }
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    recorder: Option<APIRecorder>,
    playback: Option<PlaybackState>,
}

impl GeminiClient {
    pub fn default_base_url() -> String {
        "https://generativelanguage.googleapis.com/v1beta".to_string()
    }

    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url,
            recorder: None,
            playback: None,
        }
    }

    /// Record every streamed response to the given file
    pub fn with_recorder<P: AsRef<std::path::Path>>(mut self, recording_path: P) -> Self {
        self.recorder = Some(APIRecorder::new(recording_path));
        self
    }

    /// Serve streaming requests from a recording instead of the network
    pub fn with_playback(mut self, playback_state: PlaybackState) -> Self {
        self.playback = Some(playback_state);
        self
    }

    fn get_url(&self, streaming: bool) -> String {
        if streaming {
            format!(
                "{}/models/{}:streamGenerateContent",
                self.base_url, self.model
            )
        } else {
            format!("{}/models/{}:generateContent", self.base_url, self.model)
        }
    }

    fn text_part(text: &str) -> GeminiPart {
        GeminiPart {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn convert_message(message: &Message) -> GeminiMessage {
        let role = Some(match message.role {
            MessageRole::User => "user".to_string(),
            MessageRole::Assistant => "model".to_string(),
        });

        let parts = match &message.content {
            MessageContent::Text(text) => vec![Self::text_part(text)],
            MessageContent::Structured(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Thinking {
                        thinking,
                        signature,
                    } => GeminiPart {
                        text: Some(thinking.clone()),
                        thought: Some(true),
                        thought_signature: Some(signature.clone()),
                        ..Default::default()
                    },
                    ContentBlock::Text { text } => Self::text_part(text),
                    ContentBlock::ToolUse { name, input, .. } => GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            name: name.clone(),
                            args: input.clone(),
                        }),
                        ..Default::default()
                    },
                    ContentBlock::ToolResult {
                        tool_name,
                        content,
                        is_error,
                        ..
                    } => {
                        // Function responses must be JSON objects
                        let response = match (content, is_error) {
                            (_, Some(true)) => json!({ "error": content }),
                            (serde_json::Value::Object(_), _) => content.clone(),
                            _ => json!({ "result": content }),
                        };
                        GeminiPart {
                            function_response: Some(GeminiFunctionResponse {
                                name: tool_name.clone(),
                                response,
                            }),
                            ..Default::default()
                        }
                    }
                })
                .collect(),
        };

        GeminiMessage { role, parts }
    }

    fn build_request(request: LLMRequest) -> GeminiRequest {
        GeminiRequest {
            system_instruction: (!request.system_prompt.is_empty()).then(|| SystemInstruction {
                parts: Parts {
                    text: request.system_prompt.clone(),
                },
            }),
            contents: request.messages.iter().map(Self::convert_message).collect(),
            generation_config: Some(GenerationConfig {
                temperature: 1.,
                max_output_tokens: 8192,
                response_mime_type: "text/plain".to_string(),
            }),
            tools: request.tools.filter(|tools| !tools.is_empty()).map(|tools| {
                vec![json!({
                    "function_declarations": tools.into_iter().map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        })
                    }).collect::<Vec<_>>()
                })]
            }),
        }
    }

    async fn send_with_retry(
        &self,
        request: &GeminiRequest,
        request_id: u64,
        streaming_callback: Option<&StreamingCallback>,
        max_retries: u32,
    ) -> Result<LLMResponse> {
        let mut attempts = 0;

        loop {
            let result = match streaming_callback {
                Some(callback) => {
                    self.try_send_request_streaming(request, request_id, callback)
                        .await
                }
                None => self.try_send_request(request, request_id).await,
            };
            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if utils::handle_retryable_error::<GeminiRateLimitInfo>(
                        &e,
                        attempts,
                        max_retries,
                        streaming_callback,
                    )
                    .await
                    {
                        attempts += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn post(&self, request: &GeminiRequest, streaming: bool) -> Result<Response> {
        let mut query = vec![("key", self.api_key.as_str())];
        if streaming {
            query.push(("alt", "sse"));
        }
        let response = self
            .client
            .post(self.get_url(streaming))
            .query(&query)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        let response = utils::check_response_error::<GeminiRateLimitInfo>(response).await?;
        GeminiRateLimitInfo::from_response(&response).log_status();
        Ok(response)
    }

    async fn try_send_request(
        &self,
        request: &GeminiRequest,
        request_id: u64,
    ) -> Result<LLMResponse> {
        trace!(
            "Sending Gemini request to {}:\n{}",
            self.model,
            serde_json::to_string_pretty(request)?
        );

        let response_text = self
            .post(request, false)
            .await?
            .text()
            .await
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        let response: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| ApiError::Unknown(format!("Failed to parse response: {e}")))?;
        if response.candidates.is_empty() {
            return Err(ApiError::Unknown("Response contained no candidates".to_string()).into());
        }

        let mut accumulator = SseAccumulator::new(request_id);
        let ignore: StreamingCallback = Box::new(|_| Ok(()));
        accumulator.apply(response, &ignore)?;
        Ok(accumulator.into_response())
    }

    async fn try_send_request_streaming(
        &self,
        request: &GeminiRequest,
        request_id: u64,
        streaming_callback: &StreamingCallback,
    ) -> Result<LLMResponse> {
        if let Some(playback) = &self.playback {
            let session = playback
                .next_session()?
                .ok_or_else(|| anyhow::anyhow!("No more recorded sessions to play back"))?;
            debug!("Playing back recorded session with {} chunks", session.chunks.len());
            let mut stream = PlaybackChunkStream::new(session.chunks, playback.fast);
            return self
                .process_chunk_stream(&mut stream, request_id, streaming_callback)
                .await;
        }

        if let Some(recorder) = &self.recorder {
            recorder.start_recording(serde_json::to_value(request)?)?;
        }
        let response = self.post(request, true).await?;
        let mut stream = HttpChunkStream::new(response);
        let result = self
            .process_chunk_stream(&mut stream, request_id, streaming_callback)
            .await;
        if let Some(recorder) = &self.recorder {
            recorder.end_recording()?;
        }
        result
    }

    async fn process_chunk_stream(
        &self,
        stream: &mut dyn ChunkStream,
        request_id: u64,
        streaming_callback: &StreamingCallback,
    ) -> Result<LLMResponse> {
        let recorder = if self.playback.is_some() {
            None
        } else {
            self.recorder.as_ref()
        };
        let mut accumulator = SseAccumulator::new(request_id);
        // Bytes, so multi-byte characters split across chunks survive
        let mut line_buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next_chunk().await? {
            for byte in chunk {
                if byte == b'\n' {
                    if !line_buffer.is_empty() {
                        let line = String::from_utf8_lossy(&line_buffer).into_owned();
                        line_buffer.clear();
                        accumulator.process_line(&line, streaming_callback, recorder)?;
                    }
                } else {
                    line_buffer.push(byte);
                }
            }
        }

        if !line_buffer.is_empty() {
            let line = String::from_utf8_lossy(&line_buffer).into_owned();
            accumulator.process_line(&line, streaming_callback, recorder)?;
        }

        streaming_callback(&StreamingChunk::StreamingComplete)?;
        Ok(accumulator.into_response())
    }
}

#[async_trait]
impl LLMProvider for GeminiClient {
    async fn send_message(
        &mut self,
        request: LLMRequest,
        streaming_callback: Option<&StreamingCallback>,
    ) -> Result<LLMResponse> {
        let request_id = request.request_id;
        let gemini_request = Self::build_request(request);
        self.send_with_retry(&gemini_request, request_id, streaming_callback, 3)
            .await
    }
}
