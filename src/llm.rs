//! Chat-completion provider abstraction.
//!
//! A [`ChatModel`] answers a [`CompletionRequest`] either in one piece
//! ([`ChatModel::complete`]) or as a finite stream of text deltas
//! ([`ChatModel::stream`]) delivered over a `tokio::sync::mpsc` channel.
//!
//! | Provider | Endpoint | Streaming wire format |
//! |----------|----------|-----------------------|
//! | `openai` | `POST /v1/chat/completions` | Server-sent events, `data: [DONE]` terminator |
//! | `ollama` | `POST /api/chat` | Newline-delimited JSON, `"done": true` terminator |
//!
//! A failed request is reported once; `max_retries` opts into retrying the
//! initial request only. A stream that fails midway ends with a single `Err`
//! item.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::LlmConfig;
use crate::credential::Credential;
use crate::embedding::post_with_retry;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Preamble placed before the retrieved context in the system message.
const CONTEXT_PREAMBLE: &str = "Use the following pieces of context to answer the user's question.\n\
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
----------------";

/// Receiver of incremental answer text. Closed when generation ends.
pub type DeltaStream = mpsc::Receiver<Result<String>>;

/// One grounded-answer request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_instruction: String,
    pub question: String,
    /// Retrieved chunk texts, most relevant first.
    pub context: Vec<String>,
}

impl CompletionRequest {
    /// The combined user prompt: instruction, newline, then the question.
    pub fn prompt(&self) -> String {
        format!("{}\nQuestion: {}", self.system_instruction, self.question)
    }

    /// All context chunks in one block, separated by blank lines.
    pub fn context_block(&self) -> String {
        self.context.join("\n\n")
    }

    /// Chat messages in the OpenAI/Ollama shape.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        vec![
            serde_json::json!({
                "role": "system",
                "content": format!("{}\n{}", CONTEXT_PREAMBLE, self.context_block()),
            }),
            serde_json::json!({
                "role": "user",
                "content": self.prompt(),
            }),
        ]
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate the full answer.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Start generation and return the delta stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream>;
}

pub fn create_chat_model(
    config: &LlmConfig,
    credential: Option<&Credential>,
) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => {
            let credential = credential
                .ok_or_else(|| anyhow::anyhow!("OpenAI chat completions require an API key"))?;
            Ok(Arc::new(OpenAIChat::new(config, credential.clone())?))
        }
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ OpenAI ============

pub struct OpenAIChat {
    model: String,
    temperature: f32,
    base_url: String,
    max_retries: u32,
    credential: Credential,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig, credential: Credential) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_retries: config.max_retries,
            credential,
            client,
        })
    }

    fn request(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages(),
            "temperature": self.temperature,
            "stream": stream,
        });
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .json(&body)
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response =
            post_with_retry(self.request(request, false), self.max_retries, "OpenAI").await?;
        let json: serde_json::Value = response.json().await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream> {
        let response =
            post_with_retry(self.request(request, true), self.max_retries, "OpenAI").await?;
        Ok(spawn_line_stream(response, parse_sse_line))
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            max_retries: config.max_retries,
            client,
        })
    }

    fn request(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages(),
            "options": { "temperature": self.temperature },
            "stream": stream,
        });
        self.client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response =
            post_with_retry(self.request(request, false), self.max_retries, "Ollama").await?;
        let json: serde_json::Value = response.json().await?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message content"))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream> {
        let response =
            post_with_retry(self.request(request, true), self.max_retries, "Ollama").await?;
        Ok(spawn_line_stream(response, parse_ndjson_line))
    }
}

// ============ Stream decoding ============

/// What one line of a streaming response means.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

/// Read the response body line by line on a background task and forward
/// parsed deltas. The channel closes after the terminator, an error, or
/// the end of the body.
fn spawn_line_stream(
    mut response: reqwest::Response,
    parse: fn(&str) -> Result<StreamLine>,
) -> DeltaStream {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut lines = LineBuffer::default();

        loop {
            let pending = match response.chunk().await {
                Ok(Some(bytes)) => lines.push(&bytes),
                Ok(None) => lines.finish(),
                Err(e) => {
                    let _ = tx.send(Err(anyhow::anyhow!("stream interrupted: {}", e))).await;
                    return;
                }
            };
            let at_end = lines.is_finished();

            for line in pending {
                match parse(&line) {
                    Ok(StreamLine::Delta(text)) => {
                        if tx.send(Ok(text)).await.is_err() {
                            // Receiver dropped; stop reading.
                            return;
                        }
                    }
                    Ok(StreamLine::Done) => return,
                    Ok(StreamLine::Skip) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if at_end {
                return;
            }
        }
    });

    rx
}

/// Splits a byte stream into lines. Bytes are buffered until a newline so a
/// UTF-8 sequence split across network chunks decodes correctly.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
    finished: bool,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    fn finish(&mut self) -> Vec<String> {
        self.finished = true;
        if self.buf.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buf);
        vec![decode_line(&rest)]
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// Parse one server-sent-events line from the OpenAI streaming API.
fn parse_sse_line(line: &str) -> Result<StreamLine> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments and other fields carry no text.
        return Ok(StreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }

    let json: serde_json::Value = serde_json::from_str(data)?;
    if let Some(err) = json.get("error") {
        bail!("OpenAI stream error: {}", err);
    }

    Ok(
        match json
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
        {
            Some(text) if !text.is_empty() => StreamLine::Delta(text.to_string()),
            _ => StreamLine::Skip,
        },
    )
}

/// Parse one NDJSON line from the Ollama chat API.
fn parse_ndjson_line(line: &str) -> Result<StreamLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamLine::Skip);
    }

    let json: serde_json::Value = serde_json::from_str(line)?;
    if let Some(err) = json.get("error") {
        bail!("Ollama stream error: {}", err);
    }

    let text = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);

    Ok(match (text.is_empty(), done) {
        (false, _) => StreamLine::Delta(text.to_string()),
        (true, true) => StreamLine::Done,
        (true, false) => StreamLine::Skip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_instruction: "Answer from context.".to_string(),
            question: "What certifications does he have?".to_string(),
            context: vec!["Certified: AWS, 2023.".to_string(), "Skills: Go.".to_string()],
        }
    }

    #[test]
    fn prompt_combines_instruction_and_question() {
        assert_eq!(
            request().prompt(),
            "Answer from context.\nQuestion: What certifications does he have?"
        );
    }

    #[test]
    fn messages_carry_context_then_prompt() {
        let msgs = request().messages();
        assert_eq!(msgs.len(), 2);
        let system = msgs[0]["content"].as_str().unwrap();
        assert!(system.ends_with("Certified: AWS, 2023.\n\nSkills: Go."));
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[1]["content"].as_str().unwrap(), request().prompt());
    }

    #[test]
    fn sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            StreamLine::Delta("Hel".to_string())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamLine::Skip
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), StreamLine::Done);
        assert_eq!(parse_sse_line("").unwrap(), StreamLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), StreamLine::Skip);
        assert!(parse_sse_line(r#"data: {"error":{"message":"rate limited"}}"#).is_err());
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[test]
    fn ndjson_lines() {
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap(),
            StreamLine::Delta("Hi".to_string())
        );
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#)
                .unwrap(),
            StreamLine::Done
        );
        assert!(parse_ndjson_line(r#"{"error":"model not found"}"#).is_err());
    }

    #[test]
    fn line_buffer_joins_split_utf8() {
        let text = "data: Größe\n\ndata: [DONE]\n".as_bytes();
        // Split inside the two-byte 'ö'.
        let cut = text.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut lines = LineBuffer::default();
        let mut out = lines.push(&text[..cut]);
        assert!(out.is_empty());
        out.extend(lines.push(&text[cut..]));
        out.extend(lines.finish());

        assert_eq!(out, vec!["data: Größe", "", "data: [DONE]"]);
        assert!(lines.is_finished());
    }

    #[test]
    fn line_buffer_flushes_unterminated_tail() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"{\"done\":true}").is_empty());
        assert_eq!(lines.finish(), vec!["{\"done\":true}"]);
    }

    #[test]
    fn openai_requires_credential() {
        assert!(create_chat_model(&LlmConfig::default(), None).is_err());
    }
}
