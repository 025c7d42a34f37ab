//! Client for OpenAI-compatible HTTP APIs: dense embeddings and chat
//! completions.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
    embedding::{DenseEncoder, DenseVector},
    error::{Error, Result},
    synthesis::LanguageModel,
};

const ENCODER: &str = "openai";

/// Shared HTTP client and credentials.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// POST `body` as JSON and decode the JSON reply. Transport and HTTP
    /// failures become whatever `wrap` makes of the message.
    async fn post_json<Req, Resp>(
        &self,
        path: &str,
        body: &Req,
        wrap: fn(String) -> Error,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| wrap(format!("request to {path} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(wrap(format!("{path} returned {status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| wrap(format!("invalid {path} response: {e}")))
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Dense encoder calling the `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, model: &str, dimensions: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            dimensions,
        }
    }
}

impl DenseEncoder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<DenseVector>>> + Send {
        let request = EmbeddingRequest {
            model: &self.model,
            // Newlines degrade embedding quality for this model family.
            input: texts.iter().map(|t| t.replace('\n', " ")).collect(),
            dimensions: self.dimensions,
        };
        let expected = texts.len();
        async move {
            if expected == 0 {
                return Ok(Vec::new());
            }
            let mut response: EmbeddingResponse = self
                .client
                .post_json("embeddings", &request, |m| Error::Encoding {
                    encoder: ENCODER,
                    message: m,
                })
                .await?;
            order_embeddings(&mut response.data, expected)?;
            Ok(response
                .data
                .into_iter()
                .map(|d| DenseVector::normalized(d.embedding))
                .collect())
        }
    }
}

/// Sort the returned rows by `index` and check that each input got one.
fn order_embeddings(data: &mut [EmbeddingData], expected: usize) -> Result<()> {
    data.sort_by_key(|d| d.index);
    let complete = data.len() == expected
        && data.iter().enumerate().all(|(i, d)| d.index == i);
    if complete {
        Ok(())
    } else {
        Err(Error::encoding(
            ENCODER,
            format!("expected {expected} embeddings, got {}", data.len()),
        ))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Language model calling the `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiChat {
    pub fn new(
        client: OpenAiClient,
        model: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            client,
            model: model.to_string(),
            temperature,
            max_tokens,
        }
    }
}

impl LanguageModel for OpenAiChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn complete(
        &self,
        system: &str,
        user: &str,
    ) -> impl Future<Output = Result<String>> + Send {
        async move {
            let request = ChatRequest {
                model: &self.model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: system,
                    },
                    ChatMessage {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };
            let response: ChatResponse = self
                .client
                .post_json("chat/completions", &request, Error::Synthesis)
                .await?;
            Ok(response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default())
        }
    }
}
