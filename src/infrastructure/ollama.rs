//! Ollama `/api/generate` client.

use crate::core::config::Settings;
use crate::core::error::UpstreamError;
use crate::core::generation::Fragment;
use crate::core::traits::{FragmentStream, Generator};
use async_stream::stream;
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    error: Option<String>,
}

pub struct OllamaGenerator {
    client: Client,
    url: String,
    model: String,
    idle_timeout: Duration,
}

#[injectable(Generator)]
impl OllamaGenerator {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> OllamaGenerator {
        let client = Client::builder()
            .connect_timeout(settings.http_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("cannot configure generator http client, using defaults: {e}");
                Client::new()
            });

        OllamaGenerator::new(
            client,
            &settings.ollama_url,
            &settings.model_name,
            settings.generation_timeout,
        )
    }
}

impl OllamaGenerator {
    /// `idle_timeout` bounds each wait on the backend: the response head, the whole
    /// body of a complete answer and every chunk of a streamed one.
    pub fn new(client: Client, base_url: &str, model: &str, idle_timeout: Duration) -> OllamaGenerator {
        OllamaGenerator {
            client,
            url: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.to_owned(),
            idle_timeout,
        }
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<Response, UpstreamError> {
        debug!("generating with {} (stream: {stream})", self.model);

        let request = self.client.post(&self.url).json(&GenerateRequest {
            model: &self.model,
            prompt,
            stream,
        });
        let response = within(self.idle_timeout, request.send()).await??;

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn complete(&self, prompt: &str) -> Result<String, UpstreamError> {
        let response = self.send(prompt, false).await?;
        let reply = within(self.idle_timeout, response.json::<GenerateReply>()).await??;

        match reply.error {
            Some(error) => Err(UpstreamError::Backend(error)),
            None => Ok(reply.response),
        }
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentStream, UpstreamError> {
        let mut body = Box::pin(self.send(prompt, true).await?.bytes_stream());
        let idle_timeout = self.idle_timeout;

        Ok(Box::pin(stream! {
            let mut lines = LineDecoder::default();

            loop {
                let chunk = match within(idle_timeout, body.next()).await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                match chunk {
                    Ok(chunk) => {
                        for fragment in lines.push(&chunk) {
                            yield fragment;
                        }
                    }
                    Err(e) => {
                        yield Err(UpstreamError::from(e));
                        return;
                    }
                }
            }

            if let Some(fragment) = lines.finish() {
                yield fragment;
            }
        }))
    }
}

async fn within<F: Future>(limit: Duration, future: F) -> Result<F::Output, UpstreamError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| UpstreamError::Timeout(limit))
}

/// Splits a newline-delimited JSON body into fragments.
///
/// Network chunks do not line up with lines, so incomplete input is held back
/// until the rest of the line arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Fragment, UpstreamError>> {
        self.pending.extend_from_slice(bytes);

        let mut fragments = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if let Some(fragment) = decode_line(&line) {
                fragments.push(fragment);
            }
        }

        fragments
    }

    /// Decodes whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<Result<Fragment, UpstreamError>> {
        let line = std::mem::take(&mut self.pending);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<Fragment, UpstreamError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    Some(serde_json::from_slice(line).map_err(UpstreamError::from))
}
