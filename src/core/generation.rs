//! Generation adapter.
//!
//! Wraps the [`Generator`] behind two contracts that never fail: a complete answer and a
//! stream of plain text deltas. Backend failures become localized text.

use crate::core::error::UpstreamError;
use crate::core::traits::Generator;
use async_stream::stream;
use di::{Ref, injectable};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use log::{debug, warn};
use serde::Deserialize;

/// Reply used when the generator cannot produce an answer at all.
pub const GENERATION_ERROR: &str = "❌ Error al generar respuesta con Prometeo";

/// Final chunk of a stream that broke off.
pub fn generation_error_suffix(reason: &UpstreamError) -> String {
    format!("\n{GENERATION_ERROR}: {reason}")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageFragment {
    #[serde(default)]
    pub content: String,
}

/// One decoded line of a streaming backend.
///
/// Backends disagree on where the text goes; variants are tried top to bottom.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Fragment {
    Failed { error: String },
    Delta { delta: String },
    Response { response: String },
    Message { message: MessageFragment },
    /// Whole response so far, rather than the newest piece.
    Snapshot { text: String },
    Other(serde_json::Value),
}

/// Turns fragments of any shape into successive deltas.
#[derive(Debug, Default)]
pub struct FragmentNormalizer {
    emitted: String,
}

impl FragmentNormalizer {
    /// Returns the new text carried by `fragment`, if any.
    pub fn push(&mut self, fragment: Fragment) -> Result<Option<String>, UpstreamError> {
        let delta = match fragment {
            Fragment::Failed { error } => return Err(UpstreamError::Backend(error)),
            Fragment::Delta { delta } => delta,
            Fragment::Response { response } => response,
            Fragment::Message { message } => message.content,
            Fragment::Snapshot { text } => match text.strip_prefix(self.emitted.as_str()) {
                Some(rest) => rest.to_owned(),
                None => {
                    warn!("snapshot fragment does not extend the text emitted so far, skipping it");
                    return Ok(None);
                }
            },
            Fragment::Other(value) => {
                debug!("ignoring fragment without text: {value}");
                return Ok(None);
            }
        };

        if delta.is_empty() {
            return Ok(None);
        }

        self.emitted.push_str(&delta);
        Ok(Some(delta))
    }
}

#[injectable]
pub struct GenerationAdapter {
    generator: Ref<dyn Generator>,
}

impl GenerationAdapter {
    pub fn new(generator: Ref<dyn Generator>) -> Self {
        Self { generator }
    }

    /// One finished answer, or [`GENERATION_ERROR`] if the generator fails.
    pub async fn generate_complete(&self, prompt: &str) -> String {
        match self.generator.complete(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("generation failed: {e}");
                GENERATION_ERROR.to_owned()
            }
        }
    }

    /// Successive text deltas. A failure, at the start or midway, ends the stream
    /// with one chunk carrying [`generation_error_suffix`].
    pub fn generate_stream(&self, prompt: String) -> BoxStream<'static, String> {
        let generator = self.generator.clone();

        Box::pin(stream! {
            let mut fragments = match generator.stream(&prompt).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    warn!("cannot open generation stream: {e}");
                    yield generation_error_suffix(&e);
                    return;
                }
            };

            let mut normalizer = FragmentNormalizer::default();
            while let Some(fragment) = fragments.next().await {
                match fragment.and_then(|fragment| normalizer.push(fragment)) {
                    Ok(Some(delta)) => yield delta,
                    Ok(None) => {}
                    Err(e) => {
                        warn!("generation stream failed: {e}");
                        yield generation_error_suffix(&e);
                        return;
                    }
                }
            }
        })
    }
}
