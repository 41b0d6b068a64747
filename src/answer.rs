//! Grounded answering.
//!
//! [`AnswerOrchestrator`] turns retrieved chunks and a question into a
//! [`CompletionRequest`], runs it against a [`ChatModel`], and derives the
//! citation list from the chunks.
//!
//! Streaming hands back an [`AnswerStream`]: the raw delta channel plus the
//! citations. [`AnswerStream::drain_into`] is the consumer side; it keeps
//! its own buffer and passes the whole answer so far to a [`DisplaySink`]
//! after every delta.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;

use crate::llm::{ChatModel, CompletionRequest, DeltaStream};
use crate::models::{Citation, ScoredChunk};

/// Receives the growing answer text during streaming.
pub trait DisplaySink {
    /// Called after each delta with everything generated so far.
    fn render(&mut self, answer_so_far: &str);
}

impl<F: FnMut(&str)> DisplaySink for F {
    fn render(&mut self, answer_so_far: &str) {
        self(answer_so_far)
    }
}

/// A finished answer and where its context came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// An answer still being generated.
pub struct AnswerStream {
    pub deltas: DeltaStream,
    pub citations: Vec<Citation>,
}

impl AnswerStream {
    /// Consume every delta, rendering the accumulated text after each one.
    /// Stops at the first error; the sink keeps whatever it was shown.
    pub async fn drain_into(mut self, sink: &mut dyn DisplaySink) -> Result<Answer> {
        let mut text = String::new();
        while let Some(delta) = self.deltas.recv().await {
            text.push_str(&delta?);
            sink.render(&text);
        }
        Ok(Answer {
            text,
            citations: self.citations,
        })
    }
}

#[derive(Clone)]
pub struct AnswerOrchestrator {
    model: Arc<dyn ChatModel>,
    system_instruction: String,
}

impl AnswerOrchestrator {
    pub fn new(model: Arc<dyn ChatModel>, system_instruction: impl Into<String>) -> Self {
        Self {
            model,
            system_instruction: system_instruction.into(),
        }
    }

    pub fn request(&self, question: &str, retrieved: &[ScoredChunk]) -> CompletionRequest {
        CompletionRequest {
            system_instruction: self.system_instruction.clone(),
            question: question.to_string(),
            context: retrieved.iter().map(|r| r.chunk.text.clone()).collect(),
        }
    }

    /// Blocking mode: wait for the complete answer.
    pub async fn answer(&self, question: &str, retrieved: &[ScoredChunk]) -> Result<Answer> {
        let text = self.model.complete(&self.request(question, retrieved)).await?;
        Ok(Answer {
            text,
            citations: derive_citations(retrieved),
        })
    }

    /// Streaming mode.
    pub async fn stream(&self, question: &str, retrieved: &[ScoredChunk]) -> Result<AnswerStream> {
        let deltas = self.model.stream(&self.request(question, retrieved)).await?;
        Ok(AnswerStream {
            deltas,
            citations: derive_citations(retrieved),
        })
    }
}

/// One citation per distinct (file, page), in first-seen order.
pub fn derive_citations(retrieved: &[ScoredChunk]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    retrieved
        .iter()
        .map(|r| r.chunk.citation())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
