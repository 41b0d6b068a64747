//! Interactive chat session.
//!
//! A [`ChatSession`] is the scoped state of one conversation: the
//! transcript, the shared [`IndexCache`], the answering model and the
//! credential resolved at startup. Each [`ask`](ChatSession::ask) runs
//! retrieve → answer → cite sequentially.
//!
//! Transcript rules: the user's question is recorded before any pipeline
//! work, and the assistant's answer only once it completed. A failed turn
//! therefore leaves the question without an answer, and the session can
//! take the next question.

use anyhow::Result;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::answer::{Answer, AnswerOrchestrator, DisplaySink};
use crate::cache::{IndexCache, IndexLookup};
use crate::credential::CredentialState;
use crate::error::{PipelineError, PipelineResult};
use crate::index_cmd::print_lookup;
use crate::llm::ChatModel;
use crate::models::{ChatMessage, Role, ScoredChunk};
use crate::retriever::Retriever;

pub struct ChatSession {
    cache: Arc<IndexCache>,
    orchestrator: AnswerOrchestrator,
    credential: CredentialState,
    top_k: usize,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(
        cache: Arc<IndexCache>,
        model: Arc<dyn ChatModel>,
        credential: CredentialState,
    ) -> Self {
        let config = cache.config();
        let orchestrator =
            AnswerOrchestrator::new(model, config.prompt.system_instruction.clone());
        let top_k = config.retrieval.top_k;
        Self {
            cache,
            orchestrator,
            credential,
            top_k,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Answer in blocking mode.
    pub async fn ask(&mut self, question: &str) -> PipelineResult<Answer> {
        self.turn(question, None).await
    }

    /// Answer in streaming mode, rendering into `sink` as text arrives.
    pub async fn ask_streaming(
        &mut self,
        question: &str,
        sink: &mut dyn DisplaySink,
    ) -> PipelineResult<Answer> {
        self.turn(question, Some(sink)).await
    }

    /// Drop the cached and persisted index and rebuild it from the
    /// document folder.
    pub async fn refresh(&self) -> PipelineResult<IndexLookup> {
        self.cache.invalidate().await?;
        self.cache.get_index(self.credential.credential()).await
    }

    async fn turn(
        &mut self,
        question: &str,
        sink: Option<&mut dyn DisplaySink>,
    ) -> PipelineResult<Answer> {
        let config = self.cache.config();
        let needs_credential =
            config.embedding.needs_credential() || config.llm.needs_credential();
        if needs_credential && self.credential == CredentialState::Unconfigured {
            return Err(PipelineError::Unconfigured);
        }

        self.history.push(ChatMessage::user(question));

        let retrieved = self.retrieve(question).await?;
        tracing::debug!("retrieved {} chunks", retrieved.len());

        let answer = match sink {
            Some(sink) => {
                let stream = self
                    .orchestrator
                    .stream(question, &retrieved)
                    .await
                    .map_err(PipelineError::Query)?;
                stream.drain_into(sink).await
            }
            None => self.orchestrator.answer(question, &retrieved).await,
        }
        .map_err(PipelineError::Query)?;

        self.history.push(ChatMessage::assistant(answer.text.clone()));
        Ok(answer)
    }

    async fn retrieve(&self, question: &str) -> PipelineResult<Vec<ScoredChunk>> {
        let lookup = self.cache.get_index(self.credential.credential()).await?;
        let Some(index) = lookup.index() else {
            return Err(PipelineError::EmptyCorpus {
                dir: self.cache.config().documents.dir.clone(),
            });
        };

        Retriever::new(index.clone(), self.top_k)
            .search(question)
            .await
            .map_err(PipelineError::Query)
    }
}

/// Writes streamed answers to stdout, printing only the part of the
/// accumulated text that has not been shown yet.
#[derive(Debug, Default)]
pub struct TerminalSink {
    shown: usize,
}

impl DisplaySink for TerminalSink {
    fn render(&mut self, answer_so_far: &str) {
        if let Some(new) = answer_so_far.get(self.shown..) {
            print!("{}", new);
            let _ = std::io::stdout().flush();
        }
        self.shown = answer_so_far.len();
    }
}

fn print_answer_sources(answer: &Answer) {
    if answer.citations.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for c in &answer.citations {
        println!("  - {}", c);
    }
}

/// `folio ask`: answer one question and print its sources.
pub async fn run_ask(
    session: &mut ChatSession,
    question: &str,
    stream: bool,
) -> PipelineResult<()> {
    let answer = if stream {
        let mut sink = TerminalSink::default();
        let answer = session.ask_streaming(question, &mut sink).await?;
        println!();
        answer
    } else {
        let answer = session.ask(question).await?;
        println!("{}", answer.text);
        answer
    };
    print_answer_sources(&answer);
    Ok(())
}

/// `folio chat`: read questions from stdin until EOF or `/quit`.
pub async fn run_chat(session: &mut ChatSession, upload: Option<&Path>) -> Result<()> {
    let lookup = match upload {
        Some(path) => {
            session
                .cache
                .load_upload(path, session.credential.credential())
                .await
        }
        None => session.cache.get_index(session.credential.credential()).await,
    };
    match lookup {
        Ok(lookup) => print_lookup(&lookup, session.cache.config()),
        Err(e) => eprintln!("Error: {}", e),
    }

    println!("Ask about the documents. Commands: /refresh, /history, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                for msg in session.history() {
                    let who = match msg.role {
                        Role::User => "you",
                        Role::Assistant => "assistant",
                    };
                    println!("[{}] {}", who, msg.content);
                }
                continue;
            }
            "/refresh" => {
                match session.refresh().await {
                    Ok(lookup) => print_lookup(&lookup, session.cache.config()),
                    Err(e) => eprintln!("Error: {}", e),
                }
                continue;
            }
            _ => {}
        }

        let mut sink = TerminalSink::default();
        match session.ask_streaming(input, &mut sink).await {
            Ok(answer) => {
                println!();
                print_answer_sources(&answer);
            }
            Err(e) => {
                println!();
                eprintln!("Error: {}", e);
            }
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_sink_tracks_shown_prefix() {
        let mut sink = TerminalSink::default();
        sink.render("Hel");
        assert_eq!(sink.shown, 3);
        sink.render("Hello wörld");
        assert_eq!(sink.shown, "Hello wörld".len());
    }
}
