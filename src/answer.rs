//! Grounded answers streamed through a bounded channel.
//!
//! [`AnswerStreamer::stream_answer`] spawns a producer task that reads the
//! model's token stream and forwards each delta into a bounded
//! `tokio::sync::mpsc` channel. The caller receives an [`AnswerStream`]
//! (the receiving half) plus the references used to build the prompt.
//!
//! ```text
//! producer task                          consumer
//!   model.stream(prompt) ──Delta──▶ [ bounded channel ] ──▶ AnswerStream
//!                        ──Done / Error (last event)──▶
//!   select! on tx.closed(): consumer dropped ⇒ drop model stream, exit
//! ```
//!
//! Backpressure is the channel bound: a slow consumer parks the producer
//! in `send`. Dropping the `AnswerStream` closes the channel, the producer
//! observes it and drops the model stream, which aborts the HTTP request.

use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use code_sage_core::models::{FileMatch, FileReference};
use code_sage_core::prompt::{answer_prompt, PromptStyle, INSUFFICIENT_CONTEXT_ANSWER};
use code_sage_core::store::Store;

use crate::config::RetrievalConfig;
use crate::error::SageError;
use crate::llm::LanguageModel;
use crate::retrieve::{params_for, Retriever};

/// One event of a streamed answer. A model-backed stream always ends with
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Delta(String),
    Done,
    Error(String),
}

/// The receiving half of an answer.
pub struct AnswerStream {
    rx: mpsc::Receiver<AnswerEvent>,
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AnswerEvent>> {
        self.rx.poll_recv(cx)
    }
}

/// A fully drained answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedAnswer {
    pub text: String,
    /// Set when the stream ended with an error. `text` keeps the deltas
    /// delivered before it.
    pub error: Option<String>,
}

impl AnswerStream {
    /// Drain every event into one text.
    pub async fn collect_answer(mut self) -> CollectedAnswer {
        let mut answer = CollectedAnswer::default();
        while let Some(event) = self.next().await {
            match event {
                AnswerEvent::Delta(d) => answer.text.push_str(&d),
                AnswerEvent::Done => {}
                AnswerEvent::Error(e) => answer.error = Some(e),
            }
        }
        answer
    }
}

pub struct Answer {
    pub references: Vec<FileReference>,
    pub stream: AnswerStream,
}

#[derive(Clone)]
pub struct AnswerStreamer {
    model: Arc<dyn LanguageModel>,
    capacity: usize,
    history_window: usize,
}

impl AnswerStreamer {
    pub fn new(model: Arc<dyn LanguageModel>, capacity: usize, history_window: usize) -> Self {
        Self {
            model,
            capacity: capacity.max(1),
            history_window,
        }
    }

    /// Start streaming an answer grounded in `matches`.
    ///
    /// With no matches the model is not called; the stream carries the
    /// fixed insufficient-context answer. Must be called within a tokio
    /// runtime.
    pub fn stream_answer(
        &self,
        style: PromptStyle,
        question: &str,
        matches: &[FileMatch],
        history: &[String],
    ) -> Answer {
        let references: Vec<FileReference> = matches.iter().map(FileReference::from).collect();
        let (tx, rx) = mpsc::channel(self.capacity);

        if matches.is_empty() {
            tokio::spawn(send_fallback(tx, None));
            return Answer {
                references,
                stream: AnswerStream { rx },
            };
        }

        let prompt = answer_prompt(style, question, matches, history, self.history_window);
        let model = Arc::clone(&self.model);

        tokio::spawn(async move {
            let started = tokio::select! {
                _ = tx.closed() => return,
                started = model.stream(&prompt) => started,
            };
            let mut tokens = match started {
                Ok(tokens) => tokens,
                Err(e) => {
                    let err = SageError::Streaming(e.to_string());
                    tracing::warn!(error = %err, "answer stream failed to start");
                    let _ = tx.send(AnswerEvent::Error(err.to_string())).await;
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("answer consumer went away; cancelling model stream");
                        return;
                    }
                    next = tokens.next() => match next {
                        Some(Ok(delta)) => {
                            if tx.send(AnswerEvent::Delta(delta)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            let err = SageError::Streaming(e.to_string());
                            tracing::warn!(error = %err, "answer stream failed");
                            let _ = tx.send(AnswerEvent::Error(err.to_string())).await;
                            return;
                        }
                        None => {
                            let _ = tx.send(AnswerEvent::Done).await;
                            return;
                        }
                    }
                }
            }
        });

        Answer {
            references,
            stream: AnswerStream { rx },
        }
    }
}

/// The insufficient-context answer, optionally preceded by an error event.
async fn send_fallback(tx: mpsc::Sender<AnswerEvent>, error: Option<String>) {
    if let Some(error) = error {
        if tx.send(AnswerEvent::Error(error)).await.is_err() {
            return;
        }
    }
    if tx
        .send(AnswerEvent::Delta(INSUFFICIENT_CONTEXT_ANSWER.to_string()))
        .await
        .is_ok()
    {
        let _ = tx.send(AnswerEvent::Done).await;
    }
}

/// Retrieval plus streaming for one question.
#[derive(Clone)]
pub struct Assistant {
    store: Arc<dyn Store>,
    retriever: Retriever,
    qa: AnswerStreamer,
    chat: AnswerStreamer,
    retrieval: RetrievalConfig,
}

impl Assistant {
    pub fn new(
        store: Arc<dyn Store>,
        retriever: Retriever,
        qa_model: Arc<dyn LanguageModel>,
        chat_model: Arc<dyn LanguageModel>,
        retrieval: RetrievalConfig,
    ) -> Self {
        let qa = AnswerStreamer::new(qa_model, retrieval.channel_capacity, retrieval.history_window);
        let chat = AnswerStreamer::new(
            chat_model,
            retrieval.channel_capacity,
            retrieval.history_window,
        );
        Self {
            store,
            retriever,
            qa,
            chat,
            retrieval,
        }
    }

    /// Answer `question` about a live project.
    ///
    /// Only an unknown project is an error. A retrieval failure becomes an
    /// `Error` event followed by the insufficient-context answer.
    pub async fn ask(
        &self,
        project_id: &str,
        question: &str,
        style: PromptStyle,
        history: &[String],
    ) -> Result<Answer> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(SageError::ProjectNotFound(project_id.to_string()).into());
        }

        let params = params_for(style, &self.retrieval);
        let matches = match self.retriever.retrieve(project_id, question, &params).await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(project = project_id, error = %e, "retrieval failed");
                let (tx, rx) = mpsc::channel(self.retrieval.channel_capacity.max(1));
                tokio::spawn(send_fallback(tx, Some(format!("retrieval failed: {}", e))));
                return Ok(Answer {
                    references: Vec::new(),
                    stream: AnswerStream { rx },
                });
            }
        };

        let streamer = match style {
            PromptStyle::Qa => &self.qa,
            PromptStyle::Chat => &self.chat,
        };
        Ok(streamer.stream_answer(style, question, &matches, history))
    }
}
