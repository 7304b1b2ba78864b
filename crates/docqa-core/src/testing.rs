//! Test doubles shared by the unit tests in this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chunk::content_hash;
use crate::embedding::Embedder;
use crate::llm::{Generation, GenerationOptions, LanguageModel, ModelUsage};
use crate::models::Chunk;

/// Embeds text as letter counts over `a..=e` plus a constant bias term.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        6
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 6];
                for c in t.chars() {
                    if ('a'..='e').contains(&c) {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                }
                v[5] = 0.1;
                v
            })
            .collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        1
    }
    async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("provider unavailable")
    }
}

/// Replies with queued responses (the last one repeats) and records prompts.
pub struct ScriptedModel {
    replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<(String, GenerationOptions)>>,
    pub calls: AtomicUsize,
    pub usage: Option<ModelUsage>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            usage: None,
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(ModelUsage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().map(|p| p.0.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> anyhow::Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push((prompt.to_string(), options.clone()));
        let mut replies = self.replies.lock().unwrap();
        let text = if replies.len() > 1 {
            replies.pop().unwrap_or_default()
        } else {
            replies.last().cloned().unwrap_or_default()
        };
        Ok(Generation {
            text,
            usage: self.usage,
        })
    }
}

pub struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    fn model_name(&self) -> &str {
        "failing"
    }
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> anyhow::Result<Generation> {
        anyhow::bail!("quota exceeded")
    }
}

pub fn chunk(doc: &str, index: usize, text: &str) -> Chunk {
    paged_chunk(doc, index, Some(1), text)
}

pub fn paged_chunk(doc: &str, index: usize, page: Option<u32>, text: &str) -> Chunk {
    Chunk {
        id: Chunk::chunk_id(doc, index),
        document_id: doc.to_string(),
        filename: format!("{}.txt", doc),
        content_type: "text/plain".into(),
        page,
        chunk_index: index,
        text: text.to_string(),
        hash: content_hash(text),
    }
}
