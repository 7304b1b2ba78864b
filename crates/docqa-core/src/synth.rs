//! Answer synthesis: grounded prompts, source previews, citations,
//! summaries and quizzes.
//!
//! The [`Synthesizer`] never sees the index. It receives fused chunks (or
//! file groups built from them) and talks to a [`LanguageModel`].

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{RagError, Result};
use crate::fusion::{build_context, FileGroup};
use crate::llm::{GenerationOptions, LanguageModel, ModelUsage};
use crate::models::{Chunk, QuizQuestion, SourceCitation, SourcePreview, SourcePreviewMetadata};
use crate::text::{best_snippet, highlight, match_patterns, pattern_hits, question_terms, relevance};

pub const NO_DOCUMENTS_IN_SESSION: &str =
    "No documents are selected in this session. Add documents to the session and ask again.";
pub const NO_DATA: &str = "No documents have been indexed yet. Upload a document and ask again.";
pub const NO_INDEXED_CONTENT: &str =
    "The selected documents have no indexed content yet. Wait for processing to finish or upload them again.";
pub const NO_RELEVANT_CONTENT: &str =
    "No relevant content was found in the selected documents for this question.";
pub const NOTHING_TO_SUMMARIZE: &str =
    "There is no document content to summarize. Add documents to the session first.";

/// Number of options every quiz question must have.
pub const QUIZ_OPTIONS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizerConfig {
    pub answer_language: String,
    pub preview_chars: usize,
    pub max_citations: usize,
    pub summary_max_chars: usize,
    pub quiz_max_chars: usize,
    pub quiz_min_chars: usize,
    pub quiz_window_threshold: usize,
    pub quiz_window_chars: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            answer_language: "Traditional Chinese".to_string(),
            preview_chars: 200,
            max_citations: 5,
            summary_max_chars: 8000,
            quiz_max_chars: 15000,
            quiz_min_chars: 100,
            quiz_window_threshold: 5000,
            quiz_window_chars: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub usage: ModelUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryDraft {
    pub summary: String,
    pub key_points: Vec<String>,
    pub usage: ModelUsage,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuizDraft {
    pub questions: Vec<QuizQuestion>,
    /// `None` when no model call was made.
    pub usage: Option<ModelUsage>,
}

pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, config: SynthesizerConfig) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// Ask the model to answer `question` from the grouped context.
    pub async fn answer(&self, question: &str, groups: &[FileGroup]) -> Result<Answer> {
        let prompt = answer_prompt(question, &build_context(groups), &self.config.answer_language);
        let generation = self
            .model
            .generate(&prompt, &GenerationOptions::default())
            .await
            .map_err(|e| RagError::ModelCall(format!("{:#}", e)))?;
        Ok(Answer {
            usage: generation.usage_or_estimate(&prompt),
            text: generation.text.trim().to_string(),
        })
    }

    /// One preview per file group, most relevant first.
    pub fn build_source_previews(&self, groups: &[FileGroup], question: &str) -> Vec<SourcePreview> {
        let terms = question_terms(question);
        let patterns = match_patterns(&terms);
        let max = self.config.preview_chars;

        let mut previews: Vec<SourcePreview> = groups
            .iter()
            .map(|group| {
                let content = group.content();
                let snippet = best_snippet(&content, &patterns, max);
                SourcePreview {
                    highlighted: highlight(&snippet, &patterns),
                    snippet,
                    metadata: SourcePreviewMetadata {
                        filename: group.filename.clone(),
                        chunks_count: group.chunks.len(),
                        relevance_score: relevance(&content, &terms),
                        expandable: content.chars().count() > max,
                    },
                    full_content: content,
                }
            })
            .collect();
        previews.sort_by(|a, b| {
            b.metadata
                .relevance_score
                .partial_cmp(&a.metadata.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        previews
    }

    /// Up to `max_citations` distinct `(filename, page)` locations.
    ///
    /// Chunks with more keyword hits are cited first; ties keep pool order.
    pub fn citations(&self, pool: &[Chunk], question: &str) -> Vec<SourceCitation> {
        let patterns = match_patterns(&question_terms(question));
        let mut ranked: Vec<(usize, &Chunk)> =
            pool.iter().map(|c| (pattern_hits(&c.text, &patterns), c)).collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let mut out: Vec<SourceCitation> = Vec::new();
        for (_, chunk) in ranked {
            if out.len() == self.config.max_citations {
                break;
            }
            let seen = out
                .iter()
                .any(|c| c.file_name == chunk.filename && c.page == chunk.page);
            if !seen {
                out.push(SourceCitation {
                    file_name: chunk.filename.clone(),
                    page: chunk.page,
                    chunk_id: chunk.id.clone(),
                });
            }
        }
        out
    }

    /// Summarize `content`, capped at `summary_max_chars`.
    pub async fn summarize(&self, content: &str) -> Result<SummaryDraft> {
        let capped = take_chars(content, self.config.summary_max_chars);
        let prompt = summary_prompt(capped, &self.config.answer_language);
        let generation = self
            .model
            .generate(&prompt, &GenerationOptions::default())
            .await
            .map_err(|e| RagError::ModelCall(format!("{:#}", e)))?;
        let summary = generation.text.trim().to_string();
        Ok(SummaryDraft {
            key_points: extract_key_points(&summary),
            usage: generation.usage_or_estimate(&prompt),
            summary,
        })
    }

    /// Generate up to `n` multiple-choice questions from `content`.
    ///
    /// Content shorter than `quiz_min_chars` yields an empty quiz without
    /// calling the model. Content longer than `quiz_window_threshold` is
    /// narrowed to a random window so repeated calls vary. A failing model
    /// or unparseable reply also yields an empty quiz.
    pub async fn generate_quiz(&self, content: &str, n: usize) -> QuizDraft {
        let capped = take_chars(content, self.config.quiz_max_chars);
        let len = capped.chars().count();
        if len < self.config.quiz_min_chars || n == 0 {
            return QuizDraft::default();
        }
        let window = if len > self.config.quiz_window_threshold {
            let max_start = len.saturating_sub(self.config.quiz_window_chars);
            let start = rand::random_range(0..=max_start);
            char_window(capped, start, self.config.quiz_window_chars)
        } else {
            capped
        };

        let prompt = quiz_prompt(window, n, &self.config.answer_language);
        match self.model.generate(&prompt, &GenerationOptions::json()).await {
            Ok(generation) => {
                let questions = parse_quiz(&generation.text, n);
                if questions.is_empty() {
                    tracing::warn!("Quiz reply contained no usable questions");
                }
                QuizDraft {
                    questions,
                    usage: Some(generation.usage_or_estimate(&prompt)),
                }
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "Quiz generation failed");
                QuizDraft::default()
            }
        }
    }
}

pub fn answer_prompt(question: &str, context: &str, language: &str) -> String {
    format!(
        "You are a document assistant. Answer the question using only the document content below.\n\
         \n\
         Instructions:\n\
         1. Search the content carefully for passages that match the question exactly or are closely related.\n\
         2. If the question refers to an exam or quiz item, quote the full item including its options.\n\
         3. Cite the file name of every document you draw from.\n\
         4. If nothing in the content is relevant, say plainly that the documents do not contain the answer.\n\
         5. Answer in {language}.\n\
         \n\
         Document content:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer:"
    )
}

pub fn summary_prompt(content: &str, language: &str) -> String {
    format!(
        "Summarize the following document content in {language}.\n\
         Start with a short overview paragraph, then list the key points,\n\
         one per line, each line starting with \"• \".\n\
         \n\
         Content:\n\
         {content}"
    )
}

pub fn quiz_prompt(content: &str, n: usize, language: &str) -> String {
    format!(
        "Write {n} multiple-choice questions in {language} based only on the content below.\n\
         Each question must have exactly {QUIZ_OPTIONS} options and exactly one correct answer.\n\
         Reply with a JSON array and nothing else, in this shape:\n\
         [{{\"question\": \"...\", \"options\": [\"...\", \"...\", \"...\", \"...\"], \"correct_answer\": 0}}]\n\
         where correct_answer is the 0-based index of the correct option.\n\
         \n\
         Content:\n\
         {content}"
    )
}

/// Lines starting with `•`, `-` or `*`, marker stripped.
pub fn extract_key_points(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| {
            let rest = line
                .strip_prefix('•')
                .or_else(|| line.strip_prefix('-'))
                .or_else(|| line.strip_prefix('*'))?;
            let point = rest.trim_start_matches(['*', ' ']).trim();
            (!point.is_empty()).then(|| point.to_string())
        })
        .collect()
}

#[derive(Deserialize)]
struct RawQuestion {
    question: String,
    options: Vec<Value>,
    #[serde(alias = "answer", alias = "correct")]
    correct_answer: Value,
}

/// Lenient quiz parser: strip code fences, take the outermost `[`…`]`,
/// deserialize, and drop malformed entries. Returns at most `n` questions
/// numbered from 1.
pub fn parse_quiz(reply: &str, n: usize) -> Vec<QuizQuestion> {
    let Some(items) = json_array(reply) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawQuestion>(item).ok())
        .filter_map(|raw| {
            let options: Vec<String> = raw
                .options
                .iter()
                .map(|o| match o {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .collect();
            let answer = answer_index(&raw.correct_answer)?;
            let valid = !raw.question.trim().is_empty()
                && options.len() == QUIZ_OPTIONS
                && answer < QUIZ_OPTIONS;
            valid.then(|| (raw.question.trim().to_string(), options, answer))
        })
        .take(n)
        .enumerate()
        .map(|(i, (question, options, correct_answer))| QuizQuestion {
            id: i + 1,
            question,
            options,
            correct_answer,
        })
        .collect()
}

fn json_array(reply: &str) -> Option<Vec<Value>> {
    let body = strip_fences(reply);
    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn strip_fences(reply: &str) -> &str {
    let Some(open) = reply.find("```") else {
        return reply;
    };
    let after = &reply[open + 3..];
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Accepts `2`, `"2"`, or an option letter `"C"`.
fn answer_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<usize>() {
                return Some(v);
            }
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => {
                    Some((c.to_ascii_uppercase() as u8 - b'A') as usize)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// `len` chars starting at char offset `start`.
pub fn char_window(text: &str, start: usize, len: usize) -> &str {
    let begin = text.char_indices().nth(start).map_or(text.len(), |(i, _)| i);
    take_chars(&text[begin..], len)
}
