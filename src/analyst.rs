use std::sync::Arc;
use thiserror::Error;

use crate::generation::GenerationService;
use crate::store::{SearchResult, VectorStore};

/// Max characters of chunk text quoted per source excerpt.
const EXCERPT_CHARS: usize = 300;

pub const SOURCES_SEPARATOR: &str = "\n\n-- Sources Consulting --\n";

/// Failure kinds for the answer path. The web layer renders these; nothing
/// else escapes `Analyst::answer`.
#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("request timed out: {0}")]
    Timeout(String),
}

/// One retrieved chunk cited under the answer.
#[derive(Debug, Clone)]
pub struct SourceExcerpt {
    pub page: usize,
    pub text: String,
}

/// A generated answer together with the chunks it was conditioned on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceExcerpt>,
}

impl Answer {
    /// Render the answer with its citation list: answer text, the literal
    /// sources separator, then per source a page line and the first 300
    /// characters of the chunk.
    pub fn render(&self) -> String {
        let mut out = self.text.clone();
        out.push_str(SOURCES_SEPARATOR);
        for source in &self.sources {
            out.push_str(&format!("excerpt from the page {}:\n", source.page));
            let excerpt: String = source.text.chars().take(EXCERPT_CHARS).collect();
            out.push_str(&excerpt);
            out.push_str("...\n\n");
        }
        out
    }
}

/// Retrieval-augmented answering over the vector store: retrieve top-k
/// chunks, stuff them verbatim into the prompt, generate.
pub struct Analyst {
    store: Arc<VectorStore>,
    generation: Arc<GenerationService>,
    top_k: usize,
}

impl Analyst {
    pub fn new(store: Arc<VectorStore>, generation: Arc<GenerationService>, top_k: usize) -> Self {
        Self {
            store,
            generation,
            top_k,
        }
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, AnswerError> {
        tracing::info!("Received question: {}", question);

        let retrieved = self
            .store
            .search(question, self.top_k)
            .await
            .map_err(|e| classify(e, ErrorStage::Retrieval))?;

        let prompt = build_prompt(&retrieved, question);
        tracing::debug!("Prompt length: {} chars", prompt.chars().count());

        let text = self
            .generation
            .generate(&prompt)
            .await
            .map_err(|e| classify(e, ErrorStage::Generation))?;

        let sources = retrieved
            .into_iter()
            .map(|result| SourceExcerpt {
                page: result.page,
                text: result.text,
            })
            .collect();

        Ok(Answer {
            text: text.trim().to_string(),
            sources,
        })
    }
}

enum ErrorStage {
    Retrieval,
    Generation,
}

/// Timeouts are reported as their own kind regardless of stage.
fn classify(err: anyhow::Error, stage: ErrorStage) -> AnswerError {
    let timed_out = err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_timeout())
    });

    if timed_out {
        return AnswerError::Timeout(format!("{err:#}"));
    }
    match stage {
        ErrorStage::Retrieval => AnswerError::Retrieval(format!("{err:#}")),
        ErrorStage::Generation => AnswerError::Generation(format!("{err:#}")),
    }
}

/// Stuff strategy: all retrieved chunk text inserted verbatim, no
/// summarization or map-reduce over chunks.
fn build_prompt(retrieved: &[SearchResult], question: &str) -> String {
    let context = retrieved
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try \
         to make up an answer.\n\n{context}\n\nQuestion: {question}\nHelpful Answer:"
    )
}
