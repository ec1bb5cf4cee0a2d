//! Per-model token counting backed by tiktoken.

use std::sync::OnceLock;

use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};
use tracing::debug;
use triad_core::Message;

use crate::context_budget::{EstimatingTokenCounter, TokenCounter};

// Loading a BPE table takes tens of milliseconds, so each one is built once.
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Cl100k,
    O200k,
}

impl Encoding {
    /// Encoding used by an OpenAI model family, `None` for models tiktoken does not cover.
    pub fn for_model(model: &str) -> Option<Self> {
        let model = model.to_lowercase();
        // Strip a "provider/" prefix such as "openai/gpt-4o".
        let name = model.rsplit('/').next().unwrap_or(&model);

        if name.starts_with("gpt-4o")
            || name.starts_with("gpt-4.1")
            || name.starts_with("o1")
            || name.starts_with("o3")
            || name.starts_with("o4")
        {
            Some(Self::O200k)
        } else if name.starts_with("gpt-4")
            || name.starts_with("gpt-3.5")
            || name.starts_with("text-embedding")
        {
            Some(Self::Cl100k)
        } else {
            None
        }
    }

    fn bpe(self) -> Option<&'static CoreBPE> {
        match self {
            Self::Cl100k => CL100K.get_or_init(|| cl100k_base().ok()).as_ref(),
            Self::O200k => O200K.get_or_init(|| o200k_base().ok()).as_ref(),
        }
    }
}

/// Exact message cost under a tiktoken encoding, with the same role and tool call
/// overhead as [`EstimatingTokenCounter`].
#[derive(Clone, Copy)]
pub struct TiktokenCounter {
    bpe: &'static CoreBPE,
    encoding: Encoding,
}

impl TiktokenCounter {
    const ROLE_OVERHEAD: usize = 4;
    const TOOL_CALL_OVERHEAD: usize = 3;

    pub fn new(encoding: Encoding) -> Option<Self> {
        encoding.bpe().map(|bpe| Self { bpe, encoding })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, message: &Message) -> usize {
        let mut total = Self::ROLE_OVERHEAD + self.count_text(&message.content);
        if message.tool_call_id.is_some() {
            total += Self::TOOL_CALL_OVERHEAD;
        }
        if let Some(name) = &message.name {
            total += self.count_text(name);
        }
        total
    }
}

/// Tokenizer picked from a model name; falls back to the character estimate.
#[derive(Clone, Copy)]
pub enum ModelTokenCounter {
    Tiktoken(TiktokenCounter),
    Estimating(EstimatingTokenCounter),
}

impl ModelTokenCounter {
    pub fn for_model(model: &str) -> Self {
        match Encoding::for_model(model).and_then(TiktokenCounter::new) {
            Some(counter) => {
                debug!(model, encoding = ?counter.encoding(), "Using tiktoken counter");
                Self::Tiktoken(counter)
            }
            None => {
                debug!(model, "No tokenizer for model, estimating");
                Self::Estimating(EstimatingTokenCounter)
            }
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Tiktoken(_))
    }
}

impl TokenCounter for ModelTokenCounter {
    fn count(&self, message: &Message) -> usize {
        match self {
            Self::Tiktoken(counter) => counter.count(message),
            Self::Estimating(counter) => counter.count(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_for_model() {
        assert_eq!(Encoding::for_model("gpt-4o-mini"), Some(Encoding::O200k));
        assert_eq!(Encoding::for_model("openai/GPT-4o"), Some(Encoding::O200k));
        assert_eq!(Encoding::for_model("o3-mini"), Some(Encoding::O200k));
        assert_eq!(Encoding::for_model("gpt-4-turbo"), Some(Encoding::Cl100k));
        assert_eq!(Encoding::for_model("gpt-3.5-turbo"), Some(Encoding::Cl100k));
        assert_eq!(Encoding::for_model("qwen2.5-coder:32b"), None);
        assert_eq!(Encoding::for_model("llama3"), None);
    }

    #[test]
    fn test_tiktoken_counts_text() {
        let counter = TiktokenCounter::new(Encoding::Cl100k).unwrap();
        assert_eq!(counter.count_text(""), 0);

        let count = counter.count_text("Hello, world!");
        assert!((3..=5).contains(&count), "Expected ~4 tokens, got {}", count);

        let message = Message::user("Hello, world!");
        assert_eq!(counter.count(&message), 4 + count);
    }

    #[test]
    fn test_tiktoken_tool_overhead() {
        let counter = TiktokenCounter::new(Encoding::O200k).unwrap();
        let plain = counter.count(&Message::user("ok"));
        let tool = Message::tool_result("call_1", "read", "ok");
        assert_eq!(counter.count(&tool), plain + 3 + counter.count_text("read"));
    }

    #[test]
    fn test_model_counter_falls_back_to_estimate() {
        let counter = ModelTokenCounter::for_model("llama3:8b");
        assert!(!counter.is_exact());
        assert_eq!(counter.count(&Message::user("hello world")), 7);

        assert!(ModelTokenCounter::for_model("gpt-4").is_exact());
    }
}
