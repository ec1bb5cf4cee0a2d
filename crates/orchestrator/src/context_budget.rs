//! Token accounting and pruning for the outgoing conversation.
//!
//! The manager is a pure computation over a message list: it never talks to a model
//! and owns no conversation state. Callers consult it on every turn, before the
//! messages go to whichever client is active.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use triad_core::Message;

use crate::tokenizer::ModelTokenCounter;

/// Counts the tokens a single message costs.
pub trait TokenCounter: Send + Sync {
    fn count(&self, message: &Message) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&Message) -> usize + Send + Sync,
{
    fn count(&self, message: &Message) -> usize {
        self(message)
    }
}

/// Character based estimate used when no real tokenizer is available.
///
/// Roughly one token per four bytes of text, plus fixed overhead for the role
/// and for tool call ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingTokenCounter;

impl EstimatingTokenCounter {
    const ROLE_OVERHEAD: usize = 4;
    const TOOL_CALL_OVERHEAD: usize = 3;

    pub fn estimate_text(text: &str) -> usize {
        (text.len() + 3) / 4
    }
}

impl TokenCounter for EstimatingTokenCounter {
    fn count(&self, message: &Message) -> usize {
        let mut total = Self::ROLE_OVERHEAD + Self::estimate_text(&message.content);
        if message.tool_call_id.is_some() {
            total += Self::TOOL_CALL_OVERHEAD;
        }
        if let Some(name) = &message.name {
            total += Self::estimate_text(name);
        }
        total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct ContextBudgetConfig {
    /// Percent of the window at which usage is reported as `warning`.
    pub warning_threshold: u32,
    /// Percent of the window at which usage is `critical` and pruning kicks in.
    pub critical_threshold: u32,
    pub min_messages_to_keep: usize,
    pub target_percent_after_prune: u32,
}

impl Default for ContextBudgetConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 80,
            critical_threshold: 90,
            min_messages_to_keep: 6,
            target_percent_after_prune: 70,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum ContextStatus {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ContextUsage {
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub percent_used: u32,
    pub status: ContextStatus,
    pub has_limit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PruneResult {
    pub pruned: bool,
    pub messages: Vec<Message>,
    pub removed_count: usize,
}

impl PruneResult {
    fn unchanged(messages: &[Message]) -> Self {
        Self {
            pruned: false,
            messages: messages.to_vec(),
            removed_count: 0,
        }
    }
}

pub struct ContextBudgetManager<C = EstimatingTokenCounter> {
    counter: C,
    max_context_size: usize,
    config: ContextBudgetConfig,
}

impl ContextBudgetManager<EstimatingTokenCounter> {
    pub fn estimating(max_context_size: usize) -> Self {
        Self::new(EstimatingTokenCounter, max_context_size)
    }
}

impl ContextBudgetManager<ModelTokenCounter> {
    /// Budget for `model`, counted with its tiktoken encoding when one is known.
    pub fn for_model(model: &str, max_context_size: usize) -> Self {
        Self::new(ModelTokenCounter::for_model(model), max_context_size)
    }
}

impl<C: TokenCounter> ContextBudgetManager<C> {
    /// `max_context_size` of 0 means the window is unknown; nothing is ever pruned.
    pub fn new(counter: C, max_context_size: usize) -> Self {
        Self {
            counter,
            max_context_size,
            config: ContextBudgetConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ContextBudgetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ContextBudgetConfig {
        &self.config
    }

    pub fn max_context_size(&self) -> usize {
        self.max_context_size
    }

    pub fn count_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.counter.count(m)).sum()
    }

    pub fn usage(&self, messages: &[Message]) -> ContextUsage {
        let total_tokens = self.count_tokens(messages);
        let percent_used = self.percent_of_window(total_tokens);

        let status = if percent_used >= self.config.critical_threshold {
            ContextStatus::Critical
        } else if percent_used >= self.config.warning_threshold {
            ContextStatus::Warning
        } else {
            ContextStatus::Normal
        };

        ContextUsage {
            total_tokens,
            max_tokens: self.max_context_size,
            percent_used,
            status,
            has_limit: self.max_context_size > 0,
        }
    }

    /// Drop older conversation turns once usage reaches the critical threshold.
    ///
    /// System messages are always kept and move to the front in their original
    /// order. The newest `min_messages_to_keep` conversation messages are kept
    /// unconditionally; older ones are added back, newest first, until the next
    /// one would overflow the post-prune target. Everything older is dropped.
    pub fn prune(&self, messages: &[Message]) -> PruneResult {
        if messages.is_empty() || self.max_context_size == 0 {
            return PruneResult::unchanged(messages);
        }

        let usage = self.usage(messages);
        if usage.percent_used < self.config.critical_threshold {
            return PruneResult::unchanged(messages);
        }

        let (system, conversation): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.is_system());

        let min_keep = self.config.min_messages_to_keep;
        if conversation.len() <= min_keep {
            debug!(
                conversation = conversation.len(),
                min_keep, "Context critical but conversation too short to prune"
            );
            return PruneResult::unchanged(messages);
        }

        let system_tokens: usize = system.iter().map(|m| self.counter.count(m)).sum();
        let target =
            (self.max_context_size as u64 * self.config.target_percent_after_prune as u64 / 100) as i64;
        let available = target - system_tokens as i64;

        let mut kept_tokens: i64 = 0;
        let mut kept: Vec<&Message> = Vec::new();
        for (from_end, message) in conversation.iter().rev().enumerate() {
            let tokens = self.counter.count(message) as i64;
            if from_end >= min_keep && kept_tokens + tokens > available {
                break;
            }
            kept_tokens += tokens;
            kept.push(*message);
        }
        kept.reverse();

        let result: Vec<Message> = system.into_iter().chain(kept).cloned().collect();
        let removed_count = messages.len() - result.len();

        info!(
            before = messages.len(),
            after = result.len(),
            removed_count,
            percent_used = usage.percent_used,
            "Pruned conversation context"
        );

        PruneResult {
            pruned: true,
            messages: result,
            removed_count,
        }
    }

    pub fn would_exceed_limit(&self, current_total: usize, additional_tokens: usize) -> bool {
        self.max_context_size > 0
            && 100 * (current_total as u128 + additional_tokens as u128)
                >= self.config.critical_threshold as u128 * self.max_context_size as u128
    }

    fn percent_of_window(&self, tokens: usize) -> u32 {
        if self.max_context_size == 0 {
            return 0;
        }
        (100.0 * tokens as f64 / self.max_context_size as f64).round() as u32
    }
}

/// Caller-owned "warning already shown" flag.
///
/// Fires once when usage leaves `normal`, re-arms once usage is back to normal
/// or after [`WarningLatch::reset`], which callers invoke when they clear the
/// conversation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarningLatch {
    shown: bool,
}

impl WarningLatch {
    pub fn should_warn(&mut self, status: ContextStatus) -> bool {
        match status {
            ContextStatus::Normal => {
                self.shown = false;
                false
            }
            ContextStatus::Warning | ContextStatus::Critical => !std::mem::replace(&mut self.shown, true),
        }
    }

    pub fn reset(&mut self) {
        self.shown = false;
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(tokens: usize) -> impl Fn(&Message) -> usize + Send + Sync {
        move |_: &Message| tokens
    }

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {}", i))
                } else {
                    Message::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    #[test]
    fn test_usage_status_thresholds() {
        let manager = ContextBudgetManager::new(flat(10), 100);

        let usage = manager.usage(&conversation(7));
        assert_eq!(usage.total_tokens, 70);
        assert_eq!(usage.percent_used, 70);
        assert_eq!(usage.status, ContextStatus::Normal);
        assert!(usage.has_limit);

        assert_eq!(manager.usage(&conversation(8)).status, ContextStatus::Warning);
        assert_eq!(manager.usage(&conversation(9)).status, ContextStatus::Critical);
    }

    #[test]
    fn test_usage_unknown_window() {
        let manager = ContextBudgetManager::new(flat(10), 0);
        let usage = manager.usage(&conversation(50));
        assert_eq!(usage.percent_used, 0);
        assert_eq!(usage.status, ContextStatus::Normal);
        assert!(!usage.has_limit);
    }

    #[test]
    fn test_usage_rounds_percent() {
        let manager = ContextBudgetManager::new(flat(1), 3);
        assert_eq!(manager.usage(&conversation(2)).percent_used, 67);
    }

    #[test]
    fn test_prune_below_threshold_is_noop() {
        let manager = ContextBudgetManager::new(flat(10), 1000);
        let messages = conversation(20);

        let result = manager.prune(&messages);
        assert!(!result.pruned);
        assert_eq!(result.removed_count, 0);
        assert_eq!(result.messages, messages);
    }

    #[test]
    fn test_prune_concrete_scenario() {
        let manager = ContextBudgetManager::new(flat(30), 1000);
        let messages = conversation(40);

        let result = manager.prune(&messages);
        assert!(result.pruned);
        assert_eq!(result.messages.len(), 23);
        assert_eq!(result.removed_count, 17);
        assert_eq!(result.messages[..], messages[17..]);
    }

    #[test]
    fn test_prune_keeps_system_and_tail() {
        // Huge messages so only the mandatory tail survives.
        let counter = |m: &Message| if m.is_system() { 50 } else { 500 };
        let manager = ContextBudgetManager::new(counter, 1000);

        let mut messages = vec![Message::system("You are a careful engineer")];
        messages.extend(conversation(30));

        let result = manager.prune(&messages);
        assert!(result.pruned);
        assert_eq!(result.messages.len(), 7);
        assert_eq!(result.messages[0], messages[0]);
        assert_eq!(result.messages[1..], messages[25..]);
        assert_eq!(result.removed_count, 24);
    }

    #[test]
    fn test_prune_greedy_suffix_stops_at_first_overflow() {
        let big = "x".repeat(400);
        let mut messages = conversation(12);
        messages[3] = Message::user(big);
        // Every message is 10 tokens except index 3.
        let counter = |m: &Message| if m.content.len() == 400 { 400 } else { 10 };
        let manager = ContextBudgetManager::new(counter, 500);

        let result = manager.prune(&messages);
        assert!(result.pruned);
        // Indices 6..=11 are mandatory, 4 and 5 fit, 3 overflows and 0..=2 go with it.
        assert_eq!(result.messages[..], messages[4..]);
        assert_eq!(result.removed_count, 4);
    }

    #[test]
    fn test_prune_short_conversation_is_noop() {
        let manager = ContextBudgetManager::new(flat(400), 1000);
        let mut messages = vec![Message::system("sys")];
        messages.extend(conversation(6));

        let result = manager.prune(&messages);
        assert!(!result.pruned);
        assert_eq!(result.messages, messages);
    }

    #[test]
    fn test_prune_moves_interleaved_system_messages_first() {
        let manager = ContextBudgetManager::new(flat(100), 1000);
        let mut messages = conversation(10);
        messages.insert(4, Message::system("late instructions"));
        messages.insert(0, Message::system("base instructions"));

        let result = manager.prune(&messages);
        assert!(result.pruned);
        assert_eq!(result.messages[0].content, "base instructions");
        assert_eq!(result.messages[1].content, "late instructions");
        assert!(result.messages[2..].iter().all(|m| !m.is_system()));
    }

    #[test]
    fn test_would_exceed_limit() {
        let manager = ContextBudgetManager::new(flat(1), 1000);
        assert!(!manager.would_exceed_limit(800, 99));
        assert!(manager.would_exceed_limit(800, 100));

        assert!(manager.would_exceed_limit(usize::MAX, usize::MAX));
        assert!(manager.would_exceed_limit(usize::MAX, 0));

        let unknown = ContextBudgetManager::new(flat(1), 0);
        assert!(!unknown.would_exceed_limit(1_000_000, 1));
    }

    #[test]
    fn test_custom_config() {
        let config = ContextBudgetConfig {
            warning_threshold: 50,
            critical_threshold: 60,
            min_messages_to_keep: 2,
            target_percent_after_prune: 40,
        };
        let manager = ContextBudgetManager::new(flat(10), 100).with_config(config);
        let result = manager.prune(&conversation(6));
        assert!(result.pruned);
        assert_eq!(result.messages.len(), 4);
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: ContextBudgetConfig = serde_json::from_str(r#"{"criticalThreshold": 95}"#).unwrap();
        assert_eq!(config.critical_threshold, 95);
        assert_eq!(config.warning_threshold, 80);
        assert_eq!(config.min_messages_to_keep, 6);
        assert_eq!(config.target_percent_after_prune, 70);
    }

    #[test]
    fn test_estimating_counter() {
        let counter = EstimatingTokenCounter;
        assert_eq!(counter.count(&Message::user("")), 4);
        assert_eq!(counter.count(&Message::user("hello world")), 7);

        let tool = Message::tool_result("call_1", "read", "ok");
        assert_eq!(counter.count(&tool), 4 + 1 + 3 + 1);

        let manager = ContextBudgetManager::estimating(8192);
        assert_eq!(manager.count_tokens(&[Message::user("hello world")]), 7);
    }

    #[test]
    fn test_for_model_picks_counter() {
        let exact = ContextBudgetManager::for_model("gpt-4o", 128_000);
        assert_eq!(exact.max_context_size(), 128_000);
        assert!(exact.count_tokens(&[Message::user("hello world")]) > 4);

        let local = ContextBudgetManager::for_model("qwen2.5-coder:7b", 8192);
        assert_eq!(local.count_tokens(&[Message::user("hello world")]), 7);
    }

    #[test]
    fn test_warning_latch() {
        let mut latch = WarningLatch::default();
        assert!(!latch.should_warn(ContextStatus::Normal));
        assert!(latch.should_warn(ContextStatus::Warning));
        assert!(!latch.should_warn(ContextStatus::Warning));
        assert!(!latch.should_warn(ContextStatus::Critical));

        latch.reset();
        assert!(latch.should_warn(ContextStatus::Critical));

        assert!(!latch.should_warn(ContextStatus::Normal));
        assert!(!latch.is_shown());
        assert!(latch.should_warn(ContextStatus::Warning));
    }
}
