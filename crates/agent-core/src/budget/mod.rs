//! Token budget management for LLM conversations.
//!
//! Keeps a transcript inside a fixed token envelope by clipping oversized
//! messages and pruning the oldest non-pinned ones. Estimation is heuristic.
//!
//! # Key Components
//!
//! - [`types`]: `TokenBudget`, `FitReport`, `FittedContext`
//! - [`counter`]: Token counting via heuristic estimation
//! - [`segmenter`]: Message segmentation preserving tool-call atomicity
//! - [`limits`]: Model context window limits registry
//! - [`fit`]: Clipping and pruning

pub mod counter;
pub mod fit;
pub mod limits;
pub mod segmenter;
pub mod types;

pub use counter::{HeuristicTokenCounter, SharedTokenCounter, TokenCounter};
pub use fit::{fit, verify_fit_invariants};
pub use limits::{ModelLimit, ModelLimitsRegistry};
pub use segmenter::{MessageSegment, MessageSegmenter};
pub use types::{FitReport, FittedContext, TokenBudget};
