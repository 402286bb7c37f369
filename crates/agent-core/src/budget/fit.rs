//! Fitting a transcript into a token budget.
//!
//! Two passes: every message above the per-message ceiling is clipped, then the
//! oldest non-pinned segments are pruned until the transcript fits. Overflow is
//! never an error; if nothing removable is left the transcript is returned over
//! budget and the report says so.

use crate::agent::types::Message;
use crate::budget::counter::TokenCounter;
use crate::budget::segmenter::MessageSegmenter;
use crate::budget::types::{FitReport, FittedContext, TokenBudget};

/// Fit `messages` into `budget`. Never reorders messages and never removes a pinned one.
pub fn fit(
    mut messages: Vec<Message>,
    budget: &TokenBudget,
    counter: &dyn TokenCounter,
) -> FittedContext {
    let limit = budget.available_input_tokens();
    let mut report = FitReport {
        budget_limit: limit,
        ..Default::default()
    };

    let pinned: Vec<bool> = messages.iter().map(Message::is_pinned).collect();

    for message in &mut messages {
        if clip_message(message, budget.max_message_tokens, counter) {
            report.clipped += 1;
        }
    }

    let costs: Vec<u32> = messages.iter().map(|m| counter.count_message(m)).collect();
    let mut total = costs.iter().fold(0u32, |acc, c| acc.saturating_add(*c));
    let mut removed = vec![false; messages.len()];
    let mut remaining = messages.len();

    if total > limit {
        for segment in MessageSegmenter::new().segment(&messages) {
            if total <= limit || remaining <= 1 {
                break;
            }
            // Pruning always leaves at least one message behind.
            if !segment.is_removable(&messages) || segment.indices.len() >= remaining {
                continue;
            }
            for &index in &segment.indices {
                removed[index] = true;
                total = total.saturating_sub(costs[index]);
            }
            remaining -= segment.indices.len();
            report.removed += segment.indices.len();
        }
    }

    let kept: Vec<usize> = (0..messages.len()).filter(|&i| !removed[i]).collect();
    let mut flags = removed.into_iter();
    messages.retain(|_| !flags.next().unwrap_or(false));

    report.total_tokens = total;
    report.over_budget = total > limit;

    if report.over_budget {
        tracing::warn!(
            "Transcript still over budget after pruning: {} > {} tokens ({} messages left)",
            total,
            limit,
            messages.len()
        );
    } else if report.clipped > 0 || report.removed > 0 {
        tracing::debug!(
            "Fitted transcript: clipped {}, removed {}, {} / {} tokens",
            report.clipped,
            report.removed,
            total,
            limit
        );
    }

    debug_assert!(
        positions_preserved(&pinned, &kept),
        "fit reordered messages or dropped a pinned message"
    );

    FittedContext {
        messages,
        kept,
        report,
    }
}

/// Checks that `fitted` keeps an in-order selection of `before` including every pinned message.
///
/// Messages are matched by input position, so duplicate ids do not matter.
pub fn verify_fit_invariants(before: &[Message], fitted: &FittedContext) -> bool {
    let pinned: Vec<bool> = before.iter().map(Message::is_pinned).collect();
    fitted.kept.len() == fitted.messages.len()
        && positions_preserved(&pinned, &fitted.kept)
        && fitted
            .kept
            .iter()
            .zip(&fitted.messages)
            .all(|(&index, message)| before[index].id == message.id && before[index].role == message.role)
}

fn positions_preserved(pinned: &[bool], kept: &[usize]) -> bool {
    let ascending = kept.windows(2).all(|pair| pair[0] < pair[1]);
    let in_range = kept.last().map_or(true, |&last| last < pinned.len());
    let pins_kept = pinned
        .iter()
        .enumerate()
        .all(|(index, &is_pinned)| !is_pinned || kept.binary_search(&index).is_ok());
    ascending && in_range && pins_kept
}

fn truncation_marker(kept: usize, total: usize) -> String {
    format!("\n[truncated: kept {} of {} chars]", kept, total)
}

/// Truncate `message` content so its cost fits `ceiling`. Returns whether it was clipped.
fn clip_message(message: &mut Message, ceiling: u32, counter: &dyn TokenCounter) -> bool {
    if counter.count_message(message) <= ceiling {
        return false;
    }
    let Some(content) = message.content.take() else {
        return false;
    };

    // Byte offset of every char boundary, including the end.
    let boundaries: Vec<usize> = content
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(content.len()))
        .collect();
    let total_chars = boundaries.len() - 1;

    let clipped_with = |kept: usize| -> String {
        let mut text = content[..boundaries[kept]].to_string();
        text.push_str(&truncation_marker(kept, total_chars));
        text
    };
    let fits = |kept: usize, probe: &mut Message| -> bool {
        probe.content = Some(clipped_with(kept));
        counter.count_message(probe) <= ceiling
    };

    // Largest prefix whose clipped form still fits; cost is monotonic in length.
    let mut probe = message.clone();
    let (mut low, mut high) = (0usize, total_chars);
    if !fits(0, &mut probe) {
        high = 0;
    }
    while low < high {
        let mid = low + (high - low + 1) / 2;
        if fits(mid, &mut probe) {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    message.content = Some(clipped_with(low));
    true
}
