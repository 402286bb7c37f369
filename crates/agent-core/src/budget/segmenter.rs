//! Message segmentation for budget management.
//!
//! Groups transcript positions into atomic segments so that an assistant tool
//! request and its correlated tool results are always pruned together. The model
//! must never see a tool call without its result, nor a result without its call.

use crate::agent::types::{Message, Role};
use std::collections::HashSet;

/// A run of transcript positions that is removed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSegment {
    /// Indices into the transcript, ascending.
    pub indices: Vec<usize>,
    /// Tool call ids referenced by this segment
    pub tool_call_ids: HashSet<String>,
    /// Whether this segment is an assistant tool request plus its results
    pub is_tool_chain: bool,
}

impl MessageSegment {
    fn single(index: usize, message: &Message) -> Self {
        let tool_call_ids = extract_tool_call_ids(message);
        let is_tool_chain = message.has_tool_calls();
        Self {
            indices: vec![index],
            tool_call_ids,
            is_tool_chain,
        }
    }

    /// The oldest position covered by this segment.
    pub fn first(&self) -> usize {
        self.indices[0]
    }

    /// A segment holding any pinned message can never be pruned.
    pub fn is_removable(&self, messages: &[Message]) -> bool {
        self.indices.iter().all(|&i| !messages[i].is_pinned())
    }
}

fn extract_tool_call_ids(message: &Message) -> HashSet<String> {
    let mut ids = HashSet::new();

    if let Some(ref id) = message.tool_call_id {
        ids.insert(id.clone());
    }

    if let Some(ref calls) = message.tool_calls {
        for call in calls {
            ids.insert(call.id.clone());
        }
    }

    ids
}

/// Segments messages into atomic units for pruning.
///
/// Tool results are attached to the open chain whose call id they answer, even
/// when other messages interleave. Orphan results form their own segment.
#[derive(Debug, Default)]
pub struct MessageSegmenter;

impl MessageSegmenter {
    pub fn new() -> Self {
        Self
    }

    /// Returns segments ordered by their first position (oldest first).
    pub fn segment(&self, messages: &[Message]) -> Vec<MessageSegment> {
        let mut segments: Vec<MessageSegment> = Vec::new();
        // Open chains: segment index per pending tool call id.
        let mut pending: Vec<(String, usize)> = Vec::new();

        for (index, message) in messages.iter().enumerate() {
            if message.role == Role::Tool {
                if let Some(ref tool_call_id) = message.tool_call_id {
                    if let Some(pos) = pending.iter().position(|(id, _)| id == tool_call_id) {
                        let (_, segment_index) = pending.remove(pos);
                        segments[segment_index].indices.push(index);
                        continue;
                    }
                }
                tracing::warn!(
                    "Orphan tool result without preceding tool call: {:?}",
                    message.tool_call_id
                );
            }

            let segment = MessageSegment::single(index, message);
            if segment.is_tool_chain {
                if let Some(calls) = message.tool_calls.as_ref() {
                    for call in calls {
                        pending.push((call.id.clone(), segments.len()));
                    }
                }
            }
            segments.push(segment);
        }

        if !pending.is_empty() {
            tracing::warn!(
                "Transcript ends with incomplete tool chain: {:?}",
                pending.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>()
            );
        }

        segments
    }
}
