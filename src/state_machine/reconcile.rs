//! Row reconciliation
//!
//! Merges streamed text and server snapshots into one newest-first row set.
//! Everything here mutates a [`SessionState`] in place and is called only
//! from [`transition`](super::transition), which works on a clone.

use super::state::{ConversationRow, SessionContext, SessionState};
use crate::text::{merge_with, sanitize};
use crate::wire::{ChatSnapshot, MessageSummary};
use std::collections::HashSet;

/// Append a chunk to the active reply. Returns whether the visible content
/// changed.
pub(crate) fn apply_delta(state: &mut SessionState, context: &SessionContext, chunk: &str) -> bool {
    state.buffer = merge_with(&state.buffer, chunk, context.merge);
    let content = sanitize(&state.buffer);

    if let Some(row) = state.placeholder_mut() {
        if row.content == content {
            return false;
        }
        row.content = content;
        return true;
    }

    // Placeholder went missing (a snapshot without it replaced the rows)
    let Some(id) = state.placeholder_id.clone() else {
        return false;
    };
    let created_at = state
        .placeholder_created_at
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
    state
        .rows
        .insert(0, ConversationRow::assistant(id, content, created_at));
    true
}

/// Title, chat id, and latest version from any snapshot or detail
pub(crate) fn absorb_metadata(state: &mut SessionState, chat: &ChatSnapshot) {
    if state.chat_id.is_none() {
        if let Some(id) = chat.id.as_deref().filter(|id| !id.is_empty()) {
            state.chat_id = Some(id.to_string());
        }
    }
    if let Some(title) = chat.display_title() {
        state.title = Some(title.to_string());
    }
    if let Some(version) = &chat.latest_version {
        state.latest_version = Some(version.clone());
    }
}

/// Sanitized rows, newest-first. Ties keep server order; duplicate ids keep
/// the first occurrence.
pub(crate) fn snapshot_rows(messages: &[MessageSummary]) -> Vec<ConversationRow> {
    let mut seen = HashSet::new();
    let mut rows: Vec<ConversationRow> = messages
        .iter()
        .filter(|m| seen.insert(m.id.as_str()))
        .map(ConversationRow::from_summary)
        .collect();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
}

/// Replace the row set outright; nothing optimistic to protect
pub(crate) fn replace_rows(state: &mut SessionState, messages: &[MessageSummary]) {
    state.rows = snapshot_rows(messages);
}

/// Merge a snapshot into the rows of a streaming turn.
///
/// 1. Empty assistant rows are dropped so an empty echo of the reply never
///    hides the streamed placeholder.
/// 2. User rows whose trimmed content matches a local user row are dropped.
/// 3. The placeholder keeps its id but adopts the newest non-empty assistant
///    row that answers the latest user turn, unless that would shorten what
///    is already shown.
/// 4. Order is placeholder, local user rows, then the remaining snapshot
///    rows, each newest-first. Earlier local replies the snapshot does not
///    carry are kept at the end.
pub(crate) fn merge_snapshot(state: &mut SessionState, messages: &[MessageSummary]) {
    let incoming = snapshot_rows(messages);
    let placeholder_id = state.placeholder_id.clone();

    let answer = placeholder_id
        .as_ref()
        .and_then(|_| find_answer(state, &incoming))
        .map(|idx| incoming[idx].id.clone());

    if let Some(answer_id) = answer.as_deref() {
        if let Some(found) = messages.iter().find(|m| m.id == answer_id) {
            adopt(state, answer_id, &found.content);
        }
    }

    let local_users: HashSet<String> = state
        .rows
        .iter()
        .filter(|r| r.is_user())
        .map(|r| r.content.trim().to_string())
        .collect();

    let remaining: Vec<ConversationRow> = incoming
        .into_iter()
        .filter(|r| !(r.is_assistant() && !r.has_content()))
        .filter(|r| !(r.is_user() && local_users.contains(r.content.trim())))
        .filter(|r| Some(&r.id) != answer.as_ref() && Some(&r.id) != placeholder_id.as_ref())
        .collect();

    let old_rows = std::mem::take(&mut state.rows);
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows = Vec::with_capacity(old_rows.len() + remaining.len());

    let (placeholder, others): (Vec<_>, Vec<_>) = old_rows
        .into_iter()
        .partition(|r| Some(&r.id) == placeholder_id.as_ref());
    let (local_users, local_replies): (Vec<_>, Vec<_>) =
        others.into_iter().partition(ConversationRow::is_user);

    // Prior local replies the snapshot already has, by id or by content
    let carried: HashSet<&str> = remaining
        .iter()
        .filter(|r| r.is_assistant())
        .map(|r| r.content.trim())
        .collect();
    let orphan_replies: Vec<ConversationRow> = local_replies
        .into_iter()
        .filter(|r| {
            !remaining.iter().any(|s| s.id == r.id) && !carried.contains(r.content.trim())
        })
        .collect();

    for row in placeholder
        .into_iter()
        .chain(local_users)
        .chain(remaining)
        .chain(orphan_replies)
    {
        if seen.insert(row.id.clone()) {
            rows.push(row);
        }
    }
    state.rows = rows;
}

/// Index into `incoming` of the assistant row answering the latest local
/// user turn.
///
/// The answer must be newer than the snapshot's copy of that user turn. A
/// snapshot that does not carry the turn yet has no answer for it.
fn find_answer(state: &SessionState, incoming: &[ConversationRow]) -> Option<usize> {
    let boundary = match state.latest_user_row() {
        Some(user) => {
            let wanted = user.content.trim();
            incoming
                .iter()
                .position(|r| r.is_user() && r.content.trim() == wanted)?
        }
        None => incoming.iter().position(ConversationRow::is_user).unwrap_or(incoming.len()),
    };

    incoming
        .iter()
        .take(boundary)
        .position(|r| r.is_assistant() && r.has_content())
}

fn adopt(state: &mut SessionState, answer_id: &str, raw: &str) {
    let content = sanitize(raw);
    let Some(row) = state.placeholder_mut() else {
        return;
    };
    let regresses = row.content.len() > content.len() && row.content.starts_with(&content);
    if regresses || row.content == content {
        return;
    }
    tracing::debug!(answer_id, chars = content.chars().count(), "Adopting snapshot reply");
    row.content = content;
    state.buffer = raw.to_string();
}

/// Replace the placeholder content with the canonical text. Returns whether
/// anything changed.
pub(crate) fn settle(state: &mut SessionState, canonical: &str) -> bool {
    let content = sanitize(canonical);
    if content.trim().is_empty() {
        return false;
    }
    let Some(row) = state.placeholder_mut() else {
        return false;
    };
    if row.content == content {
        return false;
    }
    row.content = content;
    state.buffer = canonical.to_string();
    true
}
