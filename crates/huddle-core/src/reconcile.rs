//! Reconciliation kernel: the dedup-and-merge algorithm over message lists.
//!
//! Every source of messages (history pages, live events, delta sync) is fed
//! through [`merge_into`], which keeps exactly one record per message identity
//! and keeps the list sorted ascending by `created_at`.
//!
//! ## Rules
//!
//! 1. Each incoming record is matched against the list by `cid`, then `id`.
//! 2. A match is updated in place. `status` only moves forward
//!    (`sending` -> `sent` | `error`), `read_by` is unioned, and server fields
//!    are taken from acknowledged records that are at least as fresh.
//! 3. An unmatched record is inserted at its sorted position (binary search).
//! 4. Records with neither `id` nor `cid` are rejected.
//!
//! Applying the same batch twice yields the same list as applying it once.

use crate::identity::find_match;
use crate::message::Message;

/// Outcome of a merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Records that were not present before.
    pub inserted: usize,
    /// Existing records that changed.
    pub updated: usize,
    /// Incoming records that matched and changed nothing.
    pub unchanged: usize,
    /// Incoming records without any identity.
    pub rejected: usize,
}

impl MergeReport {
    /// Check if the merge modified the list.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

/// Merge `incoming` into a copy of `existing` and return the result.
///
/// `existing` may be in any order; the copy is sorted by `created_at` first.
pub fn merge(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut list = existing.to_vec();
    if !is_ordered(&list) {
        list.sort_by_key(|m| m.created_at);
    }
    merge_into(&mut list, incoming.iter().cloned());
    list
}

/// Merge `incoming` into `list` in place.
///
/// `list` must already be sorted by `created_at`; it stays sorted.
pub fn merge_into<I>(list: &mut Vec<Message>, incoming: I) -> MergeReport
where
    I: IntoIterator<Item = Message>,
{
    merge_into_with(list, incoming, |_| {})
}

/// Like [`merge_into`], calling `on_insert` with each record that was not
/// present before.
pub fn merge_into_with<I, F>(list: &mut Vec<Message>, incoming: I, mut on_insert: F) -> MergeReport
where
    I: IntoIterator<Item = Message>,
    F: FnMut(&Message),
{
    debug_assert!(is_ordered(list), "merge_into requires a sorted list");
    let mut report = MergeReport::default();

    for message in incoming {
        if message.key().is_none() {
            tracing::warn!(
                conversation = %message.conversation_id,
                "rejecting message without id or cid"
            );
            report.rejected += 1;
            continue;
        }

        let Some(mut pos) = find_match(list, &message) else {
            on_insert(&message);
            insert_sorted(list, message);
            report.inserted += 1;
            continue;
        };

        let before = list[pos].clone();
        absorb(&mut list[pos], message, Freshness::AtLeast);

        if list[pos] == before {
            report.unchanged += 1;
            continue;
        }
        report.updated += 1;

        // The absorbed id may already belong to a second record (a history page
        // that raced the echo). Keep the record we matched and fold the other in.
        if let Some(id) = list[pos].id.clone() {
            if let Some(dup) = (0..list.len()).find(|&i| i != pos && list[i].id.as_ref() == Some(&id))
            {
                let other = list.remove(dup);
                if dup < pos {
                    pos -= 1;
                }
                absorb(&mut list[pos], other, Freshness::Newer);
            }
        }

        if list[pos].created_at != before.created_at {
            let record = list.remove(pos);
            insert_sorted(list, record);
        }
    }

    report
}

/// How fresh an acknowledged record must be to overwrite server fields.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Freshness {
    AtLeast,
    Newer,
}

/// Fold `incoming` into `existing`.
fn absorb(existing: &mut Message, incoming: Message, freshness: Freshness) {
    let had_id = existing.id.is_some();
    if !had_id {
        existing.id = incoming.id.clone();
    }
    if existing.cid.is_none() {
        existing.cid = incoming.cid.clone();
    }

    existing.status = existing.status.advance(incoming.status);
    existing.read_by.extend(incoming.read_by.iter().cloned());

    // Server fields come from acknowledged records only. The first one always
    // replaces the local draft; after that the freshest copy wins.
    if incoming.id.is_none() {
        return;
    }
    let fresher = match freshness {
        Freshness::AtLeast => incoming.updated_at >= existing.updated_at,
        Freshness::Newer => incoming.updated_at > existing.updated_at,
    };
    if !had_id || fresher {
        existing.content = incoming.content;
        existing.kind = incoming.kind;
        existing.attachments = incoming.attachments;
        existing.reply_to = incoming.reply_to.or(existing.reply_to.take());
        existing.created_at = incoming.created_at;
        existing.updated_at = incoming.updated_at;
    }
}

/// Insert at the upper bound of `created_at`, keeping arrival order for ties.
fn insert_sorted(list: &mut Vec<Message>, message: Message) {
    let at = list.partition_point(|m| m.created_at <= message.created_at);
    list.insert(at, message);
}

/// Check if a list is sorted ascending by `created_at`.
pub fn is_ordered(list: &[Message]) -> bool {
    list.windows(2).all(|w| w[0].created_at <= w[1].created_at)
}
