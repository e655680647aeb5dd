use std::collections::BTreeSet;

use crate::model::{TimelineItem, Track, TrackList};

/// How a Track List differs from its predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Identical,
    /// Same tracks and items in the same order; only item `start`, `end` or
    /// `payload` moved. `touched` holds the ids of the items that changed.
    ValueOnly { touched: BTreeSet<String> },
    Structural,
}

#[must_use]
pub fn classify_change(previous: &TrackList, next: &TrackList) -> ChangeKind {
    if previous == next {
        return ChangeKind::Identical;
    }
    if previous.tracks.len() != next.tracks.len() {
        return ChangeKind::Structural;
    }

    let mut touched = BTreeSet::new();
    for (before, after) in previous.tracks.iter().zip(&next.tracks) {
        if !same_track_shape(before, after) {
            return ChangeKind::Structural;
        }
        for (item_before, item_after) in before.items.iter().zip(&after.items) {
            if item_before == item_after {
                continue;
            }
            if !same_item_identity(item_before, item_after) {
                return ChangeKind::Structural;
            }
            touched.insert(item_after.id.clone());
        }
    }

    ChangeKind::ValueOnly { touched }
}

fn same_track_shape(before: &Track, after: &Track) -> bool {
    before.id == after.id && before.kind == after.kind && before.items.len() == after.items.len()
}

// Everything except start, end and payload.
fn same_item_identity(before: &TimelineItem, after: &TimelineItem) -> bool {
    before.id == after.id
        && before.kind == after.kind
        && before.source == after.source
        && before.media_start == after.media_start
        && before.media_end == after.media_end
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fixtures::demo_track_list;

    #[test]
    fn equal_lists_are_identical() {
        let tracks = demo_track_list();
        assert_eq!(
            classify_change(&tracks, &tracks.clone()),
            ChangeKind::Identical
        );
    }

    #[test]
    fn end_and_payload_edits_are_value_only() {
        let before = demo_track_list();
        let mut after = before.clone();
        let item = after.find_item_mut("s1").expect("fixture has s1");
        item.end = 5.0;
        item.payload = json!({ "volume": 0.4 });

        let change = classify_change(&before, &after);
        assert_eq!(
            change,
            ChangeKind::ValueOnly {
                touched: BTreeSet::from(["s1".to_string()])
            }
        );
    }

    #[test]
    fn media_window_edits_are_structural() {
        let before = demo_track_list();
        let mut after = before.clone();
        after
            .find_item_mut("v1")
            .expect("fixture has v1")
            .media_start = Some(1.0);

        assert_eq!(classify_change(&before, &after), ChangeKind::Structural);
    }

    #[test]
    fn added_items_are_structural() {
        let before = demo_track_list();
        let mut after = before.clone();
        let extra = after.tracks[0].items[0].clone();
        after.tracks[0].items.push(extra);

        assert_eq!(classify_change(&before, &after), ChangeKind::Structural);
    }
}
