use std::sync::Arc;

use proptest::prelude::*;
use trimline_core::{
    HistoryConfig, HistoryManager, ManualClock, RecordOutcome, TrackList,
    fixtures::demo_track_list,
};

fn discrete_manager(initial: TrackList) -> HistoryManager {
    let config = HistoryConfig {
        infer_value_batches: false,
        ..HistoryConfig::default()
    };
    HistoryManager::with_config(initial, config, Arc::new(ManualClock::new()))
}

fn with_s1_end(base: &TrackList, end_tenths: u16) -> TrackList {
    let mut tracks = base.clone();
    tracks.find_item_mut("s1").expect("fixture has s1").end = 0.1 + f64::from(end_tenths) / 10.0;
    tracks
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn recording_the_same_value_twice_adds_one_step(end in 0u16..200u16) {
        let base = demo_track_list();
        let mut history = discrete_manager(base.clone());
        let next = with_s1_end(&base, end);
        let changed = next != base;

        history.record(next.clone());
        prop_assert_eq!(history.record(next), RecordOutcome::Unchanged);
        prop_assert_eq!(history.past_len(), usize::from(changed));
    }

    #[test]
    fn batches_produce_at_most_one_step(ends in prop::collection::vec(0u16..200u16, 0..40)) {
        let base = demo_track_list();
        let mut history = discrete_manager(base.clone());

        history.begin_batch();
        let mut last = base.clone();
        for end in ends {
            last = with_s1_end(&base, end);
            history.record(last.clone());
            prop_assert_eq!(history.past_len(), 0);
        }
        let committed = history.commit_batch();

        prop_assert_eq!(committed, last != base);
        prop_assert_eq!(history.past_len(), usize::from(committed));
        prop_assert_eq!(history.present().tracks(), &last);
    }

    #[test]
    fn undo_walks_back_one_accepted_step(ends in prop::collection::vec(0u16..200u16, 1..30)) {
        let base = demo_track_list();
        let mut history = discrete_manager(base.clone());

        let mut accepted = vec![base.clone()];
        for end in ends {
            let next = with_s1_end(&base, end);
            if history.record(next.clone()) == RecordOutcome::Committed {
                accepted.push(next);
            }
        }
        prop_assert_eq!(history.past_len(), accepted.len() - 1);

        let newest = accepted.pop().expect("accepted always holds the base");
        match accepted.last() {
            Some(previous) => {
                let undone = history.undo().expect("accepted steps are undoable").tracks().clone();
                prop_assert_eq!(&undone, previous);
                let redone = history.redo().expect("undone step is redoable").tracks().clone();
                prop_assert_eq!(&redone, &newest);
            }
            None => prop_assert!(history.undo().is_none()),
        }
    }

    #[test]
    fn scrubbing_one_item_keeps_a_single_step(ends in prop::collection::vec(0u16..200u16, 1..40)) {
        let base = demo_track_list();
        let mut history = HistoryManager::with_config(
            base.clone(),
            HistoryConfig::default(),
            Arc::new(ManualClock::new()),
        );

        let mut last = base.clone();
        for end in ends {
            last = with_s1_end(&base, end);
            history.record(last.clone());
        }

        let moved = last != base;
        prop_assert_eq!(history.past_len(), usize::from(moved));
        prop_assert_eq!(history.present().tracks(), &last);
        if moved {
            let undone = history.undo().expect("scrub step is undoable").tracks().clone();
            prop_assert_eq!(&undone, &base);
        }
    }

    #[test]
    fn undo_during_batch_changes_nothing(first in 0u16..200u16, second in 0u16..200u16) {
        let base = demo_track_list();
        let mut history = discrete_manager(base.clone());
        history.record(with_s1_end(&base, first));

        history.begin_batch();
        history.record(with_s1_end(&base, second));
        let present = history.present().tracks().clone();
        let (past, future) = (history.past_len(), history.future_len());

        prop_assert!(history.undo().is_none());
        prop_assert!(history.redo().is_none());
        prop_assert_eq!(history.present().tracks(), &present);
        prop_assert_eq!((history.past_len(), history.future_len()), (past, future));
    }
}
