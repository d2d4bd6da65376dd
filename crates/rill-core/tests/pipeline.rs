//! End-to-end dataflow scenarios chaining sources and operators.

mod common;

use std::sync::Arc;

use common::RecordingSink;
use rill_core::flow::{FlowError, Source, Subscriber, UNBOUNDED};
use rill_core::operator::{DefaultValue, Merge, Race, Recover, Single, SweepOperator, Window};
use rill_core::source::{IterSource, RangeSource};

#[test]
fn range_windows_then_replay() {
    // range → count windows → each window replays as a source.
    let range = Arc::new(RangeSource::new(1, 7).unwrap()) as Arc<dyn Source<i64>>;
    let windows = SweepOperator::window_count(range, 3);

    let sink = RecordingSink::<Window<i64>>::with_request(UNBOUNDED);
    windows.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<Window<i64>>>);

    let emitted = sink.items();
    assert_eq!(emitted.len(), 3);
    assert_eq!(emitted[0].items(), &[1, 2, 3]);
    assert_eq!(emitted[1].items(), &[4, 5, 6]);
    assert_eq!(emitted[2].items(), &[7]);
    assert!(sink.is_completed());

    // A flushed window is a source in its own right.
    let replay = RecordingSink::<i64>::with_request(UNBOUNDED);
    emitted[1].subscribe(Arc::clone(&replay) as Arc<dyn Subscriber<i64>>);
    assert_eq!(replay.items(), vec![4, 5, 6]);
    assert!(replay.is_completed());
}

#[test]
fn single_over_race_passthrough() {
    // The race has one contender, so Single sees the pass-through source.
    let race = Arc::new(Race::new(vec![
        Arc::new(IterSource::just(41)) as Arc<dyn Source<i32>>
    ])) as Arc<dyn Source<i32>>;
    let single = Single::new(race);

    let sink = RecordingSink::<i32>::with_request(1);
    single.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);

    assert_eq!(sink.items(), vec![41]);
    assert!(sink.is_completed());
}

#[test]
fn single_over_merged_branches_detects_excess() {
    let merge = Arc::new(Merge::new(vec![
        Arc::new(IterSource::just(1)) as Arc<dyn Source<i32>>,
        Arc::new(IterSource::just(2)) as Arc<dyn Source<i32>>,
    ])) as Arc<dyn Source<i32>>;
    let single = Single::new(merge);

    let sink = RecordingSink::<i32>::with_request(1);
    single.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);

    assert_eq!(sink.errors(), vec![FlowError::TooManyItems]);
    assert_eq!(sink.item_count(), 0);
}

#[test]
fn merge_of_windows() {
    // Two windowed streams merged into one stream of sequences.
    let left = SweepOperator::sequence_count(
        Arc::new(IterSource::new(vec![1, 2])) as Arc<dyn Source<i32>>,
        2,
    );
    let right = SweepOperator::sequence_count(
        Arc::new(IterSource::new(vec![3, 4])) as Arc<dyn Source<i32>>,
        2,
    );

    let merge = Merge::new(vec![
        Arc::new(left) as Arc<dyn Source<Vec<i32>>>,
        Arc::new(right) as Arc<dyn Source<Vec<i32>>>,
    ]);

    let sink = RecordingSink::<Vec<i32>>::with_request(UNBOUNDED);
    merge.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<Vec<i32>>>);

    let mut sequences = sink.items();
    sequences.sort();
    assert_eq!(sequences, vec![vec![1, 2], vec![3, 4]]);
    assert_eq!(sink.completions(), 1);
}

#[test]
fn recover_feeds_converted_error_downstream() {
    struct Faulty;

    impl Source<i32> for Faulty {
        fn subscribe(&self, subscriber: Arc<dyn Subscriber<i32>>) {
            let session = rill_core::flow::EmitterSession::create(subscriber);
            let _ = session.fail_with(FlowError::message("deadline overrun"));
        }
    }

    let recover = Recover::new(Arc::new(Faulty) as Arc<dyn Source<i32>>, |error| {
        matches!(error, FlowError::Message(_))
    });

    let sink = RecordingSink::<FlowError>::with_request(1);
    recover.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<FlowError>>);

    assert_eq!(sink.items(), vec![FlowError::message("deadline overrun")]);
    assert!(sink.is_completed());
    assert!(sink.errors().is_empty());
}

#[test]
fn single_default_supplier_closes_empty_pipeline() {
    let empty_windows = SweepOperator::sequence_count(
        Arc::new(IterSource::<i32>::new(Vec::new())) as Arc<dyn Source<i32>>,
        4,
    );
    let single = Single::with_default(
        Arc::new(empty_windows) as Arc<dyn Source<Vec<i32>>>,
        DefaultValue::supply(|| Some(vec![7])),
    );

    let sink = RecordingSink::<Vec<i32>>::with_request(1);
    single.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<Vec<i32>>>);

    assert_eq!(sink.items(), vec![vec![7]]);
    assert!(sink.is_completed());
}

#[test]
fn backpressure_holds_across_operator_boundaries() {
    let windows = SweepOperator::sequence_count(
        Arc::new(IterSource::new((1..=10).collect::<Vec<i32>>())) as Arc<dyn Source<i32>>,
        2,
    );

    let sink = RecordingSink::<Vec<i32>>::new();
    windows.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<Vec<i32>>>);

    // Five sequences exist upstream; the sink's demand meters them out.
    assert_eq!(sink.item_count(), 0);
    sink.request(2);
    assert_eq!(sink.items(), vec![vec![1, 2], vec![3, 4]]);
    assert!(!sink.is_completed());

    sink.request(UNBOUNDED);
    assert_eq!(sink.item_count(), 5);
    assert!(sink.is_completed());
}
