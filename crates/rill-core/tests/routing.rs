//! Registry, bus, and session scenarios across threads.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::RecordingSink;
use parking_lot::Mutex;
use rill_core::bus::EventBus;
use rill_core::dispatch::{InlineDispatcher, ThreadDispatcher};
use rill_core::flow::{EmitterSession, Subscriber};
use rill_core::registry::{CachingRegistry, Key, Selector};

#[test]
fn correlation_reply_over_anonymous_keys() {
    // Request/reply correlation: the replier is registered under a general
    // key, the reply target under a fresh anonymous key (the hot path the
    // prime cache exists for).
    let bus: EventBus<String, String> = EventBus::new(Arc::new(InlineDispatcher));

    bus.receive(Selector::eq("echo".to_string()), |request| {
        format!("echo:{request}")
    });

    let (reply_selector, reply_token) = Selector::anonymous();
    let replies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    bus.on(reply_selector, move |reply| {
        sink.lock().push(reply.clone());
    });

    bus.send(
        &Key::Value("echo".to_string()),
        &"hello".to_string(),
        Some(Key::Anonymous(reply_token)),
    );

    assert_eq!(*replies.lock(), vec!["echo:hello".to_string()]);
}

#[test]
fn notify_fanout_through_worker_dispatcher() {
    let dispatcher = Arc::new(ThreadDispatcher::new("routing"));
    let bus: EventBus<String, u64> = EventBus::new(dispatcher.clone());
    let delivered = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let count = Arc::clone(&delivered);
        bus.on(Selector::predicate(|key: &String| key.starts_with("mv_")), move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }

    for i in 0..10u64 {
        bus.notify(&Key::Value("mv_orders".to_string()), &i);
    }

    drop(bus);
    drop(dispatcher); // join: all scheduled handler invocations ran

    assert_eq!(delivered.load(Ordering::SeqCst), 30);
}

#[test]
fn registration_churn_under_concurrent_notify() {
    let registry: Arc<CachingRegistry<u32, u32>> = Arc::new(CachingRegistry::new());

    let writers: Vec<_> = (0..4u32)
        .map(|t| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let mut registrations = Vec::new();
                for i in 0..50 {
                    registrations.push(registry.register(Selector::eq(t), t * 100 + i));
                }
                // Cancel half; they must drop out of later selects.
                for registration in registrations.iter().step_by(2) {
                    registration.cancel();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4u32)
        .map(|t| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let matches = registry.select(&Key::Value(t));
                    assert!(matches.len() <= 50);
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    for r in readers {
        r.join().unwrap();
    }

    // Steady state: 25 live registrations per key. A general registration
    // flushes any stale cached sets built mid-churn.
    registry.register(Selector::eq(999u32), 0);
    for t in 0..4u32 {
        assert_eq!(registry.select(&Key::Value(t)).len(), 25);
    }
}

#[test]
fn producer_thread_blocking_submit() {
    let sink = RecordingSink::<u32>::new();
    let session = EmitterSession::create(Arc::clone(&sink) as Arc<dyn Subscriber<u32>>);

    let producer = {
        let session = Arc::clone(&session);
        std::thread::spawn(move || {
            let mut delivered = 0;
            for i in 0..5u32 {
                if session
                    .submit(&i, Some(Duration::from_secs(5)), |_| false)
                    .is_ok()
                {
                    delivered += 1;
                }
            }
            delivered
        })
    };

    // Consumer trickles demand from this thread.
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(15));
        sink.request(1);
    }

    assert_eq!(producer.join().unwrap(), 5);
    assert_eq!(sink.items(), vec![0, 1, 2, 3, 4]);

    session.finish();
    assert!(sink.is_completed());
}

#[test]
fn cancelled_consumer_stops_producer() {
    let sink = RecordingSink::<u32>::new();
    let session = EmitterSession::create(Arc::clone(&sink) as Arc<dyn Subscriber<u32>>);

    sink.request(2);
    assert!(session.emit(1).is_ok());

    sink.cancel();
    assert!(session.emit(2).is_cancelled());
    assert_eq!(sink.items(), vec![1]);
}
