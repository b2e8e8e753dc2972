//! # Delivery Guarantees
//!
//! Ordering, isolation and shutdown draining under concurrent load.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use pubsub_bus::{
        BusConfig, BusState, DeliveryError, EventPublisher, InMemoryPubsubBus, Message, Principal,
        PubsubBus, Subscriber,
    };
    use rand::Rng;

    use crate::support::{test_bus, wait_until, Recorder, DELIVERY_TIMEOUT};

    fn numbered(seq: usize) -> Message {
        Message::event("tick").with("seq", &seq).unwrap()
    }

    fn sequence(recorder: &Recorder) -> Vec<usize> {
        recorder
            .values("seq")
            .iter()
            .map(|v| v.parse().unwrap())
            .collect()
    }

    // =========================================================================
    // ORDERING
    // =========================================================================

    #[test]
    fn test_each_subscriber_sees_publish_order() {
        let bus = test_bus();
        let recorders: Vec<Recorder> = (0..3).map(|_| Recorder::new()).collect();
        for recorder in &recorders {
            bus.subscribe("ordered", recorder.subscriber(), Principal::system(), None)
                .unwrap();
        }

        let publisher = bus.publisher("ordered").unwrap();
        for seq in 0..500 {
            publisher.publish(numbered(seq)).unwrap();
        }

        let expected: Vec<usize> = (0..500).collect();
        for recorder in &recorders {
            assert!(recorder.wait_for(500));
            assert_eq!(sequence(recorder), expected);
        }

        bus.shutdown();
    }

    #[test]
    fn test_order_preserved_with_jittery_subscriber() {
        let bus = test_bus();
        let seen = Recorder::new();
        let sink = seen.subscriber();
        let jittery: Arc<dyn Subscriber> = Arc::new(move |message: Message| {
            let pause = rand::thread_rng().gen_range(0..300);
            thread::sleep(Duration::from_micros(pause));
            sink.on_message(message)
        });
        bus.subscribe("jitter", jittery, Principal::system(), None)
            .unwrap();

        let publisher = bus.publisher("jitter").unwrap();
        for seq in 0..100 {
            publisher.publish(numbered(seq)).unwrap();
        }

        assert!(seen.wait_for(100));
        assert_eq!(sequence(&seen), (0..100).collect::<Vec<_>>());
        bus.shutdown();
    }

    #[test]
    fn test_concurrent_publishers_keep_per_thread_order() {
        let bus = test_bus();
        let recorder = Recorder::new();
        bus.subscribe("shared", recorder.subscriber(), Principal::system(), None)
            .unwrap();

        let threads: Vec<_> = (0..4)
            .map(|worker| {
                let publisher = bus.publisher("shared").unwrap();
                thread::spawn(move || {
                    for seq in 0..100 {
                        let message = numbered(seq).with("worker", &worker).unwrap();
                        publisher.publish(message).unwrap();
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        assert!(recorder.wait_for(400));
        let workers = recorder.values("worker");
        let seqs = sequence(&recorder);
        for worker in 0..4 {
            let own: Vec<usize> = workers
                .iter()
                .zip(&seqs)
                .filter(|(w, _)| **w == worker.to_string())
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(own, (0..100).collect::<Vec<_>>(), "worker {worker}");
        }

        bus.shutdown();
    }

    #[test]
    fn test_late_subscriber_sees_contiguous_suffix() {
        let bus = test_bus();
        let publisher = bus.publisher("stream").unwrap();
        let late = Recorder::new();

        for seq in 0..100 {
            if seq == 50 {
                bus.subscribe("stream", late.subscriber(), Principal::system(), None)
                    .unwrap();
            }
            publisher.publish(numbered(seq)).unwrap();
        }

        assert!(late.wait_for(50));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sequence(&late), (50..100).collect::<Vec<_>>());
        bus.shutdown();
    }

    // =========================================================================
    // ISOLATION
    // =========================================================================

    #[test]
    fn test_failing_and_panicking_subscribers_are_isolated() {
        let bus = test_bus();
        let healthy = Recorder::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let panics = Arc::new(AtomicUsize::new(0));

        let failure_count = Arc::clone(&failures);
        let failing: Arc<dyn Subscriber> = Arc::new(move |_: Message| {
            failure_count.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DeliveryError::new("downstream unavailable"))
        });

        let panic_count = Arc::clone(&panics);
        let panicking: Arc<dyn Subscriber> =
            Arc::new(move |_: Message| -> Result<(), DeliveryError> {
                panic_count.fetch_add(1, Ordering::SeqCst);
                panic!("listener bug");
            });

        bus.subscribe("fragile", failing, Principal::system(), None)
            .unwrap();
        bus.subscribe("fragile", panicking, Principal::system(), None)
            .unwrap();
        bus.subscribe("fragile", healthy.subscriber(), Principal::system(), None)
            .unwrap();

        let publisher = bus.publisher("fragile").unwrap();
        for seq in 0..10 {
            publisher.publish(numbered(seq)).unwrap();
        }

        assert!(healthy.wait_for(10));
        assert!(wait_until(DELIVERY_TIMEOUT, || {
            failures.load(Ordering::SeqCst) == 10 && panics.load(Ordering::SeqCst) == 10
        }));
        assert_eq!(sequence(&healthy), (0..10).collect::<Vec<_>>());
        bus.shutdown();
    }

    #[test]
    fn test_slow_subscriber_does_not_block_publisher_or_peers() {
        let bus = test_bus();
        let fast = Recorder::new();
        let slow_seen = Recorder::new();
        let slow_sink = slow_seen.subscriber();
        let slow: Arc<dyn Subscriber> = Arc::new(move |message: Message| {
            thread::sleep(Duration::from_millis(100));
            slow_sink.on_message(message)
        });

        bus.subscribe("mixed", slow, Principal::system(), None)
            .unwrap();
        bus.subscribe("mixed", fast.subscriber(), Principal::system(), None)
            .unwrap();

        let publisher = bus.publisher("mixed").unwrap();
        let started = Instant::now();
        for seq in 0..10 {
            publisher.publish(numbered(seq)).unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(fast.wait_for(10));
        assert!(slow_seen.count() < 10);

        bus.shutdown();
        assert_eq!(slow_seen.count(), 10);
    }

    #[test]
    fn test_subscriber_can_publish_from_callback() {
        let bus = test_bus();
        let downstream = Recorder::new();
        bus.subscribe("downstream", downstream.subscriber(), Principal::system(), None)
            .unwrap();

        let forward = bus.publisher("downstream").unwrap();
        let relay: Arc<dyn Subscriber> = Arc::new(move |message: Message| {
            let event = message.event_name().unwrap_or_default().to_string();
            forward
                .publish(Message::event(format!("relayed_{event}")))
                .map_err(|e| DeliveryError::new(e.to_string()))
        });
        bus.subscribe("upstream", relay, Principal::system(), None)
            .unwrap();

        bus.publisher("upstream")
            .unwrap()
            .publish(Message::event("job_crud_created"))
            .unwrap();

        assert!(downstream.wait_for(1));
        assert_eq!(downstream.event_names(), vec!["relayed_job_crud_created"]);
        bus.shutdown();
    }

    #[test]
    fn test_unsubscribe_during_delivery() {
        let bus = test_bus();
        let recorder = Recorder::new();
        let handle = bus
            .subscribe("churn", recorder.subscriber(), Principal::system(), None)
            .unwrap();

        let publisher = bus.publisher("churn").unwrap();
        for seq in 0..100 {
            publisher.publish(numbered(seq)).unwrap();
            if seq == 40 {
                assert!(bus.unsubscribe(&handle));
            }
        }

        // Everything queued before removal still arrives, nothing after
        assert!(recorder.wait_for(41));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sequence(&recorder), (0..41).collect::<Vec<_>>());
        bus.shutdown();
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    #[test]
    fn test_shutdown_drains_pending_messages() {
        let bus = test_bus();
        let seen = Recorder::new();
        let sink = seen.subscriber();
        let slow: Arc<dyn Subscriber> = Arc::new(move |message: Message| {
            thread::sleep(Duration::from_millis(2));
            sink.on_message(message)
        });
        bus.subscribe("drain", slow, Principal::system(), None)
            .unwrap();

        let publisher = bus.publisher("drain").unwrap();
        for seq in 0..50 {
            publisher.publish(numbered(seq)).unwrap();
        }

        bus.shutdown();
        assert_eq!(bus.state(), BusState::Shutdown);
        assert_eq!(sequence(&seen), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_gives_up_after_grace_period() {
        let config = BusConfig::default()
            .with_worker_threads(1)
            .with_shutdown_grace(Duration::from_millis(50));
        let bus = InMemoryPubsubBus::new(&config).unwrap();

        let stuck: Arc<dyn Subscriber> = Arc::new(|_: Message| -> Result<(), DeliveryError> {
            thread::sleep(Duration::from_millis(300));
            Ok(())
        });
        bus.subscribe("stuck", stuck, Principal::system(), None)
            .unwrap();
        let publisher = bus.publisher("stuck").unwrap();
        for seq in 0..5 {
            publisher.publish(numbered(seq)).unwrap();
        }

        let started = Instant::now();
        bus.shutdown();
        assert!(started.elapsed() < DELIVERY_TIMEOUT);
        assert_eq!(bus.state(), BusState::Shutdown);
    }

    #[test]
    fn test_concurrent_shutdown_calls() {
        let bus = test_bus();
        let recorder = Recorder::new();
        bus.subscribe("c", recorder.subscriber(), Principal::system(), None)
            .unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || bus.shutdown())
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        assert!(wait_until(DELIVERY_TIMEOUT, || bus.state()
            == BusState::Shutdown));
        assert_eq!(bus.subscription_count("c"), 0);
    }
}
