//! # Bus Scenarios
//!
//! Behavior of a bus obtained from the registry the way an application
//! would use it:
//!
//! 1. **Channel isolation**: subscribers only see their own channel
//! 2. **Filtering**: a filter narrows a channel to matching events
//! 3. **Authorization**: a subject hides messages from principals it denies
//! 4. **Lifecycle**: backend resolution and shutdown

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use pubsub_bus::{
        BusConfig, BusError, BusRegistry, BusState, EventFilter, EventProps, EventPublisher, Message,
        Principal, PubsubBus,
    };

    use crate::support::{test_bus, OwnedItem, Recorder};

    const JOBS: &str = "jenkins.job";
    const AGENTS: &str = "jenkins.slave";

    // =========================================================================
    // CHANNEL ISOLATION
    // =========================================================================

    #[test]
    fn test_unfiltered_subscribers_see_only_their_channel() {
        let bus = test_bus();
        let jobs = Recorder::new();
        let agents = Recorder::new();

        bus.subscribe(JOBS, jobs.subscriber(), Principal::system(), None)
            .unwrap();
        bus.subscribe(AGENTS, agents.subscriber(), Principal::system(), None)
            .unwrap();

        let job_publisher = bus.publisher(JOBS).unwrap();
        let agent_publisher = bus.publisher(AGENTS).unwrap();

        job_publisher
            .publish(Message::event("job_crud_created"))
            .unwrap();
        agent_publisher.publish(Message::event("node_online")).unwrap();
        job_publisher
            .publish(Message::event("job_crud_deleted"))
            .unwrap();

        assert!(jobs.wait_for(2));
        assert!(agents.wait_for(1));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(
            jobs.event_names(),
            vec!["job_crud_created", "job_crud_deleted"]
        );
        assert_eq!(agents.event_names(), vec!["node_online"]);
        assert!(jobs
            .values(EventProps::CHANNEL_NAME)
            .iter()
            .all(|c| c == JOBS));

        bus.shutdown();
    }

    #[test]
    fn test_concurrent_publisher_calls_share_one_channel() {
        let bus = test_bus();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || bus.publisher("contended").map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(bus.channel_names(), vec!["contended".to_string()]);
        bus.shutdown();
    }

    // =========================================================================
    // FILTERING
    // =========================================================================

    #[test]
    fn test_filtered_subscriber() {
        let bus = test_bus();
        let deleted = Recorder::new();
        let everything = Recorder::new();

        let filter = EventFilter::for_event("job_crud_deleted");
        bus.subscribe(JOBS, deleted.subscriber(), Principal::system(), Some(filter))
            .unwrap();
        bus.subscribe(JOBS, everything.subscriber(), Principal::system(), None)
            .unwrap();

        let publisher = bus.publisher(JOBS).unwrap();
        for event in ["job_crud_created", "job_crud_deleted", "job_crud_updated"] {
            let message = Message::event(event).with("job_name", "pipeline-a").unwrap();
            publisher.publish(message).unwrap();
        }

        assert!(everything.wait_for(3));
        assert!(deleted.wait_for(1));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(deleted.event_names(), vec!["job_crud_deleted"]);
        assert_eq!(deleted.values("job_name"), vec!["pipeline-a"]);
        bus.shutdown();
    }

    #[test]
    fn test_multi_pair_filter() {
        let bus = test_bus();
        let recorder = Recorder::new();

        let filter = EventFilter::for_event("item_renamed")
            .with("item_rename_after", "new-name")
            .unwrap();
        bus.subscribe(JOBS, recorder.subscriber(), Principal::system(), Some(filter))
            .unwrap();

        let publisher = bus.publisher(JOBS).unwrap();
        let rename = |after: &str| {
            Message::event("item_renamed")
                .with("item_rename_before", "old-name")
                .unwrap()
                .with("item_rename_after", after)
                .unwrap()
        };
        publisher.publish(rename("other-name")).unwrap();
        publisher.publish(rename("new-name")).unwrap();
        publisher.publish(Message::event("job_crud_updated")).unwrap();

        assert!(recorder.wait_for(1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(recorder.values("item_rename_after"), vec!["new-name"]);
        bus.shutdown();
    }

    // =========================================================================
    // AUTHORIZATION
    // =========================================================================

    #[test]
    fn test_subject_permissions_control_delivery() {
        let bus = test_bus();
        let alice = Recorder::new();
        bus.subscribe(JOBS, alice.subscriber(), Principal::new("alice"), None)
            .unwrap();

        let publisher = bus.publisher(JOBS).unwrap();

        // Subjects alice can read
        publisher
            .publish(Message::event("message1").with_subject(OwnedItem::new("alice")))
            .unwrap();
        publisher
            .publish(Message::event("message2").with_subject(OwnedItem::new("alice")))
            .unwrap();
        assert!(alice.wait_for(2));

        // Subject alice cannot read
        publisher
            .publish(Message::event("message3").with_subject(OwnedItem::new("bob")))
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(alice.count(), 2);

        publisher
            .publish(Message::event("message4").with_subject(OwnedItem::new("alice")))
            .unwrap();
        assert!(alice.wait_for(3));
        assert_eq!(alice.event_names(), vec!["message1", "message2", "message4"]);

        bus.shutdown();
    }

    #[test]
    fn test_authorization_is_per_subscription() {
        let bus = test_bus();
        let alice = Recorder::new();
        let bob = Recorder::new();
        let system = Recorder::new();

        bus.subscribe(JOBS, alice.subscriber(), Principal::new("alice"), None)
            .unwrap();
        bus.subscribe(JOBS, bob.subscriber(), Principal::new("bob"), None)
            .unwrap();
        bus.subscribe(JOBS, system.subscriber(), Principal::system(), None)
            .unwrap();

        bus.publisher(JOBS)
            .unwrap()
            .publish(Message::event("job_crud_updated").with_subject(OwnedItem::new("bob")))
            .unwrap();

        assert!(bob.wait_for(1));
        assert!(system.wait_for(1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(alice.count(), 0);

        bus.shutdown();
    }

    #[test]
    fn test_delivered_copies_have_no_subject() {
        let bus = test_bus();
        let first = Recorder::new();
        let second = Recorder::new();
        bus.subscribe(JOBS, first.subscriber(), Principal::system(), None)
            .unwrap();
        bus.subscribe(JOBS, second.subscriber(), Principal::system(), None)
            .unwrap();

        let message = Message::event("job_crud_created")
            .with("job_name", "pipeline-a")
            .unwrap()
            .with_subject(OwnedItem::new("alice"));
        bus.publisher(JOBS).unwrap().publish(message).unwrap();

        assert!(first.wait_for(1));
        assert!(second.wait_for(1));
        for recorder in [&first, &second] {
            recorder.inspect(|messages| {
                assert!(!messages[0].has_subject());
                assert_eq!(messages[0].get("job_name"), Some("pipeline-a"));
            });
        }

        bus.shutdown();
    }

    #[test]
    fn test_subscriber_mutation_does_not_leak() {
        let bus = test_bus();
        let untouched = Recorder::new();

        let mutating: Arc<dyn pubsub_bus::Subscriber> =
            Arc::new(|mut message: Message| -> Result<(), pubsub_bus::DeliveryError> {
                message.set("job_name", "tampered").unwrap();
                Ok(())
            });
        bus.subscribe(JOBS, mutating, Principal::system(), None)
            .unwrap();
        bus.subscribe(JOBS, untouched.subscriber(), Principal::system(), None)
            .unwrap();

        let message = Message::event("job_crud_updated")
            .with("job_name", "pipeline-a")
            .unwrap();
        bus.publisher(JOBS).unwrap().publish(message).unwrap();

        assert!(untouched.wait_for(1));
        assert_eq!(untouched.values("job_name"), vec!["pipeline-a"]);
        bus.shutdown();
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    #[test]
    fn test_registry_default_backend() {
        let registry = BusRegistry::new(BusConfig::default().with_worker_threads(1));

        let bus = registry.get_bus().unwrap();
        assert_eq!(bus.backend_name(), "in-memory");

        let named = registry.get_bus_named("in-memory").unwrap();
        assert!(Arc::ptr_eq(&bus, &named));

        registry.shutdown_all();
        assert_eq!(bus.state(), BusState::Shutdown);
    }

    #[test]
    fn test_registry_unknown_default_backend() {
        let registry = BusRegistry::new(BusConfig::default().with_default_backend("kafka"));
        match registry.get_bus() {
            Err(BusError::UnknownBackend { name, available }) => {
                assert_eq!(name, "kafka");
                assert_eq!(available, vec!["in-memory".to_string()]);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("unknown backend resolved"),
        }
    }

    #[test]
    fn test_operations_after_shutdown() {
        let bus = test_bus();
        let recorder = Recorder::new();
        let handle = bus
            .subscribe(JOBS, recorder.subscriber(), Principal::system(), None)
            .unwrap();
        let publisher = bus.publisher(JOBS).unwrap();

        bus.shutdown();

        let err = publisher.publish(Message::event("late")).unwrap_err();
        assert!(err.is_shutdown());

        let err = bus
            .subscribe(JOBS, recorder.subscriber(), Principal::system(), None)
            .unwrap_err();
        assert!(err.is_shutdown());

        let mut message = Message::event("late");
        message.set_channel_name(JOBS).unwrap();
        assert!(bus.publish(message).unwrap_err().is_shutdown());

        // Already removed by shutdown
        assert!(!bus.unsubscribe(&handle));
        bus.shutdown();
        assert_eq!(bus.state(), BusState::Shutdown);
    }
}
