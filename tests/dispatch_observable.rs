// tests/dispatch_observable.rs
//
// Observable handle behavior against scripted raw operations.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use mom_dispatch::{
    // ---
    Address,
    Args,
    Consumer,
    ConsumerShape,
    Error,
    Observable,
    Relation,
    StringConverter,
    SubscribeAck,
};

fn string_observable(
    descriptors: Arc<FixedDescriptors>,
    factory: Arc<ScriptedObservableFactory>,
) -> Observable<String> {
    // ---
    Observable::new(descriptors, Args::new(), factory, Arc::new(StringConverter))
}

fn kitchen_ack() -> SubscribeAck {
    SubscribeAck::new(vec![Relation::Topic(Address::from("sensor/kitchen"))])
}

fn full(journal: &Journal<String>) -> Consumer<String> {
    Consumer::full(on_data(journal), on_ack(journal), on_failure(journal))
}

fn seen(journal: &Journal<String>) -> Vec<Seen<String>> {
    journal.lock().unwrap().clone()
}

// --------------------
// Consumer shapes
// --------------------

#[test]
fn test_shapes() {
    // ---
    let journal = journal::<String>();

    assert_eq!(Consumer::<String>::None.shape(), ConsumerShape::None);
    assert_eq!(
        Consumer::data(on_data(&journal), on_failure(&journal)).shape(),
        ConsumerShape::Data
    );
    assert_eq!(
        Consumer::ack(on_ack(&journal), on_failure(&journal)).shape(),
        ConsumerShape::Ack
    );
    assert_eq!(full(&journal).shape(), ConsumerShape::Full);
}

#[test]
fn test_full_consumer_sees_ack_then_data() {
    // ---
    init_logging();

    // Arrange
    let factory = ScriptedObservableFactory::new(
        vec![
            StreamEvent::Ack(Some(kitchen_ack())),
            StreamEvent::Data(response("sensor/kitchen", b"21.5")),
            StreamEvent::Data(response("sensor/kitchen", b"21.7")),
        ],
        vec![],
    );
    let observable = string_observable(FixedDescriptors::new(), factory.clone());
    let journal = journal();

    // Act
    observable.enqueue(full(&journal)).expect("enqueue");

    // Assert
    assert_eq!(
        seen(&journal),
        vec![
            Seen::Ack(kitchen_ack()),
            Seen::Data("21.5".into()),
            Seen::Data("21.7".into()),
        ]
    );
    assert!(observable.is_executed());
    assert_eq!(factory.creates(), 1);
}

#[test]
fn test_data_consumer_never_sees_acks() {
    // ---
    init_logging();

    // Arrange
    let factory = ScriptedObservableFactory::new(
        vec![
            StreamEvent::Ack(Some(kitchen_ack())),
            StreamEvent::Data(response("sensor/kitchen", b"21.5")),
        ],
        vec![],
    );
    let observable = string_observable(FixedDescriptors::new(), factory);
    let journal = journal();

    // Act
    observable
        .enqueue(Consumer::data(on_data(&journal), on_failure(&journal)))
        .expect("enqueue");

    // Assert
    assert_eq!(seen(&journal), vec![Seen::Data("21.5".into())]);
}

#[test]
fn test_ack_consumer_never_sees_data() {
    // ---
    init_logging();

    // Arrange
    let factory = ScriptedObservableFactory::new(
        vec![
            StreamEvent::Ack(Some(kitchen_ack())),
            StreamEvent::Data(response("sensor/kitchen", b"21.5")),
        ],
        vec![],
    );
    let observable = string_observable(FixedDescriptors::new(), factory);
    let journal = journal();

    // Act
    observable
        .enqueue(Consumer::ack(on_ack(&journal), on_failure(&journal)))
        .expect("enqueue");

    // Assert
    assert_eq!(seen(&journal), vec![Seen::Ack(kitchen_ack())]);
}

#[test]
fn test_none_consumer_still_subscribes() {
    // ---
    init_logging();

    let factory = ScriptedObservableFactory::new(vec![StreamEvent::Ack(None)], vec![]);
    let observable = string_observable(FixedDescriptors::new(), factory.clone());

    observable.enqueue(Consumer::None).expect("enqueue");

    assert_eq!(factory.last().enqueues.load(Ordering::SeqCst), 1);
    assert!(observable.is_executed());
}

#[test]
fn test_missing_ack_is_delivered_empty() {
    // ---
    init_logging();

    let factory = ScriptedObservableFactory::new(vec![StreamEvent::Ack(None)], vec![]);
    let observable = string_observable(FixedDescriptors::new(), factory);
    let journal = journal();

    observable.enqueue(full(&journal)).expect("enqueue");

    assert_eq!(seen(&journal), vec![Seen::Ack(SubscribeAck::empty())]);
}

// --------------------
// Failures
// --------------------

#[test]
fn test_raw_failure_is_delivered_once() {
    // ---
    init_logging();

    // Arrange
    let factory = ScriptedObservableFactory::new(
        vec![
            StreamEvent::Data(response("sensor/kitchen", b"21.5")),
            StreamEvent::Failure(Error::Transport("connection lost".into())),
            StreamEvent::Data(response("sensor/kitchen", b"21.7")),
            StreamEvent::Failure(Error::Transport("connection lost".into())),
            StreamEvent::Ack(None),
        ],
        vec![],
    );
    let observable = string_observable(FixedDescriptors::new(), factory);
    let journal = journal();

    // Act
    observable.enqueue(full(&journal)).expect("enqueue");

    // Assert
    assert_eq!(
        seen(&journal),
        vec![
            Seen::Data("21.5".into()),
            Seen::Failure(Error::Transport("connection lost".into())),
        ]
    );
}

#[test]
fn test_conversion_fault_keeps_stream_open() {
    // ---
    init_logging();

    // Arrange
    let factory = ScriptedObservableFactory::new(
        vec![
            StreamEvent::Data(response("sensor/kitchen", b"\xff")),
            StreamEvent::Data(response("sensor/kitchen", b"22.0")),
        ],
        vec![],
    );
    let observable = string_observable(FixedDescriptors::new(), factory);
    let journal = journal();

    // Act
    observable
        .enqueue(Consumer::data(on_data(&journal), on_failure(&journal)))
        .expect("enqueue");

    // Assert
    let seen = seen(&journal);
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], Seen::Failure(Error::Conversion(_))));
    assert_eq!(seen[1], Seen::Data("22.0".into()));
}

#[test]
fn test_construction_fault_goes_to_failure_slot() {
    // ---
    init_logging();

    // Arrange
    let descriptors = FixedDescriptors::failing(Error::Unexpected("no relation".into()));
    let factory = ScriptedObservableFactory::new(vec![], vec![]);
    let observable = string_observable(descriptors.clone(), factory.clone());
    let journal = journal();

    // Act
    observable.enqueue(full(&journal)).expect("enqueue");
    observable.enqueue(full(&journal)).expect("enqueue again");

    // Assert
    let fault = Seen::Failure(Error::Unexpected("no relation".into()));
    assert_eq!(seen(&journal), vec![fault.clone(), fault]);
    assert_eq!(descriptors.builds(), 1);
    assert_eq!(factory.creates(), 0);
    assert_eq!(
        observable.subscription(),
        Err(Error::Unexpected("no relation".into()))
    );
}

// --------------------
// Unsubscribe, cancel, claims
// --------------------

#[test]
fn test_unsubscribe_acknowledged() {
    // ---
    init_logging();

    // Arrange
    let factory = ScriptedObservableFactory::new(
        vec![StreamEvent::Ack(Some(kitchen_ack()))],
        vec![StreamEvent::Ack(Some(kitchen_ack())), StreamEvent::Ack(None)],
    );
    let observable = string_observable(FixedDescriptors::new(), factory.clone());
    let subscribed = journal();
    let released = journal();

    // Act
    observable.enqueue(full(&subscribed)).expect("enqueue");
    observable.unsubscribe(full(&released)).expect("unsubscribe");

    // Assert
    assert_eq!(seen(&subscribed), vec![Seen::Ack(kitchen_ack())]);
    assert_eq!(seen(&released), vec![Seen::Ack(kitchen_ack())]);
    assert_eq!(factory.last().unsubscribes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_repeated_claims_are_rejected() {
    // ---
    init_logging();

    let factory = ScriptedObservableFactory::new(vec![], vec![]);
    let observable = string_observable(FixedDescriptors::new(), factory.clone());

    observable.enqueue(Consumer::None).expect("enqueue");
    observable.unsubscribe(Consumer::None).expect("unsubscribe");

    assert_eq!(observable.enqueue(Consumer::None), Err(Error::AlreadyExecuted));
    assert_eq!(observable.unsubscribe(Consumer::None), Err(Error::AlreadyExecuted));
    assert_eq!(factory.creates(), 1);
}

#[test]
fn test_unsubscribe_without_enqueue() {
    // ---
    init_logging();

    let factory = ScriptedObservableFactory::new(vec![], vec![StreamEvent::Ack(None)]);
    let observable = string_observable(FixedDescriptors::new(), factory.clone());
    let journal = journal();

    observable
        .unsubscribe(Consumer::ack(on_ack(&journal), on_failure(&journal)))
        .expect("unsubscribe");

    assert_eq!(seen(&journal), vec![Seen::Ack(SubscribeAck::empty())]);
    assert!(observable.is_executed());
    assert_eq!(factory.last().enqueues.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_before_enqueue() {
    // ---
    init_logging();

    // Arrange
    let factory = ScriptedObservableFactory::new(
        vec![StreamEvent::Data(response("sensor/kitchen", b"21.5"))],
        vec![],
    );
    let observable = string_observable(FixedDescriptors::new(), factory.clone());
    let journal = journal();

    // Act
    observable.cancel();
    observable.enqueue(full(&journal)).expect("enqueue");
    observable.cancel();

    // Assert
    let raw = factory.last();
    assert!(observable.is_canceled());
    assert_eq!(raw.enqueues.load(Ordering::SeqCst), 0);
    assert_eq!(raw.cancels.load(Ordering::SeqCst), 1);
    assert!(seen(&journal).is_empty());
}
