//! Whole-stack call lifecycle tests: two endpoints and a registry in one
//! process, with every signal crossing the real WebSocket relay.

mod common;

use std::time::Duration;

use serial_test::serial;

use common::*;
use peercall::prelude::*;

#[tokio::test]
#[serial]
async fn test_call_connects_and_side_channel_flows_both_ways() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();

    let engine_a = LoopbackMediaEngine::new(hub.clone());
    let engine_b = LoopbackMediaEngine::new(hub.clone());
    let handler_a = RecordingHandler::accepting();
    let handler_b = RecordingHandler::accepting();

    let alice = connect_endpoint(&registry, engine_a.clone(), handler_a.clone()).await;
    let bob = connect_endpoint(&registry, engine_b.clone(), handler_b.clone()).await;

    let call_id = alice
        .start_call(bob.local_peer_id())
        .await
        .expect("dialing a registered peer must succeed");

    wait_for_state(&alice, CallState::Active).await;
    wait_for_state(&bob, CallState::Active).await;

    let outgoing = alice.current_call().await.expect("caller has a session");
    assert_eq!(outgoing.call_id, call_id);
    assert_eq!(outgoing.direction, CallDirection::Outgoing);
    assert_eq!(&outgoing.remote_peer_id, bob.local_peer_id());
    assert!(outgoing.connected_at.is_some());

    let incoming = bob.current_call().await.expect("callee has a session");
    assert_eq!(incoming.call_id, call_id);
    assert_eq!(incoming.direction, CallDirection::Incoming);
    assert_eq!(&incoming.remote_peer_id, alice.local_peer_id());

    alice.send_side_channel("hello from alice").await.unwrap();
    bob.send_side_channel("hello from bob").await.unwrap();

    wait_until("bob hears alice", || {
        handler_b
            .side_messages()
            .iter()
            .any(|(id, text)| *id == call_id && text == "hello from alice")
    })
    .await;
    wait_until("alice hears bob", || {
        handler_a
            .side_messages()
            .iter()
            .any(|(id, text)| *id == call_id && text == "hello from bob")
    })
    .await;

    alice.end_call().await.unwrap();
    wait_for_state(&alice, CallState::Closed).await;
    wait_for_state(&bob, CallState::Closed).await;

    // Each side acquired once and released exactly once
    assert_eq!(engine_a.acquired(), 1);
    assert_eq!(engine_a.released(), 1);
    assert_eq!(engine_b.acquired(), 1);
    assert_eq!(engine_b.released(), 1);

    let ended = bob.current_call().await.expect("closed session stays inspectable");
    assert_eq!(ended.state, CallState::Closed);
    assert_eq!(ended.close_reason.as_deref(), Some("hung up by remote"));

    // Both handlers observed every hop of the lifecycle, in order
    let observed = |handler: &RecordingHandler| -> Vec<CallState> {
        handler
            .states()
            .iter()
            .filter(|status| status.call_id == call_id)
            .map(|status| status.new_state)
            .collect()
    };
    wait_until("both handlers saw the close", || {
        observed(&handler_a).last() == Some(&CallState::Closed)
            && observed(&handler_b).last() == Some(&CallState::Closed)
    })
    .await;
    assert_eq!(
        observed(&handler_a),
        vec![
            CallState::Requesting,
            CallState::Negotiating,
            CallState::Active,
            CallState::Closed,
        ]
    );
    assert_eq!(
        observed(&handler_b),
        vec![
            CallState::Ringing,
            CallState::Negotiating,
            CallState::Active,
            CallState::Closed,
        ]
    );

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_calling_an_unknown_peer_closes_without_negotiating() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let engine = LoopbackMediaEngine::new(hub.clone());
    let handler = RecordingHandler::accepting();

    let alice = connect_endpoint(&registry, engine.clone(), handler).await;

    let err = alice
        .start_call(&PeerId::from("nobody-here"))
        .await
        .expect_err("dialing an absent peer must fail");
    assert!(matches!(err, ClientError::UnknownPeer { .. }));
    assert!(err.is_recoverable());

    // The attempt closed on the spot and the engine never negotiated
    assert_eq!(alice.call_state().await, CallState::Closed);
    assert_eq!(engine.negotiations(), 0);
    assert_eq!(engine.acquired(), 1);
    assert_eq!(engine.released(), 1);

    let info = alice.current_call().await.expect("failed attempt is recorded");
    assert!(info.close_reason.is_some());
    assert!(info.connected_at.is_none());

    // The failed attempt leaves the endpoint free to dial again
    let bob = connect_endpoint(
        &registry,
        LoopbackMediaEngine::new(hub),
        RecordingHandler::accepting(),
    )
    .await;
    alice.start_call(bob.local_peer_id()).await.unwrap();
    wait_for_state(&alice, CallState::Active).await;
    wait_for_state(&bob, CallState::Active).await;

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_end_call_is_idempotent() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let engine_a = LoopbackMediaEngine::new(hub.clone());
    let engine_b = LoopbackMediaEngine::new(hub.clone());

    let alice = connect_endpoint(&registry, engine_a.clone(), RecordingHandler::accepting()).await;
    let bob = connect_endpoint(&registry, engine_b, RecordingHandler::accepting()).await;

    // Ending with no session at all is a quiet no-op
    alice.end_call().await.unwrap();
    assert_eq!(alice.call_state().await, CallState::Idle);

    alice.start_call(bob.local_peer_id()).await.unwrap();
    wait_for_state(&alice, CallState::Active).await;

    alice.end_call().await.unwrap();
    alice.end_call().await.unwrap();
    alice.end_call().await.unwrap();

    assert_eq!(alice.call_state().await, CallState::Closed);
    assert_eq!(engine_a.acquired(), 1);
    assert_eq!(engine_a.released(), 1);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_busy_endpoint_rejects_a_second_invite() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();

    let alice = connect_endpoint(
        &registry,
        LoopbackMediaEngine::new(hub.clone()),
        RecordingHandler::accepting(),
    )
    .await;
    let bob = connect_endpoint(
        &registry,
        LoopbackMediaEngine::new(hub.clone()),
        RecordingHandler::accepting(),
    )
    .await;
    let carol_engine = LoopbackMediaEngine::new(hub.clone());
    let carol = connect_endpoint(&registry, carol_engine.clone(), RecordingHandler::accepting()).await;

    alice.start_call(bob.local_peer_id()).await.unwrap();
    wait_for_state(&alice, CallState::Active).await;
    wait_for_state(&bob, CallState::Active).await;

    // The relay is acknowledged (bob is registered), so dialing succeeds;
    // the busy rejection lands moments later and closes carol's attempt
    carol.start_call(bob.local_peer_id()).await.unwrap();
    wait_for_state(&carol, CallState::Closed).await;

    let attempt = carol.current_call().await.expect("attempt is recorded");
    assert_eq!(
        attempt.close_reason.as_deref(),
        Some("rejected by remote: busy")
    );
    assert_eq!(carol_engine.released(), 1);

    // The established call is untouched
    assert_eq!(alice.call_state().await, CallState::Active);
    assert_eq!(bob.call_state().await, CallState::Active);

    // And the busy side refuses to dial out as well
    let err = bob
        .start_call(carol.local_peer_id())
        .await
        .expect_err("dialing while in a call must fail");
    assert!(matches!(err, ClientError::InvalidState { .. }));

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    carol.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_capture_failure_keeps_the_caller_idle() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let broken = LoopbackMediaEngine::failing_acquire(hub.clone());

    let alice = connect_endpoint(&registry, broken.clone(), RecordingHandler::accepting()).await;
    let bob = connect_endpoint(
        &registry,
        LoopbackMediaEngine::new(hub),
        RecordingHandler::accepting(),
    )
    .await;

    let err = alice
        .start_call(bob.local_peer_id())
        .await
        .expect_err("dialing without capture must fail");
    assert!(matches!(err, ClientError::MediaUnavailable { .. }));
    assert!(!err.is_recoverable());

    // No session was ever created; the callee never rang
    assert_eq!(alice.call_state().await, CallState::Idle);
    assert!(alice.current_call().await.is_none());
    assert_eq!(bob.call_state().await, CallState::Idle);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_callee_capture_failure_answers_the_caller() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let engine_a = LoopbackMediaEngine::new(hub.clone());
    let broken_b = LoopbackMediaEngine::failing_acquire(hub);

    let alice = connect_endpoint(&registry, engine_a.clone(), RecordingHandler::accepting()).await;
    let bob = connect_endpoint(&registry, broken_b, RecordingHandler::accepting()).await;

    alice.start_call(bob.local_peer_id()).await.unwrap();

    // Bob's auto-accept hits the broken camera: his session closes and the
    // reject comes back to alice
    wait_for_state(&alice, CallState::Closed).await;
    wait_for_state(&bob, CallState::Closed).await;

    let caller_view = alice.current_call().await.expect("caller session recorded");
    assert_eq!(
        caller_view.close_reason.as_deref(),
        Some("rejected by remote: media unavailable")
    );
    let callee_view = bob.current_call().await.expect("callee session recorded");
    assert_eq!(
        callee_view.close_reason.as_deref(),
        Some("local media unavailable")
    );

    // The caller's capture still came back
    assert_eq!(engine_a.acquired(), 1);
    assert_eq!(engine_a.released(), 1);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_negotiation_deadline_closes_the_call() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let stalled_a = LoopbackMediaEngine::stalling(hub.clone());
    let stalled_b = LoopbackMediaEngine::stalling(hub);
    let handler_a = RecordingHandler::accepting();

    let short = Duration::from_millis(300);
    let alice = connect_endpoint_with(
        ClientConfig::new(registry.channel_url()).with_negotiation_timeout(short),
        stalled_a.clone(),
        handler_a.clone(),
    )
    .await;
    let bob = connect_endpoint_with(
        ClientConfig::new(registry.channel_url()).with_negotiation_timeout(short),
        stalled_b.clone(),
        RecordingHandler::accepting(),
    )
    .await;

    alice.start_call(bob.local_peer_id()).await.unwrap();

    wait_for_state(&alice, CallState::Closed).await;
    wait_for_state(&bob, CallState::Closed).await;

    wait_until("alice's handler heard the timeout", || {
        handler_a
            .errors()
            .iter()
            .any(|e| matches!(e, ClientError::NegotiationTimeout { .. }))
    })
    .await;

    // Both engines started exactly one negotiation and released capture
    assert_eq!(stalled_a.negotiations(), 1);
    assert_eq!(stalled_b.negotiations(), 1);
    assert_eq!(stalled_a.released(), 1);
    assert_eq!(stalled_b.released(), 1);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_side_channel_outside_an_active_call_is_dropped() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let handler_b = RecordingHandler::accepting();

    let alice = connect_endpoint(
        &registry,
        LoopbackMediaEngine::new(hub.clone()),
        RecordingHandler::accepting(),
    )
    .await;
    let bob = connect_endpoint(&registry, LoopbackMediaEngine::new(hub), handler_b.clone()).await;

    // No call at all: accepted and dropped
    alice.send_side_channel("shout into the void").await.unwrap();

    alice.start_call(bob.local_peer_id()).await.unwrap();
    wait_for_state(&alice, CallState::Active).await;
    alice.end_call().await.unwrap();
    wait_for_state(&bob, CallState::Closed).await;

    // Call over: still accepted, still dropped
    alice.send_side_channel("anyone there?").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        handler_b.side_messages().is_empty(),
        "no side-channel message may leak outside an active call"
    );

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_deferred_invite_rings_until_accepted() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let handler_b = RecordingHandler::deferring();

    let alice = connect_endpoint(
        &registry,
        LoopbackMediaEngine::new(hub.clone()),
        RecordingHandler::accepting(),
    )
    .await;
    let bob = connect_endpoint(
        &registry,
        LoopbackMediaEngine::new(hub),
        handler_b.clone(),
    )
    .await;

    alice.start_call(bob.local_peer_id()).await.unwrap();

    wait_for_state(&bob, CallState::Ringing).await;
    wait_until("bob's handler saw the invite", || !handler_b.incoming().is_empty()).await;
    let invite = handler_b.incoming().remove(0);
    assert_eq!(&invite.from, alice.local_peer_id());

    // The caller is already negotiating, parked on its deadline
    assert_eq!(alice.call_state().await, CallState::Negotiating);

    bob.accept_incoming(invite.call_id).await.unwrap();
    wait_for_state(&alice, CallState::Active).await;
    wait_for_state(&bob, CallState::Active).await;

    // Accepting twice is not a lifecycle state anymore
    let err = bob.accept_incoming(invite.call_id).await.expect_err("double accept");
    assert!(matches!(err, ClientError::InvalidState { .. }));

    // Accepting a call id that never existed is recoverable
    let err = bob
        .accept_incoming(CallId::new_v4())
        .await
        .expect_err("unknown call id");
    assert!(matches!(err, ClientError::CallNotFound { .. }));

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_rejected_invite_closes_both_sides() {
    let registry = start_registry().await;
    let hub = LoopbackHub::new();
    let engine_a = LoopbackMediaEngine::new(hub.clone());
    let engine_b = LoopbackMediaEngine::new(hub);

    let alice = connect_endpoint(&registry, engine_a.clone(), RecordingHandler::accepting()).await;
    let bob = connect_endpoint(
        &registry,
        engine_b.clone(),
        RecordingHandler::rejecting(Some("not now")),
    )
    .await;

    alice.start_call(bob.local_peer_id()).await.unwrap();

    wait_for_state(&alice, CallState::Closed).await;
    wait_for_state(&bob, CallState::Closed).await;

    let caller_view = alice.current_call().await.expect("caller session recorded");
    assert_eq!(
        caller_view.close_reason.as_deref(),
        Some("rejected by remote: not now")
    );

    // The callee never committed media to the declined call
    assert_eq!(engine_b.acquired(), 0);
    assert_eq!(engine_a.acquired(), 1);
    assert_eq!(engine_a.released(), 1);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    registry.shutdown().await;
}
