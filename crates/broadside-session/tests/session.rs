//! Integration tests for the session state machine, driven command by
//! command without an actor task.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use broadside_client::{ClientLink, Outbound};
use broadside_protocol::{
    CLOSE_NORMAL, ClientRequest, EnterSetupFailure, Identity, Phase, ServerEvent,
    ShipId,
};
use broadside_session::{
    Admission, INSERT_RESULT, JOIN_TIMEOUT_TIMER, START_SETUP_TIMER, SessionCommand,
    SessionError, SessionTimer,
};
use broadside_transport::ConnectionId;
use common::{Harness, WINNING_ABILITY, blue, placement, red, tags};

// =========================================================================
// Admission and roster
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_admit_new_client_sends_connection_info_then_game_info() {
    let mut h = Harness::new();
    let mut alice = h.connect("alice").unwrap();

    assert_eq!(alice.admission, Admission::Joined);
    let events = alice.events();
    assert_eq!(tags(&events), ["connection_info", "game_info"]);
    match &events[0] {
        ServerEvent::ConnectionInfo {
            identity,
            session,
            reconnect_timeout_ms,
        } => {
            assert_eq!(identity, &alice.identity);
            assert_eq!(session.as_str(), "TESTCODE");
            assert_eq!(*reconnect_timeout_ms, 10_000);
        }
        other => panic!("expected connection_info, got {other:?}"),
    }
    match &events[1] {
        ServerEvent::GameInfo { phase, players, .. } => {
            assert_eq!(*phase, Phase::Lobby);
            assert_eq!(players.len(), 1);
        }
        other => panic!("expected game_info, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_admit_second_client_notifies_first() {
    let mut h = Harness::new();
    let mut alice = h.connect("alice").unwrap();
    alice.drain();

    let bob = h.connect("bob").unwrap();

    assert_eq!(
        alice.events(),
        vec![ServerEvent::PlayerJoin {
            identity: bob.identity.clone(),
            reconnection: false,
        }]
    );
    assert_eq!(h.session.roster().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_admit_connected_identity_is_denied() {
    let mut h = Harness::new();
    let _alice = h.connect("alice").unwrap();

    let result = h.connect("alice");

    assert!(matches!(result, Err(SessionError::AdmissionDenied(_))));
    assert_eq!(h.session.roster().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_roster_identities_stay_unique_across_join_leave_rejoin() {
    let mut h = Harness::new();
    let alice = h.connect("alice").unwrap();
    let _bob = h.connect("bob").unwrap();

    h.session.connection_closed(&alice.identity, alice.conn_id);
    let again = h.connect("alice").unwrap();
    assert_eq!(again.admission, Admission::Joined);
    assert!(h.connect("alice").is_err());

    let mut identities: Vec<&Identity> =
        h.session.roster().iter().map(|c| c.identity()).collect();
    identities.sort();
    identities.dedup();
    assert_eq!(identities.len(), h.session.roster().len());
    assert_eq!(h.session.roster().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_lobby_disconnect_removes_client_for_good() {
    let mut h = Harness::new();
    let alice = h.connect("alice").unwrap();
    let mut bob = h.connect("bob").unwrap();
    bob.drain();

    h.session.connection_closed(&alice.identity, alice.conn_id);

    assert!(h.session.client(&alice.identity).is_none());
    assert_eq!(
        bob.events(),
        vec![ServerEvent::PlayerLeave {
            identity: alice.identity.clone(),
            temporary: false,
        }]
    );
}

// =========================================================================
// Lobby requests and entering setup
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_team_broadcasts_assignment() {
    let mut h = Harness::new();
    let mut alice = h.connect("alice").unwrap();
    alice.drain();

    h.session.handle_request(
        &alice.identity,
        alice.conn_id,
        ClientRequest::JoinTeam { team: red() },
    );

    assert_eq!(
        alice.events(),
        vec![ServerEvent::TeamAssign {
            identity: alice.identity.clone(),
            team: red(),
        }]
    );
    assert_eq!(h.session.client(&alice.identity).unwrap().team, Some(red()));
}

#[tokio::test(start_paused = true)]
async fn test_join_unknown_team_is_ignored() {
    let mut h = Harness::new();
    let mut alice = h.connect("alice").unwrap();
    alice.drain();

    h.session.handle_request(
        &alice.identity,
        alice.conn_id,
        ClientRequest::JoinTeam {
            team: broadside_protocol::TeamId::new("green"),
        },
    );

    assert!(alice.events().is_empty());
    assert_eq!(h.session.client(&alice.identity).unwrap().team, None);
}

#[tokio::test(start_paused = true)]
async fn test_ready_with_empty_team_broadcasts_failure() {
    let mut h = Harness::new();
    let mut alice = h.seat("alice", red());

    let events = alice.events();
    assert!(events.contains(&ServerEvent::EnterSetupFailure {
        reason: EnterSetupFailure::TeamEmpty,
        team: blue(),
    }));
    assert_eq!(h.session.phase(), Phase::Lobby);
}

#[tokio::test(start_paused = true)]
async fn test_ready_over_capacity_broadcasts_failure() {
    let mut h = Harness::new();
    let _alice = h.seat("alice", red());
    let carol = h.connect("carol").unwrap();
    h.session.handle_request(
        &carol.identity,
        carol.conn_id,
        ClientRequest::JoinTeam { team: red() },
    );
    let mut dave = h.seat("dave", blue());
    dave.drain();

    h.session.handle_request(
        &carol.identity,
        carol.conn_id,
        ClientRequest::Ready { ready: true },
    );

    assert!(dave.events().contains(&ServerEvent::EnterSetupFailure {
        reason: EnterSetupFailure::TeamOverCapacity,
        team: red(),
    }));
    assert_eq!(h.session.phase(), Phase::Lobby);
}

#[tokio::test(start_paused = true)]
async fn test_all_ready_enters_setup_and_arms_countdown() {
    let mut h = Harness::new();
    let mut alice = h.seat("alice", red());
    alice.drain();
    let _bob = h.seat("bob", blue());

    assert_eq!(h.session.phase(), Phase::EnteringSetup);
    assert!(h.session.timers().is_pending(START_SETUP_TIMER));
    assert!(
        alice
            .events()
            .contains(&ServerEvent::EnteringSetup { wait_ms: 5_000 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_attempt_enter_setup_outside_lobby_is_noop() {
    let mut h = Harness::new();
    let (mut alice, _bob) = h.into_setup().await;
    assert_eq!(h.session.phase(), Phase::Setup);

    h.session.attempt_enter_setup();

    assert_eq!(h.session.phase(), Phase::Setup);
    assert!(alice.events().is_empty());
    assert!(!h.session.timers().is_pending(START_SETUP_TIMER));
}

#[tokio::test(start_paused = true)]
async fn test_start_setup_finalizes_teams_and_sends_redacted_setup_info() {
    let mut h = Harness::new();
    let mut alice = h.seat("alice", red());
    let _bob = h.seat("bob", blue());
    alice.drain();

    h.advance(Duration::from_millis(5_001)).await;

    assert_eq!(h.session.phase(), Phase::Setup);
    let finalized = h.log.lock().unwrap().finalized.clone().unwrap();
    assert_eq!(finalized[&red()], vec![alice.identity.clone()]);

    let events = alice.events();
    assert_eq!(tags(&events), ["setup_info"]);
    let ServerEvent::SetupInfo { shared, ships } = &events[0] else {
        panic!("expected setup_info");
    };
    assert_eq!(shared.turn_order, vec![red(), blue()]);
    let own = ships.iter().find(|s| s.team == red()).unwrap();
    let enemy = ships.iter().find(|s| s.team == blue()).unwrap();
    assert!(own.position.is_some());
    assert!(enemy.position.is_none(), "opponent ship must be redacted");

    assert!(h.session.roster().iter().all(|c| c.allow_reconnection));
}

#[tokio::test(start_paused = true)]
async fn test_lobby_join_after_entering_setup_is_denied() {
    let mut h = Harness::new();
    let _alice = h.seat("alice", red());
    let _bob = h.seat("bob", blue());
    assert_eq!(h.session.phase(), Phase::EnteringSetup);

    assert!(matches!(
        h.connect("carol"),
        Err(SessionError::AdmissionDenied(_))
    ));
}

// =========================================================================
// Disconnection and reconnection
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_setup_disconnect_keeps_seat_and_notifies_others() {
    let mut h = Harness::new();
    let (alice, mut bob) = h.into_setup().await;

    h.session.connection_closed(&alice.identity, alice.conn_id);

    let client = h.session.client(&alice.identity).unwrap();
    assert!(!client.connected);
    assert!(client.can_reconnect());
    assert_eq!(
        bob.events(),
        vec![ServerEvent::PlayerLeave {
            identity: alice.identity.clone(),
            temporary: true,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_before_deadline_replays_setup_state() {
    let mut h = Harness::new();
    let (alice, mut bob) = h.into_setup().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);
    bob.drain();

    h.advance(Duration::from_secs(5)).await;
    let mut back = h.connect("alice").unwrap();

    assert_eq!(back.admission, Admission::Reconnected);
    assert_eq!(
        tags(&back.events()),
        ["connection_info", "game_info", "setup_info"]
    );
    assert_eq!(
        bob.events(),
        vec![ServerEvent::PlayerJoin {
            identity: alice.identity.clone(),
            reconnection: true,
        }]
    );

    h.advance(Duration::from_secs(30)).await;
    assert!(h.session.client(&alice.identity).unwrap().connected);
    assert!(h.log.lock().unwrap().inactive.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_in_progress_replays_game_start_and_discovered_ships() {
    let mut h = Harness::new();
    let (alice, _bob) = h.into_game().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);

    let mut back = h.connect("alice").unwrap();

    let events = back.events();
    assert_eq!(
        tags(&events),
        [
            "connection_info",
            "game_info",
            "setup_info",
            "game_start",
            "ship_appear"
        ]
    );
    let ServerEvent::ShipAppear { ship } = &events[4] else {
        panic!("expected ship_appear");
    };
    assert_eq!(ship.team, blue());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expiry_removes_client_and_denies_reconnection() {
    let mut h = Harness::new();
    let (alice, mut bob) = h.into_setup().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);
    bob.drain();

    h.advance(Duration::from_millis(10_001)).await;

    assert!(h.session.client(&alice.identity).is_none());
    assert_eq!(h.log.lock().unwrap().inactive, vec![alice.identity.clone()]);
    assert_eq!(
        bob.events(),
        vec![ServerEvent::PlayerTimedOut {
            identity: alice.identity.clone(),
        }]
    );
    assert!(matches!(
        h.connect("alice"),
        Err(SessionError::AdmissionDenied(_))
    ));

    h.advance(Duration::from_secs(60)).await;
    assert_eq!(h.log.lock().unwrap().inactive.len(), 1, "inactive exactly once");
}

#[tokio::test(start_paused = true)]
async fn test_stale_deadline_from_earlier_disconnect_is_ignored() {
    let mut h = Harness::new();
    let (alice, _bob) = h.into_setup().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);
    let first_epoch = h.session.client(&alice.identity).unwrap().disconnect_epoch();
    let back = h.connect("alice").unwrap();
    h.session.connection_closed(&alice.identity, back.conn_id);

    h.session
        .handle_command(SessionCommand::Timer(SessionTimer::ReconnectDeadline {
            identity: alice.identity.clone(),
            epoch: first_epoch,
        }));

    assert!(h.session.client(&alice.identity).is_some());
    assert!(h.log.lock().unwrap().inactive.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_disconnect_after_reconnect_is_ignored() {
    let mut h = Harness::new();
    let (alice, _bob) = h.into_setup().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);
    let _back = h.connect("alice").unwrap();

    // The old connection's close arrives late.
    h.session.connection_closed(&alice.identity, alice.conn_id);

    assert!(h.session.client(&alice.identity).unwrap().connected);
}

#[tokio::test(start_paused = true)]
async fn test_request_from_replaced_connection_is_ignored() {
    let mut h = Harness::new();
    let (alice, _bob) = h.into_setup().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);
    let _back = h.connect("alice").unwrap();

    h.session.handle_request(
        &alice.identity,
        alice.conn_id,
        ClientRequest::ShipPlacement {
            ships: vec![placement(1)],
        },
    );

    assert!(!h.session.client(&alice.identity).unwrap().ships_placed);
}

#[tokio::test(start_paused = true)]
async fn test_everyone_timing_out_kills_session() {
    let mut h = Harness::new();
    let (alice, bob) = h.into_setup().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);
    h.session.connection_closed(&bob.identity, bob.conn_id);

    h.advance(Duration::from_millis(10_001)).await;

    assert_eq!(h.session.phase(), Phase::Killed);
    assert_eq!(h.log.lock().unwrap().teardowns, 1);
}

// =========================================================================
// Setup and game
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_all_ships_placed_starts_game() {
    let mut h = Harness::new();
    let (mut alice, bob) = h.into_setup().await;

    for peer in [&alice, &bob] {
        h.session.handle_request(
            &peer.identity,
            peer.conn_id,
            ClientRequest::ShipPlacement {
                ships: vec![placement(1)],
            },
        );
    }

    assert_eq!(h.session.phase(), Phase::InProgress);
    assert_eq!(h.log.lock().unwrap().game_started, 1);
    assert_eq!(tags(&alice.events()), ["game_start", "turn_start"]);
}

#[tokio::test(start_paused = true)]
async fn test_second_ship_placement_is_ignored() {
    let mut h = Harness::new();
    let (alice, _bob) = h.into_setup().await;
    let request = || ClientRequest::ShipPlacement {
        ships: vec![placement(1)],
    };

    h.session
        .handle_request(&alice.identity, alice.conn_id, request());
    h.session
        .handle_request(&alice.identity, alice.conn_id, request());

    assert_eq!(h.log.lock().unwrap().placements, vec![red()]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_of_unplaced_client_lets_game_start() {
    let mut h = Harness::new();
    let (alice, bob) = h.into_setup().await;
    h.session.handle_request(
        &alice.identity,
        alice.conn_id,
        ClientRequest::ShipPlacement {
            ships: vec![placement(1)],
        },
    );
    h.session.connection_closed(&bob.identity, bob.conn_id);

    h.advance(Duration::from_millis(10_001)).await;

    assert_eq!(h.session.phase(), Phase::InProgress);
}

#[tokio::test(start_paused = true)]
async fn test_end_turn_out_of_turn_is_ignored() {
    let mut h = Harness::new();
    let (mut alice, bob) = h.into_game().await;

    h.session
        .handle_request(&bob.identity, bob.conn_id, ClientRequest::EndTurn {});
    assert!(alice.events().is_empty());

    h.session
        .handle_request(&alice.identity, alice.conn_id, ClientRequest::EndTurn {});
    assert_eq!(
        alice.events(),
        vec![ServerEvent::TurnStart {
            team: blue(),
            turn: 2,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_winning_ability_ends_game_records_result_and_kills() {
    let mut h = Harness::new();
    let (mut alice, _bob) = h.into_game().await;

    h.session.handle_request(
        &alice.identity,
        alice.conn_id,
        ClientRequest::UseAbility {
            ship: ShipId(1),
            ability: WINNING_ABILITY,
            target: None,
        },
    );
    assert_eq!(h.session.phase(), Phase::Finished);
    assert_eq!(
        alice.drain(),
        vec![Outbound::Event(ServerEvent::GameOver {
            winner: Some(red()),
            message: "red wins".into(),
        })]
    );

    h.advance(Duration::from_millis(1)).await;

    assert_eq!(h.session.phase(), Phase::Killed);
    assert_eq!(h.store.count("INSERT INTO results"), 1);
    let (statement, params) = h.store.statements().pop().unwrap();
    assert_eq!(statement, INSERT_RESULT);
    assert_eq!(params[0], "match-1");
    assert_eq!(params[1], "red");
    assert_eq!(
        alice.drain(),
        vec![Outbound::Close {
            code: CLOSE_NORMAL,
            reason: "game over".into(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_result_write_still_kills_session() {
    let mut h = Harness::new();
    let (_alice, _bob) = h.into_game().await;
    h.store.set_failing(true);

    h.session.end(None, "draw");
    h.advance(Duration::from_millis(1)).await;

    assert_eq!(h.session.phase(), Phase::Killed);
    assert_eq!(h.store.count("INSERT INTO results"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_end_outside_game_is_ignored() {
    let mut h = Harness::new();
    let _alice = h.connect("alice").unwrap();

    h.session.end(None, "nope");
    h.advance(Duration::from_millis(1)).await;

    assert_eq!(h.session.phase(), Phase::Lobby);
}

// =========================================================================
// Timers and kill
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_timeout_kills_empty_lobby() {
    let mut h = Harness::new();
    let torn_down = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&torn_down);
    h.session.on_teardown(move |code, reason| {
        assert_eq!(code.as_str(), "TESTCODE");
        assert_eq!(reason, "join timeout");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.advance(Duration::from_secs(31)).await;

    assert_eq!(h.session.phase(), Phase::Killed);
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_join_stops_join_timeout_and_leaving_restarts_it() {
    let mut h = Harness::new();
    let alice = h.connect("alice").unwrap();
    assert!(!h.session.timers().is_pending(JOIN_TIMEOUT_TIMER));

    h.advance(Duration::from_secs(60)).await;
    assert_eq!(h.session.phase(), Phase::Lobby);

    h.session.connection_closed(&alice.identity, alice.conn_id);
    assert!(h.session.timers().is_pending(JOIN_TIMEOUT_TIMER));
    h.advance(Duration::from_secs(31)).await;
    assert_eq!(h.session.phase(), Phase::Killed);
}

#[tokio::test(start_paused = true)]
async fn test_kill_cancels_repeating_timer() {
    let mut h = Harness::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    h.session.timers_mut().define(
        "turn_clock",
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_secs(1),
        true,
    );
    h.session.timers_mut().start("turn_clock");

    h.advance(Duration::from_millis(2_500)).await;
    let before = fired.load(Ordering::SeqCst);
    assert_eq!(before, 2);

    h.session.kill("test");
    h.advance(Duration::from_secs(10)).await;

    assert_eq!(fired.load(Ordering::SeqCst), before);
    assert!(h.session.timers().is_disabled());
}

#[tokio::test(start_paused = true)]
async fn test_kill_closes_connections_and_runs_teardown_once() {
    let mut h = Harness::new();
    let mut alice = h.connect("alice").unwrap();
    alice.drain();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    h.session.on_teardown(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.session.kill("shutdown");
    h.session.kill("again");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.log.lock().unwrap().teardowns, 1);
    assert!(h.session.roster().is_empty());
    assert_eq!(
        alice.drain(),
        vec![Outbound::Close {
            code: CLOSE_NORMAL,
            reason: "shutdown".into(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_kill_cancels_pending_reconnection_deadlines() {
    let mut h = Harness::new();
    let (alice, _bob) = h.into_setup().await;
    h.session.connection_closed(&alice.identity, alice.conn_id);

    h.session.kill("shutdown");
    h.advance(Duration::from_secs(30)).await;

    assert!(h.log.lock().unwrap().inactive.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_admission_after_kill_is_denied() {
    let mut h = Harness::new();
    h.session.kill("shutdown");

    let (link, _rx) = ClientLink::channel(ConnectionId::next());
    let result = h.session.admit(Identity::from_username("alice"), link);

    assert!(matches!(result, Err(SessionError::AdmissionDenied(_))));
}
