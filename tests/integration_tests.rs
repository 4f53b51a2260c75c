use ledger::{
    Action, AggregateId, Cutoff, Domain, Error, Event, EventKind, EventStore, NewEvent, Status,
    StoreConfig, Verdict, filter_accepted, install, listener_fn, rebuild, standings,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

mod test_helpers {
    use super::*;

    pub fn unique_game() -> AggregateId {
        AggregateId::try_new(Uuid::new_v4().to_string()).expect("uuid is a valid aggregate id")
    }

    pub fn mv(payload: &str) -> Action {
        Action::Move(payload.to_string())
    }

    pub fn payloads(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.payload().to_string()).collect()
    }

    /// Polls the log until `done` holds, failing the test after two seconds.
    pub async fn wait_for<F>(store: &EventStore, done: F) -> Vec<Event>
    where
        F: Fn(&[Event]) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let events = store.events().await.expect("store is running");
                if done(&events) {
                    return events;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition was not reached in time")
    }

    pub fn count_kind(events: &[Event], game: &AggregateId, kind: EventKind) -> usize {
        events
            .iter()
            .filter(|e| e.belongs_to(game) && e.kind() == kind)
            .count()
    }
}

use test_helpers::*;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct IllegalMove(String);

/// A board of squares 0..=63. Moves are "from-to"; promotions additionally
/// end in "-q". Side A wins once `limit` actions have been played.
#[derive(Debug, Clone)]
struct Board {
    limit: usize,
    played: Vec<Action>,
}

impl Board {
    fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            played: Vec::new(),
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

impl Domain for Board {
    type Error = IllegalMove;

    fn apply(&mut self, action: &Action) -> Result<(), Self::Error> {
        let mut parts = action.payload().split('-');
        for _ in 0..2 {
            match parts.next().map(str::parse::<u8>) {
                Some(Ok(square)) if square < 64 => {}
                _ => {
                    return Err(IllegalMove(format!(
                        "{} is not a legal move",
                        action.payload()
                    )));
                }
            }
        }
        if let Action::Promotion(payload) = action {
            if !payload.ends_with("-q") {
                return Err(IllegalMove("promotion is invalid".to_string()));
            }
        }
        self.played.push(action.clone());
        Ok(())
    }

    fn status(&self) -> Status {
        if self.played.len() >= self.limit {
            Status::SideAWins
        } else {
            Status::Ongoing
        }
    }
}

#[tokio::test]
async fn test_rejected_move_is_not_part_of_history() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, Board::default)?;
    let game = unique_game();

    let first = store.request(NewEvent::request(game.clone(), mv("12-20"))).await?;
    let second = store.request(NewEvent::request(game.clone(), mv("99-99"))).await?;

    assert_eq!(first, Verdict::Accepted);
    assert_eq!(
        second,
        Verdict::Rejected("99-99 is not a legal move".to_string())
    );

    let events = store.events().await?;
    let accepted = filter_accepted(&events, &game);
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].kind(), EventKind::MoveSucceeded);
    assert_eq!(accepted[0].payload(), "12-20");
    Ok(())
}

#[tokio::test]
async fn test_rollback_discards_the_latest_move() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, Board::default)?;
    let game = unique_game();

    store.request(NewEvent::request(game.clone(), mv("1-2"))).await?;
    store.request(NewEvent::request(game.clone(), mv("3-4"))).await?;
    let verdict = store.request(NewEvent::rollback(game.clone())).await?;
    assert_eq!(verdict, Verdict::Accepted);

    let events = store.events().await?;
    assert_eq!(payloads(&filter_accepted(&events, &game)), vec!["1-2"]);

    let board: Board = rebuild(Board::default, &events, &game, Cutoff::All)?;
    assert_eq!(board.played, vec![mv("1-2")]);
    Ok(())
}

#[tokio::test]
async fn test_rollback_on_a_new_game_is_harmless() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, Board::default)?;
    let game = unique_game();

    assert_eq!(
        store.request(NewEvent::rollback(game.clone())).await?,
        Verdict::Accepted
    );
    assert_eq!(
        store.request(NewEvent::request(game.clone(), mv("5-6"))).await?,
        Verdict::Accepted
    );

    let events = store.events().await?;
    assert_eq!(payloads(&filter_accepted(&events, &game)), vec!["5-6"]);
    Ok(())
}

#[tokio::test]
async fn test_interleaved_games_do_not_affect_each_other() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, Board::default)?;
    let g1 = unique_game();
    let g2 = unique_game();

    store.request(NewEvent::request(g1.clone(), mv("1-2"))).await?;
    store.request(NewEvent::request(g2.clone(), mv("10-11"))).await?;
    store.request(NewEvent::rollback(g2.clone())).await?;
    store.request(NewEvent::request(g1.clone(), mv("3-4"))).await?;
    store
        .request(NewEvent::request(
            g2.clone(),
            Action::Promotion("52-60-q".to_string()),
        ))
        .await?;

    let events = store.events().await?;
    assert_eq!(payloads(&filter_accepted(&events, &g1)), vec!["1-2", "3-4"]);
    assert_eq!(payloads(&filter_accepted(&events, &g2)), vec!["52-60-q"]);
    Ok(())
}

#[tokio::test]
async fn test_cutoff_shows_earlier_positions() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, Board::default)?;
    let game = unique_game();

    for payload in ["1-2", "3-4", "5-6"] {
        store.request(NewEvent::request(game.clone(), mv(payload))).await?;
    }
    let events = store.events().await?;

    let start: Board = rebuild(Board::default, &events, &game, Cutoff::Moves(0))?;
    let middle: Board = rebuild(Board::default, &events, &game, Cutoff::from_signed(2))?;
    let end: Board = rebuild(Board::default, &events, &game, Cutoff::from_signed(-1))?;

    assert!(start.played.is_empty());
    assert_eq!(middle.played, vec![mv("1-2"), mv("3-4")]);
    assert_eq!(end.played.len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_get_gapless_sequence_ids() -> Result<(), Error> {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 25;

    let store = EventStore::start_default();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let store = store.clone();
            tokio::spawn(async move {
                let game = AggregateId::try_new(format!("producer-{producer}"))?;
                for i in 0..PER_PRODUCER {
                    store.persist(NewEvent::new(
                        game.clone(),
                        EventKind::MoveRequested,
                        i.to_string(),
                    ))?;
                    tokio::task::yield_now().await;
                }
                Ok::<(), Error>(())
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("producer task panicked")?;
    }

    let events = store.events().await?;
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence().value()).collect();
    let expected: Vec<u64> = (0..(PRODUCERS * PER_PRODUCER) as u64).collect();
    assert_eq!(sequences, expected);

    for producer in 0..PRODUCERS {
        let game = AggregateId::try_new(format!("producer-{producer}"))?;
        let mine: Vec<usize> = store
            .events_for(&game)
            .await?
            .iter()
            .map(|e| e.payload().parse().expect("numeric payload"))
            .collect();
        assert_eq!(mine, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
    Ok(())
}

#[tokio::test]
async fn test_finishing_move_records_exactly_one_outcome() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, || Board::with_limit(3))?;
    let game = unique_game();

    for payload in ["1-2", "3-4", "5-6"] {
        assert_eq!(
            store.request(NewEvent::request(game.clone(), mv(payload))).await?,
            Verdict::Accepted
        );
    }
    let late = store.request(NewEvent::request(game.clone(), mv("7-8"))).await?;
    assert_eq!(late, Verdict::Rejected("game is already over".to_string()));

    wait_for(&store, |events| {
        count_kind(events, &game, EventKind::SideAWins) > 0
    })
    .await;

    // Give a duplicate the chance to show up before counting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = store.events().await?;

    assert_eq!(count_kind(&events, &game, EventKind::SideAWins), 1);
    let outcome = events
        .iter()
        .find(|e| e.belongs_to(&game) && e.kind() == EventKind::SideAWins)
        .expect("outcome recorded");
    assert_eq!(outcome.payload(), "5-6");
    assert_eq!(standings(&events)[&game], Status::SideAWins);
    Ok(())
}

#[tokio::test]
async fn test_rollback_reopens_a_finished_game() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, || Board::with_limit(2))?;
    let game = unique_game();

    store.request(NewEvent::request(game.clone(), mv("1-2"))).await?;
    store.request(NewEvent::request(game.clone(), mv("3-4"))).await?;
    wait_for(&store, |events| {
        count_kind(events, &game, EventKind::SideAWins) == 1
    })
    .await;

    assert_eq!(
        store.request(NewEvent::rollback(game.clone())).await?,
        Verdict::Accepted
    );
    let events = store.events().await?;
    assert_eq!(standings(&events)[&game], Status::Ongoing);

    assert_eq!(
        store.request(NewEvent::request(game.clone(), mv("5-6"))).await?,
        Verdict::Accepted
    );
    let events = wait_for(&store, |events| {
        count_kind(events, &game, EventKind::SideAWins) == 2
    })
    .await;
    assert_eq!(standings(&events)[&game], Status::SideAWins);
    assert_eq!(payloads(&filter_accepted(&events, &game)), vec!["1-2", "5-6"]);
    Ok(())
}

#[tokio::test]
async fn test_standings_cover_every_game() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, || Board::with_limit(1))?;
    let finished = unique_game();
    let untouched = unique_game();

    store
        .request(NewEvent::request(finished.clone(), mv("1-2")))
        .await?;
    store
        .request(NewEvent::request(untouched.clone(), mv("99-99")))
        .await?;

    let events = wait_for(&store, |events| {
        count_kind(events, &finished, EventKind::SideAWins) == 1
    })
    .await;

    let table = standings(&events);
    assert_eq!(table[&finished], Status::SideAWins);
    assert_eq!(table[&untouched], Status::Ongoing);
    Ok(())
}

#[tokio::test]
async fn test_request_times_out_when_nobody_answers() -> Result<(), Error> {
    let config = StoreConfig::default().with_request_timeout_ms(50)?;
    let store = EventStore::start(config);
    let game = unique_game();

    let result = store.request(NewEvent::request(game.clone(), mv("1-2"))).await;

    match result {
        Err(Error::RequestTimedOut {
            aggregate,
            timeout_ms,
        }) => {
            assert_eq!(aggregate, game);
            assert_eq!(timeout_ms, 50);
        }
        other => panic!("Expected RequestTimedOut, got {:?}", other),
    }

    // The request itself was still recorded.
    assert_eq!(store.events_for(&game).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_listener_keeps_order_while_others_come_and_go() -> Result<(), Error> {
    const EVENTS: u64 = 200;

    let store = EventStore::start_default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.register(listener_fn(move |_store, event| {
        sink.lock().unwrap().push(event.sequence().value());
        Ok(())
    }))?;

    let game = unique_game();
    for i in 0..EVENTS {
        let subscription = store.subscribe(unique_game())?;
        store.persist(NewEvent::new(
            game.clone(),
            EventKind::MoveRequested,
            i.to_string(),
        ))?;
        if i % 2 == 0 {
            subscription.close().await?;
        }
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        while seen.lock().unwrap().len() < EVENTS as usize {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listener did not catch up");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, (0..EVENTS).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_failing_listener_does_not_disturb_others() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, Board::default)?;
    store.register(listener_fn(|_store, event| {
        if event.kind() == EventKind::MoveSucceeded {
            panic!("listener blew up");
        }
        Err("always failing".into())
    }))?;
    let game = unique_game();

    for payload in ["1-2", "3-4"] {
        assert_eq!(
            store.request(NewEvent::request(game.clone(), mv(payload))).await?,
            Verdict::Accepted
        );
    }

    let ids: BTreeSet<u64> = store
        .sequence_ids(&game)
        .await?
        .iter()
        .map(|id| id.value())
        .collect();
    assert_eq!(ids.len(), 4);
    Ok(())
}

#[test]
fn test_blank_aggregate_ids_are_refused() {
    let result: Result<AggregateId, Error> = AggregateId::try_new("   ").map_err(Error::from);
    assert!(matches!(result, Err(Error::InvalidAggregateId(_))));
}

#[tokio::test]
async fn test_request_gets_its_own_verdict_behind_a_pending_one() -> Result<(), Error> {
    let store = EventStore::start_default();
    install(&store, Board::default)?;
    let game = unique_game();

    store.persist(NewEvent::request(game.clone(), mv("1-2")))?;
    let verdict = store.request(NewEvent::request(game.clone(), mv("99-99"))).await?;

    assert_eq!(
        verdict,
        Verdict::Rejected("99-99 is not a legal move".to_string())
    );
    let events = store.events().await?;
    assert_eq!(payloads(&filter_accepted(&events, &game)), vec!["1-2"]);
    Ok(())
}
