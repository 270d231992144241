//! Property tests for pairing and the match state machine

mod fixtures;

use chrono::Duration;
use fixtures::{pc_default, seed_player, t0, triplet, TestSystem};
use proptest::prelude::*;
use ranked_arena::matches::{Match, MatchState};
use ranked_arena::matchmaker::{Candidate, IntervalOverlapRule, PairingRule};
use ranked_arena::queue::{QueueManager, ToleranceSettings};
use ranked_arena::types::CancelReason;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Complete(u32, u32),
    Cancel,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        (0u32..15, 0u32..15).prop_map(|(a, b)| Op::Complete(a, b)),
        Just(Op::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn disjoint_intervals_are_never_compatible(
        rating in 800.0f64..2400.0,
        deviation1 in 30.0f64..350.0,
        deviation2 in 30.0f64..350.0,
        gap in 0.5f64..500.0,
    ) {
        let rule = IntervalOverlapRule::default();
        let low = Candidate::new("low", triplet(rating, deviation1), 0.0);
        let high = Candidate::new(
            "high",
            triplet(rating + deviation1 + deviation2 + gap, deviation2),
            0.0,
        );

        prop_assert!(!rule.compatible(&low, &high));
        prop_assert!(!rule.compatible(&high, &low));
    }

    #[test]
    fn compatibility_is_symmetric(
        r1 in 800.0f64..2400.0,
        r2 in 800.0f64..2400.0,
        d1 in 30.0f64..350.0,
        d2 in 30.0f64..350.0,
        t1 in 0.0f64..600.0,
        t2 in 0.0f64..600.0,
        window in 0.0f64..100.0,
    ) {
        let rule = IntervalOverlapRule::new(window);
        let first = Candidate::new("first", triplet(r1, d1), t1);
        let second = Candidate::new("second", triplet(r2, d2), t2);

        prop_assert_eq!(rule.compatible(&first, &second), rule.compatible(&second, &first));
    }

    #[test]
    fn equal_scores_never_complete(score in any::<u32>()) {
        let mut game_match = Match::new("alice", "bob", pc_default(), t0()).unwrap();
        game_match.start_at(t0()).unwrap();

        prop_assert!(game_match.complete_at(t0() + Duration::minutes(5), score, score).is_err());
        prop_assert_eq!(game_match.state(), MatchState::InProgress);
    }

    #[test]
    fn completed_only_through_in_progress(ops in prop::collection::vec(op(), 1..8)) {
        let mut game_match = Match::new("alice", "bob", pc_default(), t0()).unwrap();
        let mut started = false;

        for (i, op) in ops.into_iter().enumerate() {
            let now = t0() + Duration::minutes(i as i64 + 1);
            let before = game_match.state();
            let result = match op {
                Op::Start => game_match.start_at(now).map(|_| ()),
                Op::Complete(a, b) => game_match.complete_at(now, a, b).map(|_| ()),
                Op::Cancel => game_match.cancel_at(now, CancelReason::Requested).map(|_| ()),
            };

            match (op, before) {
                (Op::Start, MatchState::Created) => {
                    prop_assert!(result.is_ok());
                    started = true;
                }
                (Op::Complete(a, b), MatchState::InProgress) if a != b => prop_assert!(result.is_ok()),
                (Op::Cancel, MatchState::Created | MatchState::InProgress) => {
                    prop_assert!(result.is_ok())
                }
                _ => {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(game_match.state(), before);
                }
            }
        }

        if game_match.state() == MatchState::Completed {
            prop_assert!(started);
            prop_assert!(game_match.start_time().is_some());
            prop_assert!(game_match.end_time() > game_match.start_time());
        }
    }

    #[test]
    fn duplicate_enqueue_keeps_one_entry(repeats in 2usize..6) {
        let queues = QueueManager::new(vec![pc_default()], ToleranceSettings::default());
        let player = "alice".to_string();

        prop_assert!(queues.enqueue_at(&player, &pc_default(), t0()).unwrap());
        for i in 1..repeats {
            let later = t0() + Duration::seconds(i as i64);
            prop_assert!(!queues.enqueue_at(&player, &pc_default(), later).unwrap());
        }

        let entries = queues.snapshot(&pc_default()).unwrap();
        prop_assert_eq!(entries.len(), 1);
        prop_assert_eq!(entries[0].joined_at, t0());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// One tick pairs each player at most once and leaves no compatible pair waiting
    #[test]
    fn one_tick_pairs_greedily_and_exclusively(
        players in prop::collection::vec((1200.0f64..1800.0, 30.0f64..200.0), 2..12),
    ) {
        tokio_test::block_on(async {
            let system = TestSystem::new().await;
            let joined = t0() + Duration::minutes(1);
            for (i, (rating, deviation)) in players.iter().enumerate() {
                let id = format!("player-{}", i);
                seed_player(system.storage.as_ref(), &id, *rating, *deviation).await;
                system.enqueue(&id, &pc_default(), joined).await;
            }

            let created = system.matchmaker.tick_at(joined).await.unwrap();

            let mut seen = HashSet::new();
            for game_match in &created {
                assert!(seen.insert(game_match.player1.clone()));
                assert!(seen.insert(game_match.player2.clone()));
            }

            let rule = IntervalOverlapRule::default();
            let waiting: Vec<Candidate> = system
                .queues
                .snapshot(&pc_default())
                .unwrap()
                .into_iter()
                .map(|entry| {
                    let index: usize = entry.player_id["player-".len()..].parse().unwrap();
                    let (rating, deviation) = players[index];
                    Candidate::new(entry.player_id, triplet(rating, deviation), entry.tolerance)
                })
                .collect();

            assert_eq!(waiting.len() + seen.len(), players.len());
            for (i, first) in waiting.iter().enumerate() {
                assert!(!seen.contains(&first.player_id));
                for second in &waiting[i + 1..] {
                    assert!(
                        !rule.compatible(first, second),
                        "{} and {} are compatible but both left waiting",
                        first.player_id,
                        second.player_id
                    );
                }
            }
        });
    }
}
