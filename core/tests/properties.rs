//! Property tests for number exclusivity and amount preservation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{World, request};
use proptest::prelude::*;
use raffle_core::types::{NumberId, Reservation, ReservationStatus, UserId};
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Create { user: usize, numbers: Vec<i32> },
    AddNumber { user: usize, number: i32 },
    Cancel { user: usize },
    Confirm { user: usize },
    Advance { seconds: i64 },
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize, prop::collection::hash_set(1..=12i32, 1..4))
            .prop_map(|(user, numbers)| Op::Create { user, numbers: numbers.into_iter().collect() }),
        2 => (0..3usize, 1..=12i32).prop_map(|(user, number)| Op::AddNumber { user, number }),
        1 => (0..3usize).prop_map(|user| Op::Cancel { user }),
        1 => (0..3usize).prop_map(|user| Op::Confirm { user }),
        1 => (1..400i64).prop_map(|seconds| Op::Advance { seconds }),
        1 => Just(Op::Sweep),
    ]
}

async fn all_reservations(world: &World, users: &[UserId]) -> Vec<Reservation> {
    let mut all = Vec::new();
    for user in users {
        all.extend(world.engine.list_for_user(*user).await.unwrap());
    }
    all
}

async fn latest_pending(world: &World, user: UserId) -> Option<Reservation> {
    world
        .engine
        .list_for_user(user)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.status == ReservationStatus::Pending)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn a_number_is_never_held_twice(ops in prop::collection::vec(op_strategy(), 1..40)) {
        tokio_test::block_on(async {
            let world = World::default();
            let raffle = world.raffle(100, 12);
            let users = [UserId::new(), UserId::new(), UserId::new()];
            let mut session = 0;

            for op in ops {
                match op {
                    Op::Create { user, numbers } => {
                        session += 1;
                        let _ = world
                            .engine
                            .create(request(raffle, users[user], &numbers, &format!("s{session}")))
                            .await;
                    }
                    Op::AddNumber { user, number } => {
                        if let Some(r) = latest_pending(&world, users[user]).await {
                            let _ = world.engine.add_number(r.id, NumberId::new(number)).await;
                        }
                    }
                    Op::Cancel { user } => {
                        if let Some(r) = latest_pending(&world, users[user]).await {
                            let _ = world.engine.cancel(r.id).await;
                        }
                    }
                    Op::Confirm { user } => {
                        if let Some(r) = latest_pending(&world, users[user]).await {
                            let _ = world.engine.confirm(r.id).await;
                        }
                    }
                    Op::Advance { seconds } => world.clock.advance(chrono::Duration::seconds(seconds)),
                    Op::Sweep => {
                        world.sweeper.tick().await.unwrap();
                    }
                }

                let mut holders: HashMap<NumberId, usize> = HashMap::new();
                for r in all_reservations(&world, &users).await {
                    if r.status.holds_numbers() {
                        for n in &r.number_ids {
                            *holders.entry(*n).or_default() += 1;
                        }
                    }
                }
                for (number, count) in holders {
                    assert!(count <= 1, "number {number} held by {count} reservations");
                }
            }
        });
    }

    #[test]
    fn payment_amount_equals_price_times_count(
        price in 1..50_000i64,
        count in 1..10usize,
        extra in 0..3usize,
    ) {
        tokio_test::block_on(async {
            let world = World::default();
            let raffle = world.raffle(price, 20);
            let user = UserId::new();
            let picked: Vec<i32> = (1..=i32::try_from(count).unwrap()).collect();

            let mut reservation = world
                .engine
                .create(request(raffle, user, &picked, "s"))
                .await
                .unwrap();
            for i in 0..extra {
                let next = NumberId::new(i32::try_from(count + i + 1).unwrap());
                reservation = world.engine.add_number(reservation.id, next).await.unwrap();
            }

            let expected = price * i64::try_from(count + extra).unwrap();
            assert_eq!(reservation.total_amount.cents(), expected);

            let intent = world
                .payments
                .create_intent(reservation.id, user, None)
                .await
                .unwrap();
            assert_eq!(intent.amount, expected);
        });
    }
}
