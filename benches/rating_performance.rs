//! Performance benchmarks for rating updates, team balancing and leaderboards

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scrim_room::config::RatingConfig;
use scrim_room::lobby::TeamAssigner;
use scrim_room::rating::{leaderboard, RatingEngine};
use scrim_room::types::{LeaderboardSort, Player, PlayerId, RatingRecord, RiotId};
use std::collections::HashMap;

fn create_roster(size: usize) -> (Vec<Player>, HashMap<PlayerId, RatingRecord>) {
    let mut players = Vec::with_capacity(size);
    let mut ratings = HashMap::with_capacity(size);

    for i in 0..size {
        let player_id = format!("player{}", i);
        players.push(Player {
            player_id: player_id.clone(),
            display_name: format!("Player {}", i),
            riot_id: RiotId::new(format!("Player{}", i), "EUW"),
        });

        let mut record = RatingRecord::new(player_id.clone(), 800 + (i as i64 * 37) % 600);
        record.wins = (i % 7) as u32;
        record.losses = (i % 5) as u32;
        record.total_kills = 20 * i as u64;
        record.total_deaths = 15 * i as u64 + 1;
        ratings.insert(player_id, record);
    }

    (players, ratings)
}

fn bench_rating_updates(c: &mut Criterion) {
    let engine = RatingEngine::new(RatingConfig::default());
    let (players, ratings) = create_roster(10);
    let ids: Vec<PlayerId> = players.iter().map(|p| p.player_id.clone()).collect();
    let (winners, losers) = ids.split_at(5);

    c.bench_function("elo_update_5v5", |b| {
        b.iter_batched(
            || ratings.clone(),
            |mut ratings| {
                let changes = engine
                    .update_ratings(black_box(winners), black_box(losers), &mut ratings)
                    .unwrap();
                black_box(changes);
            },
            criterion::BatchSize::SmallInput,
        )
    });

    c.bench_function("elo_mmr_delta", |b| {
        b.iter(|| black_box(engine.mmr_delta(black_box(1150.0), black_box(980.0))))
    });
}

fn bench_team_assignment(c: &mut Criterion) {
    let (players, ratings) = create_roster(10);

    c.bench_function("balanced_teams_10", |b| {
        b.iter(|| {
            let assignment =
                TeamAssigner::balanced(black_box(&players), black_box(&ratings), 10).unwrap();
            black_box(assignment);
        })
    });

    c.bench_function("captains_draft_10", |b| {
        b.iter(|| {
            let assignment =
                TeamAssigner::captains(black_box(&players), black_box(&ratings), 10, None, None)
                    .unwrap();
            black_box(assignment);
        })
    });
}

fn bench_leaderboard(c: &mut Criterion) {
    let (_, ratings) = create_roster(500);

    c.bench_function("leaderboard_page_mmr_500", |b| {
        b.iter(|| {
            let page = leaderboard::build_page(ratings.values(), LeaderboardSort::Mmr, 0, 10);
            black_box(page);
        })
    });

    c.bench_function("leaderboard_page_kd_500", |b| {
        b.iter(|| {
            let page =
                leaderboard::build_page(ratings.values(), LeaderboardSort::KillDeath, 3, 10);
            black_box(page);
        })
    });
}

criterion_group!(
    benches,
    bench_rating_updates,
    bench_team_assignment,
    bench_leaderboard
);
criterion_main!(benches);
