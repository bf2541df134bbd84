//! Integration tests for the scrim-room service
//!
//! These tests drive the whole system through the command dispatcher:
//! - Account linking against the stats provider
//! - Signup, queue and the three timed votes
//! - Team assignment, reporting and Elo updates
//! - Persistence, history replay and leaderboards
//! - Cancellation, timeouts and guild isolation

mod fixtures;

use scrim_room::config::LobbyConfig;
use scrim_room::rating::RatingStore;
use scrim_room::report::MatchHistoryStore;
use scrim_room::types::{
    ChatCommand, LeaderboardSort, LobbyEvent, MatchFormat, MatchPhase, Player, VoteKind,
    VoteResolution,
};
use std::time::Duration;

use fixtures::{
    account, finished_match, player, reply_kind, reply_message, request, TestSystem, GUILD,
};

/// Link `count` players through the LinkAccount command
async fn link_via_commands(system: &TestSystem, count: usize) {
    for n in 0..count {
        system.stats.add_account(account(n));
        let typed = format!("player{}#euw", n);
        let reply = system
            .send(&player(n), ChatCommand::LinkAccount { riot_id: typed })
            .await;
        assert!(reply.is_ok(), "link failed: {}", reply_message(&reply));
    }
}

/// Every queued player votes for `option` until the vote decides
async fn vote_all(system: &TestSystem, count: usize, kind: VoteKind, option: &str) {
    for n in 0..count {
        let reply = system
            .send(
                &player(n),
                ChatCommand::Vote {
                    kind,
                    option: option.to_string(),
                },
            )
            .await;
        assert!(reply.is_ok(), "vote failed: {}", reply_message(&reply));
        if reply_message(&reply).contains("wins the") {
            return;
        }
    }
    panic!("vote for {} never decided", option);
}

/// Signup, fill a 5v5 queue and vote Balanced / Competitive / first map
async fn start_balanced_match(system: &TestSystem) -> (String, Vec<Player>, Vec<Player>) {
    let reply = system
        .send(
            &player(0),
            ChatCommand::Signup {
                format: MatchFormat::FiveVFive,
            },
        )
        .await;
    assert!(reply.is_ok(), "signup failed: {}", reply_message(&reply));

    for n in 0..10 {
        let reply = system.send(&player(n), ChatCommand::JoinQueue).await;
        assert!(reply.is_ok(), "join failed: {}", reply_message(&reply));
    }

    vote_all(system, 10, VoteKind::Mode, "Balanced").await;
    vote_all(system, 10, VoteKind::MapType, "Competitive Maps").await;

    let maps = system.vote_options(VoteKind::Map);
    assert_eq!(maps.len(), 3);
    vote_all(system, 10, VoteKind::Map, &maps[0]).await;

    system.started_match().expect("match should have started")
}

async fn phase(system: &TestSystem) -> MatchPhase {
    system
        .dispatcher
        .registry()
        .lifecycle(GUILD)
        .await
        .unwrap()
        .phase()
        .await
}

#[tokio::test]
async fn test_complete_balanced_match_workflow() {
    let system = TestSystem::new();
    link_via_commands(&system, 10).await;

    let (map, team1, team2) = start_balanced_match(&system).await;
    assert_eq!(phase(&system).await, MatchPhase::InProgress);
    assert_eq!(team1.len(), 5);
    assert_eq!(team2.len(), 5);
    assert!(system
        .publisher
        .event_names()
        .contains(&"TeamsAssigned"));

    // Team 1 played as Red and won
    system
        .stats
        .set_latest_match(finished_match("m-1", &map, &team1, &team2, true));
    let reply = system.send(&player(0), ChatCommand::Report).await;
    assert!(reply.is_ok(), "report failed: {}", reply_message(&reply));
    assert!(!reply.ephemeral);
    assert!(reply_message(&reply).contains("Team 1 wins"));
    assert!(reply_message(&reply).contains("10 ratings updated"));
    assert_eq!(phase(&system).await, MatchPhase::Idle);
    assert_eq!(system.publisher.count_events("MatchReported"), 1);

    let lifecycle = system.dispatcher.registry().lifecycle(GUILD).await.unwrap();
    lifecycle.wait_for_persistence().await.unwrap();

    let stored = system.ratings.find_all(GUILD).await.unwrap();
    assert_eq!(stored.len(), 10);
    for record in &stored {
        let won = team1.iter().any(|p| p.player_id == record.player_id);
        if won {
            assert!(record.mmr > 1000, "winner {} lost MMR", record.player_id);
            assert_eq!(record.wins, 1);
        } else {
            assert!(record.mmr < 1000, "loser {} gained MMR", record.player_id);
            assert_eq!(record.losses, 1);
        }
        assert_eq!(record.matches_played, 1);
        assert!(record.name.ends_with("#euw"));
    }

    let history = system.history.find_all(GUILD).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].match_id, "m-1");

    println!("✅ Complete balanced match workflow test passed");
}

#[tokio::test]
async fn test_team2_win_is_reconciled_across_provider_colors() {
    let system = TestSystem::new();
    link_via_commands(&system, 10).await;
    let (map, team1, team2) = start_balanced_match(&system).await;

    // Team 2 played as Red and won
    system
        .stats
        .set_latest_match(finished_match("m-2", &map.to_lowercase(), &team2, &team1, true));
    let reply = system.send(&player(3), ChatCommand::Report).await;
    assert!(reply.is_ok(), "report failed: {}", reply_message(&reply));
    assert!(reply_message(&reply).contains("Team 2 wins"));

    let events = system.publisher.events();
    let reported = events.iter().find_map(|event| match event {
        LobbyEvent::MatchReported { changes, .. } => Some(changes.clone()),
        _ => None,
    });
    let changes = reported.expect("MatchReported event");
    for change in changes {
        let on_team2 = team2.iter().any(|p| p.player_id == change.player_id);
        assert_eq!(change.new_mmr > change.old_mmr, on_team2);
    }

    println!("✅ Team 2 reconciliation test passed");
}

#[tokio::test]
async fn test_wrong_map_report_keeps_match_open() {
    let system = TestSystem::new();
    link_via_commands(&system, 10).await;
    let (map, team1, team2) = start_balanced_match(&system).await;

    let other_map = if map == "Pearl" { "Split" } else { "Pearl" };
    system
        .stats
        .set_latest_match(finished_match("m-3", other_map, &team1, &team2, true));

    let reply = system.send(&player(0), ChatCommand::Report).await;
    assert_eq!(reply_kind(&reply), Some("map_mismatch"));
    assert!(!reply.ephemeral);
    assert_eq!(phase(&system).await, MatchPhase::InProgress);
    assert!(system.ratings.find_all(GUILD).await.unwrap().is_empty());

    // A correct report still goes through afterwards
    system
        .stats
        .set_latest_match(finished_match("m-3", &map, &team1, &team2, false));
    let reply = system.send(&player(0), ChatCommand::Report).await;
    assert!(reply.is_ok(), "report failed: {}", reply_message(&reply));
    assert!(reply_message(&reply).contains("Team 2 wins"));

    println!("✅ Map mismatch test passed");
}

#[tokio::test]
async fn test_stats_provider_outage_is_reported_as_external() {
    let system = TestSystem::new();
    link_via_commands(&system, 10).await;
    start_balanced_match(&system).await;

    system.stats.set_unavailable(true);
    let reply = system.send(&player(0), ChatCommand::Report).await;
    assert_eq!(reply_kind(&reply), Some("external_dependency"));
    assert_eq!(phase(&system).await, MatchPhase::InProgress);

    let reply = system
        .send(
            &player(11),
            ChatCommand::LinkAccount {
                riot_id: "Someone#EUW".to_string(),
            },
        )
        .await;
    assert_eq!(reply_kind(&reply), Some("external_dependency"));

    println!("✅ Stats provider outage test passed");
}

#[tokio::test]
async fn test_queue_rules_and_cancel() {
    let system = TestSystem::new();
    link_via_commands(&system, 4).await;

    // Nothing to join before a signup
    let reply = system.send(&player(1), ChatCommand::JoinQueue).await;
    assert_eq!(reply_kind(&reply), Some("precondition"));
    assert!(reply.ephemeral);

    let reply = system
        .send(
            &player(0),
            ChatCommand::Signup {
                format: MatchFormat::FiveVFive,
            },
        )
        .await;
    assert!(reply.is_ok());
    let match_name = reply_message(&reply)
        .split_whitespace()
        .nth(2)
        .unwrap_or_default()
        .to_string();
    assert!(match_name.starts_with("match-"));

    // Unlinked players are turned away
    let reply = system.send(&player(9), ChatCommand::JoinQueue).await;
    assert_eq!(reply_kind(&reply), Some("user_input"));

    for n in 0..3 {
        let reply = system.send(&player(n), ChatCommand::JoinQueue).await;
        assert!(reply.is_ok());
        assert!(reply.ephemeral);
    }
    let reply = system.send(&player(1), ChatCommand::JoinQueue).await;
    assert_eq!(reply_kind(&reply), Some("user_input"));

    let reply = system.send(&player(1), ChatCommand::LeaveQueue).await;
    assert_eq!(reply_message(&reply), "You left the queue (2 queued)");

    let ballot = ChatCommand::Vote {
        kind: VoteKind::Mode,
        option: "Balanced".to_string(),
    };
    let reply = system.send(&player(0), ballot).await;
    assert_eq!(reply_kind(&reply), Some("precondition"));

    let reply = system.send(&player(0), ChatCommand::Cancel).await;
    assert!(reply.is_ok());
    assert!(reply_message(&reply).contains(&match_name));
    assert_eq!(phase(&system).await, MatchPhase::Idle);
    assert_eq!(system.publisher.count_events("MatchCancelled"), 1);

    let reply = system.send(&player(0), ChatCommand::Cancel).await;
    assert_eq!(reply_kind(&reply), Some("precondition"));

    println!("✅ Queue rules and cancel test passed");
}

#[tokio::test(start_paused = true)]
async fn test_vote_timeout_breaks_ties() {
    let config = LobbyConfig {
        mode_vote_seconds: 5,
        ..LobbyConfig::default()
    };
    let system = TestSystem::with_config(config);
    link_via_commands(&system, 6).await;

    let reply = system
        .send(
            &player(0),
            ChatCommand::Signup {
                format: MatchFormat::ThreeVThree,
            },
        )
        .await;
    assert!(reply.is_ok());
    for n in 0..6 {
        assert!(system.send(&player(n), ChatCommand::JoinQueue).await.is_ok());
    }
    assert_eq!(phase(&system).await, MatchPhase::ModeVote);

    // One ballot each; neither reaches the majority of three
    for (n, option) in [(0, "Balanced"), (1, "Captains")] {
        let reply = system
            .send(
                &player(n),
                ChatCommand::Vote {
                    kind: VoteKind::Mode,
                    option: option.to_string(),
                },
            )
            .await;
        assert_eq!(reply_message(&reply), format!("Vote for {} recorded", option));
    }

    tokio::time::sleep(Duration::from_secs(6)).await;

    let decided = system.publisher.events().into_iter().find_map(|event| match event {
        LobbyEvent::VoteDecided {
            kind: VoteKind::Mode,
            option,
            resolution,
            ..
        } => Some((option, resolution)),
        _ => None,
    });
    let (option, resolution) = decided.expect("mode vote should time out");
    assert_eq!(resolution, VoteResolution::TimeoutTie);
    assert!(option == "Balanced" || option == "Captains");
    assert_eq!(phase(&system).await, MatchPhase::MapTypeVote);

    println!("✅ Vote timeout test passed");
}

#[tokio::test]
async fn test_reaggregate_stats_and_leaderboard() {
    let system = TestSystem::new();
    link_via_commands(&system, 10).await;
    let (map, team1, team2) = start_balanced_match(&system).await;
    system
        .stats
        .set_latest_match(finished_match("m-4", &map, &team1, &team2, true));
    assert!(system.send(&player(0), ChatCommand::Report).await.is_ok());

    let before = system
        .dispatcher
        .registry()
        .lifecycle(GUILD)
        .await
        .unwrap()
        .ratings_snapshot()
        .await;

    let reply = system.send(&player(0), ChatCommand::Reaggregate).await;
    assert_eq!(
        reply_message(&reply),
        "Rebuilt 10 player records from 1 matches (0 skipped)"
    );

    let after = system
        .dispatcher
        .registry()
        .lifecycle(GUILD)
        .await
        .unwrap()
        .ratings_snapshot()
        .await;
    for (player_id, record) in &before {
        assert_eq!(after[player_id].mmr, record.mmr, "{} drifted", player_id);
        assert_eq!(after[player_id].wins, record.wins);
    }

    let winner = &team1[0];
    let reply = system
        .send(
            &player(5),
            ChatCommand::Stats {
                account: Some(winner.riot_id.to_string()),
            },
        )
        .await;
    assert!(reply.is_ok(), "stats failed: {}", reply_message(&reply));
    assert!(reply.ephemeral);
    assert!(reply_message(&reply).contains(&winner.riot_id.to_string()));

    let reply = system
        .send(
            &player(5),
            ChatCommand::Leaderboard {
                sort: LeaderboardSort::Mmr,
                page: 0,
            },
        )
        .await;
    assert!(reply.is_ok());
    let message = reply_message(&reply);
    assert!(message.starts_with("Leaderboard by Mmr - page 1/1"));
    assert_eq!(message.lines().count(), 11);

    let reply = system.send(&player(5), ChatCommand::StopLeaderboard).await;
    assert_eq!(reply_message(&reply), "Stopped 1 live leaderboard(s)");

    println!("✅ Reaggregate, stats and leaderboard test passed");
}

#[tokio::test]
async fn test_guilds_are_isolated() {
    let system = TestSystem::new();
    link_via_commands(&system, 2).await;

    let reply = system
        .send(
            &player(0),
            ChatCommand::Signup {
                format: MatchFormat::FiveVFive,
            },
        )
        .await;
    assert!(reply.is_ok());

    let mut other = request(
        &player(1),
        ChatCommand::Signup {
            format: MatchFormat::ThreeVThree,
        },
    );
    other.guild_id = "guild-other".to_string();
    let reply = system.dispatcher.dispatch(&other).await;
    assert!(reply.is_ok(), "second guild signup failed: {}", reply_message(&reply));

    other.command = ChatCommand::JoinQueue;
    assert!(system.dispatcher.dispatch(&other).await.is_ok());

    let snapshots = system.dispatcher.registry().snapshots().await;
    assert_eq!(snapshots.len(), 2);
    let home = snapshots.iter().find(|s| s.guild_id == GUILD).unwrap();
    let away = snapshots.iter().find(|s| s.guild_id == "guild-other").unwrap();
    assert_eq!(home.queued, 0);
    assert_eq!(home.capacity, 10);
    assert_eq!(away.queued, 1);
    assert_eq!(away.capacity, 6);

    println!("✅ Guild isolation test passed");
}

#[tokio::test]
async fn test_account_links_are_unique_and_canonical() {
    let system = TestSystem::new();
    system.stats.add_account(account(0));

    let reply = system
        .send(
            &player(0),
            ChatCommand::LinkAccount {
                riot_id: "PLAYER0#euw".to_string(),
            },
        )
        .await;
    assert_eq!(reply_message(&reply), "Linked your account to Player0#EUW");

    let reply = system
        .send(
            &player(1),
            ChatCommand::LinkAccount {
                riot_id: "player0#EUW".to_string(),
            },
        )
        .await;
    assert_eq!(reply_kind(&reply), Some("user_input"));

    let reply = system
        .send(
            &player(1),
            ChatCommand::LinkAccount {
                riot_id: "Ghost#0000".to_string(),
            },
        )
        .await;
    assert_eq!(reply_kind(&reply), Some("account_not_found"));

    let reply = system
        .send(
            &player(1),
            ChatCommand::LinkAccount {
                riot_id: "no-tag".to_string(),
            },
        )
        .await;
    assert_eq!(reply_kind(&reply), Some("user_input"));

    println!("✅ Account link test passed");
}
