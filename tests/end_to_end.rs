//! Multi-node tests over the in-process network, plus one over real UDP.

mod common;

use cluster_coord::config::QuorumPolicy;
use cluster_coord::error::ClusterError;
use cluster_coord::membership::types::{Member, MemberRole};
use cluster_coord::node::ClusterNode;
use cluster_coord::replication::types::Operation;
use cluster_coord::transport::Transport;
use cluster_coord::transport::protocol::ClusterMessage;
use common::*;
use std::collections::HashSet;

fn note(text: &str) -> Operation {
    Operation::new("note", text.as_bytes().to_vec())
}

// ============================================================
// DISCOVERY
// ============================================================

#[tokio::test]
async fn test_three_nodes_agree_on_a_single_master() {
    let cluster = TestCluster::new(3).await;
    let master = cluster.address(0);

    for node in &cluster.nodes {
        let view = node.membership.snapshot();
        assert_eq!(view.master, Some(master));
        assert_eq!(view.live_addresses().len(), 3);
    }
    assert_eq!(cluster.self_declared_masters(&[0, 1, 2]), 1);

    cluster.shutdown();
}

#[tokio::test]
async fn test_late_joiner_is_admitted_through_a_follower_view() {
    // ARRANGE
    let cluster = TestCluster::new(2).await;
    let addr = local(get_test_port());
    let (effects, _applied) = recording_effects();
    let late = ClusterNode::start(
        test_config(addr).build().unwrap(),
        cluster.network.endpoint(addr),
        effects,
    );

    // ACT
    let role = late.join_cluster().await;

    // ASSERT: every node, the follower included, learns about it
    assert_eq!(role, MemberRole::Follower);
    assert!(
        cluster
            .wait_until(|c| c.node(1).membership.snapshot().is_live(&addr))
            .await
    );
    assert_eq!(late.membership.snapshot().master, Some(cluster.address(0)));

    late.shutdown();
    cluster.shutdown();
}

// ============================================================
// REPLICATION
// ============================================================

#[tokio::test]
async fn test_committed_entries_are_identical_on_every_node() {
    // ARRANGE
    let cluster = TestCluster::new(3).await;

    // ACT
    let mut indices = Vec::new();
    for text in ["alpha", "beta", "gamma"] {
        indices.push(cluster.node(0).submit(note(text)).await.unwrap());
    }

    // ASSERT
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(
        cluster
            .wait_until(|c| c.nodes.iter().all(|n| n.last_committed_index() == 3))
            .await
    );
    for applied in &cluster.applied {
        assert_eq!(applied.get(&1).unwrap().as_str(), "alpha");
        assert_eq!(applied.get(&2).unwrap().as_str(), "beta");
        assert_eq!(applied.get(&3).unwrap().as_str(), "gamma");
    }

    cluster.shutdown();
}

#[tokio::test]
async fn test_concurrent_submissions_get_distinct_indices() {
    // ARRANGE
    let cluster = TestCluster::new(3).await;
    let master = cluster.node(0).clone();

    // ACT
    let submissions = (0..20).map(|i| {
        let master = master.clone();
        async move { master.submit(note(&format!("op-{}", i))).await }
    });
    let results = futures::future::join_all(submissions).await;

    // ASSERT
    let indices: HashSet<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(indices, (1..=20).collect::<HashSet<_>>());
    assert!(
        cluster
            .wait_until(|c| c.applied.iter().all(|a| a.len() == 20))
            .await
    );

    cluster.shutdown();
}

// ============================================================
// FAILURES
// ============================================================

#[tokio::test]
async fn test_crashed_follower_is_evicted_everywhere() {
    // ARRANGE
    let cluster = TestCluster::new(3).await;
    let crashed = cluster.address(2);
    cluster.crash(2);

    // ACT
    let index = cluster.node(0).submit(note("after crash")).await.unwrap();

    // ASSERT
    assert!(cluster.node(0).log.is_committed(index));
    assert!(!cluster.node(0).membership.snapshot().is_live(&crashed));
    assert!(
        cluster
            .wait_until(|c| {
                c.node(1).log.is_committed(index)
                    && !c.node(1).membership.snapshot().is_live(&crashed)
            })
            .await
    );
    assert!(cluster.applied[2].get(&index).is_none());

    cluster.shutdown();
}

#[tokio::test]
async fn test_crashed_master_is_replaced_by_lowest_survivor() {
    // ARRANGE
    let cluster = TestCluster::new(3).await;
    let old_master = cluster.address(0);
    let heir = cluster.address(1);
    cluster.crash(0);

    // ACT: a follower originates and discovers the failure
    let index = cluster.node(2).submit(note("headless")).await.unwrap();

    // ASSERT
    assert!(
        cluster
            .wait_until(|c| {
                [1, 2].iter().all(|i| {
                    let view = c.node(*i).membership.snapshot();
                    view.master == Some(heir) && !view.is_live(&old_master)
                })
            })
            .await
    );
    assert_eq!(cluster.self_declared_masters(&[1, 2]), 1);
    assert!(cluster.wait_until(|c| c.node(1).log.is_committed(index)).await);

    cluster.shutdown();
}

#[tokio::test]
async fn test_recovered_node_rejoins_and_receives_new_entries() {
    // ARRANGE: crash a follower and let a submission evict it
    let cluster = TestCluster::new(2).await;
    let follower = cluster.address(1);
    cluster.crash(1);
    cluster.node(0).submit(note("while down")).await.unwrap();
    assert!(!cluster.node(0).membership.snapshot().is_live(&follower));

    // ACT
    cluster.recover(1);
    let role = cluster.node(1).join_cluster().await;
    let index = cluster.node(0).submit(note("welcome back")).await.unwrap();

    // ASSERT
    assert_eq!(role, MemberRole::Follower);
    assert!(cluster.node(0).membership.snapshot().is_live(&follower));
    assert!(cluster.wait_until(|c| c.node(1).log.is_committed(index)).await);
    assert!(cluster.applied[1].get(&1).is_none(), "no catch-up of missed entries");

    cluster.shutdown();
}

#[tokio::test]
async fn test_restarted_master_rejoins_and_views_converge() {
    // ARRANGE
    let mut cluster = TestCluster::new(3).await;
    let restarted = cluster.address(0);
    let heir = cluster.address(1);

    // ACT: node 0 comes back on its old address with no state
    let role = cluster.restart(0).await;

    // ASSERT: the lowest survivor took over and every view holds all three
    assert_eq!(role, MemberRole::Follower);
    assert!(
        cluster
            .wait_until(|c| {
                c.nodes.iter().all(|n| {
                    let view = n.membership.snapshot();
                    view.master == Some(heir)
                        && view.is_live(&restarted)
                        && view.live_addresses().len() == 3
                })
            })
            .await
    );
    assert_eq!(cluster.self_declared_masters(&[0, 1, 2]), 1);

    let index = cluster.node(0).submit(note("after restart")).await.unwrap();
    assert!(cluster.wait_until(|c| c.nodes.iter().all(|n| n.log.is_committed(index))).await);
    for applied in &cluster.applied {
        assert_eq!(applied.get(&index).unwrap().as_str(), "after restart");
    }

    cluster.shutdown();
}

#[tokio::test]
async fn test_unresponsive_member_fails_submission_at_deadline() {
    // ARRANGE: a member that is admitted but never acknowledges anything
    let cluster = TestCluster::with_config(2, |b| {
        b.member_timeout_ms(10_000).submit_deadline_ms(200)
    })
    .await;
    let mute_addr = local(get_test_port());
    let mute = cluster.network.endpoint(mute_addr);
    mute.send_to(
        cluster.address(0),
        &ClusterMessage::Discover {
            member: Member::new(mute_addr, MemberRole::Joining),
        },
    )
    .await
    .unwrap();
    assert!(
        cluster
            .wait_until(|c| c.node(0).membership.snapshot().is_live(&mute_addr))
            .await
    );

    // ACT
    let result = cluster.node(0).submit(note("stuck")).await;

    // ASSERT: nothing was committed anywhere
    let index = match result {
        Err(ClusterError::QuorumUnreachable { index, .. }) => index,
        other => panic!("expected QuorumUnreachable, got {:?}", other),
    };
    assert!(!cluster.node(0).log.is_committed(index));
    assert!(!cluster.node(1).log.is_committed(index));
    assert!(cluster.applied.iter().all(|a| a.is_empty()));

    cluster.shutdown();
}

#[tokio::test]
async fn test_majority_commits_past_an_unresponsive_member() {
    let cluster = TestCluster::with_config(3, |b| {
        b.quorum(QuorumPolicy::Majority).member_timeout_ms(10_000)
    })
    .await;
    let mute_addr = local(get_test_port());
    let mute = cluster.network.endpoint(mute_addr);
    mute.send_to(
        cluster.address(0),
        &ClusterMessage::Discover {
            member: Member::new(mute_addr, MemberRole::Joining),
        },
    )
    .await
    .unwrap();
    assert!(
        cluster
            .wait_until(|c| c.node(0).membership.snapshot().is_live(&mute_addr))
            .await
    );

    let index = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        cluster.node(0).submit(note("majority")),
    )
    .await
    .expect("majority should not wait for the mute member")
    .unwrap();

    assert!(cluster.wait_until(|c| c.nodes.iter().all(|n| n.log.is_committed(index))).await);

    cluster.shutdown();
}

// ============================================================
// UDP
// ============================================================

#[tokio::test]
async fn test_two_nodes_over_udp() {
    // ARRANGE
    let seed_addr = local(get_test_port());
    let joiner_addr = local(get_test_port());
    let (seed_effects, seed_applied) = recording_effects();
    let (joiner_effects, joiner_applied) = recording_effects();

    let seed = ClusterNode::bind(test_config(seed_addr).build().unwrap(), seed_effects)
        .await
        .unwrap();
    assert_eq!(seed.join_cluster().await, MemberRole::Master);

    let joiner = ClusterNode::bind(
        test_config(joiner_addr).seed(seed_addr).build().unwrap(),
        joiner_effects,
    )
    .await
    .unwrap();

    // ACT
    let role = joiner.join_cluster().await;
    let index = seed.submit(note("over the wire")).await.unwrap();

    // ASSERT
    assert_eq!(role, MemberRole::Follower);
    assert_eq!(seed.membership.members().len(), 2);
    for _ in 0..100 {
        if joiner.log.is_committed(index) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(seed_applied.get(&index).unwrap().as_str(), "over the wire");
    assert_eq!(joiner_applied.get(&index).unwrap().as_str(), "over the wire");

    seed.shutdown();
    joiner.shutdown();
}

#[tokio::test]
async fn test_oversized_operation_over_udp_evicts_nobody() {
    // ARRANGE
    let seed_addr = local(get_test_port());
    let joiner_addr = local(get_test_port());
    let (seed_effects, _seed_applied) = recording_effects();
    let (joiner_effects, joiner_applied) = recording_effects();

    let seed = ClusterNode::bind(test_config(seed_addr).build().unwrap(), seed_effects)
        .await
        .unwrap();
    seed.join_cluster().await;
    let joiner = ClusterNode::bind(
        test_config(joiner_addr).seed(seed_addr).build().unwrap(),
        joiner_effects,
    )
    .await
    .unwrap();
    assert_eq!(joiner.join_cluster().await, MemberRole::Follower);

    // ACT: larger than any UDP datagram
    let result = seed
        .submit(Operation::new("note", vec![b'x'; 70_000]))
        .await;

    // ASSERT: refused locally, the joiner stays a member and keeps replicating
    assert!(
        matches!(result, Err(ClusterError::OperationTooLarge { .. })),
        "unexpected result: {:?}",
        result
    );
    assert!(seed.membership.snapshot().is_live(&joiner_addr));
    assert_eq!(seed.membership.members().len(), 2);

    let index = seed.submit(note("still replicated")).await.unwrap();
    assert_eq!(index, 1);
    for _ in 0..100 {
        if joiner.log.is_committed(index) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(joiner_applied.get(&index).unwrap().as_str(), "still replicated");

    seed.shutdown();
    joiner.shutdown();
}
