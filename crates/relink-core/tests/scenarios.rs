//! End-to-end scenarios through the public engine API.
//!
//! Each test drives one or more batches and checks outcomes, group state and
//! the conflict log together.

use chrono::{NaiveDate, TimeZone, Utc};
use relink_core::batch::{ChannelSink, DeltaOp};
use relink_core::clock::FixedClock;
use relink_core::conflicts::ConflictFilter;
use relink_core::transition::StageRejection;
use relink_core::{
    BatchCoordinator, BatchReport, CandidateEdge, ConflictKind, Engine, EngineConfig, EngineError,
    EntityId, EntitySide, GroupId, RowOutcome, Stage,
};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn coordinator() -> BatchCoordinator {
    let now = Utc
        .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp");
    BatchCoordinator::new(EngineConfig::default()).with_clock(Arc::new(FixedClock(now)))
}

fn go_live() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date")
}

fn id(raw: &str) -> EntityId {
    EntityId::new_unchecked(raw)
}

fn submit(c: &mut BatchCoordinator, rows: &[CandidateEdge]) -> BatchReport {
    c.submit_batch(rows).expect("batch within limit")
}

fn outcome(report: &BatchReport, row: usize) -> &RowOutcome {
    &report.rows[row].outcome
}

// ---------------------------------------------------------------------------
// Classification scenarios
// ---------------------------------------------------------------------------

#[test]
fn chain_through_replacement_then_original() {
    let mut c = coordinator();

    let report = submit(&mut c, &[CandidateEdge::new("A", "B")]);
    assert_eq!(outcome(&report, 0), &RowOutcome::Accepted);
    assert_eq!(report.rows[0].group_id, Some(GroupId(1)));

    let report = submit(&mut c, &[CandidateEdge::new("C", "A")]);
    assert_eq!(
        outcome(&report, 0),
        &RowOutcome::AcceptedWithConflict {
            kind: ConflictKind::Chain
        }
    );
    assert_eq!(c.entity_side(&id("A")), EntitySide::Both);

    let report = submit(&mut c, &[CandidateEdge::new("B", "E")]);
    assert_eq!(
        outcome(&report, 0),
        &RowOutcome::AcceptedWithConflict {
            kind: ConflictKind::Chain
        }
    );

    let snapshot = c.group_snapshot(GroupId(1)).expect("group exists");
    assert_eq!(snapshot.edges.len(), 3);
    assert_eq!(snapshot.members, vec![id("A"), id("B"), id("C"), id("E")]);
    assert!(snapshot.conflict_flags.contains(&ConflictKind::Chain));

    let chains = c.list_conflicts(&ConflictFilter {
        kind: Some(ConflictKind::Chain),
        ..ConflictFilter::default()
    });
    assert_eq!(chains.len(), 2);
}

#[test]
fn fan_out_alone_is_clean() {
    let mut c = coordinator();
    let report = submit(
        &mut c,
        &[CandidateEdge::new("A", "B"), CandidateEdge::new("A", "C")],
    );
    assert_eq!(report.accepted(), 2);
    assert_eq!(report.conflicts(), 0);
    assert!(c.list_conflicts(&ConflictFilter::default()).is_empty());
}

#[test]
fn chaining_through_fanned_out_replacements_is_chain() {
    let mut c = coordinator();
    let report = submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("A", "C"),
            CandidateEdge::new("C", "D"),
            CandidateEdge::new("B", "D"),
        ],
    );
    let kinds: Vec<&RowOutcome> = report.rows.iter().map(|r| &r.outcome).collect();
    assert_eq!(kinds[0], &RowOutcome::Accepted);
    assert_eq!(kinds[1], &RowOutcome::Accepted);
    assert_eq!(
        kinds[2],
        &RowOutcome::AcceptedWithConflict {
            kind: ConflictKind::Chain
        }
    );
    assert_eq!(
        kinds[3],
        &RowOutcome::AcceptedWithConflict {
            kind: ConflictKind::Chain
        }
    );
}

#[test]
fn fan_out_meeting_fan_in_is_many_to_many() {
    let mut c = coordinator();
    let report = submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("A", "C"),
            CandidateEdge::new("E", "C"),
        ],
    );
    assert_eq!(
        outcome(&report, 2),
        &RowOutcome::AcceptedWithConflict {
            kind: ConflictKind::ManyToMany
        }
    );
    let logged = c.list_conflicts(&ConflictFilter {
        entity: Some(id("C")),
        ..ConflictFilter::default()
    });
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].conflict_kind, ConflictKind::ManyToMany);
}

#[test]
fn bridging_two_groups_is_many_to_many() {
    let mut c = coordinator();
    let report = submit(
        &mut c,
        &[
            CandidateEdge::new("A", "X"),
            CandidateEdge::new("Y", "B"),
            CandidateEdge::new("A", "B"),
        ],
    );
    assert_eq!(report.rows[0].group_id, Some(GroupId(1)));
    assert_eq!(report.rows[1].group_id, Some(GroupId(2)));
    assert_eq!(report.rows[2].group_id, Some(GroupId(1)));
    assert_eq!(
        outcome(&report, 2),
        &RowOutcome::AcceptedWithConflict {
            kind: ConflictKind::ManyToMany
        }
    );
    assert!(c.group_snapshot(GroupId(2)).is_none());
}

#[test]
fn reciprocal_pair_is_committed_and_logged() {
    let mut c = coordinator();
    let report = submit(
        &mut c,
        &[CandidateEdge::new("A", "B"), CandidateEdge::new("B", "A")],
    );
    assert_eq!(
        outcome(&report, 1),
        &RowOutcome::AcceptedWithConflict {
            kind: ConflictKind::Reciprocal
        }
    );
    assert_eq!(c.store().len(), 2);
}

#[test]
fn self_loop_is_never_committed() {
    let mut c = coordinator();
    submit(&mut c, &[CandidateEdge::new("A", "B")]);
    let report = submit(
        &mut c,
        &[CandidateEdge::new("A", "A"), CandidateEdge::new(" B ", "B")],
    );
    assert_eq!(outcome(&report, 0), &RowOutcome::RejectedSelfLoop);
    assert_eq!(outcome(&report, 1), &RowOutcome::RejectedSelfLoop);
    assert_eq!(c.store().len(), 1);
    assert!(report.deltas.is_empty());

    let logged = c.list_conflicts(&ConflictFilter {
        kind: Some(ConflictKind::SelfLoop),
        ..ConflictFilter::default()
    });
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].group_id, Some(GroupId(1)));
}

// ---------------------------------------------------------------------------
// Stage lifecycle
// ---------------------------------------------------------------------------

#[test]
fn pending_member_blocks_completion_until_promoted() {
    let mut c = coordinator();
    submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::pending("A", "PENDING***9"),
            CandidateEdge::new("A", "B")
                .with_stage(Stage::TrackingItemTransition)
                .with_go_live(go_live()),
        ],
    );

    let blocked = submit(
        &mut c,
        &[CandidateEdge::new("A", "B").with_stage(Stage::TrackingCompleted)],
    );
    assert_eq!(
        outcome(&blocked, 0),
        &RowOutcome::RejectedStage {
            reason: StageRejection::PendingMembersUnresolved { count: 1 }
        }
    );

    let promoted = submit(&mut c, &[CandidateEdge::promote("A", "PENDING***9", "C")]);
    assert!(outcome(&promoted, 0).is_accepted());
    let snapshot = c.group_snapshot(GroupId(1)).expect("group exists");
    assert!(snapshot.pending.is_empty());

    let done = submit(
        &mut c,
        &[CandidateEdge::new("A", "B").with_stage(Stage::TrackingCompleted)],
    );
    assert_eq!(outcome(&done, 0), &RowOutcome::Accepted);
    let ops: Vec<DeltaOp> = done.deltas.iter().map(|d| d.op).collect();
    assert_eq!(ops, vec![DeltaOp::UpdateStage, DeltaOp::Archive, DeltaOp::Remove]);
}

#[test]
fn deleted_to_item_transition_is_invalid_from_terminal() {
    let mut c = coordinator();
    submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("A", "B").with_stage(Stage::Deleted),
        ],
    );
    let report = submit(
        &mut c,
        &[CandidateEdge::new("A", "B")
            .with_stage(Stage::TrackingItemTransition)
            .with_go_live(go_live())],
    );
    assert_eq!(
        outcome(&report, 0),
        &RowOutcome::RejectedStage {
            reason: StageRejection::InvalidFromTerminal {
                from: Stage::Deleted
            }
        }
    );
}

#[test]
fn backward_and_missing_date_rejections() {
    let mut c = coordinator();
    submit(&mut c, &[CandidateEdge::new("A", "B")]);

    let report = submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B").with_stage(Stage::TrackingItemTransition),
            CandidateEdge::new("A", "B").with_stage(Stage::PendingItemNumber),
        ],
    );
    assert_eq!(
        outcome(&report, 0),
        &RowOutcome::RejectedStage {
            reason: StageRejection::MissingGoLiveDate {
                to: Stage::TrackingItemTransition
            }
        }
    );
    assert_eq!(
        outcome(&report, 1),
        &RowOutcome::RejectedStage {
            reason: StageRejection::BackwardTransition {
                from: Stage::PendingClinicalReadiness,
                to: Stage::PendingItemNumber
            }
        }
    );
}

#[test]
fn restore_override_brings_edge_back() {
    let mut c = coordinator();
    submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("A", "B").with_stage(Stage::Deleted),
        ],
    );
    assert!(c.store().is_empty());

    let report = submit(
        &mut c,
        &[CandidateEdge::new("A", "B")
            .restoring()
            .with_stage(Stage::PendingClinicalReadiness)],
    );
    assert_eq!(outcome(&report, 0), &RowOutcome::Accepted);
    assert_eq!(report.rows[0].stage, Some(Stage::PendingClinicalReadiness));
    assert_eq!(report.triggers.len(), 1);
    assert_eq!(c.entity_side(&id("B")), EntitySide::Replacement);
}

#[test]
fn discontinue_marker_stays_discontinued() {
    let mut c = coordinator();
    submit(&mut c, &[CandidateEdge::new("A", "no replacement")]);
    let report = submit(
        &mut c,
        &[CandidateEdge::discontinue("A").with_stage(Stage::PendingClinicalReadiness)],
    );
    assert!(matches!(
        outcome(&report, 0),
        RowOutcome::RejectedStage {
            reason: StageRejection::BackwardTransition { .. } | StageRejection::StageLocked { .. }
        }
    ));
}

// ---------------------------------------------------------------------------
// Batch contract
// ---------------------------------------------------------------------------

#[test]
fn batch_too_large_rejects_everything_up_front() {
    let engine = Engine::new(EngineConfig {
        max_batch_size: 2,
        ..EngineConfig::default()
    });
    let rows = [
        CandidateEdge::new("A", "B"),
        CandidateEdge::new("C", "D"),
        CandidateEdge::new("E", "F"),
    ];
    let err = engine.submit_batch(&rows).expect_err("over the limit");
    assert!(matches!(err, EngineError::BatchTooLarge { size: 3, max: 2 }));
    assert!(engine.snapshot().expect("snapshot").edges.is_empty());
}

#[test]
fn rows_are_independent_within_a_batch() {
    let mut c = coordinator();
    let report = submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("A", "A"),
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("C", "D"),
        ],
    );
    let indices: Vec<usize> = report.rows.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(report.accepted(), 2);
    assert_eq!(report.rejected(), 2);
    assert_eq!(c.store().len(), 2);
}

#[test]
fn merge_keeps_smaller_group_id() {
    let mut c = coordinator();
    let report = submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("C", "D"),
            CandidateEdge::new("B2", "C"),
            CandidateEdge::new("A", "B2"),
        ],
    );
    assert_eq!(report.rows[3].group_id, Some(GroupId(1)));
    for entity in ["A", "B", "B2", "C", "D"] {
        assert_eq!(c.planner().group_of(&id(entity)), Some(GroupId(1)), "{entity}");
    }
    assert!(c.planner().retired().contains(&GroupId(2)));
}

#[test]
fn triggers_reach_the_channel_sink() {
    let (sink, rx) = ChannelSink::channel();
    let mut c = coordinator().with_sink(Arc::new(sink));
    submit(
        &mut c,
        &[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("A", "B").with_stage(Stage::TrackingDiscontinued),
        ],
    );
    let groups: Vec<GroupId> = rx.try_iter().map(|t| t.group_id).collect();
    assert_eq!(groups, vec![GroupId(1)]);
}
