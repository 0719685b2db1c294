use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;
use task_pool::{PoolConfig, PoolSnapshot, Scheduler, TaskId, TaskStatus};

#[derive(Debug, Clone)]
enum Op {
    Create,
    Schedule(usize),
    Stop(usize, bool),
    SetCapacity(usize),
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        3 => any::<usize>().prop_map(Op::Schedule),
        2 => (any::<usize>(), any::<bool>()).prop_map(|(idx, forced)| Op::Stop(idx, forced)),
        1 => (1usize..6).prop_map(Op::SetCapacity),
        2 => (0u64..40).prop_map(Op::Wait),
    ]
}

fn check_invariants(snapshot: &PoolSnapshot, created: &[TaskId]) {
    let mut seen = HashSet::new();
    for (list, status) in [
        (&snapshot.initialized, TaskStatus::Initialized),
        (&snapshot.pending, TaskStatus::Pending),
        (&snapshot.active, TaskStatus::Active),
    ] {
        for task in list {
            assert!(seen.insert(task.id), "{} listed twice", task.id);
            assert_eq!(task.status, status);
        }
    }
    for id in created {
        let listed = seen.contains(id);
        let terminated = snapshot
            .terminated
            .iter()
            .any(|task| task.id == *id);
        assert!(listed != terminated, "{id} must be live or terminated");
    }

    let gate = &snapshot.gate;
    assert_eq!(
        gate.available + gate.issued,
        gate.capacity + gate.pending_reduction
    );
    assert_eq!(gate.issued, snapshot.active.len());
    assert_eq!(gate.waiting, snapshot.pending.len());
    if gate.pending_reduction == 0 {
        assert_eq!(gate.available + snapshot.active.len(), gate.capacity);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_membership_and_permits_stay_consistent(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let config = PoolConfig::for_testing().with_initial_capacity(2).unwrap();
            let scheduler = Scheduler::new(config).unwrap();
            let mut created = Vec::new();

            for op in ops {
                match op {
                    Op::Create => created.push(scheduler.create_task().unwrap()),
                    Op::Schedule(idx) if !created.is_empty() => {
                        let id = created[idx % created.len()];
                        if let Err(err) = scheduler.schedule(id) {
                            assert!(err.is_invalid_state(), "unexpected error {err}");
                        }
                    }
                    Op::Stop(idx, forced) if !created.is_empty() => {
                        let id = created[idx % created.len()];
                        scheduler.request_stop(id, forced).unwrap();
                    }
                    Op::SetCapacity(capacity) => {
                        scheduler.set_capacity(capacity).unwrap();
                    }
                    Op::Wait(millis) => tokio::time::sleep(Duration::from_millis(millis)).await,
                    _ => {}
                }
                check_invariants(&scheduler.observe(), &created);
            }

            scheduler.shutdown().await;
            let snapshot = scheduler.observe();
            check_invariants(&snapshot, &created);
            assert!(snapshot.pending.is_empty());
            assert!(snapshot.active.is_empty());
            assert_eq!(snapshot.gate.issued, 0);
            assert!(snapshot.is_steady());
        });
    }
}
