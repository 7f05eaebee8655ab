use std::sync::Arc;

use anyhow::Result;

use riptide::{
    AsyncState, IrBank, Kernel, OffloadedTask, SNodeId, SNodeRegistry, StateFlowGraph, StmtKind,
    TaskLaunchRecord, TaskType,
};

struct Fixture {
    bank: Arc<IrBank>,
    sparse: SNodeId,
    x: SNodeId,
    y: SNodeId,
}

fn setup() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut snodes = SNodeRegistry::new();
    let root = snodes.add_root("root");
    let sparse = snodes.add_child(root, "s");
    let x = snodes.add_child(root, "x");
    let y = snodes.add_child(root, "y");
    Fixture {
        bank: Arc::new(IrBank::new(Arc::new(snodes))),
        sparse,
        x,
        y,
    }
}

fn record(bank: &IrBank, kernel: &Arc<Kernel>, task: OffloadedTask) -> TaskLaunchRecord {
    TaskLaunchRecord::new(bank.intern(task), Arc::clone(kernel))
}

fn store(bank: &IrBank, kernel: &Arc<Kernel>, snode: SNodeId) -> TaskLaunchRecord {
    let mut task = OffloadedTask::serial();
    task.push(StmtKind::GlobalStore { snode });
    record(bank, kernel, task)
}

fn load(bank: &IrBank, kernel: &Arc<Kernel>, snode: SNodeId) -> TaskLaunchRecord {
    let mut task = OffloadedTask::serial();
    task.push(StmtKind::GlobalLoad { snode });
    record(bank, kernel, task)
}

#[test]
fn redundant_listgen_is_eliminated() -> Result<()> {
    let f = setup();
    let clear_kernel = Arc::new(Kernel::new("clear"));
    let paint_kernel = Arc::new(Kernel::new("paint"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    graph.insert_task(record(
        &f.bank,
        &clear_kernel,
        OffloadedTask::clear_list(f.sparse),
    ));
    graph.insert_task(record(
        &f.bank,
        &paint_kernel,
        OffloadedTask::listgen(f.sparse),
    ));
    graph.insert_task(record(
        &f.bank,
        &paint_kernel,
        OffloadedTask::listgen(f.sparse),
    ));
    let mut consumer = OffloadedTask::struct_for(f.sparse, 32);
    consumer.push(StmtKind::GlobalStore { snode: f.x });
    graph.insert_task(record(&f.bank, &paint_kernel, consumer));

    assert_eq!(graph.node_count(), 5);
    assert!(graph.has_edge(3, 4, AsyncState::list(f.sparse)));

    assert!(graph.optimize_listgen());
    assert_eq!(graph.node_count(), 4);
    // The struct-for now reads the surviving listgen's output.
    assert!(graph.has_edge(2, 3, AsyncState::list(f.sparse)));
    assert_eq!(graph.meta(3).task_type, TaskType::StructFor);
    graph.check_consistency()?;

    assert!(!graph.optimize_listgen());
    Ok(())
}

#[test]
fn listgens_with_different_parent_lists_survive() -> Result<()> {
    let f = setup();
    let paint_kernel = Arc::new(Kernel::new("paint"));
    let clear_kernel = Arc::new(Kernel::new("clear"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    // A parent-list write between the two listgens moves their parent-list
    // inputs apart, so they are not equivalent.
    let root = f.bank.snodes().parent(f.sparse).unwrap();
    graph.insert_task(record(&f.bank, &paint_kernel, OffloadedTask::listgen(f.sparse)));
    graph.insert_task(record(&f.bank, &clear_kernel, OffloadedTask::clear_list(root)));
    graph.insert_task(record(&f.bank, &paint_kernel, OffloadedTask::listgen(f.sparse)));

    assert!(!graph.optimize_listgen());
    assert_eq!(graph.node_count(), 4);
    graph.check_consistency()?;
    Ok(())
}

#[test]
fn dead_store_respects_latest_owner() -> Result<()> {
    let f = setup();
    let kernel = Arc::new(Kernel::new("k"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    // Sole write, still the latest owner: stays.
    graph.insert_task(store(&f.bank, &kernel, f.x));
    assert!(!graph.optimize_dead_store());
    assert!(graph.meta(1).output_states.contains(&AsyncState::value(f.x)));

    // A reader makes the store used: still stays.
    graph.insert_task(load(&f.bank, &kernel, f.x));
    assert!(!graph.optimize_dead_store());

    graph.check_consistency()?;
    Ok(())
}

#[test]
fn dead_store_erased_once_ownership_moves_on() -> Result<()> {
    let f = setup();
    let kernel = Arc::new(Kernel::new("k"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    graph.insert_task(store(&f.bank, &kernel, f.x));
    graph.insert_task(store(&f.bank, &kernel, f.x));

    let state = AsyncState::value(f.x);
    assert_eq!(graph.latest_owner(state), Some(2));

    assert!(graph.optimize_dead_store());
    // The first write lost its output; the second is the live owner.
    assert!(!graph.meta(1).output_states.contains(&state));
    assert!(graph.meta(2).output_states.contains(&state));
    graph.check_consistency()?;

    assert!(!graph.optimize_dead_store());
    Ok(())
}

#[test]
fn dead_list_store_drops_clear_list_from_body() -> Result<()> {
    let f = setup();
    let kernel = Arc::new(Kernel::new("prologue"));
    let reader_kernel = Arc::new(Kernel::new("epilogue"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    // Serial task clearing a list nothing regenerates, plus a store that
    // stays live through its reader.
    let mut task = OffloadedTask::serial();
    task.push(StmtKind::ClearList { snode: f.sparse });
    task.push(StmtKind::GlobalStore { snode: f.y });
    graph.insert_task(record(&f.bank, &kernel, task));
    graph.insert_task(load(&f.bank, &reader_kernel, f.y));

    let list_state = AsyncState::list(f.sparse);
    assert_eq!(graph.latest_owner(list_state), Some(1));

    assert!(graph.optimize_dead_store());
    // The list output went away even though the task was the latest owner,
    // and the clear-list statement was edited out of the body.
    assert_eq!(graph.node_count(), 3);
    assert!(!graph.meta(1).output_states.contains(&list_state));
    f.bank.with_ir(graph.record(1).ir_handle, |task| {
        assert_eq!(task.body.len(), 1);
        assert!(matches!(task.body[0].kind, StmtKind::GlobalStore { .. }));
    });
    graph.check_consistency()?;

    assert!(!graph.optimize_dead_store());
    Ok(())
}

#[test]
fn emptied_tasks_are_deleted() {
    let f = setup();
    let kernel = Arc::new(Kernel::new("prologue"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    let mut task = OffloadedTask::serial();
    task.push(StmtKind::ClearList { snode: f.sparse });
    graph.insert_task(record(&f.bank, &kernel, task));

    assert!(graph.optimize_dead_store());
    // Erasing the clear-list left an empty serial body behind.
    assert_eq!(graph.node_count(), 1);

    assert!(!graph.optimize_dead_store());
}

#[test]
fn extract_and_reinsert_reproduces_the_quotient_graph() -> Result<()> {
    let f = setup();
    let kernel = Arc::new(Kernel::new("init"));
    let consumer_kernel = Arc::new(Kernel::new("consume"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    graph.insert_task(store(&f.bank, &kernel, f.x));
    graph.insert_task(store(&f.bank, &kernel, f.y));
    let mut consumer = OffloadedTask::struct_for(f.sparse, 32);
    consumer.push(StmtKind::GlobalLoad { snode: f.x });
    consumer.push(StmtKind::GlobalLoad { snode: f.y });
    graph.insert_task(record(&f.bank, &consumer_kernel, consumer));

    assert!(graph.fuse());
    graph.check_consistency()?;
    let expected = graph.edges();

    let records = graph.extract();
    assert_eq!(records.len(), 2);

    let mut rebuilt = StateFlowGraph::new(Arc::clone(&f.bank));
    for rec in records {
        rebuilt.insert_task(rec);
    }
    rebuilt.check_consistency()?;
    assert_eq!(rebuilt.edges(), expected);
    Ok(())
}

#[test]
fn passes_compose_to_a_fixed_point() -> Result<()> {
    let f = setup();
    let clear_kernel = Arc::new(Kernel::new("clear"));
    let paint_kernel = Arc::new(Kernel::new("paint"));
    let mut graph = StateFlowGraph::new(Arc::clone(&f.bank));

    graph.insert_task(record(
        &f.bank,
        &clear_kernel,
        OffloadedTask::clear_list(f.sparse),
    ));
    graph.insert_task(record(
        &f.bank,
        &paint_kernel,
        OffloadedTask::listgen(f.sparse),
    ));
    graph.insert_task(record(
        &f.bank,
        &paint_kernel,
        OffloadedTask::listgen(f.sparse),
    ));
    graph.insert_task(store(&f.bank, &paint_kernel, f.x));
    graph.insert_task(store(&f.bank, &paint_kernel, f.y));

    let mut rounds = 0;
    loop {
        let changed = graph.optimize_listgen() | graph.fuse() | graph.optimize_dead_store();
        if !changed {
            break;
        }
        rounds += 1;
        assert!(rounds < 10, "optimization failed to reach a fixed point");
    }
    graph.check_consistency()?;
    Ok(())
}
