//! Subsystem, image and thread group lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;

use vecmath_offload::config::MachineConfig;
use vecmath_offload::coproc::{
    GroupState, ImageBuilder, JoinCause, KernelRegistry, Machine, Runtime, ThreadArgument, ThreadAttribute, ThreadExit,
    ThreadId,
};
use vecmath_offload::error::{OffloadError, STATUS_ESTAT};
use vecmath_offload::kernel::{self, VECMATH_ENTRY};

const STATUS_SYMBOL: &str = "status_main";

fn status_image() -> Vec<u8> {
    ImageBuilder::new()
        .entry(0)
        .text(0, ImageBuilder::trampoline(STATUS_SYMBOL))
        .build()
}

/// A machine whose `status_main` kernel exits with `arg1`.
fn status_machine() -> Arc<Machine> {
    let mut registry = KernelRegistry::with_builtin();
    registry.register(STATUS_SYMBOL, |_, arg| Ok(arg.arg1 as i32));
    Machine::with_kernels(MachineConfig::default(), registry).unwrap()
}

fn status_argument(status: u64) -> ThreadArgument {
    ThreadArgument {
        arg1: status,
        ..ThreadArgument::default()
    }
}

#[test]
fn test_initialize_twice() {
    let machine = status_machine();
    let runtime = Runtime::initialize(&machine, 2, 0).unwrap();
    assert!(machine.is_initialized());
    assert_eq!(
        Runtime::initialize(&machine, 1, 0).unwrap_err(),
        OffloadError::AlreadyInitialized
    );

    drop(runtime);
    assert!(!machine.is_initialized());
    assert!(Runtime::initialize(&machine, 1, 0).is_ok());
}

#[test]
fn test_unit_reservation() {
    let machine = status_machine();
    assert!(matches!(
        Runtime::initialize(&machine, 5, 2),
        Err(OffloadError::NoFreeUnits {
            requested: 7,
            available: 6
        })
    ));
    assert!(Runtime::initialize(&machine, 0, 0).is_err());

    let runtime = Runtime::initialize(&machine, 4, 2).unwrap();
    assert_eq!(runtime.units(), 4);
    assert_eq!(runtime.raw_units(), 2);
    assert_eq!(runtime.unclaimed_units(), 4);
}

#[test]
fn test_group_claims_and_releases_units() {
    let machine = status_machine();
    let runtime = Runtime::initialize(&machine, 3, 0).unwrap();

    let first = runtime.create_group("first", 2, 100).unwrap();
    assert_eq!(runtime.unclaimed_units(), 1);
    assert_eq!(machine.units_in_use(), 2);

    let err = runtime.create_group("second", 2, 100).unwrap_err();
    assert_eq!(
        err,
        OffloadError::GroupResourcesExhausted {
            requested: 2,
            available: 1
        }
    );

    drop(first);
    assert_eq!(runtime.unclaimed_units(), 3);
    assert!(runtime.create_group("second", 2, 100).is_ok());
}

#[test]
fn test_priority_bounds() {
    let machine = status_machine();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    for priority in [0, 15, 256, 1000] {
        assert_eq!(
            runtime.create_group("g", 1, priority).unwrap_err(),
            OffloadError::InvalidPriority(priority)
        );
    }
    for priority in [16, 255] {
        let group = runtime.create_group("g", 1, priority).unwrap();
        assert_eq!(group.priority(), priority);
    }
    assert!(runtime.create_group("", 1, 100).is_err());
    assert!(runtime.create_group("g", 0, 100).is_err());
    assert_eq!(machine.threads_started(), 0);
}

#[test]
fn test_group_state_machine() {
    let machine = status_machine();
    let runtime = Runtime::initialize(&machine, 2, 0).unwrap();
    let image = runtime.import_image(&status_image()).unwrap();
    let mut group = runtime.create_group("states", 2, 100).unwrap();
    assert_eq!(group.state(), GroupState::Initialized);

    let err = group.start().unwrap_err();
    assert_eq!(err.status_code(), STATUS_ESTAT);
    assert!(matches!(
        err,
        OffloadError::InvalidGroupState {
            state: GroupState::Initialized,
            ..
        }
    ));
    assert!(group.join().is_err());

    let attribute = ThreadAttribute::named("worker");
    assert_eq!(group.create_thread(&image, status_argument(3), &attribute).unwrap(), ThreadId(0));
    assert_eq!(group.state(), GroupState::Initialized);
    assert_eq!(group.create_thread(&image, status_argument(4), &attribute).unwrap(), ThreadId(1));
    assert_eq!(group.state(), GroupState::Ready);
    assert_eq!(group.thread_count(), 2);

    assert!(matches!(
        group.create_thread(&image, status_argument(5), &attribute),
        Err(OffloadError::GroupFull { capacity: 2, .. })
    ));

    group.start().unwrap();
    assert_eq!(group.state(), GroupState::Running);
    assert!(group.start().is_err());
    assert!(group.destroy().is_err());

    let exit = group.join().unwrap();
    assert_eq!(group.state(), GroupState::Joined);
    assert_eq!(exit.cause, JoinCause::AllThreadsExited);
    assert_eq!(exit.status, 3);
    assert_eq!(
        exit.threads,
        vec![(ThreadId(0), ThreadExit::Exited(3)), (ThreadId(1), ThreadExit::Exited(4))]
    );
    assert!(group.join().is_err());

    group.destroy().unwrap();
    assert_eq!(group.state(), GroupState::Destroyed);
    assert!(group.destroy().is_err());
    assert_eq!(runtime.unclaimed_units(), 2);
    assert_eq!(machine.threads_started(), 2);
}

#[test]
fn test_destroy_before_start() {
    let machine = status_machine();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    let image = runtime.import_image(&status_image()).unwrap();
    let mut group = runtime.create_group("unused", 1, 100).unwrap();
    group
        .create_thread(&image, ThreadArgument::default(), &ThreadAttribute::named("t"))
        .unwrap();
    group.destroy().unwrap();
    assert_eq!(runtime.unclaimed_units(), 1);
    assert_eq!(machine.threads_started(), 0);
}

#[test]
fn test_closed_image_rejects_threads() {
    let machine = status_machine();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    let mut image = runtime.import_image(&status_image()).unwrap();
    assert!(image.is_open());
    image.close().unwrap();
    assert!(!image.is_open());
    assert_eq!(image.close().unwrap_err(), OffloadError::ImageClosed);

    let mut group = runtime.create_group("g", 1, 100).unwrap();
    let err = group
        .create_thread(&image, ThreadArgument::default(), &ThreadAttribute::named("t"))
        .unwrap_err();
    assert_eq!(err, OffloadError::ImageClosed);
    assert_eq!(group.thread_count(), 0);
}

#[test]
fn test_closing_image_does_not_affect_created_threads() {
    let machine = status_machine();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    let mut image = runtime.import_image(&status_image()).unwrap();
    let mut group = runtime.create_group("g", 1, 100).unwrap();
    group
        .create_thread(&image, status_argument(9), &ThreadAttribute::named("t"))
        .unwrap();
    image.close().unwrap();

    group.start().unwrap();
    assert_eq!(group.join().unwrap().status, 9);
}

#[test]
fn test_unknown_entry_symbol() {
    let machine = Machine::new(MachineConfig::default()).unwrap();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    let image = runtime.import_image(&status_image()).unwrap();
    let mut group = runtime.create_group("g", 1, 100).unwrap();
    let err = group
        .create_thread(&image, ThreadArgument::default(), &ThreadAttribute::named("t"))
        .unwrap_err();
    assert_eq!(err, OffloadError::UnknownEntry(STATUS_SYMBOL.into()));
}

#[test]
fn test_embedded_image_imports() {
    let machine = Machine::new(MachineConfig::default()).unwrap();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    let image = runtime.import_image(kernel::embedded_image()).unwrap();
    assert_eq!(image.image().unwrap().entry_symbol(), VECMATH_ENTRY);
}

#[test]
fn test_start_does_not_wait_for_threads() {
    let (release, gate) = bounded::<()>(0);
    let mut registry = KernelRegistry::new();
    registry.register(STATUS_SYMBOL, move |_, _| {
        gate.recv().map(|()| 0).or(Ok(1))
    });
    let machine = Machine::with_kernels(MachineConfig::default(), registry).unwrap();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    let image = runtime.import_image(&status_image()).unwrap();
    let mut group = runtime.create_group("gated", 1, 100).unwrap();
    group
        .create_thread(&image, ThreadArgument::default(), &ThreadAttribute::named("t"))
        .unwrap();

    // the kernel blocks until released, so start must return first
    group.start().unwrap();
    assert_eq!(group.state(), GroupState::Running);
    release.send(()).unwrap();

    let exit = group.join().unwrap();
    assert_eq!(exit.status, 0);
}

#[test]
fn test_dropping_running_group_joins_it() {
    static FINISHED: AtomicBool = AtomicBool::new(false);

    let mut registry = KernelRegistry::new();
    registry.register(STATUS_SYMBOL, |_, _| {
        std::thread::sleep(Duration::from_millis(50));
        FINISHED.store(true, Ordering::SeqCst);
        Ok(0)
    });
    let machine = Machine::with_kernels(MachineConfig::default(), registry).unwrap();
    let runtime = Runtime::initialize(&machine, 1, 0).unwrap();
    let image = runtime.import_image(&status_image()).unwrap();
    {
        let mut group = runtime.create_group("dropped", 1, 100).unwrap();
        group
            .create_thread(&image, ThreadArgument::default(), &ThreadAttribute::named("t"))
            .unwrap();
        group.start().unwrap();
    }
    assert!(FINISHED.load(Ordering::SeqCst));
    assert_eq!(runtime.unclaimed_units(), 1);
}

#[test]
fn test_terminated_takes_precedence_over_fault() {
    let mut registry = KernelRegistry::new();
    registry.register(STATUS_SYMBOL, |ctx, arg| match arg.arg1 {
        0 => ctx.wait(99).map(|()| 0),
        _ => panic!("thread {} gave up", arg.arg1),
    });
    let machine = Machine::with_kernels(MachineConfig::default(), registry).unwrap();
    let runtime = Runtime::initialize(&machine, 2, 0).unwrap();
    let image = runtime.import_image(&status_image()).unwrap();
    let mut group = runtime.create_group("mixed", 2, 100).unwrap();
    let attribute = ThreadAttribute::named("t");
    group.create_thread(&image, status_argument(0), &attribute).unwrap();
    group.create_thread(&image, status_argument(1), &attribute).unwrap();
    group.start().unwrap();

    let exit = group.join().unwrap();
    assert_eq!(exit.cause, JoinCause::Terminated);
    assert_eq!(exit.status, -1);
    assert!(matches!(exit.threads[0].1, ThreadExit::Faulted(_)));
    assert_eq!(exit.threads[1].1, ThreadExit::Terminated);
}
