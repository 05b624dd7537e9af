use std::{thread, time::Duration};

use astrolabe::{PoolOptions, Runtime, RuntimeOptions, RuntimePool, ScriptError};

#[test]
fn lockers_transfer_ownership_between_threads() {
    let runtime = Runtime::new(RuntimeOptions::new()).unwrap();

    {
        let locker = runtime.locker().unwrap();

        runtime.execute("const a = 1;").unwrap();

        drop(locker);
    }

    // Dropping the locker released ownership; a foreign thread can claim it.
    let clone = runtime.clone();

    let handle = thread::spawn(move || {
        let locker = clone.locker()?;
        let value = clone.execute("a + 1;")?;
        let result = value.as_f64();

        drop(locker);

        Ok::<_, ScriptError>(result)
    });

    assert_eq!(handle.join().unwrap().unwrap(), Some(2.0));

    // And back to this thread again.
    let locker = runtime.locker().unwrap();

    assert_eq!(runtime.execute("a + 2;").unwrap().as_f64(), Some(3.0));

    drop(locker);

    runtime.close().unwrap();
}

#[test]
fn lockers_nest_on_the_owning_thread() {
    let runtime = Runtime::new(RuntimeOptions::new()).unwrap();

    let outer = runtime.locker().unwrap();
    let inner = runtime.locker().unwrap();

    runtime.execute("1;").unwrap();

    drop(inner);

    // Still owned through the outer locker.
    runtime.execute("2;").unwrap();

    drop(outer);
    runtime.close().unwrap();
}

#[test]
fn contended_lockers_fail_fast() {
    let runtime = Runtime::new(RuntimeOptions::new()).unwrap();
    let locker = runtime.locker().unwrap();

    let clone = runtime.clone();

    let result = thread::spawn(move || match clone.locker() {
        Ok(_) => false,
        Err(error) => matches!(error, ScriptError::LockConflict),
    })
    .join()
    .unwrap();

    assert!(result);

    drop(locker);
    runtime.close().unwrap();
}

#[test]
fn guards_terminate_runaway_scripts() {
    let runtime = Runtime::new(RuntimeOptions::new()).unwrap();

    let guard = runtime.guard(50);

    let result = runtime.execute("while (true) {}");

    drop(guard);

    assert!(matches!(result, Err(ScriptError::Terminated)));

    // The termination flag does not leak into the next execution.
    assert_eq!(runtime.execute("1 + 1;").unwrap().as_f64(), Some(2.0));

    runtime.close().unwrap();
}

#[test]
fn cancelled_guards_never_fire() {
    let runtime = Runtime::new(RuntimeOptions::new()).unwrap();

    let guard = runtime.guard(10_000);

    assert_eq!(runtime.execute("21 * 2;").unwrap().as_f64(), Some(42.0));

    guard.cancel();

    runtime.close().unwrap();
}

#[test]
fn termination_requests_are_legal_cross_thread() {
    let runtime = Runtime::new(RuntimeOptions::new()).unwrap();

    runtime.execute("let spin = true;").unwrap();

    let clone = runtime.clone();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        clone.terminate_execution();
    });

    let result = runtime.execute("while (spin) {}");

    stopper.join().unwrap();

    assert!(matches!(result, Err(ScriptError::Terminated)));

    runtime.close().unwrap();
}

#[test]
fn pools_park_and_reuse_runtimes() {
    let pool = RuntimePool::new(RuntimeOptions::new(), PoolOptions::default());

    assert_eq!(pool.idle_count(), 0);

    {
        let lease = pool.lease().unwrap();

        lease.execute("const seed = 7;").unwrap();
    }

    assert_eq!(pool.idle_count(), 1);

    {
        // The parked runtime comes back with its state intact.
        let lease = pool.lease().unwrap();

        assert_eq!(lease.execute("seed;").unwrap().as_f64(), Some(7.0));
    }

    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn pools_recycle_bloated_runtimes() {
    let pool = RuntimePool::new(
        RuntimeOptions::new(),
        PoolOptions {
            capacity: 2,
            max_idle_millis: 60_000,
            max_live_slots: 1,
        },
    );

    {
        let lease = pool.lease().unwrap();

        lease.execute("const blob = [{}, {}, {}, {}];").unwrap();
    }

    // Past the heap threshold: closed instead of parked.
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn pool_capacity_bounds_idle_runtimes() {
    let pool = RuntimePool::new(
        RuntimeOptions::new(),
        PoolOptions {
            capacity: 1,
            max_idle_millis: 60_000,
            max_live_slots: 100_000,
        },
    );

    let first = pool.lease().unwrap();
    let second = pool.lease().unwrap();

    first.execute("1;").unwrap();
    second.execute("2;").unwrap();

    drop(first);
    drop(second);

    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn leases_work_across_threads() {
    let pool = RuntimePool::new(RuntimeOptions::new(), PoolOptions::default());

    {
        let lease = pool.lease().unwrap();

        lease.execute("const shared = 3;").unwrap();
    }

    let handle = thread::spawn(move || {
        let lease = pool.lease()?;
        let value = lease.execute("shared * 2;")?;

        Ok::<_, ScriptError>(value.as_f64())
    });

    assert_eq!(handle.join().unwrap().unwrap(), Some(6.0));
}
