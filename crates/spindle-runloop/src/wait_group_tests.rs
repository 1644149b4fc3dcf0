use super::*;
use crate::promise::Promise;

#[test]
fn test_add_and_done_track_count() {
    let group = WaitGroup::new(0);
    assert!(group.is_done());

    group.add(2);
    assert_eq!(group.count(), 2);
    assert!(!group.is_done());

    group.add(0);
    assert_eq!(group.count(), 2);

    group.done().unwrap();
    group.done().unwrap();
    assert!(group.is_done());
}

#[test]
fn test_done_at_zero_is_error() {
    let group = WaitGroup::new(1);
    group.done().unwrap();
    assert!(matches!(group.done(), Err(Error::Logic(_))));
    assert_eq!(group.count(), 0);
}

#[test]
fn test_wait_returns_immediately_when_done() {
    let driver = Driver::new();
    let group = WaitGroup::new(0);
    driver.block_on(group.wait(&driver, None)).unwrap().unwrap();
    assert_eq!(group.waiter_count(), 0);
}

#[test]
fn test_three_done_release_all_waiters_once() {
    let driver = Driver::new();
    let group = WaitGroup::new(3);
    let released = Rc::new(Cell::new(0));

    let mut waiters = Vec::new();
    for _ in 0..2 {
        let task_driver = driver.clone();
        let group = group.clone();
        let released = released.clone();
        waiters.push(driver.spawn(async move {
            group.wait(&task_driver, None).await?;
            released.set(released.get() + 1);
            Ok(())
        }));
    }

    for n in 1..=3u64 {
        let group = group.clone();
        driver.delay(Duration::from_millis(n), move |_, _| group.done());
    }

    let all = Promise::all(&driver, waiters);
    driver.wait(&all).unwrap();
    assert_eq!(released.get(), 2);
    assert!(group.is_done());
    assert!(group.done().is_err());
    assert_eq!(released.get(), 2);
}

#[test]
fn test_waiters_released_in_arrival_order() {
    let driver = Driver::new();
    let group = WaitGroup::new(1);
    let order = Rc::new(RefCell::new(Vec::new()));

    let mut waiters = Vec::new();
    for n in 0..3 {
        let task_driver = driver.clone();
        let group = group.clone();
        let order = order.clone();
        waiters.push(driver.spawn(async move {
            group.wait(&task_driver, None).await?;
            order.borrow_mut().push(n);
            Ok(())
        }));
    }
    let releaser = group.clone();
    driver.defer(move |_, _| releaser.done());

    driver.wait(&Promise::all(&driver, waiters)).unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_wait_timeout() {
    let driver = Driver::new();
    let group = WaitGroup::new(1);
    let outcome = driver
        .block_on(group.wait(&driver, Some(Duration::from_millis(5))))
        .unwrap();
    assert!(matches!(outcome, Err(Error::Timeout(_))));
    assert_eq!(group.waiter_count(), 0);

    // A late done() finds nobody to release.
    group.done().unwrap();
}

#[test]
fn test_done_before_timeout_cancels_timer() {
    let driver = Driver::new();
    let group = WaitGroup::new(1);
    let releaser = group.clone();
    driver.delay(Duration::from_millis(1), move |_, _| releaser.done());

    driver
        .block_on(group.wait(&driver, Some(Duration::from_secs(3600))))
        .unwrap()
        .unwrap();
    assert!(driver.identifiers().is_empty());
}

#[test]
fn test_wait_in_callback_context_fails() {
    let driver = Driver::new();
    let group = WaitGroup::new(1);
    let outcome = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    let waiting = group.clone();
    driver.defer(move |driver, _| {
        let future = waiting.wait(driver, None);
        let result = futures::executor::block_on(future);
        *slot.borrow_mut() = Some(result);
        Ok(())
    });
    driver.run().unwrap();
    assert!(matches!(
        outcome.borrow_mut().take(),
        Some(Err(Error::NoSuspension(_)))
    ));
}

#[test]
fn test_wait_with_unrepresentable_timeout_is_released_by_done() {
    let driver = Driver::new();
    let group = WaitGroup::new(1);
    let waiting = group.clone();
    let task_driver = driver.clone();
    let task = driver.spawn(async move { waiting.wait(&task_driver, Some(Duration::MAX)).await });

    let releaser = group.clone();
    driver.delay(Duration::from_millis(1), move |_, _| releaser.done());

    driver.wait(&task).unwrap();
    assert!(group.is_done());
    assert!(driver.identifiers().is_empty());
}
