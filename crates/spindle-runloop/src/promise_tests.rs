use super::*;
use std::cell::Cell;

fn recorder() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn test_pending_promise() {
    let promise = Promise::<u32>::pending();
    assert_eq!(promise.status(), PromiseStatus::Pending);
    assert!(promise.is_pending());
    assert!(promise.result().is_none());
}

#[test]
fn test_first_write_wins() {
    let promise = Promise::pending();
    promise.resolve(1);
    promise.resolve(2);
    promise.reject(Error::msg("late"));
    assert_eq!(promise.result().unwrap().unwrap(), 1);

    let rejected = Promise::<u32>::pending();
    rejected.reject(Error::msg("first"));
    rejected.resolve(3);
    assert_eq!(rejected.status(), PromiseStatus::Rejected);
    assert_eq!(rejected.result().unwrap().unwrap_err().to_string(), "first");
}

#[test]
fn test_reactions_run_in_registration_order() {
    let promise = Promise::pending();
    let seen = recorder();
    for name in ["a", "b", "c"] {
        let seen = seen.clone();
        promise.then(move |value: u32| {
            seen.borrow_mut().push(format!("{name}{value}"));
            Ok(())
        });
    }
    promise.resolve(1);
    assert_eq!(*seen.borrow(), vec!["a1", "b1", "c1"]);
}

#[test]
fn test_reaction_after_settlement_runs_immediately() {
    let promise = Promise::resolved(7u32);
    let seen = Rc::new(Cell::new(0));
    let slot = seen.clone();
    promise.then(move |value| {
        slot.set(value);
        Ok(())
    });
    assert_eq!(seen.get(), 7);

    let rejected = Promise::<u32>::rejected(Error::msg("no"));
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    rejected
        .then(|_| panic!("fulfill reaction on a rejected promise"))
        .except(move |_| {
            flag.set(true);
            Ok(())
        });
    assert!(ran.get());
}

#[test]
fn test_failing_reaction_does_not_affect_others() {
    let promise = Promise::pending();
    let seen = recorder();
    promise.then(|_: u32| Err(Error::msg("reaction failed")));
    let after = seen.clone();
    promise.then(move |value| {
        after.borrow_mut().push(value.to_string());
        Ok(())
    });
    promise.resolve(4);
    assert_eq!(*seen.borrow(), vec!["4"]);
    assert_eq!(promise.result().unwrap().unwrap(), 4);
}

#[test]
fn test_new_runs_body_with_resolver() {
    let promise = Promise::new(|resolver| {
        resolver.resolve("done".to_string());
        Ok(())
    });
    assert_eq!(promise.result().unwrap().unwrap(), "done");
}

#[test]
fn test_new_body_error_rejects() {
    let promise = Promise::<u32>::new(|_| Err(Error::msg("body failed")));
    assert_eq!(
        promise.result().unwrap().unwrap_err().to_string(),
        "body failed"
    );

    let settled_first = Promise::new(|resolver| {
        resolver.resolve(1u32);
        Err(Error::msg("ignored"))
    });
    assert_eq!(settled_first.result().unwrap().unwrap(), 1);
}

#[test]
fn test_resolver_outlives_body() {
    let mut captured = None;
    let promise = Promise::<u32>::new(|resolver| {
        captured = Some(resolver);
        Ok(())
    });
    assert!(promise.is_pending());
    captured.unwrap().reject_value(404u16);
    match promise.result() {
        Some(Err(Error::Rejected(reason))) => assert_eq!(reason.downcast_ref::<u16>(), Some(&404)),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_resolve_with_self_is_logic_error() {
    let promise = Promise::<u32>::pending();
    assert!(matches!(
        promise.resolve_with(&promise.clone()),
        Err(Error::Logic(_))
    ));
    assert!(promise.is_pending());
}

#[test]
fn test_adoption_flattens_any_depth() {
    let outer = Promise::<u32>::pending();
    let middle = Promise::pending();
    let inner = Promise::pending();
    outer.resolve_with(&middle).unwrap();
    middle.resolve_with(&inner).unwrap();
    assert!(outer.is_pending());

    inner.resolve(9);
    assert_eq!(middle.result().unwrap().unwrap(), 9);
    assert_eq!(outer.result().unwrap().unwrap(), 9);
}

#[test]
fn test_adoption_propagates_rejection() {
    let outer = Promise::<u32>::pending();
    let inner = Promise::pending();
    outer.resolve_with(&inner).unwrap();
    inner.reject(Error::msg("inner failed"));
    assert_eq!(
        outer.result().unwrap().unwrap_err().to_string(),
        "inner failed"
    );
}

#[test]
fn test_adopting_promise_ignores_direct_writes() {
    let outer = Promise::<u32>::pending();
    let inner = Promise::pending();
    outer.resolve_with(&inner).unwrap();
    outer.resolve(1);
    outer.reject(Error::msg("ignored"));
    assert!(outer.is_pending());

    let other = Promise::resolved(5);
    outer.resolve_with(&other).unwrap();
    assert!(outer.is_pending());

    inner.resolve(2);
    assert_eq!(outer.result().unwrap().unwrap(), 2);
}

#[test]
fn test_resolve_with_settled_promise() {
    let outer = Promise::<u32>::pending();
    outer.resolve_with(&Promise::resolved(3)).unwrap();
    assert_eq!(outer.result().unwrap().unwrap(), 3);
}

#[test]
fn test_finally_runs_once_for_either_outcome() {
    let calls = Rc::new(Cell::new(0));

    let fulfilled = Promise::pending();
    let counter = calls.clone();
    fulfilled.finally(move || {
        counter.set(counter.get() + 1);
        Ok(())
    });
    fulfilled.resolve(1u32);

    let rejected = Promise::<u32>::pending();
    let counter = calls.clone();
    rejected.finally(move || {
        counter.set(counter.get() + 1);
        Ok(())
    });
    rejected.reject(Error::msg("no"));

    assert_eq!(calls.get(), 2);
}

#[test]
fn test_reaction_can_register_more_reactions() {
    let promise = Promise::pending();
    let seen = recorder();
    let nested = promise.clone();
    let sink = seen.clone();
    promise.then(move |_: u32| {
        let sink = sink.clone();
        nested.then(move |again| {
            sink.borrow_mut().push(format!("nested {again}"));
            Ok(())
        });
        Ok(())
    });
    let sink = seen.clone();
    promise.then(move |value| {
        sink.borrow_mut().push(format!("second {value}"));
        Ok(())
    });
    promise.resolve(1);
    assert_eq!(*seen.borrow(), vec!["nested 1", "second 1"]);
}

#[test]
fn test_debug_shows_status() {
    let promise = Promise::resolved(1u8);
    assert!(format!("{promise:?}").contains("Fulfilled"));
}
