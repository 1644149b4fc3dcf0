//! Promise combinators.
//!
//! `all_settled` and `any` run their own coroutine parked on a
//! [`WaitGroup`] sized to the input; `all` builds on `all_settled`.

use tracing::trace;

use crate::driver::Driver;
use crate::error::Error;
use crate::promise::Promise;
use crate::wait_group::WaitGroup;

impl<T: Clone + 'static> Promise<T> {
    /// Fulfill with the input promises once every one of them has settled.
    pub fn all_settled(driver: &Driver, promises: Vec<Promise<T>>) -> Promise<Vec<Promise<T>>> {
        let group = WaitGroup::new(promises.len());
        for promise in &promises {
            let group = group.clone();
            promise.finally(move || group.done());
        }

        let waiter = driver.clone();
        driver.spawn(async move {
            group.wait(&waiter, None).await?;
            Ok(promises)
        })
    }

    /// Fulfill with every value in input order, or reject with the first rejection seen.
    pub fn all(driver: &Driver, promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        let combined = Promise::pending();
        for promise in &promises {
            let combined = combined.clone();
            promise.except(move |error| {
                combined.reject(error);
                Ok(())
            });
        }

        let on_settled = combined.clone();
        let on_failed = combined.clone();
        Promise::all_settled(driver, promises)
            .then(move |settled| {
                let mut values = Vec::with_capacity(settled.len());
                for promise in settled {
                    match promise.result() {
                        Some(Ok(value)) => values.push(value),
                        Some(Err(error)) => {
                            on_settled.reject(error);
                            return Ok(());
                        }
                        None => {
                            on_settled.reject(Error::logic("all_settled released a pending promise"));
                            return Ok(());
                        }
                    }
                }
                on_settled.resolve(values);
                Ok(())
            })
            .except(move |error| {
                on_failed.reject(error);
                Ok(())
            });
        combined
    }

    /// Settle like the first input to settle. An empty input stays pending.
    pub fn race(promises: &[Promise<T>]) -> Promise<T> {
        let winner = Promise::pending();
        for promise in promises {
            let on_value = winner.clone();
            let on_error = winner.clone();
            promise
                .then(move |value| {
                    on_value.resolve(value);
                    Ok(())
                })
                .except(move |error| {
                    on_error.reject(error);
                    Ok(())
                });
        }
        winner
    }

    /// Fulfill with the first fulfillment.
    ///
    /// Rejects with [`Error::Aggregate`], reasons in input order, only when
    /// every input rejects.
    pub fn any(driver: &Driver, promises: Vec<Promise<T>>) -> Promise<T> {
        let first = Promise::pending();
        let group = WaitGroup::new(promises.len());
        for promise in &promises {
            let winner = first.clone();
            let on_value = group.clone();
            let on_error = group.clone();
            promise
                .then(move |value| {
                    winner.resolve(value);
                    on_value.done()
                })
                .except(move |_| on_error.done());
        }

        let waiter = driver.clone();
        let result = first.clone();
        driver.spawn(async move {
            group.wait(&waiter, None).await?;
            if result.is_pending() {
                let reasons: Vec<Error> = promises
                    .iter()
                    .filter_map(|promise| promise.result().and_then(|r| r.err()))
                    .collect();
                trace!("any: all {} inputs rejected", reasons.len());
                result.reject(Error::Aggregate(reasons));
            }
            Ok(())
        });
        first
    }
}
