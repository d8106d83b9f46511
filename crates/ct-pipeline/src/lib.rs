// crates/ct-pipeline/src/lib.rs

//! Bounded blocking queues and worker-thread plumbing shared by every
//! pipeline stage (weighting, filtering, back-projection).
//!
//! Each stage-pair is connected by a [`BoundedQueue`]: producers block on
//! full, consumers block on empty, and end-of-stream is a typed value
//! (`PipelineItem::End`) rather than an out-of-band flag — a stage can
//! never mistake "no more data" for "a zero-valued projection". When a
//! queue has more than one consumer (one worker per device), the sentinel
//! is pushed once per consumer so every worker observes it and exits.
//!
//! A queue never keeps a receiver of its own alive past the call that hands
//! it out: the only receivers in existence are the ones actual consumers
//! hold. That's what lets [`BoundedQueue::push`]/[`close`](BoundedQueue::close)
//! observe "every consumer is gone" and return an error instead of blocking
//! forever once a downstream stage dies mid-stream.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use tracing::error;

/// One value flowing through a pipeline queue: either real data, or the
/// end-of-stream sentinel.
///
/// Replaces the "poison pill" convention of smuggling an out-of-band
/// marker through the data channel: the type system makes "no more items"
/// a distinct case a consumer must handle, rather than a runtime check
/// against the payload.
#[derive(Debug)]
pub enum PipelineItem<T> {
    /// A real item to process.
    Data(T),
    /// End of stream. Pushed once per consumer of the queue.
    End,
}

/// A bounded, multi-producer multi-consumer queue of [`PipelineItem`]s.
///
/// Holds only the sending half permanently. The receiving half created at
/// construction time is handed out exactly once, by [`receiver`](Self::receiver) —
/// the queue itself never retains a clone of it. This matters for
/// cancellation: a `crossbeam_channel::Sender::send` only ever fails once
/// every `Receiver` is dropped, and if the queue kept one alive for its own
/// lifetime, that condition would never be reachable while the queue (held
/// by the orchestrating thread) was still in scope — exactly the scenario
/// where a dead downstream stage needs to be observable upstream.
pub struct BoundedQueue<T> {
    tx: Sender<PipelineItem<T>>,
    rx: Mutex<Option<Receiver<PipelineItem<T>>>>,
}

impl<T> BoundedQueue<T> {
    /// Create a new queue with room for `capacity` in-flight items.
    ///
    /// Per the engine specification's plumbing contract, `capacity` should
    /// be at least `2 * max(producers, consumers)` to avoid deadlock; see
    /// [`recommended_capacity`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx: Mutex::new(Some(rx)) }
    }

    /// A sender handle. Cheap to clone; each producer should hold one.
    #[must_use]
    pub fn sender(&self) -> Sender<PipelineItem<T>> {
        self.tx.clone()
    }

    /// The receiver handle for this queue's consumer.
    ///
    /// If more than one worker needs to read this queue, clone the
    /// returned `Receiver` yourself before moving it into each worker — the
    /// queue does not hand out further clones, so that dropping every
    /// worker's handle is what lets producers observe "no consumers
    /// remain".
    ///
    /// # Panics
    /// Panics if called more than once on the same queue.
    #[must_use]
    pub fn receiver(&self) -> Receiver<PipelineItem<T>> {
        self.rx
            .lock()
            .expect("bounded queue receiver lock poisoned")
            .take()
            .expect("BoundedQueue::receiver called more than once")
    }

    /// Push one data item, blocking if the queue is full.
    ///
    /// # Errors
    /// Returns an error if every receiver has been dropped.
    pub fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(PipelineItem::Data(item))
            .map_err(|_| anyhow::anyhow!("pipeline queue closed: no consumers remain"))
    }

    /// Push the end-of-stream sentinel once for each of `n_consumers`
    /// workers reading this queue.
    ///
    /// # Errors
    /// Returns an error if every receiver has been dropped before all
    /// sentinels could be delivered.
    pub fn close(&self, n_consumers: usize) -> Result<()> {
        for _ in 0..n_consumers.max(1) {
            self.tx
                .send(PipelineItem::End)
                .map_err(|_| anyhow::anyhow!("pipeline queue closed: no consumers remain"))?;
        }
        Ok(())
    }
}

/// Queue capacity recommended for `concurrent_workers` workers on either
/// side of a stage boundary: `2 * concurrent_workers`, per the engine
/// specification's deadlock-avoidance rule.
#[inline]
#[must_use]
pub fn recommended_capacity(concurrent_workers: usize) -> usize {
    concurrent_workers.max(1) * 2
}

/// A fatal error raised by a pipeline stage, identifying which stage
/// failed. Propagating this poisons every downstream queue.
#[derive(Debug)]
pub struct StageError {
    /// Name of the stage that failed (e.g. `"weighting"`, `"filter"`).
    pub stage: &'static str,
    /// The underlying cause.
    pub source: anyhow::Error,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage '{}' failed: {}", self.stage, self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// A single transformation applied to every item flowing through a stage.
///
/// Implementors do their own device work (kernel launch, stream sync);
/// `process` returning `Err` is treated as a fatal runtime error for the
/// whole stage.
pub trait Stage: Send {
    /// Input item type.
    type In: Send + 'static;
    /// Output item type.
    type Out: Send + 'static;

    /// Stage name, used in logs and [`StageError`].
    fn name(&self) -> &'static str;

    /// Transform one item.
    ///
    /// # Errors
    /// Returns an error for any unrecoverable runtime failure (allocation,
    /// kernel launch, invalid argument from the device runtime).
    fn process(&mut self, input: Self::In) -> Result<Self::Out>;
}

/// Run `stage` on a dedicated worker thread: pull items from `rx`, apply
/// `stage`, push results to `tx`. Forwards the end-of-stream sentinel
/// downstream (once) when it arrives or when the input queue closes.
///
/// On a fatal error from `stage::process`, the sentinel is still forwarded
/// downstream (poisoning the rest of the pipeline) and the thread returns
/// `Err(StageError)`. The caller is responsible for joining every worker
/// and observing this error during teardown.
pub fn spawn_stage<S>(
    mut stage: S,
    rx: Receiver<PipelineItem<S::In>>,
    tx: Sender<PipelineItem<S::Out>>,
) -> JoinHandle<Result<()>>
where
    S: Stage + 'static,
{
    thread::spawn(move || {
        let name = stage.name();
        loop {
            match rx.recv() {
                Ok(PipelineItem::Data(item)) => match stage.process(item) {
                    Ok(out) => {
                        if tx.send(PipelineItem::Data(out)).is_err() {
                            return Ok(());
                        }
                    }
                    Err(source) => {
                        let err = StageError { stage: name, source };
                        error!(stage = name, error = %err, "pipeline stage failed");
                        let _ = tx.send(PipelineItem::End);
                        return Err(err.into());
                    }
                },
                Ok(PipelineItem::End) | Err(_) => {
                    let _ = tx.send(PipelineItem::End);
                    return Ok(());
                }
            }
        }
    })
}

/// Join every worker handle, short-circuiting on the first error.
///
/// Joins *all* handles regardless of outcome (so every thread is reaped
/// even after a failure is found), then returns the first error seen, if
/// any, in handle order.
///
/// # Errors
/// Returns the first stage error encountered, or a generic error if a
/// worker thread itself panicked.
pub fn join_all(handles: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first_err = None;
    for handle in handles {
        let outcome = handle
            .join()
            .map_err(|_| anyhow::anyhow!("pipeline worker thread panicked"));
        let result = outcome.and_then(|inner| inner);
        if let Err(e) = result {
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;

    impl Stage for Double {
        type In = i32;
        type Out = i32;

        fn name(&self) -> &'static str {
            "double"
        }

        fn process(&mut self, input: i32) -> Result<i32> {
            Ok(input * 2)
        }
    }

    struct AlwaysFails;

    impl Stage for AlwaysFails {
        type In = i32;
        type Out = i32;

        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn process(&mut self, _input: i32) -> Result<i32> {
            anyhow::bail!("synthetic failure")
        }
    }

    #[test]
    fn data_flows_through_and_sentinel_is_forwarded() {
        let in_q = BoundedQueue::new(4);
        let out_q = BoundedQueue::new(4);
        let handle = spawn_stage(Double, in_q.receiver(), out_q.sender());

        in_q.push(21).unwrap();
        in_q.close(1).unwrap();

        let out_rx = out_q.receiver();
        match out_rx.recv().unwrap() {
            PipelineItem::Data(v) => assert_eq!(v, 42),
            PipelineItem::End => panic!("expected data before end"),
        }
        match out_rx.recv().unwrap() {
            PipelineItem::End => {}
            PipelineItem::Data(_) => panic!("expected end"),
        }

        join_all(vec![handle]).unwrap();
    }

    #[test]
    fn stage_failure_poisons_downstream_and_is_reported() {
        let in_q = BoundedQueue::new(4);
        let out_q = BoundedQueue::new(4);
        let handle = spawn_stage(AlwaysFails, in_q.receiver(), out_q.sender());

        in_q.push(1).unwrap();

        let out_rx = out_q.receiver();
        match out_rx.recv().unwrap() {
            PipelineItem::End => {}
            PipelineItem::Data(_) => panic!("expected sentinel after failure"),
        }

        let result = join_all(vec![handle]);
        assert!(result.is_err());
    }

    #[test]
    fn sentinel_is_delivered_to_every_consumer() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        q.close(3).unwrap();
        let rx = q.receiver();
        for _ in 0..3 {
            assert!(matches!(rx.recv().unwrap(), PipelineItem::End));
        }
    }

    /// Regression test for the §5 cancellation contract: when a
    /// non-terminal stage dies, upstream producers must eventually see
    /// their sends fail rather than block forever once the dead stage's
    /// thread has dropped its receiver.
    #[test]
    fn upstream_push_fails_once_a_downstream_stage_has_died() {
        let in_q: BoundedQueue<i32> = BoundedQueue::new(1);
        let mid_q: BoundedQueue<i32> = BoundedQueue::new(1);
        let out_q: BoundedQueue<i32> = BoundedQueue::new(1);

        let handle_a = spawn_stage(Double, in_q.receiver(), mid_q.sender());
        let handle_b = spawn_stage(AlwaysFails, mid_q.receiver(), out_q.sender());

        let out_rx = out_q.receiver();
        let drain = thread::spawn(move || while out_rx.recv().is_ok() {});

        let mut saw_disconnect = false;
        for i in 0..1000 {
            if in_q.push(i).is_err() {
                saw_disconnect = true;
                break;
            }
        }
        assert!(
            saw_disconnect,
            "upstream push should fail once the downstream stage has died, not block forever"
        );

        let _ = join_all(vec![handle_a, handle_b]);
        drain.join().unwrap();
    }
}
