use std::future::Future;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// A unit of work executed by a scheduler.
///
/// Any `FnOnce(CancellationToken) -> impl Future<Output = ()>` closure is a job.
/// The token is shared by every job of one scheduler and is cancelled when the
/// scheduler stops; checking it is up to the job.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>, cancel: CancellationToken) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Job for F
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn run(self: Box<Self>, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin((*self)(cancel))
    }
}

/// Type-erased job as stored in the queue.
pub type BoxJob = Box<dyn Job>;
