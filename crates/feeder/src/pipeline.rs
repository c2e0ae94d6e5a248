//! Running the path through a chain of blocking workers.
//!
//! Every stage runs on its own blocking thread and talks to the next one
//! through a bounded channel. A stage finishes by dropping its sender, which
//! ends the input of the stage after it. If a stage fails, it drops its
//! receiver and the stage before it stops at its next send.

use tokio::{
    sync::mpsc::{channel, Receiver, Sender},
    task::JoinHandle,
};

pub const CHANNEL_CAPACITY: usize = 1024;

/// A stage's input, as a blocking iterator.
pub fn incoming<T>(mut rx: Receiver<T>) -> impl Iterator<Item = T> {
    std::iter::from_fn(move || rx.blocking_recv())
}

// Stops pulling from `items` as soon as the receiving stage goes away.
fn forward<T>(items: impl Iterator<Item = T>, tx: &Sender<T>) {
    for item in items {
        if tx.blocking_send(item).is_err() {
            log::debug!("downstream stage hung up");
            return;
        }
    }
}

/// Starts a pipeline, with a stage that produces items from nothing.
pub fn source<T, I>(items: I) -> (Receiver<T>, JoinHandle<anyhow::Result<()>>)
where
    T: Send + 'static,
    I: Iterator<Item = anyhow::Result<T>> + Send + 'static,
{
    let (tx, rx) = channel(CHANNEL_CAPACITY);
    let handle = tokio::task::spawn_blocking(move || {
        let mut failed = None;
        let ok_items = items.map_while(|item| item.map_err(|e| failed = Some(e)).ok());
        forward(ok_items, &tx);
        failed.map_or(Ok(()), Err)
    });
    (rx, handle)
}

/// Adds a stage that turns one stream of items into another.
///
/// `f` gets the stage's input and returns its output; it runs on the stage's
/// thread, so it may block.
pub fn stage<T, U, I, F>(rx: Receiver<T>, f: F) -> (Receiver<U>, JoinHandle<anyhow::Result<()>>)
where
    T: Send + 'static,
    U: Send + 'static,
    I: Iterator<Item = U>,
    F: FnOnce(Box<dyn Iterator<Item = T> + Send>) -> anyhow::Result<I> + Send + 'static,
{
    let (tx, out) = channel(CHANNEL_CAPACITY);
    let handle = tokio::task::spawn_blocking(move || {
        let output = f(Box::new(incoming(rx)))?;
        forward(output, &tx);
        Ok(())
    });
    (out, handle)
}

/// Ends a pipeline with a stage that consumes everything.
pub fn sink<T, R, F>(rx: Receiver<T>, f: F) -> JoinHandle<anyhow::Result<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(Box<dyn Iterator<Item = T> + Send>) -> anyhow::Result<R> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(Box::new(incoming(rx))))
}

/// Waits for a stage to finish, turning a panic into an error.
pub async fn join<R>(handle: JoinHandle<anyhow::Result<R>>) -> anyhow::Result<R> {
    handle.await?
}
