// SPDX-License-Identifier: Apache-2.0

//! Pull-based event sources.
//!
//! An [`EventSource`] is a lazily pulled sequence with an explicit cleanup
//! path. Callers pull with `next`, and stop early with either `close` (plain
//! early stop) or `abort` (stop with a reason). A source has at most one pull
//! in flight; `close` and `abort` must be safe to call more than once.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::error::StreamError;

pub mod resilient;

pub use resilient::{Reconnect, ReconnectContext, ReconnectState, ResilientConfig, ResilientSource};

/// Result of a successful pull.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull<T> {
    /// The next item.
    Item(T),
    /// The source is exhausted, with an optional completion value.
    Done(Option<T>),
}

impl<T> Pull<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Pull::Item(v) => Some(v),
            Pull::Done(v) => v.as_ref(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Pull::Done(_))
    }
}

#[async_trait]
pub trait EventSource: Send {
    type Item: Send;

    /// Pull the next item.
    async fn next(&mut self) -> Result<Pull<Self::Item>, StreamError>;

    /// Stop early and release resources.
    async fn close(&mut self) {}

    /// Stop because of `reason` and release resources.
    async fn abort(&mut self, reason: StreamError) {
        log::trace!("aborting event source: {}", reason);
        self.close().await
    }
}

pub type BoxSource<T> = Box<dyn EventSource<Item = T>>;

#[async_trait]
impl<T: Send> EventSource for BoxSource<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Pull<T>, StreamError> {
        (**self).next().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    async fn abort(&mut self, reason: StreamError) {
        (**self).abort(reason).await
    }
}

/// In-memory source replaying a fixed script of pulls.
///
/// Once the script runs out it reports `Done(None)`. `close`/`abort` drop
/// whatever is left.
#[derive(Debug)]
pub struct IterSource<T> {
    script: VecDeque<Result<Pull<T>, StreamError>>,
}

impl<T> IterSource<T> {
    pub fn new(script: impl IntoIterator<Item = Result<Pull<T>, StreamError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// Yield `items`, then finish with `done`.
    pub fn items(items: impl IntoIterator<Item = T>, done: Option<T>) -> Self {
        Self::new(
            items
                .into_iter()
                .map(|v| Ok(Pull::Item(v)))
                .chain(std::iter::once(Ok(Pull::Done(done)))),
        )
    }

    pub fn boxed(self) -> BoxSource<T>
    where
        T: Send + 'static,
    {
        Box::new(self)
    }
}

#[async_trait]
impl<T: Send> EventSource for IterSource<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Pull<T>, StreamError> {
        self.script.pop_front().unwrap_or(Ok(Pull::Done(None)))
    }

    async fn close(&mut self) {
        self.script.clear();
    }
}

/// Consume `source` as a `futures::Stream` of items.
///
/// The stream ends after the source completes (its completion value is
/// dropped) or after the first error. The source is closed either way.
pub fn into_stream<S>(source: S) -> impl Stream<Item = Result<S::Item, StreamError>>
where
    S: EventSource,
{
    stream::unfold(Some(source), |state| async move {
        let mut source = state?;
        match source.next().await {
            Ok(Pull::Item(item)) => Some((Ok(item), Some(source))),
            Ok(Pull::Done(_)) => {
                source.close().await;
                None
            }
            Err(e) => {
                source.close().await;
                Some((Err(e), None))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn iter_source_script() {
        let mut src = IterSource::items([1, 2], Some(3));
        assert_eq!(src.next().await.unwrap(), Pull::Item(1));
        assert_eq!(src.next().await.unwrap(), Pull::Item(2));
        assert_eq!(src.next().await.unwrap(), Pull::Done(Some(3)));
        assert_eq!(src.next().await.unwrap(), Pull::Done(None));
    }

    #[tokio::test]
    async fn close_drops_remaining() {
        let mut src = IterSource::items([1, 2], None);
        src.close().await;
        assert_eq!(src.next().await.unwrap(), Pull::Done(None));
    }

    #[tokio::test]
    async fn stream_adapter() {
        let src = IterSource::new([
            Ok(Pull::Item(1)),
            Ok(Pull::Item(2)),
            Err(StreamError::failed("boom")),
            Ok(Pull::Item(3)),
        ]);
        let got: Vec<_> = into_stream(src).collect().await;
        assert_eq!(got.len(), 3);
        assert_eq!(*got[1].as_ref().unwrap(), 2);
        assert!(got[2].is_err());
    }

    #[tokio::test]
    async fn boxed_sources_forward() {
        let mut src: BoxSource<i32> = IterSource::items([7], None).boxed();
        assert_eq!(src.next().await.unwrap(), Pull::Item(7));
        src.abort(StreamError::failed("stop")).await;
        assert_eq!(src.next().await.unwrap(), Pull::Done(None));
    }
}
