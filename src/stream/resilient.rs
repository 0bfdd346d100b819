// SPDX-License-Identifier: Apache-2.0

//! Automatic reconnection for event sources.
//!
//! [`ResilientSource`] wraps a source and, when a pull fails with a retryable
//! error, asks a caller-supplied [`Reconnect`] procedure for a replacement,
//! passing along the last event id and retry hint seen on the stream. Pulls
//! then continue from the replacement as if nothing happened.
//!
//! Reconnect attempts are bounded by [`ResilientConfig::max_retries`]; the
//! counter resets on every successful pull. Whatever way the sequence ends,
//! the active source is closed exactly once.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{BoxSource, EventSource, Pull};
use crate::error::StreamError;
use crate::meta::{get_event_meta, EventMeta, EventMetaSlot};

/// Reconnect attempts allowed between two successful pulls.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 99;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResilientConfig {
    pub max_retries: u32,
    /// First backoff step when the stream gave no retry hint.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ResilientConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ResilientConfig {
    /// How long a reconnect procedure should wait before reconnecting: the
    /// stream's own retry hint if it sent one, else exponential backoff.
    pub fn delay_for(&self, ctx: &ReconnectContext) -> Duration {
        if let Some(retry) = ctx.last_retry {
            return Duration::from_millis(retry);
        }
        let exp = ctx.retry_times.saturating_sub(1).min(32);
        let millis = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(millis.min(self.max_delay_ms))
    }
}

/// Stream position tracked across reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub last_event_id: Option<String>,
    pub last_retry: Option<u64>,
    pub retry_times: u32,
}

impl ReconnectState {
    fn observe(&mut self, meta: Option<&EventMeta>) {
        if let Some(meta) = meta {
            if let Some(id) = &meta.id {
                self.last_event_id = Some(id.clone());
            }
            if let Some(retry) = meta.retry {
                self.last_retry = Some(retry);
            }
        }
    }
}

/// What a [`Reconnect`] procedure is told about the failure.
#[derive(Debug, Clone)]
pub struct ReconnectContext {
    pub last_event_id: Option<String>,
    pub last_retry: Option<u64>,
    /// 1 on the first attempt after a successful pull.
    pub retry_times: u32,
    pub error: StreamError,
}

/// Re-establishes a broken source.
///
/// Returning `Ok(None)` gives up, failing the stream with the error that
/// triggered the attempt. Returning `Err` counts as a failed attempt and is
/// retried within the same bound.
#[async_trait]
pub trait Reconnect<T>: Send {
    async fn reconnect(&mut self, ctx: ReconnectContext) -> Result<Option<BoxSource<T>>, StreamError>;
}

#[async_trait]
impl<T, F, Fut> Reconnect<T> for F
where
    T: Send + 'static,
    F: FnMut(ReconnectContext) -> Fut + Send,
    Fut: Future<Output = Result<Option<BoxSource<T>>, StreamError>> + Send,
{
    async fn reconnect(&mut self, ctx: ReconnectContext) -> Result<Option<BoxSource<T>>, StreamError> {
        (self)(ctx).await
    }
}

pub struct ResilientSource<T, R> {
    current: BoxSource<T>,
    reconnect: R,
    config: ResilientConfig,
    state: ReconnectState,
    finished: bool,
}

impl<T, R> ResilientSource<T, R>
where
    T: EventMetaSlot + Send + 'static,
    R: Reconnect<T>,
{
    pub fn new(source: BoxSource<T>, reconnect: R) -> Self {
        Self::with_config(source, reconnect, ResilientConfig::default())
    }

    pub fn with_config(source: BoxSource<T>, reconnect: R, config: ResilientConfig) -> Self {
        Self {
            current: source,
            reconnect,
            config,
            state: ReconnectState::default(),
            finished: false,
        }
    }

    pub fn state(&self) -> &ReconnectState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    async fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.current.close().await;
        }
    }

    /// Run reconnect attempts until one yields a source. Errors returned
    /// here are terminal.
    async fn recover(&mut self, mut error: StreamError) -> Result<(), StreamError> {
        loop {
            self.state.retry_times += 1;
            if self.state.retry_times > self.config.max_retries {
                log::warn!(
                    "giving up on event source after {} reconnect attempts: {}",
                    self.config.max_retries,
                    error
                );
                return Err(StreamError::RetryExceeded {
                    attempts: self.config.max_retries,
                    cause: Box::new(error),
                });
            }

            log::debug!(
                "reconnecting event source (attempt {}, last id {:?}): {}",
                self.state.retry_times,
                self.state.last_event_id,
                error
            );
            let ctx = ReconnectContext {
                last_event_id: self.state.last_event_id.clone(),
                last_retry: self.state.last_retry,
                retry_times: self.state.retry_times,
                error: error.clone(),
            };
            match self.reconnect.reconnect(ctx).await {
                Ok(Some(source)) => {
                    // the failed source is finished; replacing it drops it
                    self.current = source;
                    return Ok(());
                }
                Ok(None) => {
                    log::debug!("reconnect declined, failing event source");
                    return Err(error);
                }
                Err(e) => error = e,
            }
        }
    }
}

#[async_trait]
impl<T, R> EventSource for ResilientSource<T, R>
where
    T: EventMetaSlot + Send + 'static,
    R: Reconnect<T>,
{
    type Item = T;

    async fn next(&mut self) -> Result<Pull<T>, StreamError> {
        if self.finished {
            return Ok(Pull::Done(None));
        }
        loop {
            match self.current.next().await {
                Ok(pull) => {
                    self.state.observe(pull.value().and_then(get_event_meta));
                    self.state.retry_times = 0;
                    if pull.is_done() {
                        self.finish().await;
                    }
                    return Ok(pull);
                }
                Err(error) if !error.is_retryable() => {
                    self.finish().await;
                    return Err(error);
                }
                Err(error) => {
                    self.state.observe(get_event_meta(&error));
                    if let Err(fatal) = self.recover(error).await {
                        self.finish().await;
                        return Err(fatal);
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        self.finish().await;
    }

    async fn abort(&mut self, reason: StreamError) {
        if !self.finished {
            self.finished = true;
            self.current.abort(reason).await;
        }
    }
}
