//! One submit-then-poll conversation with the SERP API for a single page.
//!
//! The conversation is an explicit state machine:
//!
//! ```text
//! Idle --> Submitting --ok--> Polling --success--> Done
//!   ^          |                 |  ^
//!   |          |                 |  '--pending--'
//!   '--retry---+-----------------'
//!              |                 |
//!              '--fatal--> Error <--fatal/exhausted
//! ```
//!
//! Transient failures (timeouts, transport errors) on either network call
//! send the machine back to `Idle` with a backoff, until the retry budget
//! runs out. Every sleep and network call also races the cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{PollStatus, SerpApi};
use crate::config::FetchSettings;
use crate::data_models::{PageRequest, PageResponse, SerpPayload};
use crate::error::{ApiError, PageError};

#[derive(Debug, Clone)]
pub enum ExchangeState {
    /// Waiting out `backoff` before submission attempt `attempt` (0-based).
    Idle { attempt: u32, backoff: Duration },
    Submitting { attempt: u32 },
    Polling { attempt: u32, token: String, polls: u32 },
    Done(SerpPayload),
    Error(PageError),
}

impl ExchangeState {
    pub fn start() -> ExchangeState {
        ExchangeState::Idle {
            attempt: 0,
            backoff: Duration::ZERO,
        }
    }
}

pub struct Exchange<'a, A> {
    api: &'a A,
    request: &'a PageRequest,
    settings: &'a FetchSettings,
    cancel: &'a CancellationToken,
}

impl<'a, A: SerpApi> Exchange<'a, A> {
    pub fn new(
        api: &'a A,
        request: &'a PageRequest,
        settings: &'a FetchSettings,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            api,
            request,
            settings,
            cancel,
        }
    }

    /// Drives the machine from `Idle` to a terminal state.
    pub async fn run(self) -> PageResponse {
        let mut state = ExchangeState::start();
        loop {
            state = match self.step(state).await {
                ExchangeState::Done(payload) => return PageResponse::Success(payload),
                ExchangeState::Error(err) => return PageResponse::Failure(err),
                next => next,
            };
        }
    }

    /// Performs exactly one transition.
    pub async fn step(&self, state: ExchangeState) -> ExchangeState {
        match state {
            ExchangeState::Idle { attempt, backoff } => {
                if attempt >= self.settings.max_retries {
                    return ExchangeState::Error(PageError::RetriesExhausted {
                        attempts: attempt,
                        last: "no attempts left".to_string(),
                    });
                }
                if !backoff.is_zero() && self.cancellable(tokio::time::sleep(backoff)).await.is_none() {
                    return ExchangeState::Error(PageError::Cancelled);
                }
                ExchangeState::Submitting { attempt }
            }
            ExchangeState::Submitting { attempt } => {
                let submitted = self
                    .network_call(self.api.submit(&self.request.query, self.request.offset()))
                    .await;
                match submitted {
                    None => ExchangeState::Error(PageError::Cancelled),
                    Some(Ok(Some(token))) => {
                        tracing::debug!(query = %self.request.query, page = self.request.page, %token, "submitted");
                        ExchangeState::Polling {
                            attempt,
                            token,
                            polls: 0,
                        }
                    }
                    Some(Ok(None)) => ExchangeState::Error(PageError::NoCorrelationToken),
                    Some(Err(err)) => self.after_failure(attempt, err),
                }
            }
            ExchangeState::Polling {
                attempt,
                token,
                polls,
            } => {
                if polls >= self.settings.max_polls {
                    return ExchangeState::Error(PageError::PollingTimeout { polls });
                }
                if self
                    .cancellable(tokio::time::sleep(self.settings.poll_interval))
                    .await
                    .is_none()
                {
                    return ExchangeState::Error(PageError::Cancelled);
                }
                match self.network_call(self.api.poll(&token)).await {
                    None => ExchangeState::Error(PageError::Cancelled),
                    Some(Ok(PollStatus::Pending)) => ExchangeState::Polling {
                        attempt,
                        token,
                        polls: polls + 1,
                    },
                    Some(Ok(PollStatus::Ready(payload))) => ExchangeState::Done(payload),
                    Some(Ok(PollStatus::Failed(code))) => {
                        ExchangeState::Error(PageError::HttpStatus(code))
                    }
                    Some(Err(err)) => self.after_failure(attempt, err),
                }
            }
            terminal => terminal,
        }
    }

    fn after_failure(&self, attempt: u32, err: ApiError) -> ExchangeState {
        if !err.is_transient() {
            return ExchangeState::Error(PageError::Transport(err.to_string()));
        }

        let attempts = attempt + 1;
        if attempts >= self.settings.max_retries {
            return ExchangeState::Error(match err {
                ApiError::Timeout => PageError::TimeoutExhausted { attempts },
                other => PageError::RetriesExhausted {
                    attempts,
                    last: other.to_string(),
                },
            });
        }

        let backoff = self.settings.backoff(attempt);
        tracing::debug!(
            query = %self.request.query,
            page = self.request.page,
            attempt,
            error = %err,
            backoff_ms = backoff.as_millis() as u64,
            "transient failure, retrying"
        );
        ExchangeState::Idle {
            attempt: attempts,
            backoff,
        }
    }

    /// `None` when cancelled first; a call that overruns the per-call
    /// timeout resolves to `ApiError::Timeout`.
    async fn network_call<T, F>(&self, call: F) -> Option<Result<T, ApiError>>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let timed = tokio::time::timeout(self.settings.request_timeout, call);
        self.cancellable(timed)
            .await
            .map(|res| res.unwrap_or(Err(ApiError::Timeout)))
    }

    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

/// Runs one page exchange to completion.
pub async fn execute<A: SerpApi>(
    api: &A,
    request: &PageRequest,
    settings: &FetchSettings,
    cancel: &CancellationToken,
) -> PageResponse {
    Exchange::new(api, request, settings, cancel).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted replies in order.
    #[derive(Default)]
    struct ScriptedApi {
        submits: Mutex<VecDeque<Result<Option<String>, ApiError>>>,
        polls: Mutex<VecDeque<Result<PollStatus, ApiError>>>,
        submit_calls: AtomicU32,
        poll_calls: AtomicU32,
    }

    impl ScriptedApi {
        fn new(
            submits: Vec<Result<Option<String>, ApiError>>,
            polls: Vec<Result<PollStatus, ApiError>>,
        ) -> Self {
            Self {
                submits: Mutex::new(submits.into()),
                polls: Mutex::new(polls.into()),
                ..Default::default()
            }
        }
    }

    impl SerpApi for ScriptedApi {
        async fn submit(&self, _query: &str, _offset: u32) -> Result<Option<String>, ApiError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.submits.lock().unwrap().pop_front();
            next.unwrap_or(Ok(Some("token".into())))
        }

        async fn poll(&self, _token: &str) -> Result<PollStatus, ApiError> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.polls.lock().unwrap().pop_front();
            next.unwrap_or(Ok(PollStatus::Pending))
        }
    }

    fn fast_settings() -> FetchSettings {
        FetchSettings {
            max_retries: 3,
            retry_backoff: 2,
            backoff_unit: Duration::from_millis(10),
            poll_interval: Duration::from_millis(5),
            max_polls: 4,
            request_timeout: Duration::from_secs(1),
        }
    }

    fn ready() -> Result<PollStatus, ApiError> {
        Ok(PollStatus::Ready(SerpPayload::default()))
    }

    async fn run(api: &ScriptedApi, settings: &FetchSettings) -> PageResponse {
        let request = PageRequest::new("rust", 2);
        execute(api, &request, settings, &CancellationToken::new()).await
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_ready_succeeds() {
        let api = ScriptedApi::new(vec![], vec![Ok(PollStatus::Pending), ready()]);
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(response, PageResponse::Success(_)));
        assert_eq!(api.poll_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_first_terminal_state() {
        let api = ScriptedApi::new(vec![], vec![ready(), ready()]);
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(response, PageResponse::Success(_)));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.poll_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_states_step_to_themselves() {
        let api = ScriptedApi::new(vec![], vec![]);
        let request = PageRequest::new("rust", 1);
        let settings = fast_settings();
        let cancel = CancellationToken::new();
        let exchange = Exchange::new(&api, &request, &settings, &cancel);

        let state = exchange.step(ExchangeState::Error(PageError::Cancelled)).await;
        assert!(matches!(state, ExchangeState::Error(PageError::Cancelled)));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_fails_without_retry() {
        let api = ScriptedApi::new(vec![Ok(None)], vec![]);
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(
            response,
            PageResponse::Failure(PageError::NoCorrelationToken)
        ));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_cap_yields_polling_timeout() {
        let api = ScriptedApi::new(vec![], vec![]);
        let response = run(&api, &fast_settings()).await;
        match response {
            PageResponse::Failure(PageError::PollingTimeout { polls }) => assert_eq!(polls, 4),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_status_is_fatal() {
        let api = ScriptedApi::new(vec![], vec![Ok(PollStatus::Failed(500))]);
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(
            response,
            PageResponse::Failure(PageError::HttpStatus(500))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_submit_failures_are_retried() {
        let api = ScriptedApi::new(
            vec![Err(ApiError::Transport("reset".into())), Err(ApiError::Timeout)],
            vec![ready()],
        );
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(response, PageResponse::Success(_)));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_exhaust_budget() {
        let api = ScriptedApi::new(vec![Err(ApiError::Timeout); 3], vec![]);
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(
            response,
            PageResponse::Failure(PageError::TimeoutExhausted { attempts: 3 })
        ));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_transport_errors_exhaust_budget() {
        let api = ScriptedApi::new(vec![Err(ApiError::Transport("reset".into())); 3], vec![]);
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(
            response,
            PageResponse::Failure(PageError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failure_resubmits() {
        let api = ScriptedApi::new(vec![], vec![Err(ApiError::Timeout), ready()]);
        let response = run(&api, &fast_settings()).await;
        assert!(matches!(response, PageResponse::Success(_)));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_error_is_fatal() {
        let api = ScriptedApi::new(vec![], vec![Err(ApiError::Decode("eof".into()))]);
        let response = run(&api, &fast_settings()).await;
        match response {
            PageResponse::Failure(err) => assert_eq!(err.kind(), "transport_error"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_never_submits() {
        let api = ScriptedApi::new(vec![], vec![]);
        let settings = FetchSettings {
            max_retries: 0,
            ..fast_settings()
        };
        let response = run(&api, &settings).await;
        assert!(matches!(
            response,
            PageResponse::Failure(PageError::RetriesExhausted { attempts: 0, .. })
        ));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_between_attempts() {
        let api = ScriptedApi::new(vec![Err(ApiError::Timeout), Err(ApiError::Timeout)], vec![]);
        let settings = fast_settings();
        let request = PageRequest::new("rust", 1);
        let cancel = CancellationToken::new();
        let exchange = Exchange::new(&api, &request, &settings, &cancel);

        let state = exchange.step(ExchangeState::start()).await;
        let state = exchange.step(state).await;
        match &state {
            ExchangeState::Idle { attempt, backoff } => {
                assert_eq!(*attempt, 1);
                assert_eq!(*backoff, Duration::from_millis(10));
            }
            other => panic!("unexpected {other:?}"),
        }
        let state = exchange.step(state).await;
        let state = exchange.step(state).await;
        match state {
            ExchangeState::Idle { attempt, backoff } => {
                assert_eq!(attempt, 2);
                assert_eq!(backoff, Duration::from_millis(20));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retry_loop() {
        let api = ScriptedApi::new(vec![Err(ApiError::Timeout)], vec![]);
        let settings = FetchSettings {
            backoff_unit: Duration::from_secs(60),
            ..fast_settings()
        };
        let request = PageRequest::new("rust", 1);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let response = execute(&api, &request, &settings, &cancel).await;
        assert!(matches!(
            response,
            PageResponse::Failure(PageError::Cancelled)
        ));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_hits_per_call_timeout() {
        struct Stalled;
        impl SerpApi for Stalled {
            async fn submit(&self, _q: &str, _o: u32) -> Result<Option<String>, ApiError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Some("late".into()))
            }
            async fn poll(&self, _t: &str) -> Result<PollStatus, ApiError> {
                Ok(PollStatus::Pending)
            }
        }

        let request = PageRequest::new("rust", 1);
        let response = execute(&Stalled, &request, &fast_settings(), &CancellationToken::new()).await;
        assert!(matches!(
            response,
            PageResponse::Failure(PageError::TimeoutExhausted { attempts: 3 })
        ));
    }
}
