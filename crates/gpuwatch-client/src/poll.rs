use crate::config::ConfigError;
use crate::session::{Session, SessionEvent, ShutdownSignal, Transport};
use futures_util::future::BoxFuture;
use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("reading response body failed: {0}")]
    Body(String),
}

/// One status request. Dropping the returned future must cancel the request.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self) -> BoxFuture<'static, Result<Vec<u8>, FetchError>>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
        let request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "application/json")
            .timeout(self.timeout);
        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|err| FetchError::Request(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            let body = response
                .bytes()
                .await
                .map_err(|err| FetchError::Body(err.to_string()))?;
            Ok(body.to_vec())
        })
    }
}

/// Shortest cadence a poll session runs at; a zero interval is raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Pull transport: one request per interval, measured from issuance, with at
/// most one request outstanding.
#[derive(Clone)]
pub struct PollTransport {
    fetcher: Arc<dyn Fetch>,
    interval: Duration,
}

impl PollTransport {
    pub fn new(fetcher: impl Fetch, interval: Duration) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn http(url: Url, interval: Duration, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self::new(HttpFetcher::new(url, timeout)?, interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Transport for PollTransport {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn open(&self, events: mpsc::Sender<SessionEvent>) -> Session {
        let fetcher = self.fetcher.clone();
        let interval = self.interval;
        Session::spawn(move |shutdown| run_poll_session(fetcher, interval, events, shutdown))
    }
}

type InFlight = (u64, BoxFuture<'static, Result<Vec<u8>, FetchError>>);

async fn next_response(in_flight: &mut Option<InFlight>) -> (u64, Result<Vec<u8>, FetchError>) {
    match in_flight {
        Some((seq, request)) => (*seq, request.await),
        None => std::future::pending().await,
    }
}

async fn run_poll_session(
    fetcher: Arc<dyn Fetch>,
    interval: Duration,
    events: mpsc::Sender<SessionEvent>,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut issued: u64 = 0;
    let mut in_flight: Option<InFlight> = None;
    let mut live = false;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            (seq, result) = next_response(&mut in_flight) => {
                in_flight = None;
                if seq != issued {
                    debug!(event = "poll_stale_response", seq, latest = issued);
                    continue;
                }
                let event = match result {
                    Ok(body) => {
                        if !live {
                            live = true;
                            info!(event = "poll_connected", seq);
                            if events.send(SessionEvent::Opened).await.is_err() {
                                return;
                            }
                        }
                        SessionEvent::Payload(body)
                    }
                    Err(err) => {
                        warn!(event = "poll_failed", seq, error = %err);
                        if !live {
                            continue;
                        }
                        live = false;
                        SessionEvent::Interrupted {
                            reason: err.to_string(),
                        }
                    }
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            _ = ticker.tick() => {
                if let Some((seq, _)) = in_flight.take() {
                    debug!(event = "poll_superseded", seq);
                }
                issued += 1;
                in_flight = Some((issued, fetcher.fetch()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Step = (Duration, Result<Vec<u8>, FetchError>);

    struct CancelGuard {
        cancelled: Arc<AtomicUsize>,
        armed: bool,
    }

    impl Drop for CancelGuard {
        fn drop(&mut self) {
            if self.armed {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Replays scripted responses; requests past the end never resolve.
    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Step>>,
        issued: Arc<AtomicUsize>,
        cancelled: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                ..Self::default()
            }
        }
    }

    impl Fetch for ScriptedFetcher {
        fn fetch(&self) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
            self.issued.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            let guard = CancelGuard {
                cancelled: self.cancelled.clone(),
                armed: true,
            };
            Box::pin(async move {
                let mut guard = guard;
                let Some((delay, result)) = step else {
                    return std::future::pending().await;
                };
                tokio::time::sleep(delay).await;
                guard.armed = false;
                result
            })
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + ms(100),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    fn body(tag: &str) -> Vec<u8> {
        format!(r#"{{"gpus": [], "services": [], "tag": "{tag}"}}"#).into_bytes()
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_request_never_delivers() {
        let fetcher = ScriptedFetcher::new(vec![
            (ms(5_000), Ok(body("stale"))),
            (ms(100), Ok(body("fresh"))),
        ]);
        let issued = fetcher.issued.clone();
        let cancelled = fetcher.cancelled.clone();
        let transport = PollTransport::new(fetcher, ms(3_000));
        let (tx, mut rx) = mpsc::channel(16);
        let start = Instant::now();
        let _session = transport.open(tx);

        assert_eq!(rx.recv().await, Some(SessionEvent::Opened));
        assert_eq!(rx.recv().await, Some(SessionEvent::Payload(body("fresh"))));
        assert_elapsed(start, ms(3_100));
        assert_eq!(issued.load(Ordering::SeqCst), 2);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);

        tokio::time::sleep(ms(10_000)).await;
        while let Ok(event) = rx.try_recv() {
            assert_ne!(event, SessionEvent::Payload(body("stale")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_only_interrupt_after_success() {
        let fetcher = ScriptedFetcher::new(vec![
            (ms(10), Err(FetchError::Status(503))),
            (ms(10), Err(FetchError::Request("connection refused".to_string()))),
            (ms(10), Ok(body("a"))),
            (ms(10), Err(FetchError::Status(500))),
            (ms(10), Err(FetchError::Status(502))),
            (ms(10), Ok(body("b"))),
        ]);
        let cancelled = fetcher.cancelled.clone();
        let transport = PollTransport::new(fetcher, ms(1_000));
        let (tx, mut rx) = mpsc::channel(16);
        let start = Instant::now();
        let _session = transport.open(tx);

        assert_eq!(rx.recv().await, Some(SessionEvent::Opened));
        assert_elapsed(start, ms(2_010));
        assert_eq!(rx.recv().await, Some(SessionEvent::Payload(body("a"))));
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Interrupted {
                reason: "unexpected http status 500".to_string()
            })
        );
        assert_elapsed(start, ms(3_010));
        assert_eq!(rx.recv().await, Some(SessionEvent::Opened));
        assert_elapsed(start, ms(5_010));
        assert_eq!(rx.recv().await, Some(SessionEvent::Payload(body("b"))));
        // every request finished inside its slot
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_minimum() {
        let fetcher = ScriptedFetcher::new(vec![(Duration::ZERO, Ok(body("a")))]);
        let transport = PollTransport::new(fetcher, Duration::ZERO);
        assert_eq!(transport.interval(), MIN_POLL_INTERVAL);

        let (tx, mut rx) = mpsc::channel(16);
        let session = transport.open(tx);
        assert_eq!(rx.recv().await, Some(SessionEvent::Opened));
        assert_eq!(rx.recv().await, Some(SessionEvent::Payload(body("a"))));
        tokio::time::sleep(ms(10)).await;
        assert!(!session.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_cancels_in_flight_request() {
        let fetcher = ScriptedFetcher::new(vec![(ms(60_000), Ok(body("late")))]);
        let issued = fetcher.issued.clone();
        let cancelled = fetcher.cancelled.clone();
        let transport = PollTransport::new(fetcher, ms(3_000));
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = transport.open(tx);

        tokio::time::sleep(ms(1)).await;
        assert_eq!(issued.load(Ordering::SeqCst), 1);

        session.close();
        assert_eq!(rx.recv().await, None);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
