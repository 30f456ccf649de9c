//! # Request Coordination
//!
//! A [`Flight`] is one physical exchange with the transport. Any number of
//! callers may hold a [`Request`] handle onto the same flight; the
//! [`RequestCoordinator`] makes sure equivalent requests issued while a flight
//! is in progress join it rather than hitting the network again.
//!
//! Flights settle exactly once. Settling runs the flight's hooks (used by the
//! owning resource to commit state) and then delivers the outcome to every
//! caller that has not cancelled, all inside the owning context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::ETAG;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Interest, Request, RequestSignature, ResponseInfo};
use crate::context::OwningContext;
use crate::entity::Entity;
use crate::error::{ErrorCause, RequestError, TransportError};
use crate::pipeline::Pipeline;
use crate::progress::{ProgressConfig, ProgressEstimator, RequestTransferMetrics};
use crate::transport::{HttpRequest, RawResponse, TransferMonitor, Transport};

/// Work run when a flight settles, before caller callbacks.
pub(crate) type SettleHook = Box<dyn FnOnce(&Arc<Flight>, &ResponseInfo) + Send>;

/// Everything a flight needs to perform its exchange.
pub(crate) struct FlightPlan {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) request: HttpRequest,
    pub(crate) pipeline: Pipeline,
    /// Entity reused when the server answers 304.
    pub(crate) fallback: Option<Entity>,
    pub(crate) tick_interval: Duration,
}

struct FlightState {
    interests: Vec<Arc<Interest>>,
    hooks: Vec<SettleHook>,
    feeds_resource: bool,
    outcome: Option<ResponseInfo>,
    progress: ProgressEstimator,
}

pub(crate) struct Flight {
    signature: RequestSignature,
    method: Method,
    context: Arc<OwningContext>,
    cancel: CancellationToken,
    state: Mutex<FlightState>,
}

impl Flight {
    pub(crate) fn new(
        request: &HttpRequest,
        progress: ProgressConfig,
        context: Arc<OwningContext>,
    ) -> Arc<Self> {
        let has_body = request.body().is_some_and(|body| !body.is_empty());
        Arc::new(Self {
            signature: request.signature(),
            method: request.method().clone(),
            context,
            cancel: CancellationToken::new(),
            state: Mutex::new(FlightState {
                interests: Vec::new(),
                hooks: Vec::new(),
                feeds_resource: false,
                outcome: None,
                progress: ProgressEstimator::new(progress, has_body),
            }),
        })
    }

    pub(crate) fn signature(&self) -> &RequestSignature {
        &self.signature
    }

    pub(crate) fn method(&self) -> &Method {
        &self.method
    }

    pub(crate) fn context(&self) -> &Arc<OwningContext> {
        &self.context
    }

    /// A flight can be joined until it settles or is cancelled.
    pub(crate) fn is_joinable(&self) -> bool {
        !self.cancel.is_cancelled() && self.state.lock().outcome.is_none()
    }

    pub(crate) fn feeds_resource(&self) -> bool {
        self.state.lock().feeds_resource
    }

    /// Marks the flight as a load of its resource. Returns `true` the first time.
    pub(crate) fn mark_feeds_resource(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.feeds_resource, true)
    }

    pub(crate) fn add_hook(self: &Arc<Self>, hook: SettleHook) {
        let settled = {
            let mut state = self.state.lock();
            match &state.outcome {
                Some(info) => Some(info.clone()),
                None => {
                    state.hooks.push(hook);
                    return;
                }
            }
        };
        if let Some(info) = settled {
            let _context = self.context.enter();
            hook(self, &info);
        }
    }

    pub(crate) fn progress(&self) -> f64 {
        self.state.lock().progress.fraction()
    }

    /// Creates a new caller handle onto this flight.
    pub(crate) fn new_request(self: &Arc<Self>) -> Request {
        let interest = Arc::new(Interest::new(self.clone()));
        let settled = {
            let mut state = self.state.lock();
            match &state.outcome {
                Some(info) => Some(info.clone()),
                None => {
                    state.interests.push(interest.clone());
                    None
                }
            }
        };
        if let Some(info) = settled {
            let _context = self.context.enter();
            interest.deliver(info);
        }
        Request { interest }
    }

    /// Drops one caller. When no callers remain the exchange is abandoned.
    pub(crate) fn withdraw(&self, interest: &Arc<Interest>) {
        let abandoned = {
            let mut state = self.state.lock();
            state.interests.retain(|other| !Arc::ptr_eq(other, interest));
            state.interests.is_empty() && state.outcome.is_none()
        };
        if abandoned {
            debug!(signature = %self.signature, "All callers cancelled, abandoning request");
            self.cancel.cancel();
        }
    }

    /// Cancels the exchange on behalf of every caller.
    pub(crate) fn cancel_all(&self) {
        let interests = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            std::mem::take(&mut state.interests)
        };
        self.cancel.cancel();
        let _context = self.context.enter();
        for interest in interests {
            interest.deliver(ResponseInfo::cancelled());
        }
    }

    /// Starts the exchange in the background, settling immediately with a
    /// failure if there is no runtime to run it on.
    pub(crate) fn launch(self: &Arc<Self>, plan: FlightPlan) {
        let flight = self.clone();
        let spawned = self.context.spawn(async move {
            let info = flight.perform(plan).await;
            flight.settle(info);
        });
        if !spawned {
            warn!(signature = %self.signature, "No async runtime available to perform request");
            self.settle(ResponseInfo::new(Err(RequestError::with_cause(
                "No async runtime available",
                ErrorCause::NoRuntime,
            ))));
        }
    }

    async fn perform(&self, plan: FlightPlan) -> ResponseInfo {
        let FlightPlan {
            transport,
            request,
            pipeline,
            fallback,
            tick_interval,
        } = plan;

        debug!(signature = %self.signature, "Performing request");

        let monitor = TransferMonitor::default();
        let mut exchange = transport.perform(request, monitor.clone());
        let mut ticker = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let raw = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                result = &mut exchange => break Some(result),
                _ = ticker.tick() => self.report_progress(&monitor.snapshot()),
            }
        };

        match raw {
            None => {
                debug!(signature = %self.signature, "Request cancelled before completion");
                ResponseInfo::cancelled()
            }
            Some(Ok(raw)) if raw.status == 304 => self.not_modified(raw, fallback),
            Some(result) => {
                if let Err(error) = &result {
                    debug!(signature = %self.signature, error = %error, "Transport failed");
                }
                ResponseInfo::new(pipeline.process_raw(result))
            }
        }
    }

    fn not_modified(&self, raw: RawResponse, fallback: Option<Entity>) -> ResponseInfo {
        match fallback {
            Some(entity) => {
                debug!(signature = %self.signature, "Server reported content not modified");
                let etag = raw
                    .headers
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                ResponseInfo::not_modified(entity.refreshed(etag.clone(), SystemTime::now()), etag)
            }
            None => ResponseInfo::new(Err(RequestError::with_cause(
                "No data available",
                ErrorCause::NoDataForNotModified,
            )
            .with_status(Some(raw.status)))),
        }
    }

    fn report_progress(&self, metrics: &RequestTransferMetrics) {
        let (fraction, interests) = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            let before = state.progress.fraction();
            let fraction = state.progress.update(metrics);
            if fraction <= before {
                return;
            }
            (fraction, state.interests.clone())
        };

        let _context = self.context.enter();
        for interest in interests {
            interest.report_progress(fraction);
        }
    }

    /// Records the outcome, runs hooks, then notifies callers.
    ///
    /// # Panics
    ///
    /// Panics if the flight has already settled.
    pub(crate) fn settle(self: &Arc<Self>, info: ResponseInfo) {
        let _context = self.context.enter();
        let (hooks, interests) = {
            let mut state = self.state.lock();
            assert!(state.outcome.is_none(), "request settled more than once");
            state.outcome = Some(info.clone());
            state.progress.complete();
            (
                std::mem::take(&mut state.hooks),
                std::mem::take(&mut state.interests),
            )
        };

        for hook in hooks {
            hook(self, &info);
        }
        for interest in interests {
            interest.deliver(info.clone());
        }
    }
}

/// In-flight requests of one resource, keyed by signature.
#[derive(Default)]
pub(crate) struct RequestCoordinator {
    flights: HashMap<RequestSignature, Arc<Flight>>,
}

impl RequestCoordinator {
    /// Returns the joinable flight for `signature`, or registers a new one
    /// built by `create`. The flag is `true` when a new flight was created.
    pub(crate) fn start<F>(&mut self, signature: RequestSignature, create: F) -> (Arc<Flight>, bool)
    where
        F: FnOnce() -> Arc<Flight>,
    {
        if let Some(flight) = self.flights.get(&signature) {
            if flight.is_joinable() {
                return (flight.clone(), false);
            }
        }
        let flight = create();
        self.flights.insert(signature, flight.clone());
        (flight, true)
    }

    pub(crate) fn remove(&mut self, flight: &Arc<Flight>) {
        let registered = self
            .flights
            .get(flight.signature())
            .is_some_and(|existing| Arc::ptr_eq(existing, flight));
        if registered {
            self.flights.remove(flight.signature());
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, signature: &RequestSignature) -> bool {
        self.flights
            .get(signature)
            .is_some_and(|flight| flight.is_joinable())
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.flights
            .values()
            .any(|flight| flight.feeds_resource() && flight.is_joinable())
    }

    pub(crate) fn load_flights(&self) -> Vec<Arc<Flight>> {
        self.flights
            .values()
            .filter(|flight| flight.feeds_resource())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use url::Url;

    use super::*;
    use crate::request::RequestState;
    use crate::test_utils::StubTransport;

    fn get(url: &str) -> HttpRequest {
        HttpRequest::get(Url::parse(url).unwrap())
    }

    fn flight(request: &HttpRequest) -> Arc<Flight> {
        Flight::new(
            request,
            ProgressConfig::default(),
            Arc::new(OwningContext::default()),
        )
    }

    fn plan(transport: &StubTransport, request: HttpRequest) -> FlightPlan {
        FlightPlan {
            transport: Arc::new(transport.clone()),
            request,
            pipeline: Pipeline::standard(),
            fallback: None,
            tick_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_coordinator_joins_live_flights() {
        let request = get("https://example.com/a");
        let mut coordinator = RequestCoordinator::default();

        let (first, started) = coordinator.start(request.signature(), || flight(&request));
        assert!(started);
        let (second, started) = coordinator.start(request.signature(), || flight(&request));
        assert!(!started);
        assert!(Arc::ptr_eq(&first, &second));

        first.cancel_all();
        let (third, started) = coordinator.start(request.signature(), || flight(&request));
        assert!(started);
        assert!(!Arc::ptr_eq(&first, &third));

        coordinator.remove(&first);
        assert!(coordinator.contains(&request.signature()));
        coordinator.remove(&third);
        assert!(!coordinator.contains(&request.signature()));
    }

    #[tokio::test]
    async fn test_flight_delivers_to_every_caller() {
        let transport = StubTransport::new();
        transport.stub_text("https://example.com/a", 200, "text/plain", "hello");
        let request = get("https://example.com/a");
        let flight = flight(&request);

        let hooks = Arc::new(AtomicUsize::new(0));
        let counter = hooks.clone();
        flight.add_hook(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let a = flight.new_request();
        let b = flight.new_request();
        flight.launch(plan(&transport, request));

        let (a, b) = tokio::join!(a.outcome(), b.outcome());
        assert_eq!(a.entity().and_then(Entity::text), Some("hello"));
        assert_eq!(b.entity().and_then(Entity::text), Some("hello"));
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(transport.call_count("https://example.com/a"), 1);

        let late = flight.new_request();
        assert_eq!(late.state(), RequestState::Completed);
        assert_eq!(*late.method(), Method::GET);
        assert_eq!(late.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_cancelling_every_caller_abandons_exchange() {
        let transport = StubTransport::new();
        transport.stub_text("https://example.com/slow", 200, "text/plain", "late");
        let gate = transport.hold("https://example.com/slow");
        let request = get("https://example.com/slow");
        let flight = flight(&request);

        let a = flight.new_request();
        let b = flight.new_request();
        flight.launch(plan(&transport, request));

        a.cancel();
        assert_eq!(a.state(), RequestState::Cancelled);
        assert_eq!(b.state(), RequestState::InProgress);
        assert!(flight.is_joinable());
        b.cancel();
        assert!(!flight.is_joinable());

        assert!(a.outcome().await.is_cancellation());
        assert!(b.outcome().await.is_cancellation());
        gate.release();
    }

    #[test]
    fn test_launch_without_runtime_fails_immediately() {
        let transport = StubTransport::new();
        let request = get("https://example.com/a");
        let flight = flight(&request);
        let caller = flight.new_request();

        flight.launch(plan(&transport, request));

        let info = caller.response().unwrap();
        assert!(matches!(
            info.error().and_then(RequestError::cause),
            Some(ErrorCause::NoRuntime)
        ));
        assert_eq!(transport.call_count("https://example.com/a"), 0);
    }
}
