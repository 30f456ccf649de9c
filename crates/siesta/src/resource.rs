//! # Resources
//!
//! A [`Resource`] is the cached, observable state of one URL: the latest data,
//! the latest error, and whether a load is in progress. The [`Service`] keeps
//! at most one live resource per URL, so every part of an application asking
//! for the same URL sees the same state.
//!
//! All state changes go through a single commit step that runs inside the
//! service's owning context and is followed by observer notification.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::{HeaderValue, IF_NONE_MATCH};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::config::Configuration;
use crate::context::OwningContext;
use crate::entity::{Content, ContentValue, DEFAULT_CONTENT_TYPE, Entity};
use crate::error::{RequestError, ServiceError};
use crate::observer::{NewDataSource, ObserverRegistry, Owner, ResourceEvent, ResourceObserver};
use crate::request::coordinator::{Flight, FlightPlan, RequestCoordinator};
use crate::request::{Request, ResponseInfo};
use crate::service::{Service, ServiceInner};
use crate::transport::{HttpRequest, Transport};

#[derive(Default)]
struct ResourceState {
    latest_data: Option<Entity>,
    latest_error: Option<RequestError>,
    invalidated: bool,
    requests: RequestCoordinator,
    configuration: Option<(u64, Arc<Configuration>)>,
}

enum StateChange {
    NewData(Entity, NewDataSource),
    NotModified(SystemTime, Option<String>),
    Error(RequestError),
    Wipe,
}

pub(crate) struct ResourceInner {
    url: Url,
    service: Weak<ServiceInner>,
    context: Arc<OwningContext>,
    transport: Arc<dyn Transport>,
    state: Mutex<ResourceState>,
    observers: Mutex<ObserverRegistry>,
}

/// Cached state of a single URL.
///
/// Cheap to clone; clones refer to the same resource.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    pub(crate) fn new(
        url: Url,
        service: Weak<ServiceInner>,
        context: Arc<OwningContext>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                url,
                service,
                context,
                transport,
                state: Mutex::new(ResourceState::default()),
                observers: Mutex::new(ObserverRegistry::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ResourceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ResourceInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// The owning service, if it is still alive.
    pub fn service(&self) -> Option<Service> {
        self.inner.service.upgrade().map(Service::from_inner)
    }

    // State

    pub fn latest_data(&self) -> Option<Entity> {
        self.inner.state.lock().latest_data.clone()
    }

    pub fn latest_error(&self) -> Option<RequestError> {
        self.inner.state.lock().latest_error.clone()
    }

    /// Whether a load of this resource is in progress.
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().requests.is_loading()
    }

    /// Time of the most recent data or error.
    pub fn timestamp(&self) -> Option<SystemTime> {
        let state = self.inner.state.lock();
        let data = state.latest_data.as_ref().map(Entity::timestamp);
        let error = state.latest_error.as_ref().map(RequestError::timestamp);
        data.max(error)
    }

    /// Whether the cached state is fresh enough that no load is needed.
    ///
    /// Data stays fresh for the configured expiration time; a more recent
    /// error holds off new loads for the retry time instead. Invalidated
    /// resources are never up to date.
    pub fn is_up_to_date(&self) -> bool {
        let configuration = self.configuration();
        let state = self.inner.state.lock();
        if state.invalidated {
            return false;
        }

        let data = state.latest_data.as_ref().map(Entity::timestamp);
        let error = state.latest_error.as_ref().map(RequestError::timestamp);
        let (timestamp, max_age) = match (data, error) {
            (None, None) => return false,
            (Some(data), Some(error)) if error > data => (error, configuration.retry_time),
            (Some(data), _) => (data, configuration.expiration_time),
            (None, Some(error)) => (error, configuration.retry_time),
        };

        match SystemTime::now().duration_since(timestamp) {
            Ok(age) => age < max_age,
            Err(_) => true,
        }
    }

    /// The configuration that applies to this resource, recomputed whenever
    /// the service's configuration changes.
    pub fn configuration(&self) -> Arc<Configuration> {
        let Some(service) = self.inner.service.upgrade() else {
            return self
                .inner
                .state
                .lock()
                .configuration
                .as_ref()
                .map(|(_, configuration)| configuration.clone())
                .unwrap_or_default();
        };

        let generation = service.configuration_generation();
        if let Some((cached, configuration)) = &self.inner.state.lock().configuration {
            if *cached == generation {
                return configuration.clone();
            }
        }

        let configuration = Arc::new(service.configuration_for(&self.inner.url));
        self.inner.state.lock().configuration = Some((generation, configuration.clone()));
        configuration
    }

    // Typed content

    pub fn typed_content<T: ContentValue>(&self) -> Option<T> {
        self.inner
            .state
            .lock()
            .latest_data
            .as_ref()
            .and_then(Entity::typed_content::<T>)
    }

    pub fn typed_content_or<T: ContentValue>(&self, default: T) -> T {
        self.typed_content().unwrap_or(default)
    }

    /// Text content, or an empty string.
    pub fn text(&self) -> String {
        self.typed_content::<String>().unwrap_or_default()
    }

    /// JSON content, or `null`.
    pub fn json(&self) -> Value {
        self.typed_content::<Value>().unwrap_or(Value::Null)
    }

    /// JSON object content, or an empty map.
    pub fn json_dict(&self) -> Map<String, Value> {
        match self.json() {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// JSON array content, or an empty list.
    pub fn json_array(&self) -> Vec<Value> {
        match self.json() {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    // Requests

    /// Issues a request against this resource without touching its state.
    pub fn request(&self, method: Method) -> Request {
        self.request_with(HttpRequest::new(method, self.inner.url.clone()))
    }

    /// Issues a custom request without touching the resource's state.
    pub fn request_with(&self, request: HttpRequest) -> Request {
        self.start(request, false)
    }

    /// Fetches the resource and records the outcome.
    ///
    /// Sends `If-None-Match` when the cached data carries an etag. A load
    /// issued while an identical one is in flight joins it.
    pub fn load(&self) -> Request {
        let mut request = HttpRequest::get(self.inner.url.clone());
        let etag = self
            .inner
            .state
            .lock()
            .latest_data
            .as_ref()
            .and_then(|data| data.etag().map(str::to_owned));
        if let Some(value) = etag.and_then(|etag| HeaderValue::from_str(&etag).ok()) {
            request.headers_mut().insert(IF_NONE_MATCH, value);
        }
        self.load_using(request)
    }

    /// Loads the resource with a custom request. The outcome updates the
    /// resource's state as with [`load`](Self::load).
    pub fn load_using(&self, request: HttpRequest) -> Request {
        self.start(request, true)
    }

    /// Loads only when nothing is in flight and the cached state is stale.
    pub fn load_if_needed(&self) -> Option<Request> {
        let _context = self.inner.context.enter();
        if self.is_loading() {
            debug!(url = %self.inner.url, "Load already in progress");
            return None;
        }
        if self.is_up_to_date() {
            debug!(url = %self.inner.url, "Resource is up to date");
            return None;
        }
        Some(self.load())
    }

    fn start(&self, mut request: HttpRequest, load: bool) -> Request {
        let configuration = self.configuration();
        configuration.prepare(&mut request);

        let _context = self.inner.context.enter();
        let signature = request.signature();
        let (flight, started) = self.inner.state.lock().requests.start(signature, || {
            Flight::new(&request, configuration.progress.clone(), self.inner.context.clone())
        });

        if started {
            let resource = self.downgrade();
            flight.add_hook(Box::new(move |flight, _| {
                if let Some(inner) = resource.upgrade() {
                    inner.state.lock().requests.remove(flight);
                }
            }));
        }

        let became_load = load && flight.mark_feeds_resource();
        if became_load {
            // Held until the flight settles.
            let resource = self.clone();
            flight.add_hook(Box::new(move |_, info| resource.receive(info)));
        }

        let caller = flight.new_request();

        if became_load {
            info!(url = %self.inner.url, method = %request.method(), "Loading resource");
            self.notify(ResourceEvent::Requested);
        }

        if started {
            flight.launch(FlightPlan {
                transport: self.inner.transport.clone(),
                fallback: self.latest_data(),
                pipeline: configuration.pipeline.clone(),
                tick_interval: configuration.progress.tick_interval,
                request,
            });
        } else {
            debug!(signature = %flight.signature(), "Joined request already in flight");
        }

        caller
    }

    fn receive(&self, info: &ResponseInfo) {
        match &info.response {
            Ok(entity) if info.is_new => {
                self.commit(StateChange::NewData(entity.clone(), NewDataSource::Network))
            }
            Ok(entity) => self.commit(StateChange::NotModified(
                entity.timestamp(),
                info.validator.clone(),
            )),
            Err(error) if error.is_cancellation() => {
                debug!(url = %self.inner.url, "Load cancelled");
                self.notify(ResourceEvent::RequestCancelled);
            }
            Err(error) => self.commit(StateChange::Error(error.clone())),
        }
        if let Some(service) = self.inner.service.upgrade() {
            service.touch(self);
        }
    }

    // Local mutation

    /// Marks the cached data stale so the next [`load_if_needed`](Self::load_if_needed) fetches.
    pub fn invalidate(&self) {
        let _context = self.inner.context.enter();
        self.inner.state.lock().invalidated = true;
    }

    /// Cancels loads and discards all cached state.
    pub fn wipe(&self) {
        let _context = self.inner.context.enter();
        let loads = self.inner.state.lock().requests.load_flights();
        for flight in loads {
            flight.cancel_all();
        }
        self.commit(StateChange::Wipe);
    }

    /// Replaces the cached data with a locally produced entity.
    pub fn override_local_data(&self, entity: Entity) {
        self.commit(StateChange::NewData(entity, NewDataSource::LocalOverride));
    }

    /// Replaces only the content of the cached data, keeping its metadata.
    pub fn override_local_content(&self, content: Content) {
        let entity = match self.latest_data() {
            Some(data) => data.with_content(content).with_timestamp(SystemTime::now()),
            None => Entity::new(content, DEFAULT_CONTENT_TYPE),
        };
        self.override_local_data(entity);
    }

    fn commit(&self, change: StateChange) {
        let _context = self.inner.context.enter();
        let event = {
            let mut state = self.inner.state.lock();
            match change {
                StateChange::NewData(entity, source) => {
                    state.latest_data = Some(entity);
                    state.latest_error = None;
                    state.invalidated = false;
                    ResourceEvent::NewData(source)
                }
                StateChange::NotModified(timestamp, validator) => {
                    if let Some(current) = state.latest_data.take() {
                        state.latest_data = Some(current.refreshed(validator, timestamp));
                    }
                    state.latest_error = None;
                    state.invalidated = false;
                    ResourceEvent::NotModified
                }
                StateChange::Error(error) => {
                    state.latest_error = Some(error);
                    ResourceEvent::Error
                }
                StateChange::Wipe => {
                    state.latest_data = None;
                    state.latest_error = None;
                    state.invalidated = false;
                    ResourceEvent::NewData(NewDataSource::Wipe)
                }
            }
        };
        self.notify(event);
    }

    // Observers

    /// Adds an observer held weakly. It stays attached while `owner` is alive
    /// and the caller keeps the observer alive.
    pub fn add_observer<O>(&self, observer: &Arc<O>, owner: &Owner) -> &Self
    where
        O: ResourceObserver + 'static,
    {
        let observer: Arc<dyn ResourceObserver> = observer.clone();
        self.attach(observer, owner)
    }

    /// Adds a closure observer retained by `owner`.
    pub fn add_observer_fn<F>(&self, owner: &Owner, observer: F) -> &Self
    where
        F: Fn(&Resource, ResourceEvent) + Send + Sync + 'static,
    {
        let observer: Arc<dyn ResourceObserver> = Arc::new(observer);
        owner.retain(observer.clone());
        self.attach(observer, owner)
    }

    fn attach(&self, observer: Arc<dyn ResourceObserver>, owner: &Owner) -> &Self {
        let _context = self.inner.context.enter();
        let added = self.inner.observers.lock().add(&observer, owner);
        self.set_pinned(true);
        if added {
            observer.resource_changed(self, ResourceEvent::ObserverAdded);
        }
        self
    }

    /// Detaches every registration made under `owner`.
    pub fn remove_observers(&self, owner: &Owner) {
        let _context = self.inner.context.enter();
        let (detached, empty) = {
            let mut observers = self.inner.observers.lock();
            let detached = observers.remove_owner(owner);
            (detached, observers.is_empty())
        };
        for observer in detached {
            observer.stopped_observing(self);
        }
        if empty {
            self.set_pinned(false);
        }
    }

    pub fn observer_count(&self) -> usize {
        let mut observers = self.inner.observers.lock();
        let (live, _) = observers.snapshot();
        live.len()
    }

    fn notify(&self, event: ResourceEvent) {
        let _context = self.inner.context.enter();
        let (observers, detached, empty) = {
            let mut registry = self.inner.observers.lock();
            let (observers, detached) = registry.snapshot();
            (observers, detached, registry.is_empty())
        };

        debug!(url = %self.inner.url, event = ?event, observers = observers.len(), "Resource changed");

        for observer in &detached {
            observer.stopped_observing(self);
        }
        for observer in &observers {
            observer.resource_changed(self, event);
        }
        if empty && !detached.is_empty() {
            self.set_pinned(false);
        }
    }

    fn set_pinned(&self, pinned: bool) {
        if let Some(service) = self.inner.service.upgrade() {
            service.set_pinned(self, pinned);
        }
    }

    // Related resources

    /// Resource for a path below this one.
    pub fn child(&self, path: &str) -> Result<Resource, ServiceError> {
        let mut url = self.inner.url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ServiceError::CannotBeABase(self.inner.url.to_string()))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        self.related(url)
    }

    /// Resource for a reference resolved against this resource's URL.
    pub fn relative(&self, reference: &str) -> Result<Resource, ServiceError> {
        let url = self.inner.url.join(reference)?;
        self.related(url)
    }

    /// Resource with the query parameter `name` set to `value`, or removed
    /// when `value` is `None`.
    pub fn with_param(&self, name: &str, value: Option<&str>) -> Result<Resource, ServiceError> {
        let mut url = self.inner.url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key.as_ref() != name)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.set_query(None);
        if !kept.is_empty() || value.is_some() {
            let mut query = url.query_pairs_mut();
            query.extend_pairs(kept);
            if let Some(value) = value {
                query.append_pair(name, value);
            }
        }
        self.related(url)
    }

    fn related(&self, url: Url) -> Result<Resource, ServiceError> {
        let service = self.service().ok_or(ServiceError::ServiceDropped)?;
        Ok(service.resource_for_url(url))
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Resource {}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Resource")
            .field("url", &self.inner.url.as_str())
            .field("loading", &state.requests.is_loading())
            .field("has_data", &state.latest_data.is_some())
            .field("has_error", &state.latest_error.is_some())
            .finish()
    }
}
