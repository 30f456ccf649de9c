//! # Requests
//!
//! A [`Request`] is a caller's handle onto an in-flight (or finished) network
//! request. Callbacks registered on it fire exactly once, in a fixed order:
//!
//! 1. progress reaches `1.0`
//! 2. completion
//! 3. success or failure
//! 4. new data or not modified (success only)
//!
//! Callbacks registered after the request has finished run immediately with the
//! recorded outcome. The handle can also be awaited.

mod callbacks;
pub(crate) mod coordinator;
mod signature;

use std::future::IntoFuture;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, MutexGuard};
use reqwest::Method;
use tokio::sync::watch;
use tracing::debug;

use self::callbacks::CallbackSlots;
use self::coordinator::Flight;
use crate::entity::Entity;
use crate::error::RequestError;

pub use self::signature::RequestSignature;

/// Either a successfully processed entity or the reason it could not be produced.
pub type Response = Result<Entity, RequestError>;

/// The final outcome of a request.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub response: Response,
    /// `false` when the server confirmed cached content was still current.
    pub is_new: bool,
    /// ETag sent with a not-modified response, if the server included one.
    pub validator: Option<String>,
}

impl ResponseInfo {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            is_new: true,
            validator: None,
        }
    }

    pub fn not_modified(entity: Entity, validator: Option<String>) -> Self {
        Self {
            response: Ok(entity),
            is_new: false,
            validator,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(Err(RequestError::cancelled()))
    }

    pub fn entity(&self) -> Option<&Entity> {
        self.response.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RequestError> {
        self.response.as_ref().err()
    }

    pub fn is_cancellation(&self) -> bool {
        self.error().is_some_and(RequestError::is_cancellation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    InProgress,
    Completed,
    /// Completed with a cancellation, either by this caller or by a wipe.
    Cancelled,
}

/// One caller's registration on a flight.
pub(crate) struct Interest {
    flight: Arc<Flight>,
    slots: Mutex<CallbackSlots>,
    outcome: watch::Sender<Option<ResponseInfo>>,
}

impl Interest {
    pub(crate) fn new(flight: Arc<Flight>) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            flight,
            slots: Mutex::new(CallbackSlots::default()),
            outcome,
        }
    }

    pub(crate) fn deliver(&self, info: ResponseInfo) {
        let fired = self.slots.lock().fire(info.clone());
        self.outcome.send_replace(Some(info));
        fired.run();
    }

    pub(crate) fn report_progress(&self, fraction: f64) {
        let mut callbacks = {
            let mut slots = self.slots.lock();
            if slots.outcome().is_some() {
                return;
            }
            slots.take_progress()
        };
        for callback in &mut callbacks {
            callback(fraction);
        }
        self.slots.lock().restore_progress(callbacks);
    }
}

/// Handle onto a network request.
///
/// Cloning the handle does not create a new caller; clones share callbacks and
/// cancellation.
#[derive(Clone)]
pub struct Request {
    interest: Arc<Interest>,
}

impl Request {
    /// The callback slots, or the recorded outcome if the request has finished.
    fn pending_slots(&self) -> Result<MutexGuard<'_, CallbackSlots>, ResponseInfo> {
        let slots = self.interest.slots.lock();
        match slots.outcome().cloned() {
            Some(info) => Err(info),
            None => Ok(slots),
        }
    }

    pub fn on_completion<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&ResponseInfo) + Send + 'static,
    {
        let _context = self.interest.flight.context().enter();
        match self.pending_slots() {
            Ok(mut slots) => slots.add_completion(Box::new(callback)),
            Err(info) => callback(&info),
        }
        self
    }

    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Entity) + Send + 'static,
    {
        let _context = self.interest.flight.context().enter();
        match self.pending_slots() {
            Ok(mut slots) => slots.add_success(Box::new(callback)),
            Err(info) => {
                if let Some(entity) = info.entity() {
                    callback(entity);
                }
            }
        }
        self
    }

    pub fn on_new_data<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Entity) + Send + 'static,
    {
        let _context = self.interest.flight.context().enter();
        match self.pending_slots() {
            Ok(mut slots) => slots.add_new_data(Box::new(callback)),
            Err(info) => {
                if let (true, Some(entity)) = (info.is_new, info.entity()) {
                    callback(entity);
                }
            }
        }
        self
    }

    pub fn on_not_modified<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let _context = self.interest.flight.context().enter();
        match self.pending_slots() {
            Ok(mut slots) => slots.add_not_modified(Box::new(callback)),
            Err(info) => {
                if !info.is_new && info.entity().is_some() {
                    callback();
                }
            }
        }
        self
    }

    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&RequestError) + Send + 'static,
    {
        let _context = self.interest.flight.context().enter();
        match self.pending_slots() {
            Ok(mut slots) => slots.add_failure(Box::new(callback)),
            Err(info) => {
                if let Some(error) = info.error() {
                    callback(error);
                }
            }
        }
        self
    }

    /// Registers a progress observer. It receives non-decreasing fractions and
    /// always ends with `1.0`.
    pub fn on_progress<F>(&self, mut callback: F) -> &Self
    where
        F: FnMut(f64) + Send + 'static,
    {
        let _context = self.interest.flight.context().enter();
        match self.pending_slots() {
            Ok(mut slots) => slots.add_progress(Box::new(callback)),
            Err(_) => callback(1.0),
        }
        self
    }

    /// Cancels this caller's interest.
    ///
    /// The caller's callbacks fire right away with a cancellation failure. The
    /// network exchange is only abandoned once every caller sharing it has
    /// cancelled. Has no effect on a finished request.
    pub fn cancel(&self) {
        let flight = &self.interest.flight;
        let _context = flight.context().enter();
        if self.interest.slots.lock().outcome().is_some() {
            return;
        }
        debug!(signature = %flight.signature(), "Request cancelled by caller");
        flight.withdraw(&self.interest);
        self.interest.deliver(ResponseInfo::cancelled());
    }

    pub fn state(&self) -> RequestState {
        match self.interest.slots.lock().outcome() {
            None => RequestState::InProgress,
            Some(info) if info.is_cancellation() => RequestState::Cancelled,
            Some(_) => RequestState::Completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.interest.slots.lock().outcome().is_some()
    }

    /// Current progress estimate in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.is_completed() {
            1.0
        } else {
            self.interest.flight.progress()
        }
    }

    pub fn signature(&self) -> &RequestSignature {
        self.interest.flight.signature()
    }

    pub fn method(&self) -> &Method {
        self.interest.flight.method()
    }

    /// The outcome, if the request has finished.
    pub fn response(&self) -> Option<ResponseInfo> {
        self.interest.slots.lock().outcome().cloned()
    }

    /// Waits for the outcome.
    pub async fn outcome(&self) -> ResponseInfo {
        let mut receiver = self.interest.outcome.subscribe();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(ResponseInfo::cancelled)
    }
}

impl IntoFuture for Request {
    type Output = ResponseInfo;
    type IntoFuture = BoxFuture<'static, ResponseInfo>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.outcome().await }.boxed()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("signature", self.signature())
            .field("state", &self.state())
            .finish()
    }
}
