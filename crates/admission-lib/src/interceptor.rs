//! Ingress interceptor
//!
//! [`AdmissionControlLayer`] wraps any tower service whose requests carry an
//! action name. Requests with an action type are checked by the
//! [`AdmissionControlService`] before reaching the inner service; a rejection
//! is returned as the inner service's error type.
//!
//! The inner service must be `Clone`: each call takes the instance that was
//! driven to readiness, so a rejected request releases any capacity reserved
//! by `poll_ready` (`ConcurrencyLimit`, `Buffer`).

use crate::dispatcher::AdmissionControlService;
use crate::error::AdmissionError;
use crate::models::ActionType;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Request metadata needed for admission
pub trait AdmissionRequest {
    fn action(&self) -> &str;

    /// `None` bypasses admission control
    fn action_type(&self) -> Option<ActionType>;
}

#[derive(Clone)]
pub struct AdmissionControlLayer {
    service: Arc<AdmissionControlService>,
}

impl AdmissionControlLayer {
    pub fn new(service: Arc<AdmissionControlService>) -> Self {
        Self { service }
    }
}

impl<S> Layer<S> for AdmissionControlLayer {
    type Service = AdmissionControlInterceptor<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionControlInterceptor {
            inner,
            service: self.service.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AdmissionControlInterceptor<S> {
    inner: S,
    service: Arc<AdmissionControlService>,
}

impl<S, R> Service<R> for AdmissionControlInterceptor<S>
where
    S: Service<R> + Clone,
    S::Future: Send + 'static,
    S::Error: From<AdmissionError> + Send + 'static,
    S::Response: Send + 'static,
    R: AdmissionRequest,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        // Take the service that was driven to readiness; a rejection drops it
        // and releases whatever capacity it reserved.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if let Some(action_type) = request.action_type() {
            if let Err(err) = self.service.apply(request.action(), action_type) {
                drop(inner);
                return Box::pin(std::future::ready(Err(err.into())));
            }
        }
        Box::pin(inner.call(request))
    }
}
