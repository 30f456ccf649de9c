//! # Service
//!
//! The [`Service`] owns the transport, the configuration rules and the
//! registry of resources. It hands out one [`Resource`] per URL:
//!
//! - resources are tracked weakly, so any handle the application holds keeps
//!   the shared instance alive;
//! - a bounded cache of recently used resources keeps state around briefly
//!   after the application lets go;
//! - resources with observers are pinned and never evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use moka::sync::Cache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::builder::ServiceBuilder;
use crate::config::{Configuration, ConfigurationPattern};
use crate::context::OwningContext;
use crate::error::ServiceError;
use crate::resource::{Resource, ResourceInner};
use crate::transport::Transport;

type Configurer = Arc<dyn Fn(&mut Configuration) + Send + Sync>;

#[derive(Clone)]
struct ConfigurationRule {
    pattern: ConfigurationPattern,
    apply: Configurer,
}

pub(crate) struct ServiceInner {
    base_url: Option<Url>,
    transport: Arc<dyn Transport>,
    context: Arc<OwningContext>,
    base_configuration: Configuration,
    rules: RwLock<Vec<ConfigurationRule>>,
    generation: AtomicU64,
    resources: Mutex<HashMap<String, Weak<ResourceInner>>>,
    recent: Cache<String, Resource>,
    pinned: Mutex<HashMap<String, Resource>>,
}

impl ServiceInner {
    pub(crate) fn configuration_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Base configuration with every matching rule applied in registration order.
    pub(crate) fn configuration_for(&self, url: &Url) -> Configuration {
        let rules = self.rules.read().clone();
        let mut configuration = self.base_configuration.clone();
        for rule in rules.iter().filter(|rule| rule.pattern.matches(url)) {
            (rule.apply)(&mut configuration);
        }
        configuration
    }

    /// Marks a resource as recently used.
    pub(crate) fn touch(&self, resource: &Resource) {
        self.recent
            .insert(resource.url().as_str().to_owned(), resource.clone());
    }

    pub(crate) fn set_pinned(&self, resource: &Resource, pinned: bool) {
        let key = resource.url().as_str();
        let mut pins = self.pinned.lock();
        if pinned {
            if !pins.contains_key(key) {
                debug!(url = %key, "Pinning observed resource");
                pins.insert(key.to_owned(), resource.clone());
            }
        } else if pins.remove(key).is_some() {
            debug!(url = %key, "Unpinning resource without observers");
        }
    }
}

/// Entry point for resource lookup and configuration.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    /// A service with default settings rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        Self::builder().with_base_url(base_url).build()
    }

    pub(crate) fn from_parts(
        base_url: Option<Url>,
        transport: Arc<dyn Transport>,
        context: OwningContext,
        base_configuration: Configuration,
        cache_capacity: u64,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                base_url,
                transport,
                context: Arc::new(context),
                base_configuration,
                rules: RwLock::new(Vec::new()),
                generation: AtomicU64::new(0),
                resources: Mutex::new(HashMap::new()),
                recent: Cache::new(cache_capacity),
                pinned: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ServiceInner>) -> Self {
        Self { inner }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.inner.base_url.as_ref()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    // Resource lookup

    /// Resource for `path` appended to the base URL.
    ///
    /// Unlike [`Resource::relative`], a leading slash does not replace the base
    /// URL's path: with a base of `https://api.example.com/v1`, `"/users"`
    /// resolves to `https://api.example.com/v1/users`.
    pub fn resource(&self, path: &str) -> Result<Resource, ServiceError> {
        let base = self.inner.base_url.as_ref().ok_or(ServiceError::NoBaseUrl)?;
        let url = Url::parse(&format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        ))?;
        Ok(self.resource_for_url(url))
    }

    /// Resource for an absolute URL.
    pub fn resource_from_url(&self, url: &str) -> Result<Resource, ServiceError> {
        Ok(self.resource_for_url(Url::parse(url)?))
    }

    /// The unique resource for `url`, created on first use.
    pub fn resource_for_url(&self, url: Url) -> Resource {
        let key = url.as_str().to_owned();
        let resource = {
            let mut resources = self.inner.resources.lock();
            match resources.get(&key).and_then(Weak::upgrade) {
                Some(inner) => Resource::from_inner(inner),
                None => {
                    resources.retain(|_, resource| resource.strong_count() > 0);
                    let resource = Resource::new(
                        url,
                        Arc::downgrade(&self.inner),
                        self.inner.context.clone(),
                        self.inner.transport.clone(),
                    );
                    resources.insert(key.clone(), resource.downgrade());
                    debug!(url = %key, "Created resource");
                    resource
                }
            }
        };
        self.inner.recent.insert(key, resource.clone());
        resource
    }

    /// Resources currently alive, in no particular order.
    pub fn live_resources(&self) -> Vec<Resource> {
        self.inner
            .resources
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .map(Resource::from_inner)
            .collect()
    }

    /// Releases the cache's hold on recently used resources. Resources that
    /// are observed or referenced elsewhere survive.
    pub fn flush_unused_resources(&self) {
        let keys: Vec<Arc<String>> = self.inner.recent.iter().map(|(key, _)| key).collect();
        for key in &keys {
            self.inner.recent.invalidate(key.as_str());
        }
        self.inner.recent.run_pending_tasks();
        debug!(flushed = keys.len(), "Flushed recently used resources");
        self.inner
            .resources
            .lock()
            .retain(|_, resource| resource.strong_count() > 0);
    }

    // Configuration

    /// Applies `configure` to every resource.
    pub fn configure_all<F>(&self, configure: F)
    where
        F: Fn(&mut Configuration) + Send + Sync + 'static,
    {
        self.add_rule(ConfigurationPattern::All, Arc::new(configure));
    }

    /// Applies `configure` to resources matching a URL glob. Relative globs are
    /// resolved against the base URL.
    pub fn configure<F>(&self, pattern: &str, configure: F) -> Result<(), ServiceError>
    where
        F: Fn(&mut Configuration) + Send + Sync + 'static,
    {
        let pattern = ConfigurationPattern::glob(pattern, self.inner.base_url.as_ref())?;
        self.add_rule(pattern, Arc::new(configure));
        Ok(())
    }

    pub fn configure_matching<F>(&self, pattern: ConfigurationPattern, configure: F)
    where
        F: Fn(&mut Configuration) + Send + Sync + 'static,
    {
        self.add_rule(pattern, Arc::new(configure));
    }

    fn add_rule(&self, pattern: ConfigurationPattern, apply: Configurer) {
        info!(pattern = ?pattern, "Adding configuration rule");
        self.inner.rules.write().push(ConfigurationRule { pattern, apply });
        self.invalidate_configuration();
    }

    /// Forces every resource to recompute its configuration on next use.
    pub fn invalidate_configuration(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }

    // Bulk operations

    /// Wipes every live resource accepted by `predicate`.
    pub fn wipe_resources<F>(&self, predicate: F)
    where
        F: Fn(&Resource) -> bool,
    {
        let _context = self.inner.context.enter();
        for resource in self.live_resources() {
            if predicate(&resource) {
                resource.wipe();
            }
        }
    }

    /// Wipes every live resource whose URL matches a glob.
    pub fn wipe_resources_matching(&self, pattern: &str) -> Result<(), ServiceError> {
        let pattern = ConfigurationPattern::glob(pattern, self.inner.base_url.as_ref())?;
        self.wipe_resources(|resource| pattern.matches(resource.url()));
        Ok(())
    }

    pub fn wipe_all_resources(&self) {
        self.wipe_resources(|_| true);
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .field("resources", &self.inner.resources.lock().len())
            .field("pinned", &self.inner.pinned.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::entity::Content;
    use crate::observer::Owner;
    use crate::test_utils::StubTransport;

    fn service(transport: &StubTransport) -> Service {
        Service::builder()
            .with_base_url("https://example.com/api")
            .with_transport(transport.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_one_resource_per_url() {
        let service = service(&StubTransport::new());
        let a = service.resource("users").unwrap();
        let b = service.resource("/users").unwrap();
        let c = service
            .resource_from_url("https://example.com/api/users")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.url().as_str(), "https://example.com/api/users");
        assert_ne!(a, service.resource("groups").unwrap());
    }

    #[test]
    fn test_unused_resources_are_evicted() {
        let service = service(&StubTransport::new());
        {
            let temp = service.resource("temp").unwrap();
            temp.override_local_content(Content::Text("scratch".into()));
        }
        assert_eq!(service.live_resources().len(), 1);
        assert_eq!(service.resource("temp").unwrap().text(), "scratch");

        service.flush_unused_resources();
        assert!(service.live_resources().is_empty());
        assert_eq!(service.resource("temp").unwrap().text(), "");
    }

    #[test]
    fn test_observed_resources_survive_flush() {
        let service = service(&StubTransport::new());
        let owner = Owner::new();
        {
            let watched = service.resource("watched").unwrap();
            watched.add_observer_fn(&owner, |_, _| {});
            watched.override_local_content(Content::Text("kept".into()));
        }

        service.flush_unused_resources();
        let watched = service.resource("watched").unwrap();
        assert_eq!(watched.text(), "kept");

        watched.remove_observers(&owner);
        drop(watched);
        service.flush_unused_resources();
        assert!(service.live_resources().is_empty());
    }

    #[test]
    fn test_configuration_rules_follow_globs() {
        let service = service(&StubTransport::new());
        let user = service.resource("users/1").unwrap();
        let group = service.resource("groups/1").unwrap();
        assert_eq!(user.configuration().expiration_time, Duration::from_secs(30));

        service
            .configure("users/*", |config| {
                config.expiration_time = Duration::from_secs(5);
            })
            .unwrap();
        assert_eq!(user.configuration().expiration_time, Duration::from_secs(5));
        assert_eq!(group.configuration().expiration_time, Duration::from_secs(30));

        service.configure_all(|config| {
            config.retry_time = Duration::from_secs(9);
        });
        assert_eq!(user.configuration().expiration_time, Duration::from_secs(5));
        assert_eq!(user.configuration().retry_time, Duration::from_secs(9));
        assert_eq!(group.configuration().retry_time, Duration::from_secs(9));
    }

    #[test]
    fn test_later_rules_override_earlier_ones() {
        let service = service(&StubTransport::new());
        service.configure_all(|config| config.expiration_time = Duration::from_secs(1));
        service.configure_matching(
            ConfigurationPattern::predicate(|url| url.path().ends_with("/special")),
            |config| config.expiration_time = Duration::from_secs(2),
        );

        let special = service.resource("special").unwrap();
        let plain = service.resource("plain").unwrap();
        assert_eq!(special.configuration().expiration_time, Duration::from_secs(2));
        assert_eq!(plain.configuration().expiration_time, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_configured_headers_reach_the_transport() {
        let transport = StubTransport::new();
        transport.stub_text("https://example.com/api/me", 200, "text/plain", "me");
        let service = service(&transport);
        service.configure_all(|config| {
            let _ = config.header("Authorization", "Bearer token");
        });

        service.resource("me").unwrap().load().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].headers()["authorization"], "Bearer token");
    }

    #[test]
    fn test_wipe_matching_resources() {
        let service = service(&StubTransport::new());
        let user = service.resource("users/1").unwrap();
        let group = service.resource("groups/1").unwrap();
        user.override_local_content(Content::Text("user".into()));
        group.override_local_content(Content::Text("group".into()));

        service.wipe_resources_matching("users/**").unwrap();
        assert!(user.latest_data().is_none());
        assert_eq!(group.text(), "group");

        service.wipe_all_resources();
        assert!(group.latest_data().is_none());
    }

    #[test]
    fn test_resource_outlives_service() {
        let resource = service(&StubTransport::new()).resource("orphan").unwrap();
        assert!(resource.service().is_none());
        assert!(matches!(
            resource.child("child"),
            Err(ServiceError::ServiceDropped)
        ));
        assert_eq!(resource.configuration().expiration_time, Duration::from_secs(30));
    }
}
