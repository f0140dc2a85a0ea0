//! Service side-channel
//!
//! A `Scope` carries an ordered, append-only list of named services plus an
//! informational label. Scopes are immutable: `with_service` and `with_name`
//! return a new scope and leave the original untouched, so a scope handed to
//! a node keeps seeing exactly the services that existed when it was built.
//! Cloning a scope is cheap (two `Arc` bumps).

use crate::message::Message;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Globally named handler addressed with `Scope::send_to`
///
/// `process` runs synchronously on the caller's task and must not block
/// indefinitely; a slow service stalls the node that called it.
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn process(&self, msg: &Message);
}

/// Closure-backed service
pub struct FnService<F> {
    name: String,
    handler: F,
}

impl<F> FnService<F>
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> Service for FnService<F>
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, msg: &Message) {
        (self.handler)(msg)
    }
}

impl<F> fmt::Debug for FnService<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnService").field("name", &self.name).finish()
    }
}

#[derive(Clone)]
pub struct Scope {
    name: Option<Arc<str>>,
    services: Arc<[Arc<dyn Service>]>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            name: None,
            services: Arc::from(Vec::new()),
        }
    }

    /// New scope with `service` appended after the existing ones
    pub fn with_service(&self, service: impl Service) -> Self {
        self.with_shared_service(Arc::new(service))
    }

    /// Same as `with_service` for a service that is already shared
    pub fn with_shared_service(&self, service: Arc<dyn Service>) -> Self {
        let mut services = Vec::with_capacity(self.services.len() + 1);
        services.extend(self.services.iter().cloned());
        services.push(service);

        Self {
            name: self.name.clone(),
            services: services.into(),
        }
    }

    /// New scope carrying `name` as its label
    pub fn with_name(&self, name: impl AsRef<str>) -> Self {
        Self {
            name: Some(Arc::from(name.as_ref())),
            services: Arc::clone(&self.services),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke every service registered under `name`, in registration order
    ///
    /// Returns how many services ran. No match is not an error.
    pub fn send_to(&self, name: &str, msg: &Message) -> usize {
        let mut invoked = 0;
        for service in self.services.iter().filter(|s| s.name() == name) {
            service.process(msg);
            invoked += 1;
        }
        if invoked == 0 {
            trace!(service = name, scope = ?self.name(), "No service registered under name");
        }
        invoked
    }

    /// Services registered under `name`, in registration order
    pub fn services_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn Service>> + 'a {
        self.services.iter().filter(move |s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.services.iter().map(|s| s.name()).collect();
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("services", &names)
            .finish()
    }
}
