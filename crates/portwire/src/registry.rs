// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carrier registry.
//!
//! Holds one prototype per carrier and hands out fresh instances by name or
//! by sniffed header bytes. Misses fall through to [`PluginDiscovery`]: a
//! matching descriptor is built through the factory registered for its kind,
//! added, and the lookup is retried once.
//!
//! # Example
//!
//! ```
//! use portwire::CarrierRegistry;
//!
//! let registry = CarrierRegistry::with_defaults();
//! let carrier = registry.choose_carrier("tcp+recv.priority").unwrap();
//! assert_eq!(carrier.name(), "tcp");
//! assert!(registry.choose_carrier("shmem").is_none());
//! ```

use crate::carrier::local::{LocalCarrier, LocalCarrierManager};
use crate::carrier::mcast::McastCarrier;
use crate::carrier::priority::{Clock, MonotonicClock, PriorityCarrier, PriorityElection};
use crate::carrier::tcp::TcpCarrier;
use crate::carrier::text::TextCarrier;
use crate::carrier::udp::UdpCarrier;
use crate::carrier::{Carrier, CarrierSpec};
use crate::config::HEADER_SIZE;
use crate::error::{Error, Result};
use crate::plugin::{CarrierDescriptor, PluginDiscovery};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a carrier prototype from a descriptor.
pub type CarrierFactory =
    Arc<dyn Fn(&CarrierDescriptor) -> Result<Box<dyn Carrier>> + Send + Sync>;

/// Shared services the built-in carriers are wired to.
#[derive(Clone)]
pub struct BuiltinServices {
    pub local: Arc<LocalCarrierManager>,
    pub election: Arc<PriorityElection>,
    pub clock: Arc<dyn Clock>,
}

impl Default for BuiltinServices {
    fn default() -> Self {
        Self {
            local: Arc::new(LocalCarrierManager::new()),
            election: Arc::new(PriorityElection::new()),
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

impl std::fmt::Debug for BuiltinServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinServices")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

struct RegistryInner {
    carriers: Vec<Box<dyn Carrier>>,
    factories: HashMap<String, CarrierFactory>,
}

/// Process-wide (or test-local) carrier catalogue.
pub struct CarrierRegistry {
    inner: Mutex<RegistryInner>,
    discovery: Option<Arc<dyn PluginDiscovery>>,
}

impl Default for CarrierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CarrierRegistry {
    /// Empty registry: no carriers, no factories.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                carriers: Vec::new(),
                factories: HashMap::new(),
            }),
            discovery: None,
        }
    }

    /// Built-in factory kinds only; carriers get installed from descriptors.
    pub fn with_factories(services: BuiltinServices) -> Self {
        let registry = Self::new();
        for (kind, factory) in builtin_factories(services) {
            registry.register_factory(kind, factory);
        }
        registry
    }

    /// Built-in factories plus the tcp, fast_tcp, text, text_ack, udp,
    /// mcast, local and priority carriers.
    pub fn with_builtins(services: BuiltinServices) -> Self {
        let registry = Self::with_factories(services.clone());
        let builtins: Vec<Box<dyn Carrier>> = vec![
            Box::new(TcpCarrier::new()),
            Box::new(TcpCarrier::fast()),
            Box::new(TextCarrier::new()),
            Box::new(TextCarrier::with_ack()),
            Box::new(UdpCarrier::new()),
            Box::new(McastCarrier::new()),
            Box::new(LocalCarrier::new(services.local.clone())),
            Box::new(PriorityCarrier::new(services.election, services.clock)),
        ];
        for carrier in builtins {
            if let Err(e) = registry.add(carrier) {
                log::error!("[Registry] built-in carrier rejected: {}", e);
            }
        }
        registry
    }

    /// [`with_builtins`](Self::with_builtins) with fresh services.
    pub fn with_defaults() -> Self {
        Self::with_builtins(BuiltinServices::default())
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn PluginDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Register (or replace) the factory for a descriptor kind.
    pub fn register_factory(&self, kind: &str, factory: CarrierFactory) {
        self.inner.lock().factories.insert(kind.to_owned(), factory);
    }

    /// Add a carrier prototype.
    ///
    /// Fails if the name is taken or, for non-modifiers, if either header
    /// check accepts the other carrier's header.
    pub fn add(&self, carrier: Box<dyn Carrier>) -> Result<()> {
        add_locked(&mut self.inner.lock(), carrier)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().carriers.iter().any(|c| c.name() == name)
    }

    /// Fresh instance for `name`; anything after the first `+` is ignored.
    pub fn choose_carrier(&self, name: &str) -> Option<Box<dyn Carrier>> {
        let base = name.split('+').next().unwrap_or_default().trim();
        if let Some(carrier) = self.create_named(base) {
            return Some(carrier);
        }
        if let Some(descriptor) = self.discovery.as_ref().and_then(|d| d.find_by_name(base)) {
            self.install(&descriptor);
            if let Some(carrier) = self.create_named(base) {
                return Some(carrier);
            }
        }
        log::error!("[Registry] carrier not found: {}", base);
        None
    }

    /// Fresh instance of the first carrier accepting `header`.
    pub fn choose_carrier_for_header(&self, header: &[u8]) -> Option<Box<dyn Carrier>> {
        if let Some(carrier) = self.create_for_header(header) {
            return Some(carrier);
        }
        if let Some(discovery) = &self.discovery {
            for descriptor in discovery.find_by_header(header) {
                self.install(&descriptor);
            }
            if let Some(carrier) = self.create_for_header(header) {
                return Some(carrier);
            }
        }
        log::error!(
            "[Registry] no carrier for header {:?}",
            String::from_utf8_lossy(header)
        );
        None
    }

    /// Registered names followed by discoverable ones, without duplicates.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .carriers
            .iter()
            .map(|c| c.name().to_owned())
            .collect();
        if let Some(discovery) = &self.discovery {
            for descriptor in discovery.descriptors() {
                if !names.contains(&descriptor.name) {
                    names.push(descriptor.name);
                }
            }
        }
        names
    }

    fn create_named(&self, name: &str) -> Option<Box<dyn Carrier>> {
        self.inner
            .lock()
            .carriers
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.create())
    }

    fn create_for_header(&self, header: &[u8]) -> Option<Box<dyn Carrier>> {
        self.inner
            .lock()
            .carriers
            .iter()
            .filter(|c| !c.is_modifier())
            .find(|c| c.check_header(header))
            .map(|c| c.create())
    }

    /// Instantiate `descriptor` through its kind's factory and register it.
    /// The whole check-build-insert runs under one lock.
    fn install(&self, descriptor: &CarrierDescriptor) {
        let mut inner = self.inner.lock();
        if inner.carriers.iter().any(|c| c.name() == descriptor.name) {
            return;
        }
        let Some(factory) = inner.factories.get(&descriptor.kind).cloned() else {
            log::warn!(
                "[Registry] no factory for kind '{}' (carrier '{}')",
                descriptor.kind,
                descriptor.name
            );
            return;
        };
        match factory(descriptor).and_then(|carrier| add_locked(&mut inner, carrier)) {
            Ok(()) => {
                log::info!(
                    "[Registry] installed '{}' from {} descriptor",
                    descriptor.name,
                    descriptor.kind
                );
            }
            Err(e) => {
                log::warn!("[Registry] cannot install '{}': {}", descriptor.name, e);
            }
        }
    }
}

impl std::fmt::Debug for CarrierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        let names: Vec<&str> = inner.carriers.iter().map(|c| c.name()).collect();
        f.debug_struct("CarrierRegistry")
            .field("carriers", &names)
            .field("factories", &inner.factories.len())
            .field("discovery", &self.discovery.is_some())
            .finish()
    }
}

fn add_locked(inner: &mut RegistryInner, carrier: Box<dyn Carrier>) -> Result<()> {
    for existing in &inner.carriers {
        if existing.name() == carrier.name() {
            return Err(Error::Config(format!(
                "carrier '{}' already registered",
                carrier.name()
            )));
        }
        if carrier.is_modifier() || existing.is_modifier() {
            continue;
        }
        if existing.check_header(&carrier.header()) || carrier.check_header(&existing.header())
        {
            return Err(Error::AmbiguousSignature {
                name: carrier.name().to_owned(),
                existing: existing.name().to_owned(),
            });
        }
    }
    log::debug!("[Registry] added carrier '{}'", carrier.name());
    inner.carriers.push(carrier);
    Ok(())
}

fn text_header(descriptor: &CarrierDescriptor) -> Result<[u8; HEADER_SIZE]> {
    <[u8; HEADER_SIZE]>::try_from(descriptor.signature.as_bytes()).map_err(|_| {
        Error::Config(format!(
            "text carrier '{}' needs an {}-byte signature, got {:?}",
            descriptor.name, HEADER_SIZE, descriptor.signature
        ))
    })
}

fn builtin_factories(services: BuiltinServices) -> Vec<(&'static str, CarrierFactory)> {
    let BuiltinServices {
        local,
        election,
        clock,
    } = services;

    let tcp: CarrierFactory = Arc::new(|d: &CarrierDescriptor| -> Result<Box<dyn Carrier>> {
        let ack = !d.options.contains_key("ack") || d.flag("ack");
        Ok(Box::new(TcpCarrier::named(&d.name, ack)))
    });
    let text: CarrierFactory = Arc::new(|d: &CarrierDescriptor| -> Result<Box<dyn Carrier>> {
        let header = text_header(d)?;
        Ok(Box::new(TextCarrier::with_header(&d.name, header, d.flag("ack"))))
    });
    let udp: CarrierFactory = Arc::new(|d: &CarrierDescriptor| -> Result<Box<dyn Carrier>> {
        Ok(Box::new(UdpCarrier::named(&d.name)))
    });
    let mcast: CarrierFactory = Arc::new(|d: &CarrierDescriptor| -> Result<Box<dyn Carrier>> {
        let mut carrier = McastCarrier::named(&d.name);
        if let Some(group) = d.options.get("group") {
            carrier.configure(&CarrierSpec::parse(&format!("{}+group.{}", d.name, group)))?;
        }
        Ok(Box::new(carrier))
    });
    let local: CarrierFactory =
        Arc::new(move |d: &CarrierDescriptor| -> Result<Box<dyn Carrier>> {
            Ok(Box::new(LocalCarrier::named(&d.name, local.clone())))
        });
    let priority: CarrierFactory =
        Arc::new(move |d: &CarrierDescriptor| -> Result<Box<dyn Carrier>> {
            Ok(Box::new(PriorityCarrier::named(
                &d.name,
                election.clone(),
                clock.clone(),
            )))
        });

    vec![
        ("tcp", tcp),
        ("text", text),
        ("udp", udp),
        ("mcast", mcast),
        ("local", local),
        ("priority", priority),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::StaticDiscovery;

    #[test]
    fn test_builtins_by_name() {
        let registry = CarrierRegistry::with_defaults();
        for name in [
            "tcp", "fast_tcp", "text", "text_ack", "udp", "mcast", "local", "priority",
        ] {
            let carrier = registry.choose_carrier(name).expect("built-in carrier");
            assert_eq!(carrier.name(), name);
        }
        assert_eq!(
            registry.choose_carrier("tcp+recv.priority+level.3").unwrap().name(),
            "tcp"
        );
        assert!(registry.choose_carrier("shmem").is_none());
    }

    #[test]
    fn test_choose_by_header() {
        let registry = CarrierRegistry::with_defaults();
        let tcp = TcpCarrier::new().header();
        assert_eq!(registry.choose_carrier_for_header(&tcp).unwrap().name(), "tcp");
        let fast = TcpCarrier::fast().header();
        assert_eq!(registry.choose_carrier_for_header(&fast).unwrap().name(), "fast_tcp");
        assert_eq!(registry.choose_carrier_for_header(b"CONNECT ").unwrap().name(), "text");
        assert_eq!(registry.choose_carrier_for_header(b"LOCALITY").unwrap().name(), "local");
        // The priority modifier has an all-zero header and never matches.
        assert!(registry.choose_carrier_for_header(&[0; HEADER_SIZE]).is_none());
        assert!(registry.choose_carrier_for_header(b"GET / HT").is_none());
    }

    #[test]
    fn test_add_rejects_ambiguous_signature() {
        let registry = CarrierRegistry::with_defaults();
        let clash = TcpCarrier::named("tcp_clone", true);
        match registry.add(Box::new(clash)) {
            Err(Error::AmbiguousSignature { name, existing }) => {
                assert_eq!(name, "tcp_clone");
                assert_eq!(existing, "tcp");
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
        assert!(registry.add(Box::new(TcpCarrier::new())).is_err());
        assert!(registry
            .add(Box::new(TextCarrier::with_header("telnet", *b"TELNET  ", false)))
            .is_ok());
    }

    #[test]
    fn test_discovery_installs_on_name_miss() {
        let discovery = StaticDiscovery::new(vec![CarrierDescriptor::new("telnet", "text")
            .with_signature("TELNET  ")
            .with_option("ack", "true")]);
        let registry = CarrierRegistry::with_defaults().with_discovery(Arc::new(discovery));

        assert!(!registry.contains("telnet"));
        let carrier = registry.choose_carrier("telnet").expect("installed from descriptor");
        assert_eq!(carrier.name(), "telnet");
        assert!(carrier.require_ack());
        assert!(registry.contains("telnet"));
    }

    #[test]
    fn test_discovery_installs_on_header_miss() {
        let discovery =
            StaticDiscovery::new(vec![CarrierDescriptor::new("telnet", "text").with_signature("TELNET  ")]);
        let registry = CarrierRegistry::with_defaults().with_discovery(Arc::new(discovery));
        let carrier = registry.choose_carrier_for_header(b"TELNET  ").expect("sniffed");
        assert_eq!(carrier.name(), "telnet");
    }

    #[test]
    fn test_bad_descriptor_is_not_installed() {
        let discovery = StaticDiscovery::new(vec![
            CarrierDescriptor::new("short", "text").with_signature("AB"),
            CarrierDescriptor::new("mystery", "shmem"),
        ]);
        let registry = CarrierRegistry::with_defaults().with_discovery(Arc::new(discovery));
        assert!(registry.choose_carrier("short").is_none());
        assert!(registry.choose_carrier("mystery").is_none());
    }

    #[test]
    fn test_factories_only_registry() {
        let discovery = StaticDiscovery::new(vec![
            CarrierDescriptor::new("tcp", "tcp"),
            CarrierDescriptor::new("prio", "priority"),
        ]);
        let registry = CarrierRegistry::with_factories(BuiltinServices::default())
            .with_discovery(Arc::new(discovery));
        assert_eq!(registry.list(), vec!["tcp", "prio"]);
        assert!(!registry.contains("tcp"));

        let prio = registry.choose_carrier("prio").expect("priority from descriptor");
        assert!(prio.is_modifier());
        assert_eq!(prio.name(), "prio");
        let header = TcpCarrier::new().header();
        assert_eq!(registry.choose_carrier_for_header(&header).map(|c| c.name().to_owned()), None);
        assert!(registry.choose_carrier("tcp").is_some());
        assert_eq!(registry.choose_carrier_for_header(&header).unwrap().name(), "tcp");
    }

    #[test]
    fn test_list_merges_without_duplicates() {
        let discovery = StaticDiscovery::new(vec![
            CarrierDescriptor::new("tcp", "tcp"),
            CarrierDescriptor::new("telnet", "text").with_signature("TELNET  "),
        ]);
        let registry = CarrierRegistry::with_defaults().with_discovery(Arc::new(discovery));
        let names = registry.list();
        assert_eq!(names.iter().filter(|n| *n == "tcp").count(), 1);
        assert_eq!(names.last().map(String::as_str), Some("telnet"));
        // Listing does not install anything.
        assert!(!registry.contains("telnet"));
    }

    #[test]
    fn test_concurrent_discovery_builds_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let built = Arc::new(AtomicUsize::new(0));
        let discovery = StaticDiscovery::new(vec![CarrierDescriptor::new("telnet", "counted")]);
        let registry = CarrierRegistry::with_defaults().with_discovery(Arc::new(discovery));
        let counter = built.clone();
        let factory: CarrierFactory =
            Arc::new(move |d: &CarrierDescriptor| -> Result<Box<dyn Carrier>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(TextCarrier::with_header(&d.name, *b"TELNET  ", false)))
            });
        registry.register_factory("counted", factory);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| assert!(registry.choose_carrier("telnet").is_some()));
            }
        });
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(registry.list().iter().filter(|n| *n == "telnet").count(), 1);
    }
}
