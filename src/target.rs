//! The target: resources and drivers of one board, and the exclusive
//! activation of drivers over them.
//!
//! Activating a driver goes through these steps:
//!
//! ```text
//!  activate(D)
//!    │
//!    ├─ already active? ─────────────────────────────▶ done
//!    │
//!    ├─ resolve every binding slot of D
//!    │    highest priority wins, then declaration order
//!    │    none ─▶ BindingError      tie ─▶ ConfigurationError
//!    │
//!    ├─ activate the driver suppliers (recursively)
//!    │
//!    ├─ deactivate active drivers sharing a protocol with D,
//!    │  lowest priority first (their clients go down before them)
//!    │
//!    └─ bind suppliers, run D's activation hook, mark D active
//! ```
//!
//! There is no locking: within one target, the ordering above is the only
//! mutual exclusion needed, because nothing runs concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use log::{debug, info, warn};

use crate::driver::{Binding, Driver, DriverHandle, Requirement, Supplier};
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Activate,
    Adopt,
}

/// A candidate for a binding slot.
struct Candidate {
    priority: i32,
    order: usize,
    supplier: Supplier,
}

/// Resources and drivers of one board under test.
#[derive(Debug)]
pub struct Target {
    name: String,
    resources: Vec<Rc<Resource>>,
    drivers: Vec<DriverHandle>,
    /// Suppliers of every active driver, keyed by driver index.
    bound: BTreeMap<usize, Vec<Supplier>>,
    active: BTreeMap<Protocol, DriverHandle>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Target {
            name: name.into(),
            resources: Vec::new(),
            drivers: Vec::new(),
            bound: BTreeMap::new(),
            active: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take ownership of `resource`. Resource names are unique per target.
    pub fn add_resource(&mut self, resource: Resource) -> Result<Rc<Resource>> {
        if self.resource(resource.name()).is_some() {
            return Err(Error::Configuration(format!(
                "target `{}` already has a resource named `{}`",
                self.name,
                resource.name()
            )));
        }
        debug!("{}: adding resource {:?}", self.name, resource);
        let resource = Rc::new(resource);
        self.resources.push(Rc::clone(&resource));
        Ok(resource)
    }

    /// Take ownership of `driver` under `name`. Driver names are unique per
    /// target. The driver starts inactive.
    pub fn add_driver(
        &mut self,
        name: impl Into<String>,
        driver: Box<dyn Driver>,
    ) -> Result<DriverHandle> {
        let name = name.into();
        if self.driver(&name).is_some() {
            return Err(Error::Configuration(format!(
                "target `{}` already has a driver named `{}`",
                self.name, name
            )));
        }
        let handle = DriverHandle::new(name, self.drivers.len(), driver);
        debug!("{}: adding driver {}", self.name, handle);
        self.drivers.push(handle.clone());
        Ok(handle)
    }

    pub fn resource(&self, name: &str) -> Option<&Rc<Resource>> {
        self.resources.iter().find(|r| r.name() == name)
    }

    pub fn driver(&self, name: &str) -> Option<&DriverHandle> {
        self.drivers.iter().find(|d| d.name() == name)
    }

    pub fn resources(&self) -> &[Rc<Resource>] {
        &self.resources
    }

    pub fn drivers(&self) -> &[DriverHandle] {
        &self.drivers
    }

    /// The active driver implementing `protocol`, if any.
    pub fn active_driver(&self, protocol: Protocol) -> Option<&DriverHandle> {
        self.active.get(&protocol)
    }

    /// The driver a client requiring `protocol` would be bound to.
    pub fn resolve_driver(&self, protocol: Protocol) -> Result<DriverHandle> {
        let candidates = self
            .drivers
            .iter()
            .filter(|d| d.provides(protocol))
            .map(|d| Candidate {
                priority: d.priority(protocol),
                order: d.index(),
                supplier: Supplier::Driver(d.clone()),
            })
            .collect();
        let what = format!("{} on target `{}`", protocol, self.name);
        pick(candidates, &what)?.into_driver(&what)
    }

    /// Activate `driver`, its suppliers first, deactivating whatever active
    /// driver conflicts with it. A no-op on an active driver.
    pub fn activate(&mut self, driver: &DriverHandle) -> Result<()> {
        self.bring_up(driver, Mode::Activate, &mut Vec::new())
    }

    /// Like [`activate`](Target::activate), but runs the passive adoption
    /// hooks: the caller vouches that the hardware is already in the state
    /// the drivers expect.
    pub fn adopt(&mut self, driver: &DriverHandle) -> Result<()> {
        self.bring_up(driver, Mode::Adopt, &mut Vec::new())
    }

    /// Deactivate `driver` after its active clients. A no-op on an inactive
    /// driver.
    ///
    /// The driver ends up inactive even when a deactivation hook fails; the
    /// first failure is returned.
    pub fn deactivate(&mut self, driver: &DriverHandle) -> Result<()> {
        self.check_owned(driver)?;
        if !driver.is_active() {
            return Ok(());
        }

        let clients: Vec<DriverHandle> = self
            .drivers
            .iter()
            .filter(|d| d.is_active() && self.is_supplied_by(d, driver))
            .cloned()
            .collect();
        let mut first_error = None;
        for client in clients.iter().rev() {
            if let Err(e) = self.deactivate(client) {
                first_error.get_or_insert(e);
            }
        }

        let hook = driver.borrow_driver().and_then(|mut d| d.on_deactivate());
        driver.set_active(false);
        self.bound.remove(&driver.index());
        self.active.retain(|_, d| d != driver);
        info!("{}: deactivated {}", self.name, driver);

        if let Err(e) = hook {
            warn!("{}: {} failed to deactivate cleanly: {}", self.name, driver, e);
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Deactivate the active driver implementing `protocol`, if any.
    pub fn deactivate_protocol(&mut self, protocol: Protocol) -> Result<()> {
        match self.active.get(&protocol).cloned() {
            Some(driver) => self.deactivate(&driver),
            None => Ok(()),
        }
    }

    /// Deactivate every driver, clients before suppliers.
    pub fn deactivate_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for driver in self.drivers.clone().iter().rev() {
            if let Err(e) = self.deactivate(driver) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Mark the resource named `name` as present.
    pub fn detect(&mut self, name: &str) -> Result<()> {
        let resource = self.owned_resource(name)?;
        if !resource.is_available() {
            info!("{}: resource `{}` is available", self.name, name);
            resource.set_available(true);
        }
        Ok(())
    }

    /// Mark the resource named `name` as gone, deactivating the drivers
    /// using it.
    pub fn undetect(&mut self, name: &str) -> Result<()> {
        let resource = self.owned_resource(name)?;
        if !resource.is_available() {
            return Ok(());
        }
        info!("{}: resource `{}` is gone", self.name, name);
        resource.set_available(false);

        let users: Vec<DriverHandle> = self
            .drivers
            .iter()
            .filter(|d| {
                d.is_active()
                    && self.bound.get(&d.index()).map_or(false, |suppliers| {
                        suppliers.iter().any(|s| match s {
                            Supplier::Resource(r) => Rc::ptr_eq(r, &resource),
                            Supplier::Driver(_) => false,
                        })
                    })
            })
            .cloned()
            .collect();
        let mut first_error = None;
        for user in users {
            if let Err(e) = self.deactivate(&user) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // -------------------------------------------------------------------------
    // Activation internals
    // -------------------------------------------------------------------------

    fn bring_up(&mut self, driver: &DriverHandle, mode: Mode, chain: &mut Vec<usize>) -> Result<()> {
        self.check_owned(driver)?;
        if driver.is_active() {
            return Ok(());
        }
        if chain.contains(&driver.index()) {
            return Err(Error::Configuration(format!(
                "{} is part of a binding cycle",
                driver
            )));
        }

        let mut suppliers = Vec::with_capacity(driver.bindings().len());
        for binding in driver.bindings() {
            suppliers.push((binding.slot, self.resolve(driver, binding)?));
        }

        chain.push(driver.index());
        for (_, supplier) in &suppliers {
            if let Supplier::Driver(dependency) = supplier {
                self.bring_up(dependency, mode, chain)?;
            }
        }
        chain.pop();

        self.deactivate_conflicts(driver, &suppliers)?;

        {
            let mut inner = driver.borrow_driver()?;
            for (slot, supplier) in &suppliers {
                debug!("{}: binding {}.{} to `{}`", self.name, driver, slot, supplier.name());
                inner.bind(slot, supplier.clone())?;
            }
            match mode {
                Mode::Activate => inner.on_activate()?,
                Mode::Adopt => inner.on_adopt()?,
            }
        }

        driver.set_active(true);
        self.bound.insert(
            driver.index(),
            suppliers.into_iter().map(|(_, supplier)| supplier).collect(),
        );
        for protocol in driver.protocols() {
            self.active.insert(*protocol, driver.clone());
        }
        info!(
            "{}: {} {}",
            self.name,
            if mode == Mode::Adopt { "adopted" } else { "activated" },
            driver
        );
        Ok(())
    }

    fn deactivate_conflicts(
        &mut self,
        driver: &DriverHandle,
        suppliers: &[(&'static str, Supplier)],
    ) -> Result<()> {
        let mut upstream = BTreeSet::new();
        for (_, supplier) in suppliers {
            if let Supplier::Driver(dependency) = supplier {
                self.collect_suppliers(dependency, &mut upstream);
            }
        }

        let mut conflicts: Vec<(i32, usize, DriverHandle)> = Vec::new();
        for other in self.drivers.iter().filter(|d| d.is_active() && *d != driver) {
            let shared: Vec<Protocol> = driver
                .protocols()
                .iter()
                .copied()
                .filter(|p| other.provides(*p))
                .collect();
            if shared.is_empty() {
                continue;
            }
            if upstream.contains(&other.index()) {
                return Err(Error::Configuration(format!(
                    "{} and its supplier {} both implement {}",
                    driver, other, shared[0]
                )));
            }
            let priority = shared
                .iter()
                .map(|p| other.priority(*p))
                .max()
                .unwrap_or(0);
            conflicts.push((priority, other.index(), other.clone()));
        }

        // Lowest priority first, later declarations first on a tie.
        conflicts.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        for (_, _, other) in conflicts {
            info!("{}: {} conflicts with {}", self.name, other, driver);
            self.deactivate(&other)?;
        }

        for (slot, supplier) in suppliers {
            if let Supplier::Driver(dependency) = supplier {
                if !dependency.is_active() {
                    return Err(Error::Configuration(format!(
                        "making room for {} took down {} bound to its slot `{}`",
                        driver, dependency, slot
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, client: &DriverHandle, binding: &Binding) -> Result<Supplier> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut unavailable = Vec::new();

        for requirement in binding.accepts {
            match requirement {
                Requirement::Protocol(protocol) => {
                    for driver in self.drivers.iter().filter(|d| *d != client && d.provides(*protocol)) {
                        let priority = driver.priority(*protocol);
                        let seen = candidates.iter_mut().find(|c| match &c.supplier {
                            Supplier::Driver(d) => d == driver,
                            Supplier::Resource(_) => false,
                        });
                        match seen {
                            Some(candidate) => candidate.priority = candidate.priority.max(priority),
                            None => candidates.push(Candidate {
                                priority,
                                order: driver.index(),
                                supplier: Supplier::Driver(driver.clone()),
                            }),
                        }
                    }
                }
                Requirement::Resource(class) => {
                    for (order, resource) in self.resources.iter().enumerate() {
                        if resource.kind().class() != *class {
                            continue;
                        }
                        if !resource.is_available() {
                            unavailable.push(resource.name().to_owned());
                            continue;
                        }
                        candidates.push(Candidate {
                            priority: 0,
                            order,
                            supplier: Supplier::Resource(Rc::clone(resource)),
                        });
                    }
                }
            }
        }

        let what = format!(
            "slot `{}` of {} (accepts {})",
            binding.slot,
            client,
            binding
                .accepts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        if candidates.is_empty() && !unavailable.is_empty() {
            return Err(Error::Binding(format!(
                "no available supplier for {}; unavailable: {}",
                what,
                unavailable.join(", ")
            )));
        }
        pick(candidates, &what)
    }

    fn collect_suppliers(&self, driver: &DriverHandle, into: &mut BTreeSet<usize>) {
        if !into.insert(driver.index()) {
            return;
        }
        if let Some(suppliers) = self.bound.get(&driver.index()) {
            for supplier in suppliers {
                if let Supplier::Driver(dependency) = supplier {
                    self.collect_suppliers(dependency, into);
                }
            }
        }
    }

    fn is_supplied_by(&self, client: &DriverHandle, supplier: &DriverHandle) -> bool {
        self.bound.get(&client.index()).map_or(false, |suppliers| {
            suppliers.iter().any(|s| match s {
                Supplier::Driver(d) => d == supplier,
                Supplier::Resource(_) => false,
            })
        })
    }

    fn check_owned(&self, driver: &DriverHandle) -> Result<()> {
        match self.drivers.get(driver.index()) {
            Some(own) if own == driver => Ok(()),
            _ => Err(Error::Configuration(format!(
                "{} does not belong to target `{}`",
                driver, self.name
            ))),
        }
    }

    fn owned_resource(&self, name: &str) -> Result<Rc<Resource>> {
        self.resource(name).cloned().ok_or_else(|| {
            Error::Configuration(format!(
                "target `{}` has no resource named `{}`",
                self.name, name
            ))
        })
    }
}

/// Highest priority first, then earliest declaration. Two best candidates
/// that cannot be told apart are a configuration error.
fn pick(mut candidates: Vec<Candidate>, what: &str) -> Result<Supplier> {
    if candidates.is_empty() {
        return Err(Error::Binding(format!("nothing satisfies {}", what)));
    }
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
    if let [first, second, ..] = candidates.as_slice() {
        if first.priority == second.priority && first.order == second.order {
            return Err(Error::Configuration(format!(
                "ambiguous binding for {}: `{}` and `{}` rank equally",
                what,
                first.supplier.name(),
                second.supplier.name()
            )));
        }
    }
    Ok(candidates.swap_remove(0).supplier)
}

// =============================================================================
// Unit Tests
// =============================================================================
