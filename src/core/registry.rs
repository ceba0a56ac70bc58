//! Function Registry
//!
//! Slot list yang hanya bisa append atau replace in-place, plus index
//! name -> slot. Index tidak pernah bergeser, jadi handle yang sudah
//! diberikan ke client tetap valid selama registry hidup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, RpcError};
use crate::protocol::{Handle, Name, Payload};

/// Procedure yang bisa dipanggil remote.
///
/// `None` berarti handler gagal; server membalas dengan failure status.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, input: &Payload) -> Option<Payload>;
}

impl<F> Handler for F
where
    F: Fn(&Payload) -> Option<Payload> + Send + Sync + 'static,
{
    #[inline(always)]
    fn handle(&self, input: &Payload) -> Option<Payload> {
        self(input)
    }
}

/// One registered (name, handler) pair
#[derive(Clone)]
pub struct RegisteredFunction {
    name: Name,
    handler: Arc<dyn Handler>,
}

impl RegisteredFunction {
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Invoke handler
    #[inline]
    pub fn invoke(&self, input: &Payload) -> Option<Payload> {
        self.handler.handle(input)
    }
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Name-unique, index-stable function table.
///
/// Cloning is cheap (handlers are shared) and produces an independent
/// snapshot: later registrations on the original are not visible in the clone.
#[derive(Clone, Default)]
pub struct Registry {
    slots: Vec<RegisteredFunction>,
    index: HashMap<Name, u32>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register atau replace handler.
    ///
    /// Nama yang sudah ada: handler diganti, index tetap.
    /// Nama baru: append di index berikutnya.
    pub fn register<H: Handler>(&mut self, name: &str, handler: H) -> Result<Handle> {
        self.register_shared(name, Arc::new(handler))
    }

    /// Like [`Registry::register`] for a handler that is already shared
    pub fn register_shared(&mut self, name: &str, handler: Arc<dyn Handler>) -> Result<Handle> {
        let name = Name::new(name)?;

        if let Some(&idx) = self.index.get(&name) {
            let slot = self
                .slots
                .get_mut(idx as usize)
                .ok_or_else(|| RpcError::FunctionRegistrationFailed {
                    name: name.to_string(),
                })?;
            slot.handler = handler;
            debug!(name = %name, index = idx, "Replaced handler");
            return Ok(Handle::new(idx));
        }

        let idx = u32::try_from(self.slots.len()).map_err(|_| {
            RpcError::FunctionRegistrationFailed {
                name: name.to_string(),
            }
        })?;
        self.index.insert(name.clone(), idx);
        debug!(name = %name, index = idx, "Registered function");
        self.slots.push(RegisteredFunction { name, handler });

        Ok(Handle::new(idx))
    }

    /// Lookup index by name
    pub fn find(&self, name: &str) -> Option<Handle> {
        // Invalid names can never be registered, so a plain miss is correct
        let name = Name::new(name).ok()?;
        self.find_name(&name)
    }

    /// Lookup index by an already validated name
    pub fn find_name(&self, name: &Name) -> Option<Handle> {
        self.index.get(name).copied().map(Handle::new)
    }

    /// Bounds-checked access by raw wire index
    pub fn resolve(&self, index: u32) -> Option<&RegisteredFunction> {
        self.slots.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registered names in index order
    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.slots.iter().map(RegisteredFunction::name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
