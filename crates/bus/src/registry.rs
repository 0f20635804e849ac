//! Client session slots
//!
//! The wire addresses up to sixteen logical sub-devices per adapter; the
//! registry holds one session per address and creates them lazily on first
//! contact.

use std::sync::{Arc, Mutex};

use crate::adapter::{AdapterShared, lock};
use crate::session::ClientSession;

/// Highest client id the options byte can address, plus one
pub const MAX_CLIENTS: usize = 16;

#[derive(Default)]
pub(crate) struct Registry {
    slots: Mutex<[Option<Arc<ClientSession>>; MAX_CLIENTS]>,
}

impl Registry {
    pub(crate) fn get_or_create(&self, id: u8, shared: &Arc<AdapterShared>) -> Arc<ClientSession> {
        let mut slots = lock(&self.slots);
        let slot = &mut slots[id as usize & (MAX_CLIENTS - 1)];
        match slot {
            Some(session) => Arc::clone(session),
            None => {
                let session = ClientSession::new(id, Arc::clone(shared));
                *slot = Some(Arc::clone(&session));
                session
            }
        }
    }

    pub(crate) fn remove(&self, id: u8) -> Option<Arc<ClientSession>> {
        lock(&self.slots)[id as usize & (MAX_CLIENTS - 1)].take()
    }

    /// Take every live session, leaving the registry empty.
    pub(crate) fn drain(&self) -> Vec<Arc<ClientSession>> {
        lock(&self.slots).iter_mut().filter_map(Option::take).collect()
    }
}
