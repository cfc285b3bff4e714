//! The authenticated connection shared by every node.
//!
//! Created once by discovery and handed to each node at construction; nodes only read it.

use log::info;
use std::rc::Rc;

use crate::client::{RachioApi, RachioClientError};
use crate::models::rachio::PersonId;

pub struct Session {
    api: Box<dyn RachioApi>,
    person_id: PersonId,
}

impl Session {
    /// Bind `api` to an account. Without an explicit `person_id` the account behind the
    /// API key is looked up.
    pub fn connect(api: Box<dyn RachioApi>, person_id: Option<PersonId>) -> Result<Rc<Self>, RachioClientError> {
        let person_id = match person_id {
            Some(id) => id,
            None => api.get_person_info()?.id,
        };
        info!("Session bound to Rachio account {}", person_id.0);
        Ok(Rc::new(Session { api, person_id }))
    }

    pub fn api(&self) -> &dyn RachioApi {
        self.api.as_ref()
    }

    pub fn person_id(&self) -> &PersonId {
        &self.person_id
    }
}
