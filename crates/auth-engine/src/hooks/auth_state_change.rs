use crate::state_manager::{AuthStateManager, ListenerId};
use crate::store::AuthStore;
use std::sync::Arc;

/// Mirrors every manager transition into the store.
pub struct AuthStateChangeBridge {
    manager: Arc<AuthStateManager>,
    listener_id: ListenerId,
}

impl AuthStateChangeBridge {
    pub fn attach(manager: Arc<AuthStateManager>, store: Arc<AuthStore>) -> Self {
        store.set_authentication_state(manager.state());
        let listener_id = manager.add_state_change_listener(move |change| {
            store.set_authentication_state(change.current);
            Ok(())
        });
        Self {
            manager,
            listener_id,
        }
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }
}

impl Drop for AuthStateChangeBridge {
    fn drop(&mut self) {
        self.manager.remove_state_change_listener(self.listener_id);
    }
}
