use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Keyspace used by a session. New connections switch to it before being used.
#[derive(Default, Debug)]
pub struct KeyspaceHolder {
    current_keyspace: ArcSwapOption<String>,
}

impl KeyspaceHolder {
    #[inline]
    pub fn current_keyspace(&self) -> Option<Arc<String>> {
        self.current_keyspace.load_full()
    }

    #[inline]
    pub fn update_current_keyspace(&self, keyspace: impl Into<String>) {
        self.current_keyspace.store(Some(Arc::new(keyspace.into())));
    }
}
