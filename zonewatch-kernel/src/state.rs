use parking_lot::Mutex;
use std::sync::Arc;

/// Mutable state shared between the refresh tasks and the HTTP handlers.
/// Locks are only ever held for plain field updates, never across an `.await`.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
