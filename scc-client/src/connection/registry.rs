//! Process-wide cache of connections, one per host.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use url::Url;

use super::{Connection, ConnectionError, ConnectionHook};
use crate::auth::TokenAuthenticator;

type Slot = Arc<Mutex<Option<Arc<Connection>>>>;

/// Maps each host to a single [`Connection`] for the lifetime of the registry.
///
/// The first `get` for a host builds the connection through the configured hook; later calls
/// return the same instance whatever authenticator they pass. Concurrent first callers for a
/// host wait on a per-host slot so the hook runs once. A failed or panicking connect leaves
/// nothing cached and the next caller tries again.
///
/// Create one registry at application start and share it between clients.
pub struct ConnectionRegistry {
    hook: Box<dyn ConnectionHook>,
    connections: Mutex<HashMap<String, Slot>>,
}

impl ConnectionRegistry {
    pub fn new(hook: Box<dyn ConnectionHook>) -> Self {
        Self {
            hook,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(
        &self,
        host: &Url,
        authenticator: Option<Arc<TokenAuthenticator>>,
    ) -> Result<Arc<Connection>, ConnectionError> {
        let key = host_key(host);
        loop {
            let slot = self
                .connections
                .lock()?
                .entry(key.clone())
                .or_default()
                .clone();

            let mut guard = lock_slot(&slot);
            if let Some(connection) = guard.as_ref() {
                if connection.authenticator().map(|a| &**a) != authenticator.as_deref() {
                    debug!(host = %key, "reusing connection created with a different credential");
                }
                return Ok(connection.clone());
            }
            // an empty slot may have been dropped by a failed connect while this caller waited
            if !self.is_current(&key, &slot)? {
                continue;
            }

            info!(host = %key, "creating connection");
            return match self.hook.connect(host, authenticator) {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    *guard = Some(connection.clone());
                    Ok(connection)
                }
                Err(err) => {
                    self.discard(&key, &slot)?;
                    Err(err)
                }
            };
        }
    }

    /// Whether a live connection is cached for the host.
    pub fn contains(&self, host: &Url) -> Result<bool, ConnectionError> {
        let slot = self.connections.lock()?.get(&host_key(host)).cloned();
        match slot {
            Some(slot) => Ok(lock_slot(&slot).is_some()),
            None => Ok(false),
        }
    }

    // Slot locks are always taken before the map lock.
    fn is_current(&self, key: &str, slot: &Slot) -> Result<bool, ConnectionError> {
        Ok(self
            .connections
            .lock()?
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot)))
    }

    fn discard(&self, key: &str, slot: &Slot) -> Result<(), ConnectionError> {
        let mut connections = self.connections.lock()?;
        if connections
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            connections.remove(key);
        }
        Ok(())
    }
}

// A slot is only written after a successful connect, so a panic inside the hook leaves it empty
// and safe to reuse.
fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<Arc<Connection>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// scheme, host and port identify an appliance, paths do not
fn host_key(host: &Url) -> String {
    host.origin().ascii_serialization()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::http_client::test::MockHttpClientMockall;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    // Counts connect calls and fails while `failures` is positive
    #[derive(Default)]
    struct CountingHook {
        calls: Arc<AtomicUsize>,
        failures: AtomicUsize,
        panic_once: AtomicBool,
        delay: Option<Duration>,
    }

    impl ConnectionHook for CountingHook {
        fn connect(
            &self,
            host: &Url,
            authenticator: Option<Arc<TokenAuthenticator>>,
        ) -> Result<Connection, ConnectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("hook panicked");
            }
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ConnectionError::UnsupportedVersion {
                    host: host.to_string(),
                    version: "8.0".to_string(),
                    minimum: 9,
                });
            }
            Ok(Connection::new(
                host.clone(),
                authenticator,
                Arc::new(MockHttpClientMockall::new()),
                false,
            ))
        }
    }

    fn registry(hook: CountingHook) -> (ConnectionRegistry, Arc<AtomicUsize>) {
        let calls = hook.calls.clone();
        (ConnectionRegistry::new(Box::new(hook)), calls)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn same_host_same_connection() {
        let (registry, calls) = registry(CountingHook::default());
        let host = url("https://scc.example.com");

        let first = registry
            .get(&host, Some(Arc::new(TokenAuthenticator::new("ACCESS123"))))
            .unwrap();
        let second = registry
            .get(&host, Some(Arc::new(TokenAuthenticator::new("ACCESS123"))))
            .unwrap();
        // authenticator is not part of the key
        let third = registry.get(&host, None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn host_key_ignores_path() {
        let (registry, calls) = registry(CountingHook::default());

        let first = registry.get(&url("https://scc.example.com"), None).unwrap();
        let second = registry
            .get(&url("https://scc.example.com/api/"), None)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_hosts_different_connections() {
        let (registry, calls) = registry(CountingHook::default());

        let first = registry.get(&url("https://scc1.example.com"), None).unwrap();
        let second = registry.get(&url("https://scc2.example.com"), None).unwrap();
        let other_port = registry
            .get(&url("https://scc1.example.com:8443"), None)
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other_port));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failed_connect_is_not_cached() {
        let (registry, calls) = registry(CountingHook {
            failures: AtomicUsize::new(1),
            ..Default::default()
        });
        let host = url("https://scc.example.com");

        assert!(registry.get(&host, None).is_err());
        assert!(!registry.contains(&host).unwrap());

        registry.get(&host, None).unwrap();
        assert!(registry.contains(&host).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_connects_leave_no_entries() {
        let (registry, calls) = registry(CountingHook {
            failures: AtomicUsize::new(100),
            ..Default::default()
        });

        for i in 0..100 {
            let host = url(&format!("https://scc{i}.example.com"));
            assert!(registry.get(&host, None).is_err());
        }

        assert!(registry.connections.lock().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn panicking_connect_does_not_poison_the_host() {
        let (registry, calls) = registry(CountingHook {
            panic_once: AtomicBool::new(true),
            ..Default::default()
        });
        let host = url("https://scc.example.com");

        let outcome = thread::scope(|s| s.spawn(|| registry.get(&host, None)).join());
        assert!(outcome.is_err());
        assert!(!registry.contains(&host).unwrap());

        let connection = registry.get(&host, None).unwrap();
        assert!(Arc::ptr_eq(&connection, &registry.get(&host, None).unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn waiters_retry_after_a_failed_connect() {
        let (registry, calls) = registry(CountingHook {
            failures: AtomicUsize::new(1),
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let host = url("https://scc.example.com");

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| registry.get(&host, None)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let connections: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
        assert_eq!(connections.len(), 3);
        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_callers_share_one_connection() {
        let (registry, calls) = registry(CountingHook {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let host = url("https://scc.example.com");

        let connections: Vec<Arc<Connection>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.get(&host, None).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
