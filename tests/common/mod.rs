#![allow(dead_code)]

use std::sync::Arc;

use catlog::{Catalog, Cookie, Env, LogConfig, MemStore, Process};

/// Chunk size used by the integration tests: small enough that a 64-slot
/// header fits and records stay tiny
pub const CHUNK: usize = 512;
pub const BITS: u32 = 64;

pub fn config() -> LogConfig {
    LogConfig::with_geometry(CHUNK, BITS)
}

/// TestCatalog bundles an in-memory store with a fresh catalog on it
pub struct TestCatalog {
    pub store: Arc<MemStore>,
    pub catalog: Catalog,
    pub env: Env,
}

impl TestCatalog {
    pub fn new() -> Self {
        let store = Arc::new(MemStore::new());
        let mut env = Env::new();
        let catalog = Catalog::create(store.clone(), &config(), &mut env).expect("create catalog");
        TestCatalog {
            store,
            catalog,
            env,
        }
    }

    pub fn append(&mut self, payload: &str) -> Cookie {
        self.catalog
            .append(&mut self.env, 1, payload.as_bytes())
            .expect("append")
    }

    /// Append until the current plain log is full; the next append rotates
    pub fn fill_current(&mut self, tag: &str) -> Vec<Cookie> {
        let mut cookies = vec![self.append(tag)];
        while cookies.last().unwrap().index < BITS - 1 {
            cookies.push(self.append(tag));
        }
        cookies
    }

    pub fn replay(&mut self) -> Vec<(Cookie, String)> {
        replay_all(&self.catalog, &mut self.env)
    }
}

pub fn replay_all(catalog: &Catalog, env: &mut Env) -> Vec<(Cookie, String)> {
    let mut seen = Vec::new();
    let verdict = catalog
        .replay(env, |cookie, rec| {
            seen.push((cookie, String::from_utf8_lossy(&rec.payload).into_owned()));
            Ok(Process::Continue)
        })
        .expect("replay");
    assert_eq!(verdict, Process::Continue);
    seen
}
