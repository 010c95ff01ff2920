//! Shared helpers for stencil-core integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use stencil_core::metadata::{FetchError, RemoteSource, CATALOG_FILE, PROPERTIES_FILE, VERSIONS_PATH};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const PROPERTIES_2_0_1: &str = "build.date=2026-09-30\nhelidon.version=4.1.0\nmaven.version=3.9.9\n";

pub const CATALOG_2_0_1: &str = r#"entries:
  - artifactId: quickstart-se
    version: 4.1.0
    name: quickstart
    summary: Minimal SE service
    tags: se,rest,starter
  - artifactId: database-mp
    version: 4.1.0
    name: database
    summary: MP service backed by JPA
    tags: mp,jpa
"#;

/// Lay out a local metadata mirror under `root`
pub fn write_mirror(root: &Path, versions: &[&str]) -> Result<()> {
    fs::create_dir_all(root)?;
    fs::write(root.join(VERSIONS_PATH), versions.join("\n"))?;
    for version in versions {
        let dir = root.join(version);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(PROPERTIES_FILE), PROPERTIES_2_0_1)?;
        fs::write(dir.join(CATALOG_FILE), CATALOG_2_0_1)?;
    }
    Ok(())
}

/// Write an executable shell script
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)?;
    Ok(path)
}

/// In-memory remote with per-path scripted responses and fetch counting
///
/// Each path replays its responses in order; the last one repeats.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<HashMap<String, Vec<Result<Vec<u8>, FetchError>>>>,
    fetches: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `versions` with the standard properties and catalog payloads
    pub fn with_versions(versions: &[&str]) -> Self {
        let source = Self::new();
        source.respond(VERSIONS_PATH, Ok(versions.join("\n").into_bytes()));
        for version in versions {
            source.respond(
                &format!("{version}/{PROPERTIES_FILE}"),
                Ok(PROPERTIES_2_0_1.as_bytes().to_vec()),
            );
            source.respond(
                &format!("{version}/{CATALOG_FILE}"),
                Ok(CATALOG_2_0_1.as_bytes().to_vec()),
            );
        }
        source
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Append a response for `path`
    pub fn respond(&self, path: &str, response: Result<Vec<u8>, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(response);
    }

    /// Replace all responses for `path`
    pub fn set(&self, path: &str, response: Result<Vec<u8>, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), vec![response]);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        self.fetches.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl RemoteSource for ScriptedSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable("network is down".to_string()));
        }

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(FetchError::NotFound(path.to_string())),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
