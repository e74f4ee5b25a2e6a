//! The engine: the process-wide coordinator tying the registry, the known-
//! object map, the probe guard, and the asynchronous worker together behind
//! the lock ordering spec.md §5 mandates (`registry_lock` acquired before
//! `refresh_lock`, never the reverse). Grounded on `xh_core_init_once`/
//! `xh_core_refresh`/`xh_core_clear` in `xh_core.c`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};

use log::LevelFilter;

use crate::error::Result;
use crate::maps::{MapsSource, ProcSelfMaps};
use crate::object_record::ObjectRecord;
use crate::probe_guard;
use crate::reconciler;
use crate::registry::Registry;
use crate::worker::Worker;

pub struct Engine {
    registry_lock: Mutex<Registry>,
    refresh_lock: Mutex<HashMap<String, ObjectRecord>>,
    maps_source: Box<dyn MapsSource + Send + Sync>,
    core_init: Once,
    core_init_ok: AtomicBool,
    worker: Mutex<Option<Worker>>,
    debug: AtomicBool,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_maps_source(Box::new(ProcSelfMaps))
    }

    /// Used by integration tests to drive the engine against a
    /// [`crate::maps::StaticMaps`] report instead of the real
    /// `/proc/self/maps`.
    pub fn with_maps_source(maps_source: Box<dyn MapsSource + Send + Sync>) -> Self {
        Self {
            registry_lock: Mutex::new(Registry::new()),
            refresh_lock: Mutex::new(HashMap::new()),
            maps_source,
            core_init: Once::new(),
            core_init_ok: AtomicBool::new(false),
            worker: Mutex::new(None),
            debug: AtomicBool::new(false),
        }
    }

    fn ensure_core_init(&self) -> Result<()> {
        self.core_init.call_once(|| {
            let installed = probe_guard::install();
            if let Err(ref err) = installed {
                log::error!("core init failed: {err}");
            } else {
                log::debug!("core init complete, probe guard installed");
            }
            self.core_init_ok.store(installed.is_ok(), Ordering::SeqCst);
        });
        if self.core_init_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(crate::error::Error::ProbeGuardInstallFailed)
        }
    }

    /// Appends a hook binding. Never triggers a refresh by itself (spec.md
    /// §9's first open-question decision: existing, unchanged objects are
    /// not retroactively re-hooked).
    pub fn register(
        &self, pattern: &str, symbol_name: &str, replacement_fn: *const (), original_fn_out: Option<*mut *const ()>,
    ) -> Result<()> {
        let mut registry = self.registry_lock.lock().unwrap_or_else(|p| p.into_inner());
        registry.register(pattern, symbol_name, replacement_fn, original_fn_out)
    }

    /// Runs the reconciliation pass directly, holding `registry_lock` then
    /// `refresh_lock` for its duration (spec.md §5's lock ordering).
    fn run_refresh_pass(&self) {
        let registry = self.registry_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut known = self.refresh_lock.lock().unwrap_or_else(|p| p.into_inner());
        log::trace!("refresh pass starting, {} known object(s)", known.len());
        if let Err(err) = reconciler::refresh_impl(&mut known, &registry, self.maps_source.as_ref()) {
            log::warn!("refresh pass failed: {err}");
        } else {
            log::trace!("refresh pass complete, {} known object(s)", known.len());
        }
    }

    /// Synchronous refresh: runs the pass on the caller's thread and
    /// returns once it completes. Asynchronous refresh: spawns the worker
    /// thread on first use and hands it a coalesced request, returning
    /// immediately.
    pub fn refresh(&'static self, asynchronous: bool) -> Result<()> {
        self.ensure_core_init()?;

        if !asynchronous {
            self.run_refresh_pass();
            return Ok(());
        }

        let mut worker_slot = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker_slot.is_none() {
            log::debug!("spawning the asynchronous refresh worker");
            let spawned = Worker::spawn(move || self.run_refresh_pass())?;
            *worker_slot = Some(spawned);
        }
        if let Some(worker) = worker_slot.as_ref() {
            worker.request();
        }
        Ok(())
    }

    /// Raises or lowers the `log` facade's max level, matching
    /// `xh_core_enable_debug`'s toggle between verbose and default logging.
    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::SeqCst);
        log::set_max_level(if enabled { LevelFilter::Trace } else { LevelFilter::Info });
    }

    /// Tears the engine down: stops and joins the worker, uninstalls the
    /// probe guard, and drops every registered hook and known object.
    /// Matches `xh_core_clear`'s teardown order.
    pub fn clear(&self) {
        log::debug!("tearing down: stopping worker, uninstalling probe guard, dropping all state");
        if let Some(mut worker) = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take() {
            worker.shutdown();
        }
        probe_guard::uninstall();

        let mut registry = self.registry_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut known = self.refresh_lock.lock().unwrap_or_else(|p| p.into_inner());
        registry.clear();
        known.clear();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
