//! Device capability contract and the session-wide registry.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use cogloop_core::{DeviceError, ParameterSet};

/// Lifecycle interface every piece of apparatus exposes.
pub trait Device: Send {
    fn start_trial(&mut self, trial_id: u64, parameters: &ParameterSet) -> Result<(), DeviceError>;

    fn stop_trial(&mut self, trial_id: u64, is_valid: bool) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;

    /// Called on every fast-loop iteration while the device is available.
    fn poll(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Simulated operation without physical hardware.
    fn dummy_mode(&self) -> bool {
        false
    }

    /// Extension of the auxiliary file this device writes, if any.
    fn user_file_extension(&self) -> Option<&str> {
        None
    }

    fn set_user_file(&mut self, _path: PathBuf) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Builds `{participant}_{experiment}_{session}_{device}_{date}.ext` paths.
#[derive(Debug, Clone)]
pub struct FileNaming {
    folder: PathBuf,
    base: String,
    date: String,
}

impl FileNaming {
    pub fn new(folder: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            base: base.into(),
            date: Local::now().format("%d-%m-%Y_%H%M%S").to_string(),
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn user_file(&self, device: &str, extension: &str) -> PathBuf {
        let extension = extension.trim_start_matches('.');
        self.folder
            .join(format!("{}_{}_{}.{}", self.base, device, self.date, extension))
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

struct Entry {
    name: String,
    device: Box<dyn Device>,
    required: bool,
    available: bool,
    user_file: Option<PathBuf>,
}

/// Outcome of forwarding `start_trial` or `stop_trial` to every device.
#[derive(Debug, Default)]
pub struct DeviceReport {
    /// Optional devices that failed and were skipped.
    pub degraded: Vec<String>,
    /// First failure of a required device.
    pub fatal: Option<DeviceError>,
}

/// Devices configured for the session, in registration order.
///
/// Built once at session start. Moved to the fast loop for each trial and
/// returned at the trial boundary.
pub struct DeviceRegistry {
    entries: Vec<Entry>,
    naming: FileNaming,
    degraded: Vec<String>,
    closed: bool,
}

impl DeviceRegistry {
    pub fn new(naming: FileNaming) -> Self {
        Self {
            entries: Vec::new(),
            naming,
            degraded: Vec::new(),
            closed: false,
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        mut device: Box<dyn Device>,
        required: bool,
    ) -> Result<(), DeviceError> {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(DeviceError::Duplicate(name.to_string()));
        }
        let user_file = device
            .user_file_extension()
            .map(|ext| self.naming.user_file(name, ext));
        if let Some(path) = &user_file {
            device.set_user_file(path.clone());
        }
        log::info!(
            "registered device `{}`{}{}",
            name,
            if required { " (required)" } else { "" },
            if device.dummy_mode() { " in dummy mode" } else { "" },
        );
        self.entries.push(Entry {
            name: name.to_string(),
            device,
            required,
            available: true,
            user_file,
        });
        Ok(())
    }

    /// Calls `start_trial` on every device exactly once.
    pub fn start_trial(&mut self, trial_id: u64, parameters: &ParameterSet) -> DeviceReport {
        let mut report = DeviceReport::default();
        self.degraded.clear();
        for entry in &mut self.entries {
            match entry.device.start_trial(trial_id, parameters) {
                Ok(()) => entry.available = true,
                Err(err) => {
                    entry.available = false;
                    if entry.required {
                        log::error!("trial {trial_id}: required {err}");
                        report.fatal.get_or_insert(err);
                    } else {
                        log::warn!("trial {trial_id}: {err}; continuing without it");
                        report.degraded.push(entry.name.clone());
                    }
                }
            }
        }
        self.degraded.extend(report.degraded.iter().cloned());
        report
    }

    /// Calls `stop_trial` on every device exactly once, including devices
    /// that failed to start.
    pub fn stop_trial(&mut self, trial_id: u64, is_valid: bool) -> DeviceReport {
        let mut report = DeviceReport::default();
        for entry in &mut self.entries {
            let Err(err) = entry.device.stop_trial(trial_id, is_valid) else {
                continue;
            };
            if entry.required {
                log::error!("trial {trial_id}: required {err}");
                report.fatal.get_or_insert(err);
            } else {
                log::warn!("trial {trial_id}: {err}");
                report.degraded.push(entry.name.clone());
            }
        }
        for name in &report.degraded {
            if !self.degraded.contains(name) {
                self.degraded.push(name.clone());
            }
        }
        report
    }

    /// Polls every available device. A failing optional device is dropped for
    /// the rest of the trial; a failing required device is returned as an error.
    pub fn poll(&mut self) -> Result<(), DeviceError> {
        for entry in &mut self.entries {
            if !entry.available {
                continue;
            }
            if let Err(err) = entry.device.poll() {
                entry.available = false;
                if entry.required {
                    return Err(err);
                }
                log::warn!("{err}; device unavailable for the rest of the trial");
                self.degraded.push(entry.name.clone());
            }
        }
        Ok(())
    }

    /// Closes every device once. Later calls do nothing.
    pub fn close_all(&mut self) -> Vec<DeviceError> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        let mut errors = Vec::new();
        for entry in &mut self.entries {
            if let Err(err) = entry.device.close() {
                log::warn!("{err}");
                errors.push(err);
            }
        }
        errors
    }

    pub fn get_mut<T: Device + 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .and_then(|e| e.device.as_any_mut().downcast_mut::<T>())
    }

    pub fn get<T: Device + 'static>(&self, name: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.device.as_any().downcast_ref::<T>())
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name && e.available)
    }

    /// Devices degraded during the current trial.
    pub fn degraded(&self) -> &[String] {
        &self.degraded
    }

    pub fn user_files(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|e| {
                e.user_file
                    .as_ref()
                    .map(|p| (e.name.clone(), p.display().to_string()))
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.names().collect::<Vec<_>>())
            .field("closed", &self.closed)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Start(u64),
    Stop(u64, bool),
    Close,
}

/// Shared call log, so tests can inspect a device after handing it to the registry.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog(Arc<Mutex<Vec<DeviceCall>>>);

impl DeviceLog {
    fn push(&self, call: DeviceCall) {
        self.lock().push(call);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceCall>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.lock().iter().filter(|c| pred(c)).count()
    }
}

/// Device that simulates hardware and records every lifecycle call.
#[derive(Debug, Default)]
pub struct DummyDevice {
    log: DeviceLog,
    fail_start: bool,
    fail_start_on: Option<u64>,
    fail_stop: bool,
    extension: Option<String>,
    user_file: Option<PathBuf>,
    name: String,
}

impl DummyDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Every `start_trial` fails.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Only `start_trial` for `trial_id` fails.
    pub fn failing_start_on(mut self, trial_id: u64) -> Self {
        self.fail_start_on = Some(trial_id);
        self
    }

    /// Every `stop_trial` fails.
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn log(&self) -> DeviceLog {
        self.log.clone()
    }

    pub fn user_file(&self) -> Option<&Path> {
        self.user_file.as_deref()
    }
}

impl Device for DummyDevice {
    fn start_trial(&mut self, trial_id: u64, _parameters: &ParameterSet) -> Result<(), DeviceError> {
        self.log.push(DeviceCall::Start(trial_id));
        if self.fail_start || self.fail_start_on == Some(trial_id) {
            return Err(DeviceError::failed(&self.name, "start trial", "simulated failure"));
        }
        Ok(())
    }

    fn stop_trial(&mut self, trial_id: u64, is_valid: bool) -> Result<(), DeviceError> {
        self.log.push(DeviceCall::Stop(trial_id, is_valid));
        if self.fail_stop {
            return Err(DeviceError::failed(&self.name, "stop trial", "simulated failure"));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.log.push(DeviceCall::Close);
        Ok(())
    }

    fn dummy_mode(&self) -> bool {
        true
    }

    fn user_file_extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    fn set_user_file(&mut self, path: PathBuf) {
        self.user_file = Some(path);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(FileNaming::new("data", "p01_probe_1").with_date("01-02-2026_101500"))
    }

    #[test]
    fn user_file_follows_naming_convention() {
        let mut devices = registry();
        devices
            .register("sled", Box::new(DummyDevice::new("sled").with_extension("csv")), false)
            .unwrap();

        let sled = devices.get::<DummyDevice>("sled").unwrap();
        assert_eq!(
            sled.user_file(),
            Some(Path::new("data/p01_probe_1_sled_01-02-2026_101500.csv"))
        );
        assert_eq!(devices.user_files().len(), 1);
    }

    #[test]
    fn optional_failure_degrades_required_failure_is_fatal() {
        let mut devices = registry();
        let optional = DummyDevice::new("eyetracker").failing_start();
        let required = DummyDevice::new("sled").failing_start();
        let (opt_log, req_log) = (optional.log(), required.log());
        devices.register("eyetracker", Box::new(optional), false).unwrap();
        devices.register("sled", Box::new(required), true).unwrap();

        let report = devices.start_trial(1, &ParameterSet::new());
        assert_eq!(report.degraded, ["eyetracker"]);
        assert!(matches!(report.fatal, Some(DeviceError::Failed { .. })));
        assert!(!devices.is_available("eyetracker"));

        devices.stop_trial(1, false);
        for log in [opt_log, req_log] {
            assert_eq!(log.calls(), [DeviceCall::Start(1), DeviceCall::Stop(1, false)]);
        }
    }

    #[test]
    fn stop_failures_are_split_by_requirement() {
        let mut devices = registry();
        devices
            .register("eyetracker", Box::new(DummyDevice::new("eyetracker").failing_stop()), false)
            .unwrap();
        devices
            .register("sled", Box::new(DummyDevice::new("sled").failing_stop()), true)
            .unwrap();

        assert!(devices.start_trial(3, &ParameterSet::new()).fatal.is_none());
        let report = devices.stop_trial(3, true);
        assert_eq!(report.degraded, ["eyetracker"]);
        assert!(matches!(report.fatal, Some(DeviceError::Failed { .. })));
        assert_eq!(devices.degraded(), ["eyetracker"]);
    }

    #[test]
    fn close_happens_once() {
        let device = DummyDevice::new("button");
        let log = device.log();
        let mut devices = registry();
        devices.register("button", Box::new(device), false).unwrap();

        devices.close_all();
        devices.close_all();
        drop(devices);
        assert_eq!(log.count(|c| *c == DeviceCall::Close), 1);
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut devices = registry();
        devices.register("a", Box::new(DummyDevice::new("a")), false).unwrap();
        assert!(matches!(
            devices.register("a", Box::new(DummyDevice::new("a")), false),
            Err(DeviceError::Duplicate(_))
        ));
    }
}
