use crate::debug_hooks;
use crate::settings::{FeedSettings, SETTINGS_VERSION};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

pub const CONFIG_ENV_VAR: &str = "MATRIX_RAIN_CONFIG";

struct Inner {
    path: PathBuf,
    last_saved_json: Mutex<String>,
    last_seen_mtime: Mutex<Option<SystemTime>>,
}

#[derive(Clone)]
pub struct Persistence {
    inner: Arc<Inner>,
}

impl Persistence {
    /// Settings file from `MATRIX_RAIN_CONFIG`, else the platform config dir.
    pub fn new() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => default_config_path()?,
        };
        Ok(Self::at(path))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                last_saved_json: Mutex::new(String::new()),
                last_seen_mtime: Mutex::new(None),
            }),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.inner.path
    }

    /// Missing file gives defaults; a corrupt one is archived and replaced by
    /// defaults. The result is always sanitized.
    pub fn load(&self) -> FeedSettings {
        *self
            .inner
            .last_seen_mtime
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = modified_at(&self.inner.path);

        if !self.inner.path.exists() {
            debug_hooks::log_settings("defaults", format!("{:?} not found", self.inner.path));
            return FeedSettings::default();
        }
        match read_json::<FeedSettings>(&self.inner.path) {
            Ok(mut cfg) => {
                if cfg.version == 0 {
                    cfg.version = SETTINGS_VERSION;
                }
                debug_hooks::log_settings("loaded", format!("{:?}", self.inner.path));
                cfg.sanitized()
            }
            Err(err) => {
                archive_corrupt(&self.inner.path, &err);
                FeedSettings::default()
            }
        }
    }

    /// True once per on-disk modification since the last `load`.
    pub fn changed_on_disk(&self) -> bool {
        let current = modified_at(&self.inner.path);
        let mut seen = self
            .inner
            .last_seen_mtime
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if current != *seen {
            *seen = current;
            return current.is_some();
        }
        false
    }

    /// Writes only when the serialized content changed.
    pub fn save_now(&self, cfg: &FeedSettings) -> Result<()> {
        let path = &self.inner.path;

        let parent = path.parent().context("config path has no parent")?;
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create config dir {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(cfg)?;

        {
            let mut last = self
                .inner
                .last_saved_json
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if *last == json {
                return Ok(());
            }
            *last = json.clone();
        }

        if path.exists() {
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
        }

        atomic_write(path, json.as_bytes())?;
        *self
            .inner
            .last_seen_mtime
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = modified_at(path);
        debug_hooks::log_settings("saved", format!("{:?}", path));
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("com", "matrix", "matrix_rain")
        .context("ProjectDirs::from returned None")?;
    Ok(proj.config_dir().join("config.json"))
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("read {:?}", path))?;
    let value = serde_json::from_slice::<T>(&bytes).with_context(|| "parse json")?;
    Ok(value)
}

fn archive_corrupt(path: &Path, err: &anyhow::Error) {
    if !path.exists() {
        return;
    }
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let archived = path.with_extension(format!("corrupt.{ts}.json"));
    let _ = fs::rename(path, &archived);
    debug_hooks::log_settings_issue(format!("config corrupt; archived to {archived:?}: {err:#}"));
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().context("no parent dir for config path")?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    {
        let mut f = fs::File::create(&tmp).with_context(|| format!("create tmp {:?}", tmp))?;
        f.write_all(bytes).with_context(|| "write tmp")?;
        let _ = f.sync_all();
    }

    fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
    Ok(())
}
