use std::ffi::OsString;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

const MANAGED_VARS: &[&str] = &[
    "SHELLBRIDGE_SERVER__PORT",
    "SHELLBRIDGE_SERVER__HOST",
    "SHELLBRIDGE_TRANSFERS__MAX_CONCURRENT_TRANSFERS",
    "SHELLBRIDGE_TRANSFERS__CHUNK_SIZE",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}

/// Run `f` with a config file holding `config_toml` and a clean set of
/// `SHELLBRIDGE_` variables. The closure gets the config file path.
pub fn with_config_env<T>(config_toml: &str, f: impl FnOnce(&Path) -> T) -> T {
    let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, config_toml).expect("write config");

    let restore = EnvRestore {
        saved: MANAGED_VARS
            .iter()
            .map(|name| (*name, std::env::var_os(name)))
            .collect(),
    };
    for name in MANAGED_VARS {
        std::env::remove_var(name);
    }

    let result = f(&path);
    drop(restore);
    result
}
