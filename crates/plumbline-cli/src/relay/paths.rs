//! Where the relay keeps its socket and PID file.
//!
//! Socket directory, first match wins:
//! 1. `PLUMBLINE_SOCKET_DIR`
//! 2. `XDG_RUNTIME_DIR/plumbline`
//! 3. `~/.plumbline`
//! 4. `<temp>/plumbline`
//!
//! Several relays can run side by side under different instance names
//! (`PLUMBLINE_SESSION`, default `default`), each at
//! `{socket_dir}/{instance}.sock`.

use std::env;
use std::path::PathBuf;

const DEFAULT_INSTANCE: &str = "default";

/// Relay instance name from the environment.
pub fn get_instance() -> String {
    env::var("PLUMBLINE_SESSION").unwrap_or_else(|_| DEFAULT_INSTANCE.to_string())
}

/// Socket directory. Empty environment values are treated as unset.
pub fn get_socket_dir() -> PathBuf {
    if let Some(dir) = non_empty_var("PLUMBLINE_SOCKET_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(runtime_dir) = non_empty_var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("plumbline");
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".plumbline");
    }

    env::temp_dir().join("plumbline")
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Reject instance names that could escape the socket directory.
///
/// Accepts ASCII alphanumerics, `-` and `_`, not starting with `-`.
/// Anything else falls back to `default` with a warning.
pub(crate) fn sanitize_instance_name(name: &str) -> String {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if is_valid {
        name.to_string()
    } else {
        tracing::warn!(
            "Invalid relay instance name '{}', using '{}'",
            name,
            DEFAULT_INSTANCE
        );
        DEFAULT_INSTANCE.to_string()
    }
}

fn instance_file(instance: Option<&str>, extension: &str) -> PathBuf {
    let name = instance.map(String::from).unwrap_or_else(get_instance);
    get_socket_dir().join(format!("{}.{}", sanitize_instance_name(&name), extension))
}

pub fn get_socket_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "sock")
}

pub fn get_pid_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "pid")
}

/// Create the socket directory, owner-only on Unix.
pub fn ensure_socket_dir() -> std::io::Result<()> {
    let dir = get_socket_dir();
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    // Environment variables are process-global; tests touching them run one at a time.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Restores the named variables on drop and holds the env lock meanwhile.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
        _lock: std::sync::MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn new(names: &[&'static str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = names.iter().map(|n| (*n, env::var(n).ok())).collect();
            Self { saved, _lock: lock }
        }

        fn set(&self, name: &str, value: &str) {
            // SAFETY: ENV_MUTEX is held for the guard's lifetime.
            unsafe { env::set_var(name, value) }
        }

        fn unset(&self, name: &str) {
            // SAFETY: ENV_MUTEX is held for the guard's lifetime.
            unsafe { env::remove_var(name) }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                // SAFETY: ENV_MUTEX is still held.
                unsafe {
                    match value {
                        Some(v) => env::set_var(name, v),
                        None => env::remove_var(name),
                    }
                }
            }
        }
    }

    const VARS: [&str; 3] = ["PLUMBLINE_SOCKET_DIR", "PLUMBLINE_SESSION", "XDG_RUNTIME_DIR"];

    #[test]
    fn instance_defaults_and_overrides() {
        let env = EnvGuard::new(&VARS);
        env.unset("PLUMBLINE_SESSION");
        assert_eq!(get_instance(), "default");

        env.set("PLUMBLINE_SESSION", "work");
        assert_eq!(get_instance(), "work");
    }

    #[test]
    fn socket_dir_priority() {
        let env = EnvGuard::new(&VARS);
        env.set("PLUMBLINE_SOCKET_DIR", "/custom/relay");
        env.set("XDG_RUNTIME_DIR", "/run/user/1000");
        assert_eq!(get_socket_dir(), PathBuf::from("/custom/relay"));

        env.unset("PLUMBLINE_SOCKET_DIR");
        assert_eq!(get_socket_dir(), PathBuf::from("/run/user/1000/plumbline"));

        env.set("PLUMBLINE_SOCKET_DIR", "");
        env.set("XDG_RUNTIME_DIR", "");
        let fallback = get_socket_dir();
        assert!(
            fallback.ends_with(".plumbline") || fallback.ends_with("plumbline"),
            "unexpected fallback {:?}",
            fallback
        );
    }

    #[test]
    fn socket_and_pid_paths_share_instance() {
        let env = EnvGuard::new(&VARS);
        env.set("PLUMBLINE_SOCKET_DIR", "/tmp/plumbline-test");
        env.unset("PLUMBLINE_SESSION");

        assert_eq!(
            get_socket_path(None),
            PathBuf::from("/tmp/plumbline-test/default.sock")
        );
        assert_eq!(
            get_pid_path(Some("work")),
            PathBuf::from("/tmp/plumbline-test/work.pid")
        );
    }

    #[test]
    fn traversal_falls_back_to_default() {
        let env = EnvGuard::new(&VARS);
        env.set("PLUMBLINE_SOCKET_DIR", "/tmp/plumbline-test");

        assert_eq!(
            get_socket_path(Some("../../etc/passwd")),
            PathBuf::from("/tmp/plumbline-test/default.sock")
        );
    }

    #[test]
    fn sanitize_accepts_safe_names() {
        for name in ["default", "tab_2", "my-relay", "_scratch", "Relay9"] {
            assert_eq!(sanitize_instance_name(name), name);
        }
    }

    #[test]
    fn sanitize_rejects_unsafe_names() {
        for name in [
            "",
            " ",
            "..",
            "a/b",
            "..\\up",
            "-flag",
            "--",
            "name!",
            "$(whoami)",
            "semi;colon",
            "nul\0byte",
        ] {
            assert_eq!(sanitize_instance_name(name), "default", "input {:?}", name);
        }
    }
}
