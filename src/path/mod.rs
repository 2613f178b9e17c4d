// src/path/mod.rs

use log::{debug, warn};
use std::env;
use std::path::Path;

/// Shell used when `$SHELL` is unset or unusable.
pub const FALLBACK_SHELL: &str = "/bin/bash";

/// Last resort when even `FALLBACK_SHELL` is missing (minimal containers).
const POSIX_SHELL: &str = "/bin/sh";

/// Resolves the shell to launch for a new session.
///
/// Uses the `SHELL` environment variable when it points at an existing file,
/// otherwise falls back to `/bin/bash`, and to `/bin/sh` on hosts without bash.
pub fn get_default_shell() -> String {
  resolve_shell(env::var("SHELL").ok().as_deref())
}

/// Resolution logic behind [`get_default_shell`], taking the `SHELL` value explicitly.
pub fn resolve_shell(configured: Option<&str>) -> String {
  match configured.map(str::trim) {
    Some(shell) if !shell.is_empty() => {
      if is_file(shell) {
        debug!("Default shell from SHELL: {}", shell);
        return shell.to_string();
      }
      warn!(
        "SHELL environment variable points to a non-file: {:?}, falling back",
        shell
      );
    }
    _ => debug!("SHELL is not set, falling back"),
  }

  if is_file(FALLBACK_SHELL) || !is_file(POSIX_SHELL) {
    FALLBACK_SHELL.to_string()
  } else {
    debug!("{} not found, using {}", FALLBACK_SHELL, POSIX_SHELL);
    POSIX_SHELL.to_string()
  }
}

fn is_file(path_str: &str) -> bool {
  let path = Path::new(path_str);
  let is_file = path.is_file();
  debug!("Is file check for {:?}: {}", path, is_file);
  is_file
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_configured_shell_is_used_when_it_exists() {
    assert_eq!(resolve_shell(Some("/bin/sh")), "/bin/sh");
  }

  #[test]
  fn test_missing_shell_falls_back() {
    let shell = resolve_shell(Some("/definitely/not/a/shell"));
    assert!(shell == FALLBACK_SHELL || shell == POSIX_SHELL);
  }

  #[test]
  fn test_unset_or_blank_shell_falls_back() {
    let unset = resolve_shell(None);
    let blank = resolve_shell(Some("   "));
    assert_eq!(unset, blank);
    assert!(unset == FALLBACK_SHELL || unset == POSIX_SHELL);
  }

  #[test]
  fn test_directory_is_not_a_shell() {
    let shell = resolve_shell(Some("/tmp"));
    assert_ne!(shell, "/tmp");
  }
}
