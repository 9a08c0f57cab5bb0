//! Cross-platform shell command utilities

use std::path::Path;

/// Returns the appropriate shell command and argument for the current platform.
///
/// Returns (shell_program, shell_arg) where:
/// - Windows: ("cmd", "/C")
/// - Unix-like: ("sh", "-c") or ("bash", "-c") if available
pub fn get_shell_command() -> (String, &'static str) {
    if cfg!(windows) {
        ("cmd".into(), "/C")
    } else {
        // Prefer SHELL env var if set and valid
        if let Ok(shell) = std::env::var("SHELL") {
            let path = Path::new(&shell);
            if path.is_absolute() && path.is_file() {
                return (shell, "-c");
            }
        }
        // Prefer zsh or bash if available, fallback to sh
        if Path::new("/bin/zsh").exists() {
            ("zsh".into(), "-c")
        } else if Path::new("/bin/bash").exists() {
            ("bash".into(), "-c")
        } else {
            ("sh".into(), "-c")
        }
    }
}
