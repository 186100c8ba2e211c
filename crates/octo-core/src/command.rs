use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn host() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Interpreter overrides. `None` keeps the platform default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Interpreters {
    #[serde(default)]
    pub python: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Run through the platform command interpreter rather than directly.
    pub shell: bool,
}

impl LaunchCommand {
    pub fn resolve(path: &Path, platform: Platform, interpreters: &Interpreters) -> Self {
        let path_str = path.to_string_lossy().into_owned();
        let is_python = path_str.ends_with(".py");
        let python = |default: &str| {
            interpreters
                .python
                .clone()
                .unwrap_or_else(|| default.to_string())
        };
        let shell = |default: &str| {
            interpreters
                .shell
                .clone()
                .unwrap_or_else(|| default.to_string())
        };

        match (platform, is_python) {
            (Platform::Windows, true) => Self {
                program: python("python"),
                args: vec!["-u".to_string(), path_str],
                shell: false,
            },
            (Platform::Windows, false) => Self {
                program: shell("cmd"),
                args: vec!["/c".to_string(), path_str],
                shell: true,
            },
            (Platform::Unix, true) => Self {
                program: python("python3"),
                args: vec!["-u".to_string(), path_str],
                shell: false,
            },
            (Platform::Unix, false) => Self {
                program: shell("bash"),
                args: vec![path_str],
                shell: false,
            },
        }
    }

    /// `cmd` already is the shell, so shell entries need no extra wrapping.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(path: &str, platform: Platform) -> LaunchCommand {
        LaunchCommand::resolve(Path::new(path), platform, &Interpreters::default())
    }

    #[test]
    fn unix_dispatch_table() {
        let py = resolve("scripts/setup.py", Platform::Unix);
        assert_eq!(py.program, "python3");
        assert_eq!(py.args, vec!["-u", "scripts/setup.py"]);
        assert!(!py.shell);

        let sh = resolve("scripts/deploy/run.sh", Platform::Unix);
        assert_eq!(sh.program, "bash");
        assert_eq!(sh.args, vec!["scripts/deploy/run.sh"]);
        assert!(!sh.shell);
    }

    #[test]
    fn windows_dispatch_table() {
        let py = resolve("scripts\\setup.py", Platform::Windows);
        assert_eq!(py.program, "python");
        assert_eq!(py.args, vec!["-u", "scripts\\setup.py"]);
        assert!(!py.shell);
        assert_eq!(py.to_command().get_program(), "python");

        let bat = resolve("scripts\\build.bat", Platform::Windows);
        assert_eq!(bat.program, "cmd");
        assert_eq!(bat.args, vec!["/c", "scripts\\build.bat"]);
        assert!(bat.shell);
        let command = bat.to_command();
        assert_eq!(command.get_program(), "cmd");
        assert_eq!(command.get_args().count(), 2);
    }

    #[test]
    fn extension_match_is_literal() {
        assert_eq!(resolve("tool.PY", Platform::Unix).program, "bash");
        assert_eq!(resolve("python.sh", Platform::Unix).program, "bash");
        assert_eq!(resolve("noext", Platform::Unix).program, "bash");
    }

    #[test]
    fn overrides_replace_program_only() {
        let interpreters = Interpreters {
            python: Some("/opt/py/bin/python3.12".to_string()),
            shell: Some("/bin/zsh".to_string()),
        };
        let py = LaunchCommand::resolve(Path::new("a.py"), Platform::Unix, &interpreters);
        assert_eq!(py.program, "/opt/py/bin/python3.12");
        assert_eq!(py.args, vec!["-u", "a.py"]);

        let sh = LaunchCommand::resolve(Path::new("a.sh"), Platform::Unix, &interpreters);
        assert_eq!(sh.to_string(), "/bin/zsh a.sh");
    }
}
