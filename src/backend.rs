use serde::Deserialize;
use strum_macros::{Display, EnumString};

/// Supported MI dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Backend {
    #[default]
    Gdb,
    LldbMi,
}

impl Backend {
    pub fn default_program(&self) -> &'static str {
        match self {
            Backend::Gdb => "gdb",
            Backend::LldbMi => "lldb-mi",
        }
    }

    pub fn launch_args(&self) -> Vec<String> {
        match self {
            Backend::Gdb => vec!["-q".to_string(), "--interpreter=mi2".to_string()],
            Backend::LldbMi => vec!["--interpreter".to_string()],
        }
    }

    /// Commands issued once right after the backend starts.
    pub fn setup_commands(&self) -> &'static [&'static str] {
        match self {
            Backend::Gdb => &[
                "-gdb-set mi-async off",
                "-gdb-set confirm off",
                "-gdb-set pagination off",
                "-enable-pretty-printing",
            ],
            Backend::LldbMi => &[],
        }
    }

    pub fn continue_command(&self) -> &'static str {
        "-exec-continue"
    }

    pub fn quit_command(&self) -> &'static str {
        "-gdb-exit"
    }

    pub fn kill_command(&self) -> &'static str {
        match self {
            Backend::Gdb => "-interpreter-exec console \"kill\"",
            Backend::LldbMi => "-interpreter-exec console \"process kill\"",
        }
    }

    pub fn disassemble_command(&self, address: u64, bytes: u64) -> String {
        match self {
            Backend::Gdb => {
                format!("-interpreter-exec console \"disassemble {address:#x},+{bytes}\"")
            }
            Backend::LldbMi => format!(
                "-interpreter-exec console \"disassemble --start-address {address:#x} --end-address {:#x}\"",
                address + bytes
            ),
        }
    }

    /// Whether the command can be written while the debuggee runs.
    pub fn is_interrupt_safe(&self, command: &str) -> bool {
        let verb = command.split_whitespace().next().unwrap_or_default();
        match self {
            Backend::Gdb => matches!(verb, "-gdb-exit" | "-exec-interrupt"),
            Backend::LldbMi => matches!(
                verb,
                "-gdb-exit" | "-exec-interrupt" | "-thread-info" | "-list-thread-groups"
            ),
        }
    }

    /// Whether the command leaves no debuggee to resume.
    pub fn ends_inferior(&self, command: &str) -> bool {
        command == self.kill_command()
            || command.starts_with("-exec-run")
            || command.starts_with("-target-detach")
            || command.starts_with(self.quit_command())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str("gdb").unwrap(), Backend::Gdb);
        assert_eq!(Backend::from_str("lldb-mi").unwrap(), Backend::LldbMi);
        assert!(Backend::from_str("windbg").is_err());
        assert_eq!(Backend::LldbMi.to_string(), "lldb-mi");
    }

    #[test]
    fn test_interrupt_safety() {
        assert!(Backend::Gdb.is_interrupt_safe("-gdb-exit"));
        assert!(!Backend::Gdb.is_interrupt_safe("-break-insert -f \"a.c:3\""));
        assert!(!Backend::Gdb.is_interrupt_safe("-thread-info"));
        assert!(Backend::LldbMi.is_interrupt_safe("-thread-info"));
    }

    #[test]
    fn test_disassemble_command() {
        assert_eq!(
            Backend::Gdb.disassemble_command(0x401136, 64),
            "-interpreter-exec console \"disassemble 0x401136,+64\""
        );
    }
}
