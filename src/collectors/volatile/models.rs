use serde::{Deserialize, Serialize};

/// One introspection command and the artifact its stdout becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolatileCommand {
    pub artifact: &'static str,
    pub program: &'static str,
    pub args: &'static [&'static str],
}

impl VolatileCommand {
    pub const fn new(artifact: &'static str, program: &'static str, args: &'static [&'static str]) -> Self {
        Self { artifact, program, args }
    }
}

/// Volatile captures in collection order. Each group lists alternatives
/// tried in turn; the first available program wins.
pub const VOLATILE_COMMANDS: &[&[VolatileCommand]] = &[
    &[VolatileCommand::new("host.info", "uname", &["-a"])],
    &[VolatileCommand::new("process.info", "ps", &["aux"])],
    &[
        VolatileCommand::new("ss.info", "ss", &["-tulpan"]),
        VolatileCommand::new("netstat.info", "netstat", &["-tulpan"]),
    ],
    &[VolatileCommand::new("lsmod.info", "lsmod", &[])],
    &[VolatileCommand::new("env.info", "env", &[])],
];

/// What the volatile phase produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatileSummary {
    /// Artifact names written
    pub captured: Vec<String>,
    /// Programs with no available alternative
    pub skipped: Vec<String>,
}
