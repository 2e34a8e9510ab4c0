//! The single "run a privileged network command" seam every Configurator
//! in this crate goes through (spec §9 "reconcile all writes through a
//! single owner task"; §5 "iptables and netlink are process-global
//! mutable state"). Split out so tests substitute a fake rather than
//! shelling out for real.

#[derive(Debug)]
pub struct ExecError {
    pub program: String,
    pub args: Vec<String>,
    pub detail: String,
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{} {}` failed: {}", self.program, self.args.join(" "), self.detail)
    }
}

impl std::error::Error for ExecError {}

impl From<ExecError> for nim_dep_graph::ConfiguratorError {
    fn from(e: ExecError) -> Self {
        nim_dep_graph::ConfiguratorError::new(e.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait ShellExec: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<(), ExecError>;
}

/// Shells out via `std::process::Command` (Configurator calls are
/// synchronous, spec §4.A contract; long-running probes are the only
/// thing that runs async, spec §5).
pub struct RealShellExec;

impl ShellExec for RealShellExec {
    fn run(&self, program: &str, args: &[String]) -> Result<(), ExecError> {
        let output = std::process::Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ExecError {
                program: program.to_string(),
                args: args.to_vec(),
                detail: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ExecError {
                program: program.to_string(),
                args: args.to_vec(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
