use crate::error::{DesignerError, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// A single external program call. Arguments that name files the call writes are
/// recorded as outputs so they can be reported and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    outputs: Vec<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: vec![], outputs: vec![] }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item=S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// adds a file argument that this call writes
    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().as_os_str().to_os_string());
        self.outputs.push(path.as_ref().to_path_buf());
        self
    }

    /// records a file the call writes without passing it on the command line
    pub fn produces(mut self, path: impl AsRef<Path>) -> Self {
        self.outputs.push(path.as_ref().to_path_buf());
        self
    }

    /// connects this command's stdout to the stdin of `next`
    pub fn pipe(self, next: ToolCommand) -> Invocation {
        Invocation { stages: vec![self, next] }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            let a = a.to_string_lossy();
            if a.is_empty() || a.contains(char::is_whitespace) {
                write!(f, " '{}'", a)?;
            } else {
                write!(f, " {}", a)?;
            }
        }
        Ok(())
    }
}

/// One or more commands chained stdout to stdin, the way a shell pipe would.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    stages: Vec<ToolCommand>,
}

impl Invocation {
    pub fn pipe(mut self, next: ToolCommand) -> Invocation {
        self.stages.push(next);
        self
    }

    pub fn stages(&self) -> &[ToolCommand] {
        &self.stages
    }

    pub fn outputs(&self) -> impl Iterator<Item=&PathBuf> {
        self.stages.iter().flat_map(|s| s.outputs.iter())
    }
}

impl From<ToolCommand> for Invocation {
    fn from(cmd: ToolCommand) -> Self {
        Invocation { stages: vec![cmd] }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stages.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        write!(f, "{}", s.join(" | "))
    }
}

/// Executes invocations and hands back the stdout of the last command in the chain.
pub trait ToolRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<String>;
}

/// Runs invocations as child processes inside a working directory. stderr is passed
/// through so the tools report their own failures.
pub struct ProcessRunner {
    work_dir: PathBuf,
}

impl ProcessRunner {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self { work_dir: work_dir.into() }
    }

    fn spawn(&self, cmd: &ToolCommand, stdin: Stdio) -> Result<Child> {
        Command::new(cmd.program())
            .args(&cmd.args)
            .current_dir(&self.work_dir)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| DesignerError::ToolSpawn { program: cmd.program.clone(), source })
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<String> {
        let mut children: Vec<Child> = Vec::with_capacity(invocation.stages().len());
        for cmd in invocation.stages() {
            let stdin = match children.last_mut().and_then(|c| c.stdout.take()) {
                Some(out) => Stdio::from(out),
                None => Stdio::null(),
            };
            match self.spawn(cmd, stdin) {
                Ok(child) => children.push(child),
                Err(e) => {
                    for mut started in children {
                        let _ = started.kill();
                        let _ = started.wait();
                    }
                    return Err(e);
                }
            }
        }

        let Some(last) = children.pop() else {
            return Ok(String::new());
        };
        let output = last.wait_with_output()
            .map_err(|e| DesignerError::io(&self.work_dir, e))?;

        let failed = |code: Option<i32>| DesignerError::ToolFailed { command: invocation.to_string(), code };
        for mut child in children {
            let status = child.wait().map_err(|e| DesignerError::io(&self.work_dir, e))?;
            if !status.success() {
                return Err(failed(status.code()));
            }
        }
        if !output.status.success() {
            return Err(failed(output.status.code()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// first match for `name` on the PATH
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// fails on the first tool that is not on the PATH
pub fn check_tools<'a>(names: impl IntoIterator<Item=&'a str>) -> Result<()> {
    for name in names {
        match find_executable(name) {
            Some(p) => log::debug!("using {} at {}", name, p.display()),
            None => return Err(DesignerError::ToolNotFound(name.to_string())),
        }
    }
    Ok(())
}

/// file suffix FSL tools write for a given FSLOUTPUTTYPE
pub fn fsl_suffix(fsl_output_type: Option<&str>) -> &'static str {
    match fsl_output_type {
        Some("NIFTI") => ".nii",
        Some("NIFTI_GZ") => ".nii.gz",
        Some("NIFTI_PAIR") => ".img",
        Some("NIFTI_PAIR_GZ") => ".img.gz",
        other => {
            log::warn!("FSLOUTPUTTYPE is {:?}, assuming compressed NIfTI output", other);
            ".nii.gz"
        }
    }
}
