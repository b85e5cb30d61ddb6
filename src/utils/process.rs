//! Composition of external programs: single invocations, pipes between them, and the
//! redirection of their output streams. No shell is involved at any point.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::process::{Child, Command};

use crate::config::defs::{PipelineError, Stage, Tool};
use crate::utils::file::{commit_part, part_path};

/// One program with its argument vector and extra environment.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tool: Tool,
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(tool: Tool, program: impl Into<String>) -> Self {
        Invocation {
            tool,
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: io::Error) -> PipelineError {
        classify_spawn_error(self.tool, &self.program, source)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.envs {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn classify_spawn_error(tool: Tool, program: &str, source: io::Error) -> PipelineError {
    if source.kind() == io::ErrorKind::NotFound {
        PipelineError::ToolNotFound {
            tool,
            program: program.to_string(),
        }
    } else {
        PipelineError::ToolLaunch {
            tool,
            program: program.to_string(),
            source,
        }
    }
}

/// Where the stdout of the last member of a chain goes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    Discard,
    Truncate(PathBuf),
    Append(PathBuf),
    /// Written beside the target as `.part` and renamed only after every member succeeded.
    Atomic(PathBuf),
}

impl OutputTarget {
    fn open(&self) -> io::Result<Stdio> {
        let file = match self {
            OutputTarget::Discard => return Ok(Stdio::null()),
            OutputTarget::Truncate(path) => File::create(path)?,
            OutputTarget::Append(path) => OpenOptions::new().create(true).append(true).open(path)?,
            OutputTarget::Atomic(path) => File::create(part_path(path))?,
        };
        Ok(Stdio::from(file))
    }

    fn path(&self) -> Option<&Path> {
        match self {
            OutputTarget::Discard => None,
            OutputTarget::Truncate(path) | OutputTarget::Append(path) | OutputTarget::Atomic(path) => Some(path),
        }
    }

    fn finish(&self, succeeded: bool) -> io::Result<()> {
        match self {
            OutputTarget::Atomic(path) if succeeded => commit_part(path),
            OutputTarget::Atomic(path) => match fs::remove_file(part_path(path)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// Outcome of a stage that ran to completion.
#[derive(Debug)]
pub struct StageResult {
    pub stage: Stage,
    /// Exit status of the last process the stage ran, if it ran any.
    pub status: Option<ExitStatus>,
    pub log: PathBuf,
    pub elapsed: Duration,
}

/// Invocations connected stdout-to-stdin, all writing diagnostics to one stage log.
#[derive(Debug)]
pub struct CommandChain {
    stage: Stage,
    steps: Vec<Invocation>,
    stdout: OutputTarget,
    log: PathBuf,
}

impl CommandChain {
    pub fn new(stage: Stage, log: impl Into<PathBuf>) -> Self {
        CommandChain {
            stage,
            steps: Vec::new(),
            stdout: OutputTarget::Discard,
            log: log.into(),
        }
    }

    pub fn pipe(mut self, invocation: Invocation) -> Self {
        self.steps.push(invocation);
        self
    }

    pub fn stdout(mut self, target: OutputTarget) -> Self {
        self.stdout = target;
        self
    }

    /// Spawns every member, waits for all of them and reports the first one that failed.
    /// An atomic output is committed only on success and removed on every failure path.
    pub async fn run(self) -> Result<StageResult, PipelineError> {
        let start = Instant::now();
        let stage = self.stage;

        let outcome = self.run_members().await;
        let succeeded = matches!(outcome, Ok((_, None)));
        let finished = self.stdout.finish(succeeded).map_err(|e| {
            PipelineError::io(stage, self.stdout.path().unwrap_or(&self.log), e)
        });
        let final_status = match outcome {
            Err(err) | Ok((_, Some(err))) => return Err(err),
            Ok((status, None)) => status,
        };
        finished?;

        let result = StageResult {
            stage,
            status: final_status,
            log: self.log,
            elapsed: start.elapsed(),
        };
        info!("{} finished in {:.2?}", result.stage, result.elapsed);
        Ok(result)
    }

    /// Last exit status and the first member failure, if any.
    async fn run_members(&self) -> Result<(Option<ExitStatus>, Option<PipelineError>), PipelineError> {
        let stage = self.stage;
        let io_err = |path: &Path, e: io::Error| PipelineError::io(stage, path, e);

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log)
            .map_err(|e| io_err(&self.log, e))?;

        let last = self.steps.len().checked_sub(1).ok_or_else(|| {
            PipelineError::io(stage, &self.log, "no command to run")
        })?;

        let mut children: Vec<(Child, &Invocation)> = Vec::with_capacity(self.steps.len());
        let mut upstream: Option<Stdio> = None;
        for (i, invocation) in self.steps.iter().enumerate() {
            debug!("[{}] {}", stage, invocation);
            let mut cmd = invocation.command();
            cmd.stdin(upstream.take().unwrap_or_else(Stdio::null));
            cmd.stderr(Stdio::from(log_file.try_clone().map_err(|e| io_err(&self.log, e))?));
            if i == last {
                let target = self.stdout.open().map_err(|e| {
                    io_err(self.stdout.path().unwrap_or(&self.log), e)
                })?;
                cmd.stdout(target);
            } else {
                cmd.stdout(Stdio::piped());
            }

            let mut child = cmd.spawn().map_err(|e| invocation.spawn_error(e))?;
            if i < last {
                let stdout = child.stdout.take().ok_or_else(|| {
                    PipelineError::io(stage, &self.log, format!("stdout of {} was not captured", invocation.program))
                })?;
                let stdin: Stdio = stdout.try_into().map_err(|e| io_err(&self.log, e))?;
                upstream = Some(stdin);
            }
            children.push((child, invocation));
        }

        let mut failure = None;
        let mut final_status = None;
        for (mut child, invocation) in children {
            let status = child.wait().await.map_err(|e| io_err(&self.log, e))?;
            if !status.success() && failure.is_none() {
                failure = Some(PipelineError::ToolFailure {
                    stage,
                    program: invocation.program.clone(),
                    status,
                    log: self.log.clone(),
                });
            }
            final_status = Some(status);
        }
        Ok((final_status, failure))
    }
}

/// Checks that `program` can be started at all. Its exit status is irrelevant.
pub async fn probe(tool: Tool, program: &str, args: &[&str]) -> Result<(), PipelineError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| classify_spawn_error(tool, program, e))?;
    let status = child.wait().await.map_err(|source| PipelineError::ToolLaunch {
        tool,
        program: program.to_string(),
        source,
    })?;
    debug!("{} found at '{}' (probe exited with {})", tool, program, status);
    Ok(())
}
