//! Running the server executable to completion.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use super::format::OutputFormatter;
use crate::error::{Error, Result};
use crate::sink::OutputSink;

/// Options applied to one process launch.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Instance name, used for thread names and diagnostics.
    pub name: String,
    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,
    /// Rewrites each output line before it reaches the sink.
    pub formatter: OutputFormatter,
}

/// Spawns the server executable and blocks until it exits.
///
/// Implementations must call `on_spawn` exactly once with the pid as soon as
/// the process exists, stream its output into `sink`, and only return after
/// the process has exited. The returned value is the exit code, if any.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        command: &[String],
        sink: &OutputSink,
        options: &RunOptions,
        on_spawn: &mut dyn FnMut(u32),
    ) -> Result<Option<i32>>;
}

/// [`ProcessRunner`] built on `std::process::Command`.
///
/// Stdout is read on the calling thread and stderr on a helper thread; both
/// streams land in the same sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl ProcessRunner for CommandRunner {
    fn run(
        &self,
        command: &[String],
        sink: &OutputSink,
        options: &RunOptions,
        on_spawn: &mut dyn FnMut(u32),
    ) -> Result<Option<i32>> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::spawn(&options.name, "empty command line"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(&options.name, e.to_string()))?;
        let pid = child.id();

        tracing::info!(
            instance = %options.name,
            pid = pid,
            program = %program,
            "Spawned server process"
        );
        on_spawn(pid);

        let stderr_pump = child.stderr.take().map(|stderr| {
            let sink = sink.clone();
            let formatter = options.formatter;
            thread::Builder::new()
                .name(format!("{}-stderr", options.name))
                .spawn(move || pump_lines(stderr, &sink, formatter))
        });

        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, sink, options.formatter);
        }

        match stderr_pump {
            Some(Ok(handle)) => {
                let _ = handle.join();
            },
            Some(Err(e)) => {
                tracing::warn!(instance = %options.name, error = %e, "Could not read stderr");
            },
            None => {},
        }

        let status = child
            .wait()
            .map_err(|e| Error::io(format!("waiting for pid {pid}"), e))?;

        tracing::info!(
            instance = %options.name,
            pid = pid,
            code = ?status.code(),
            "Server process exited"
        );

        Ok(status.code())
    }
}

fn pump_lines(stream: impl Read, sink: &OutputSink, formatter: OutputFormatter) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        match line {
            Ok(line) => sink.push(formatter.format(&line)),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                sink.push(formatter.format("<non-utf8 output>"));
            },
            Err(_) => break,
        }
    }
}
