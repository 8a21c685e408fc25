//! Running experiment code next to the caller: on a thread with cooperative
//! cancellation, or as a separate process whose output is streamed back.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::errors::{PsywinError, Result};

/// A flag shared between an experiment and whoever may want to stop it.
///
/// Windows created from a context holding the token fail their next `flip()` with
/// [`PsywinError::CancelledError`] once it fires.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(CancelledError)` once cancelled, for use with `?` in loops.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PsywinError::CancelledError)
        } else {
            Ok(())
        }
    }
}

/// An experiment function running on its own named thread.
#[derive(Debug)]
pub struct ExperimentThread {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl ExperimentThread {
    /// Run `experiment` on a new thread. It receives a token to poll or to build its
    /// rendering context with.
    pub fn spawn<F>(name: &str, experiment: F) -> Result<Self>
    where
        F: FnOnce(CancellationToken) -> anyhow::Result<()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                log::debug!("Experiment '{}' running on thread {:?}", thread_name, thread::current().id());
                let result = experiment(thread_token);
                if let Err(e) = &result {
                    log::error!("Experiment '{}' failed: {:?}", thread_name, e);
                }
                result
            })?;
        Ok(Self {
            name: name.to_string(),
            token,
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ask the experiment to stop at its next cancellation point.
    pub fn cancel(&self) {
        log::info!("Cancelling experiment '{}'", self.name);
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread. A panic in the experiment comes back as an error.
    pub fn join(self) -> anyhow::Result<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                Err(anyhow::anyhow!("experiment '{}' panicked: {}", self.name, message))
            }
        }
    }
}

/// Where a line of process output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line written by an [`ExperimentProcess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// An experiment script running as a child process.
#[derive(Debug)]
pub struct ExperimentProcess {
    child: Child,
    lines: Receiver<OutputLine>,
    readers: Vec<JoinHandle<()>>,
}

fn forward_lines<R: Read + Send + 'static>(
    source: R,
    stream: OutputStream,
    sender: Sender<OutputLine>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{:?} reader", stream).to_lowercase())
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                match line {
                    Ok(line) => {
                        if sender.send(OutputLine { stream, line }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("Could not read experiment output: {}", e);
                        break;
                    }
                }
            }
        })
}

fn start_readers(child: &mut Child, sender: Sender<OutputLine>) -> std::io::Result<Vec<JoinHandle<()>>> {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, OutputStream::Stdout, sender.clone())?);
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, OutputStream::Stderr, sender)?);
    }
    Ok(readers)
}

impl ExperimentProcess {
    pub fn spawn<I, S>(program: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        log::info!("Started experiment process {} ({})", program, child.id());

        let (sender, lines) = mpsc::channel();
        let readers = match start_readers(&mut child, sender) {
            Ok(readers) => readers,
            Err(e) => {
                // no one would ever reap the child otherwise
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };
        Ok(Self {
            child,
            lines,
            readers,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Output lines as they arrive. The channel closes once the process has exited and
    /// both pipes are drained.
    pub fn lines(&self) -> &Receiver<OutputLine> {
        &self.lines
    }

    /// Lines received so far, without blocking.
    pub fn drain_lines(&self) -> Vec<OutputLine> {
        self.lines.try_iter().collect()
    }

    pub fn is_running(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_none())
    }

    /// Kill the process. Does nothing if it has already exited.
    pub fn terminate(&mut self) -> Result<()> {
        if self.is_running()? {
            log::info!("Terminating experiment process {}", self.child.id());
            self.child.kill()?;
        }
        Ok(())
    }

    pub fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait()?;
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                log::warn!("An output reader of process {} panicked", self.child.id());
            }
        }
        Ok(status)
    }
}
