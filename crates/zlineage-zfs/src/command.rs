use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use zlineage_core::{LineageError, LineageResult};

/// Runs the `zfs` binary with a hard deadline so a hung pool cannot wedge
/// the engine.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandRunner {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    pub fn run(&self, args: &[&str]) -> LineageResult<Output> {
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_handle = spawn_reader(child.stdout.take());
        let stderr_handle = spawn_reader(child.stderr.take());

        let start = Instant::now();
        let mut exit_status = None;
        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LineageError::Binding(format!(
                "{} timed out after {:?}",
                self.path.display(),
                self.timeout
            )));
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| LineageError::Binding("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| LineageError::Binding("stderr reader thread panicked".into()))??;

        Ok(Output {
            stdout,
            stderr,
            status: status.code().unwrap_or(-1),
        })
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> thread::JoinHandle<LineageResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> LineageResult<String> {
        let Some(mut reader) = pipe else {
            return Ok(String::new());
        };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    })
}
