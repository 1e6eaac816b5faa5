use crate::binary::Bytes;
use crate::codec::{CodecError, Decoder, Encoder};
use crate::config::{CodecSettings, ConfigInputDelivery, Operation};
use crate::input::{DecodeInput, EncodeInput};
use crate::metric::Metric;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What an external codec prints on stdout: exactly one of the three keys.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Reply<T> {
    result: Option<T>,
    error: Option<String>,
    skip: Option<String>,
}

impl<T> Reply<T> {
    fn into_result(self) -> Result<T, CodecError> {
        match (self.result, self.error, self.skip) {
            (Some(result), None, None) => Ok(result),
            (None, Some(error), None) => Err(CodecError::Failed(error)),
            (None, None, Some(reason)) => Err(CodecError::Skip(reason)),
            _ => Err(CodecError::failed(
                "reply must contain exactly one of result, error or skip",
            )),
        }
    }
}

/// A decoder and encoder backed by an external program.
///
/// The program is run once per input as `<command...> <operation> [file]`.
/// The input goes in as YAML and the reply comes back as YAML on stdout.
#[derive(Debug, Clone)]
pub struct CommandCodec {
    settings: Arc<CodecSettings>,
}

impl CommandCodec {
    pub fn new(settings: CodecSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }

    fn run<I: Serialize, T: DeserializeOwned>(
        &self,
        operation: Operation,
        input: &I,
    ) -> Result<T, CodecError> {
        let payload = serde_yaml::to_string(input)
            .map_err(|e| CodecError::failed(format!("cannot serialize input: {e}")))?;

        let (program, args) = self
            .settings
            .command
            .split_first()
            .ok_or_else(|| CodecError::failed("empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(operation.as_str());
        if let Some(cwd) = &self.settings.working_dir {
            cmd.current_dir(cwd);
        }

        // Held until the child has exited.
        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;
        match &self.settings.input_delivery {
            ConfigInputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            ConfigInputDelivery::File { template } => {
                let mut file = tempfile::NamedTempFile::new()
                    .map_err(|e| CodecError::failed(format!("failed to create temp file: {e}")))?;
                file.write_all(payload.as_bytes())
                    .and_then(|()| file.flush())
                    .map_err(|e| {
                        CodecError::failed(format!(
                            "failed to write temp file {:?}: {e}",
                            file.path()
                        ))
                    })?;
                let path = file
                    .path()
                    .to_str()
                    .ok_or_else(|| CodecError::failed("temp file path is not valid UTF-8"))?;
                cmd.arg(template.replace("{}", path));
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(file);
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            CodecError::failed(format!(
                "failed to spawn command {:?}: {e}",
                self.settings.command
            ))
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let stdin = feed(child.stdin.take(), payload.into_bytes());

        let status = wait_with_timeout(child, self.timeout());
        drop(temp_file_handle);
        if let Some(Ok(Err(e))) = stdin.map(JoinHandle::join) {
            // Codecs may exit without reading their input.
            debug!(codec = %self.settings.name, "error writing to child stdin: {e}");
        }
        let stdout = join(stdout);
        let stderr = join(stderr);
        let status = status?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            warn!(codec = %self.settings.name, %status, stderr = %stderr.trim_end(), "codec exited abnormally");
            return Err(CodecError::Failed(describe_exit(status)));
        }

        let reply: Reply<T> = serde_yaml::from_slice(&stdout).map_err(|e| {
            warn!(codec = %self.settings.name, "unparsable reply: {e}");
            CodecError::failed(format!("unparsable reply: {e}"))
        })?;
        reply.into_result()
    }
}

impl Decoder for CommandCodec {
    fn decode(&self, input: &DecodeInput) -> Result<Metric, CodecError> {
        self.run(Operation::Decode, input)
    }
}

impl Encoder for CommandCodec {
    fn encode(&self, input: &EncodeInput) -> Result<Bytes, CodecError> {
        self.run(Operation::Encode, input)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn feed<W: Write + Send + 'static>(
    pipe: Option<W>,
    payload: Vec<u8>,
) -> Option<JoinHandle<std::io::Result<()>>> {
    pipe.map(|mut pipe| thread::spawn(move || pipe.write_all(&payload)))
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ExitStatus, CodecError> {
    let start_time = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start_time.elapsed() > timeout {
                    warn!("codec timed out, killing...");
                    if let Err(e) = child.kill() {
                        return Err(CodecError::failed(format!(
                            "failed to kill timed-out process: {e}"
                        )));
                    }
                    let _ = child.wait();
                    return Err(CodecError::failed(format!(
                        "timed out after {}ms",
                        timeout.as_millis()
                    )));
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(CodecError::failed(format!("error waiting for child: {e}")));
            }
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    "exited abnormally".to_string()
}
