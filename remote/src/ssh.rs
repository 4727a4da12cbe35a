//! `ssh://` transport: every endpoint operation is a short POSIX shell command run over an
//! `openssh` session multiplexed on a single master connection.

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use common::config::{Credentials, EndpointTarget};
use common::endpoint::{Endpoint, Entry, Transport, join_slash, parent_dir};
use common::error::OpError;

/// Exit code our scripts use for a missing path.
const EXIT_MISSING: i32 = 3;
/// Exit code our scripts use for an occupied target.
const EXIT_OCCUPIED: i32 = 4;

/// Quote `value` for safe use as a single shell word.
pub fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `ssh://` destination for openssh. The job user is used unless the address names one.
pub fn destination(target: &EndpointTarget, credentials: &Credentials) -> String {
    let location = target.location().trim_end_matches('/');
    if location.contains('@') || credentials.user.is_empty() {
        format!("ssh://{location}")
    } else {
        format!("ssh://{}@{}", credentials.user, location)
    }
}

pub(crate) async fn connect_session(destination: &str) -> anyhow::Result<openssh::Session> {
    tracing::debug!("connecting to ssh destination {}", destination);
    openssh::Session::connect(destination, openssh::KnownHosts::Accept)
        .await
        .with_context(|| format!("failed to establish ssh connection to {destination}"))
}

pub struct SshTransport {
    destination: String,
    session: Option<openssh::Session>,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("destination", &self.destination)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

/// Turn a failed script into an [`OpError`] using our exit code convention and stderr.
fn classify(path: &str, status: std::process::ExitStatus, stderr: &[u8]) -> OpError {
    let stderr = String::from_utf8_lossy(stderr);
    match status.code() {
        Some(EXIT_MISSING) => OpError::NotFound(path.to_string()),
        Some(EXIT_OCCUPIED) => OpError::AlreadyExists(path.to_string()),
        _ if stderr.contains("Text file busy") || stderr.contains("Device or resource busy") => {
            OpError::Locked {
                path: path.to_string(),
                source: anyhow::anyhow!("{}", stderr.trim()),
            }
        }
        code => OpError::Other(anyhow::anyhow!(
            "remote command on {path} failed with status {code:?}: {}",
            stderr.trim()
        )),
    }
}

/// Parse `find -printf '%s %f\n'` output.
fn parse_listing(stdout: &[u8]) -> Vec<Entry> {
    let mut entries: Vec<Entry> = String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| {
            let (size, name) = line.split_once(' ')?;
            Some(Entry {
                name: name.to_string(),
                size: size.parse().ok()?,
            })
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

impl SshTransport {
    pub async fn connect(target: &EndpointTarget, credentials: &Credentials) -> anyhow::Result<Self> {
        let destination = destination(target, credentials);
        let session = connect_session(&destination).await?;
        Ok(Self {
            destination,
            session: Some(session),
        })
    }

    fn session(&self) -> Result<&openssh::Session, OpError> {
        self.session
            .as_ref()
            .ok_or_else(|| OpError::Other(anyhow::anyhow!("{} is disconnected", self.destination)))
    }

    /// Run `script` with `sh -c`; non-zero exits are classified against `path`.
    async fn shell(&self, path: &str, script: &str) -> Result<Vec<u8>, OpError> {
        tracing::trace!("{}: {}", self.destination, script);
        let output = self
            .session()?
            .command("sh")
            .arg("-c")
            .arg(script)
            .output()
            .await
            .with_context(|| format!("failed to run remote command on {}", self.destination))?;
        if !output.status.success() {
            return Err(classify(path, output.status, &output.stderr));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Endpoint for SshTransport {
    fn label(&self) -> &'static str {
        "remote"
    }

    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, OpError> {
        let quoted = shell_escape(dir);
        let script = format!(
            "test -d {quoted} || exit {EXIT_MISSING}; \
             find {quoted} -mindepth 1 -maxdepth 1 -type f -printf '%s %f\\n'"
        );
        let stdout = self.shell(dir, &script).await?;
        Ok(parse_listing(&stdout))
    }

    async fn exists(&self, path: &str) -> Result<bool, OpError> {
        let script = format!(
            "if test -e {0}; then echo yes; else echo no; fi",
            shell_escape(path)
        );
        let stdout = self.shell(path, &script).await?;
        Ok(String::from_utf8_lossy(&stdout).trim() == "yes")
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<(), OpError> {
        let target = join_slash(parent_dir(path), new_name);
        let script = format!(
            "test -e {from} || exit {EXIT_MISSING}; \
             test -e {to} && exit {EXIT_OCCUPIED}; \
             mv -- {from} {to}",
            from = shell_escape(path),
            to = shell_escape(&target),
        );
        match self.shell(path, &script).await {
            Err(OpError::AlreadyExists(_)) => Err(OpError::AlreadyExists(target)),
            other => other.map(|_| ()),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), OpError> {
        let quoted = shell_escape(path);
        let script = format!("test -e {quoted} || exit {EXIT_MISSING}; rm -f -- {quoted}");
        self.shell(path, &script).await.map(|_| ())
    }

    async fn create_dir(&self, path: &str) -> Result<(), OpError> {
        let script = format!("mkdir -p -- {}", shell_escape(path));
        self.shell(path, &script).await.map(|_| ())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn get(
        &self,
        remote_path: &str,
        local_path: &std::path::Path,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        let display = local_path.display().to_string();
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options
            .open(local_path)
            .await
            .map_err(|error| OpError::from_io(display.clone(), error))?;
        let quoted = shell_escape(remote_path);
        let script = format!("test -f {quoted} || exit {EXIT_MISSING}; cat -- {quoted}");
        let mut child = self
            .session()?
            .command("sh")
            .arg("-c")
            .arg(&script)
            .stdout(openssh::Stdio::piped())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .with_context(|| format!("failed to spawn remote read of {remote_path}"))?;
        let mut stdout = child
            .stdout()
            .take()
            .context("failed to get stdout for remote read")?;
        let mut stderr = child
            .stderr()
            .take()
            .context("failed to get stderr for remote read")?;
        let copy = async {
            let copied = tokio::io::copy(&mut stdout, &mut file).await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(copied)
        };
        let collect_stderr = async {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
            buf
        };
        let (copied, stderr_data) = tokio::join!(copy, collect_stderr);
        let status = child
            .wait()
            .await
            .with_context(|| format!("failed to wait for remote read of {remote_path}"))?;
        let failure = if !status.success() {
            Some(classify(remote_path, status, &stderr_data))
        } else {
            copied
                .as_ref()
                .err()
                .map(|error| OpError::Other(anyhow::anyhow!("writing {display} failed: {error}")))
        };
        if let Some(error) = failure {
            if let Err(cleanup) = tokio::fs::remove_file(local_path).await {
                let partial = &display;
                tracing::warn!("failed to remove partial download {partial}: {cleanup}");
            }
            return Err(error);
        }
        copied.map_err(|error| OpError::from_io(display, error))
    }

    async fn put(
        &self,
        local_path: &std::path::Path,
        remote_dir: &str,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        let display = local_path.display().to_string();
        let target = common::share::put_target(local_path, remote_dir)
            .ok_or_else(|| OpError::Other(anyhow::anyhow!("{display} has no UTF-8 file name")))?;
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|error| OpError::from_io(display.clone(), error))?;
        let quoted = shell_escape(&target);
        let guard = if overwrite {
            String::new()
        } else {
            format!("test -e {quoted} && exit {EXIT_OCCUPIED}; ")
        };
        let script = format!(
            "test -d {dir} || exit {EXIT_MISSING}; {guard}cat > {quoted}",
            dir = shell_escape(remote_dir)
        );
        let mut child = self
            .session()?
            .command("sh")
            .arg("-c")
            .arg(&script)
            .stdin(openssh::Stdio::piped())
            .stdout(openssh::Stdio::null())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .with_context(|| format!("failed to spawn remote write of {target}"))?;
        let mut stdin = child
            .stdin()
            .take()
            .context("failed to get stdin for remote write")?;
        let mut stderr = child
            .stderr()
            .take()
            .context("failed to get stderr for remote write")?;
        let send = async {
            let copied = tokio::io::copy(&mut file, &mut stdin).await?;
            stdin.shutdown().await?;
            drop(stdin);
            Ok::<_, std::io::Error>(copied)
        };
        let collect_stderr = async {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
            buf
        };
        let (sent, stderr_data) = tokio::join!(send, collect_stderr);
        let status = child
            .wait()
            .await
            .with_context(|| format!("failed to wait for remote write of {target}"))?;
        if !status.success() {
            let path = if status.code() == Some(EXIT_MISSING) {
                remote_dir
            } else {
                target.as_str()
            };
            return Err(classify(path, status, &stderr_data));
        }
        sent.map_err(|error| {
            OpError::Other(anyhow::anyhow!("sending {display} to {target} failed: {error}"))
        })
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        if let Some(session) = self.session.take() {
            session
                .close()
                .await
                .with_context(|| format!("failed to close ssh session to {}", self.destination))?;
        }
        Ok(())
    }
}
