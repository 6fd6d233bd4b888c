#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use classdeck_protocol::CodeLanguage;
use regex_lite::Regex;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

use crate::error::SandboxErr;

/// Maximum captured bytes per stream.
const MAX_STREAM_OUTPUT: usize = 1024 * 1024;

/// Outer wall-clock budget for one sandboxed run. The interpreter-level
/// limits (RLIMIT_CPU, vm timeout) are tighter; this also covers startup.
const EXEC_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between SIGTERM and SIGKILL when the budget expires.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Delay before retrying a failed scratch-file removal.
const CLEANUP_RETRY_DELAY: Duration = Duration::from_secs(5);

const PYTHON_PRELUDE: &str = include_str!("python_prelude.py");
const JS_HARNESS: &str = include_str!("js_harness.js");

#[expect(clippy::expect_used)]
static SCRATCH_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9-]+\.(py|js)$").expect("static regex must compile"));

/// Only `python[3] <file>.py` and `node <harness>.js <file>.js` may ever be
/// spawned; everything else is refused before it reaches the OS.
#[expect(clippy::expect_used)]
static INTERPRETER_CMD_RE: LazyLock<Regex> = LazyLock::new(|| {
    let py = r#"(?:"[^"]*\.py"|'[^']*\.py'|[^ ]+\.py)"#;
    let js = r#"(?:"[^"]*\.js"|'[^']*\.js'|[^ ]+\.js)"#;
    Regex::new(&format!("^(?:python3? {py}|node {js} {js})$"))
        .expect("static regex must compile")
});

pub type ExecResult = std::result::Result<ExecOutput, SandboxErr>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs student submissions as throwaway interpreter subprocesses under a
/// shared scratch directory.
pub struct CodeExecutor {
    scratch_dir: PathBuf,
}

impl CodeExecutor {
    /// Create the scratch directory (private to this user) if needed.
    pub fn new(scratch_dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&scratch_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&scratch_dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { scratch_dir })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub async fn execute(&self, language: &str, source: &str) -> ExecResult {
        let Ok(language) = language.parse::<CodeLanguage>() else {
            return Err(SandboxErr::UnsupportedLanguage(language.to_string()));
        };
        match language {
            CodeLanguage::Python => self.execute_python(source).await,
            CodeLanguage::Javascript => self.execute_javascript(source).await,
        }
    }

    async fn execute_python(&self, source: &str) -> ExecResult {
        let path = self.scratch_path("py")?;
        let contents = format!("{PYTHON_PRELUDE}\n{source}\n");
        write_scratch_file(&path, &contents).await?;

        let command = vec!["python3".to_string(), path.to_string_lossy().into_owned()];
        let result = match verify_interpreter_command(&command) {
            Ok(()) => spawn_and_collect(command).await,
            Err(e) => Err(e),
        };
        cleanup_scratch_file(path).await;
        result
    }

    async fn execute_javascript(&self, source: &str) -> ExecResult {
        let harness_path = self.scratch_path("js")?;
        let source_path = self.scratch_path("js")?;
        write_scratch_file(&harness_path, JS_HARNESS).await?;
        if let Err(e) = write_scratch_file(&source_path, source).await {
            cleanup_scratch_file(harness_path).await;
            return Err(e);
        }

        let command = vec![
            "node".to_string(),
            harness_path.to_string_lossy().into_owned(),
            source_path.to_string_lossy().into_owned(),
        ];
        let result = match verify_interpreter_command(&command) {
            Ok(()) => spawn_and_collect(command).await,
            Err(e) => Err(e),
        };
        cleanup_scratch_file(harness_path).await;
        cleanup_scratch_file(source_path).await;
        result
    }

    /// Fresh scratch path. File names are restricted to UUID hex plus the
    /// extension and must resolve directly inside the scratch dir.
    fn scratch_path(&self, extension: &str) -> std::result::Result<PathBuf, SandboxErr> {
        let file_name = format!("{}.{extension}", Uuid::new_v4());
        if !SCRATCH_FILE_RE.is_match(&file_name) {
            return Err(SandboxErr::Rejected(format!(
                "illegal scratch file name: {file_name}"
            )));
        }
        let path = self.scratch_dir.join(&file_name);
        if path.parent() != Some(self.scratch_dir.as_path()) {
            return Err(SandboxErr::Rejected("path traversal detected".to_string()));
        }
        Ok(path)
    }
}

fn verify_interpreter_command(command: &[String]) -> std::result::Result<(), SandboxErr> {
    let rendered = shlex::try_join(command.iter().map(String::as_str))
        .map_err(|_| SandboxErr::Rejected("command not quotable".to_string()))?;
    if INTERPRETER_CMD_RE.is_match(&rendered) {
        Ok(())
    } else {
        Err(SandboxErr::Rejected(format!(
            "command outside whitelist: {rendered}"
        )))
    }
}

async fn write_scratch_file(path: &Path, contents: &str) -> std::result::Result<(), SandboxErr> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

/// Remove a scratch file; on failure, retry once from a detached task.
async fn cleanup_scratch_file(path: PathBuf) {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!("failed to remove scratch file {}: {e}", path.display());
            tokio::spawn(async move {
                tokio::time::sleep(CLEANUP_RETRY_DELAY).await;
                let _ = tokio::fs::remove_file(&path).await;
            });
        }
    }
}

async fn spawn_and_collect(command: Vec<String>) -> ExecResult {
    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        // No stdin: submissions that read from it should fail fast instead
        // of hanging until the timeout.
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn()?;

    let stdout_reader = child
        .stdout
        .take()
        .ok_or_else(|| SandboxErr::Io(io::Error::other("stdout pipe unavailable")))?;
    let stderr_reader = child
        .stderr
        .take()
        .ok_or_else(|| SandboxErr::Io(io::Error::other("stderr pipe unavailable")))?;

    let stdout_handle = tokio::spawn(read_capped(BufReader::new(stdout_reader)));
    let stderr_handle = tokio::spawn(read_capped(BufReader::new(stderr_reader)));

    let exit_status = match tokio::time::timeout(EXEC_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            terminate(&mut child).await;
            return Err(SandboxErr::Timeout);
        }
    };

    let stdout = collect_stream(stdout_handle).await?;
    let stderr = collect_stream(stderr_handle).await?;

    #[cfg(unix)]
    if let Some(signal) = exit_status.signal() {
        return Err(SandboxErr::Signal(signal));
    }

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code: exit_status.code().unwrap_or(-1),
    })
}

/// SIGTERM first so the interpreter can unwind, SIGKILL shortly after.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        tokio::time::sleep(KILL_GRACE).await;
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn collect_stream(
    handle: tokio::task::JoinHandle<io::Result<Vec<u8>>>,
) -> std::result::Result<String, SandboxErr> {
    let bytes = handle
        .await
        .map_err(|e| SandboxErr::Io(io::Error::other(e)))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read to EOF, keeping at most `MAX_STREAM_OUTPUT` bytes. Draining the
/// remainder avoids back-pressuring the child.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut tmp = [0u8; 8192];
    let mut remaining = MAX_STREAM_OUTPUT;

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        if remaining > 0 {
            let copy_len = n.min(remaining);
            buf.extend_from_slice(&tmp[..copy_len]);
            remaining -= copy_len;
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn executor() -> (tempfile::TempDir, CodeExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let executor = CodeExecutor::new(dir.path().join("scratch")).unwrap();
        (dir, executor)
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok()
    }

    fn node_available() -> bool {
        std::process::Command::new("node")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[test]
    fn unknown_language_is_rejected() {
        let (_dir, executor) = executor();
        let err = tokio_test::block_on(executor.execute("ruby", "puts 1")).unwrap_err();
        assert!(matches!(err, SandboxErr::UnsupportedLanguage(_)));
    }

    #[test]
    fn interpreter_whitelist_accepts_expected_commands() {
        verify_interpreter_command(&["python3".to_string(), "/tmp/ab12.py".to_string()]).unwrap();
        verify_interpreter_command(&[
            "node".to_string(),
            "/tmp/h.js".to_string(),
            "/tmp/s.js".to_string(),
        ])
        .unwrap();
    }

    #[test]
    fn interpreter_whitelist_rejects_everything_else() {
        for command in [
            vec!["sh".to_string(), "-c".to_string(), "ls".to_string()],
            vec!["python3".to_string(), "/tmp/evil.sh".to_string()],
            vec![
                "python3".to_string(),
                "/tmp/a.py".to_string(),
                "extra".to_string(),
            ],
            vec!["node".to_string(), "/tmp/only-harness.js".to_string()],
        ] {
            assert!(
                verify_interpreter_command(&command).is_err(),
                "accepted {command:?}"
            );
        }
    }

    #[tokio::test]
    async fn python_captures_stdout() {
        if !python_available() {
            return;
        }
        let (_dir, executor) = executor();
        let out = executor.execute("python", "print(2 + 2)").await.unwrap();
        assert_eq!(out.stdout.trim(), "4");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn python_blocks_dangerous_imports() {
        if !python_available() {
            return;
        }
        let (_dir, executor) = executor();
        let out = executor
            .execute("python", "import subprocess\nprint('unreachable')")
            .await
            .unwrap();
        assert_ne!(out.exit_code, 0);
        assert!(out.stderr.contains("not allowed"), "stderr: {}", out.stderr);
    }

    #[tokio::test]
    async fn python_blocks_os_system() {
        if !python_available() {
            return;
        }
        let (_dir, executor) = executor();
        let out = executor
            .execute("python", "import os\nos.system('echo pwned')")
            .await
            .unwrap();
        assert_ne!(out.exit_code, 0);
        assert!(!out.stdout.contains("pwned"));
    }

    #[tokio::test]
    async fn python_blocks_writes() {
        if !python_available() {
            return;
        }
        let (_dir, executor) = executor();
        let out = executor
            .execute("python", "open('/tmp/x', 'w')")
            .await
            .unwrap();
        assert_ne!(out.exit_code, 0);
        assert!(out.stderr.contains("write access"), "stderr: {}", out.stderr);
    }

    #[tokio::test]
    async fn javascript_echoes_trailing_expression() {
        if !node_available() {
            return;
        }
        let (_dir, executor) = executor();
        let out = executor
            .execute("javascript", "console.log('hi');\n1 + 2")
            .await
            .unwrap();
        assert_eq!(out.stdout, "hi\n=> 3\n");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn javascript_has_no_host_bindings() {
        if !node_available() {
            return;
        }
        let (_dir, executor) = executor();
        let out = executor
            .execute("javascript", "require('fs')")
            .await
            .unwrap();
        assert_ne!(out.exit_code, 0);
        assert!(
            out.stderr.contains("require"),
            "stderr: {}",
            out.stderr
        );
    }

    #[tokio::test]
    async fn scratch_files_are_removed() {
        if !python_available() {
            return;
        }
        let (_dir, executor) = executor();
        executor.execute("python", "print(1)").await.unwrap();
        let leftovers = std::fs::read_dir(executor.scratch_dir())
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }
}
