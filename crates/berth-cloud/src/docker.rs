/// Failure to run a docker CLI command.
#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("docker CLI not found — install: https://docs.docker.com/engine/install/")]
    NotFound { source: std::io::Error },

    #[error("docker {} exited with {}:\n{stderr}", args.first().map(String::as_str).unwrap_or(""), format_code(*code))]
    CommandFailed {
        args: Vec<String>,
        /// Exit code, or `None` when the process was killed by a signal.
        code: Option<i32>,
        stderr: String,
    },

    #[error("docker output was not valid UTF-8")]
    InvalidUtf8 { source: std::string::FromUtf8Error },

    #[error("failed to write to docker stdin")]
    StdinWrite { source: std::io::Error },
}

impl DockerError {
    /// Captured stderr, or the error text when the command never ran.
    pub fn detail(&self) -> String {
        match self {
            DockerError::CommandFailed { stderr, .. } => stderr.trim().to_owned(),
            other => other.to_string(),
        }
    }
}

fn format_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_owned(),
    }
}
