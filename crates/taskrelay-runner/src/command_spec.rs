use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

/// Specification for a command to execute.
///
/// All subprocess execution goes through this type. The environment is
/// always cleared: a child only sees the variables added with
/// [`CommandSpec::env`] or copied with [`CommandSpec::inherit_env`].
///
/// # Example
///
/// ```rust
/// use taskrelay_runner::CommandSpec;
/// use std::ffi::OsString;
///
/// let cmd = CommandSpec::new("llm")
///     .args(["-m", "llama3.1"])
///     .cwd("/path/to/workspace")
///     .env("NO_COLOR", "1");
///
/// assert_eq!(cmd.program, OsString::from("llm"));
/// assert_eq!(cmd.args.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The program to execute
    pub program: OsString,
    /// Arguments as discrete elements
    pub args: Vec<OsString>,
    /// Optional working directory
    pub cwd: Option<PathBuf>,
    /// Environment visible to the child
    pub env: HashMap<OsString, OsString>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Run `line` through `shell -c`.
    ///
    /// Callers are responsible for escaping anything interpolated into `line`;
    /// [`crate::render_template`] does this for command templates.
    #[must_use]
    pub fn shell_line(shell: impl Into<OsString>, line: impl Into<OsString>) -> Self {
        Self::new(shell).arg("-c").arg(line)
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Copy the named variables from the current process environment.
    ///
    /// Variables that are not set are skipped.
    #[must_use]
    pub fn inherit_env<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if let Some(value) = std::env::var_os(name) {
                self.env.insert(OsString::from(name), value);
            }
        }
        self
    }

    /// Convert into a `tokio::process::Command`.
    ///
    /// stdin is closed, stdout/stderr are piped, the child is killed if the
    /// owning future is dropped, and on unix it leads a new process group.
    #[must_use]
    pub fn to_tokio_command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args);

        cmd.env_clear();
        cmd.envs(&self.env);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so timeouts and cancellation can signal the
        // whole tree with `killpg`
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}
