//! Shell command fragments spoken to the remote POSIX shell.
//!
//! Everything interpolated into a command line goes through
//! [`quote_posix`]; the shell never sees unquoted caller input.

use std::collections::BTreeMap;

/// Quote `text` for a POSIX shell: wrap in single quotes, with embedded
/// single quotes spelled `'\''`.
#[must_use]
pub fn quote_posix(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Script that reads exactly `size` raw bytes from the shell's stdin into
/// a freshly created private directory and echoes the resulting path.
///
/// `chmod 500` before the path is echoed, so by the time the client reads
/// the path the binary is already executable and read-only.
#[must_use]
pub fn upload_script(binary_name: &str, size: usize) -> String {
    format!(
        "BINARY=\"$(mktemp -d)/{binary_name}\"; \
         LC_ALL=C head -c {size} > \"$BINARY\"; \
         chmod 500 \"$BINARY\"; \
         echo \"$BINARY\"\n"
    )
}

/// Command that replaces the shell with the uploaded agent.
///
/// The agent is started under the remote user's login shell (resolved via
/// `getent`) so its environment matches an interactive login, and `exec`
/// leaves no intermediate shell process behind.
#[must_use]
pub fn launch_command(working_dir: &str, argv: &str) -> String {
    format!(
        "cd {dir}; exec \"$(getent passwd \"$(whoami)\" | cut -d: -f7)\" -c {argv}\n",
        dir = quote_posix(working_dir),
        argv = quote_posix(argv),
    )
}

/// Launch parameters of the uploaded agent binary.
///
/// Renders to the `grpc-server` argv, each element individually quoted.
#[derive(Debug, Clone, Default)]
pub struct AgentLaunchOptions {
    env: BTreeMap<String, String>,
    address: Option<String>,
    port: Option<u16>,
    self_delete_on_exit: bool,
    no_shutdown_on_disconnect: bool,
}

impl AgentLaunchOptions {
    /// Default options: stdio transport, shutdown on disconnect, binary
    /// left in place.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one environment entry for the agent process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Bind the agent's listener to `address` instead of stdio.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Bind the agent's listener to `port`.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Ask the agent to unlink its own binary once it exits.
    #[must_use]
    pub fn self_delete_on_exit(mut self) -> Self {
        self.self_delete_on_exit = true;
        self
    }

    /// Keep the agent alive after the client disconnects.
    #[must_use]
    pub fn no_shutdown_on_disconnect(mut self) -> Self {
        self.no_shutdown_on_disconnect = true;
        self
    }

    /// Render the full launch argv for the uploaded binary at
    /// `remote_path`, ready to pass to [`launch_command`].
    #[must_use]
    pub fn render_argv(&self, remote_path: &str) -> String {
        let mut parts: Vec<String> = vec!["env".to_owned()];
        for (key, value) in &self.env {
            parts.push(quote_posix(&format!("{key}={value}")));
        }
        parts.push(quote_posix(remote_path));
        parts.push("grpc-server".to_owned());
        if let Some(address) = &self.address {
            parts.push(quote_posix(&format!("--address={address}")));
        }
        if let Some(port) = self.port {
            parts.push(format!("--port={port}"));
        }
        if self.self_delete_on_exit {
            parts.push("--self-delete-on-exit".to_owned());
        }
        if self.no_shutdown_on_disconnect {
            parts.push("--no-shutdown-on-disconnect".to_owned());
        }
        parts.join(" ")
    }
}
