/// Socket address of one side of a ZeroMQ channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Inter-process communication via Unix domain sockets.
    /// Used for same-host supervisors (`unix://` connection strings).
    Ipc(String),

    /// TCP transport for distributed deployment.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create a TCP transport with the given host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// IPC socket for a host/port pair, named `{host}-{port}` under
    /// `/tmp/tasq/`.
    pub fn ipc_for(host: &str, port: u16) -> Self {
        Self::Ipc(format!("{host}-{port}"))
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/tasq/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}
