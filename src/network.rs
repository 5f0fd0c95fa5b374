//! NetworkManager connection lookup.
//!
//! Finds the single connection profile of the transport type that rides on
//! the failing controller, together with whether NetworkManager currently
//! considers it active. Profiles are fetched fresh on every call since
//! activation state changes between detections.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::command::{CommandError, CommandRunner};

/// A NetworkManager connection profile joined with its activation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    /// Human-readable connection name, used to bring it up.
    pub id: String,
    /// Transport kind (e.g. `bluetooth`).
    pub kind: String,
    /// Stable identifier.
    pub uuid: String,
    /// Whether the uuid appears among NetworkManager's active connections.
    pub is_active: bool,
}

impl fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (type={}, uuid={}, active={})",
            self.id, self.kind, self.uuid, self.is_active
        )
    }
}

/// A stored connection as NetworkManager lists it, before joining with
/// activation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    /// Human-readable connection name.
    pub id: String,
    /// Stable identifier.
    pub uuid: String,
    /// Transport kind.
    pub kind: String,
}

/// Errors from querying NetworkManager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The query command could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The query command exited unsuccessfully.
    #[error("`{command}` failed with exit code {exit_code:?}: {output}")]
    Failed {
        /// Command line that failed.
        command: String,
        /// Exit code.
        exit_code: Option<i32>,
        /// Combined output.
        output: String,
    },
    /// A line of output did not have the expected fields.
    #[error("unexpected nmcli output line: {0:?}")]
    Malformed(String),
}

/// Read-only query surface of the network manager.
#[async_trait]
pub trait NetworkManager: Send + Sync {
    /// List every stored connection profile.
    async fn list_connections(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Vec<ConnectionEntry>, QueryError>;

    /// List the uuids of currently active connections.
    async fn active_connection_uuids(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Vec<String>, QueryError>;
}

/// [`NetworkManager`] implemented with `nmcli` in terse mode.
pub struct NmcliNetworkManager {
    runner: Arc<dyn CommandRunner>,
}

impl NmcliNetworkManager {
    /// Query NetworkManager through `nmcli` run by `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn nmcli(
        &self,
        args: &[&str],
        shutdown: &watch::Receiver<bool>,
    ) -> Result<String, QueryError> {
        let output = self.runner.run("nmcli", args, shutdown).await?;
        if !output.success() {
            return Err(QueryError::Failed {
                command: format!("nmcli {}", args.join(" ")),
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl NetworkManager for NmcliNetworkManager {
    async fn list_connections(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Vec<ConnectionEntry>, QueryError> {
        let stdout = self
            .nmcli(&["-t", "-f", "NAME,UUID,TYPE", "connection", "show"], shutdown)
            .await?;
        parse_connection_list(&stdout)
    }

    async fn active_connection_uuids(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Vec<String>, QueryError> {
        let stdout = self
            .nmcli(
                &["-t", "-f", "UUID", "connection", "show", "--active"],
                shutdown,
            )
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Parse `nmcli -t -f NAME,UUID,TYPE connection show` output.
///
/// # Errors
///
/// Returns [`QueryError::Malformed`] for a line without exactly three fields.
pub fn parse_connection_list(stdout: &str) -> Result<Vec<ConnectionEntry>, QueryError> {
    let mut entries = Vec::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let fields = split_terse(line);
        let [id, uuid, kind] = <[String; 3]>::try_from(fields)
            .map_err(|_| QueryError::Malformed(line.to_owned()))?;
        entries.push(ConnectionEntry { id, uuid, kind });
    }
    Ok(entries)
}

/// Split one terse-mode line on unescaped `:`, undoing `\:` and `\\` escapes.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

/// Errors from resolving the rescue target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// NetworkManager could not be queried.
    #[error("failed to query NetworkManager: {0}")]
    Query(#[from] QueryError),
    /// Zero or several profiles of the expected kind exist.
    #[error("expected exactly one {kind} connection in NetworkManager, found {count}. candidates: [{}]", format_candidates(.candidates))]
    NotUnique {
        /// Transport kind searched for.
        kind: String,
        /// Number of matching profiles.
        count: usize,
        /// Every profile NetworkManager returned.
        candidates: Vec<ConnectionProfile>,
    },
}

fn format_candidates(candidates: &[ConnectionProfile]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fetch every profile and mark the ones whose uuid is active.
///
/// # Errors
///
/// Returns [`QueryError`] if either listing fails.
pub async fn read_profiles(
    nm: &dyn NetworkManager,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<ConnectionProfile>, QueryError> {
    let entries = nm.list_connections(shutdown).await?;
    let active = nm.active_connection_uuids(shutdown).await?;
    Ok(entries
        .into_iter()
        .map(|entry| ConnectionProfile {
            is_active: active.iter().any(|uuid| *uuid == entry.uuid),
            id: entry.id,
            kind: entry.kind,
            uuid: entry.uuid,
        })
        .collect())
}

/// Resolve the single connection profile of type `kind`.
///
/// # Errors
///
/// Returns [`ResolveError::Query`] when NetworkManager cannot be queried and
/// [`ResolveError::NotUnique`] when zero or several profiles match.
pub async fn resolve_target(
    nm: &dyn NetworkManager,
    kind: &str,
    shutdown: &watch::Receiver<bool>,
) -> Result<ConnectionProfile, ResolveError> {
    let candidates = read_profiles(nm, shutdown).await?;
    let mut matching: Vec<&ConnectionProfile> =
        candidates.iter().filter(|p| p.kind == kind).collect();

    if matching.len() != 1 {
        return Err(ResolveError::NotUnique {
            kind: kind.to_owned(),
            count: matching.len(),
            candidates,
        });
    }

    let target = matching.remove(0).clone();
    debug!(connection = %target, "resolved rescue target");
    Ok(target)
}
