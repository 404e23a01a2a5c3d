use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::counts::store::files;
use crate::counts::SnapshotStore;
use crate::primitives::io::{FileSystem, OsFileSystem};
use crate::types::CountsError;

use crate::admin::error::AdminError;
use crate::admin::options::AdminOpenOptions;
use crate::admin::Result;

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn new(severity: VerifySeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Role of one generation file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Newest valid generation; the one a tracker would open.
    Current,
    /// Older generation that a tracker would delete on open.
    Superseded,
    /// Header never completed; left by an interrupted rotation.
    Torn,
    /// Header valid but the file is incompatible or damaged.
    Invalid,
}

/// Verification result for one generation file.
#[derive(Clone, Debug, Serialize)]
pub struct GenerationCheck {
    /// Generation parsed from the file name.
    pub generation: u64,
    /// File path.
    pub path: String,
    /// Classification.
    pub status: GenerationStatus,
    /// Transaction id from the header, when readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<u64>,
    /// Entry count from the header, when readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<u64>,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Whether a current generation exists and validated without errors.
    pub success: bool,
    /// Generation that a tracker would open, if any.
    pub current_generation: Option<u64>,
    /// Every generation file found, ascending.
    pub generations: Vec<GenerationCheck>,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
}

/// Verifies every generation file of the store rooted at `path`.
///
/// Files are only read. The newest file whose header validates is fully
/// checked (length, body checksum, key encoding and order) and classified
/// as current; newer files with broken headers are torn, older files are
/// superseded.
///
/// # Errors
///
/// Returns an error if no generation exists or the directory cannot be
/// listed. Problems with individual files are reported as findings.
pub fn verify(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<VerifyReport> {
    let path = path.as_ref();
    let fs: Arc<dyn FileSystem> = OsFileSystem::shared();
    let generations = files::list_generations(fs.as_ref(), path)?;
    if generations.is_empty() {
        return Err(AdminError::missing_store(path));
    }

    let mut findings = Vec::new();
    let mut checks = Vec::with_capacity(generations.len());
    let mut current = None;
    for (generation, file) in generations.iter().rev() {
        let display = file.display().to_string();
        let mut check = GenerationCheck {
            generation: generation.0,
            path: display.clone(),
            status: GenerationStatus::Superseded,
            tx_id: None,
            entry_count: None,
        };
        let header = match SnapshotStore::read_header(fs.as_ref(), file) {
            Ok(header) => header,
            Err(CountsError::CorruptHeader { reason, .. }) => {
                check.status = if current.is_none() {
                    GenerationStatus::Torn
                } else {
                    GenerationStatus::Invalid
                };
                findings.push(VerifyFinding::new(
                    VerifySeverity::Warning,
                    format!("{display}: {reason}"),
                ));
                checks.push(check);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        check.tx_id = Some(header.tx_id.0);
        check.entry_count = Some(header.entry_count);
        if header.generation != *generation {
            check.status = GenerationStatus::Invalid;
            findings.push(VerifyFinding::new(
                VerifySeverity::Error,
                format!(
                    "{display}: header generation {} does not match file name",
                    header.generation
                ),
            ));
        } else if current.is_some() {
            check.status = GenerationStatus::Superseded;
            findings.push(VerifyFinding::new(
                VerifySeverity::Info,
                format!("{display}: superseded generation awaiting removal"),
            ));
        } else {
            match SnapshotStore::open_with(&fs, file, &opts.version_tag, opts.verify_body) {
                Ok(store) => {
                    check.status = GenerationStatus::Current;
                    current = Some(store.generation().0);
                }
                Err(err) => {
                    check.status = GenerationStatus::Invalid;
                    findings.push(VerifyFinding::new(
                        VerifySeverity::Error,
                        err.to_string(),
                    ));
                }
            }
        }
        checks.push(check);
    }
    checks.reverse();

    if current.is_none() {
        findings.push(VerifyFinding::new(
            VerifySeverity::Error,
            "no valid generation found",
        ));
    }
    let success = current.is_some()
        && !findings
            .iter()
            .any(|finding| finding.severity == VerifySeverity::Error);
    Ok(VerifyReport {
        success,
        current_generation: current,
        generations: checks,
        findings,
    })
}
