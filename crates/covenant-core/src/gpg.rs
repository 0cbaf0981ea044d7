//! GnuPG adapter for [`ExternalVerifier`].
//!
//! Each check writes the payload and the armored signature to a private
//! temporary directory and runs
//! `gpg --batch --no-tty --status-fd 1 --verify <sig> <data>`.
//! Only the machine-readable status lines on stdout are interpreted; the
//! human-readable stderr is discarded.
//!
//! The subprocess is bounded in time and output:
//! - stdout is read on a helper thread and capped at [`MAX_STATUS_BYTES`]
//! - the child is polled until `timeout_ms`, then killed and reaped
//! - on unix gpg leads its own process group, and the whole group is
//!   killed so helpers it forked cannot outlive the check
//!
//! A signature verifies only when gpg exits 0 and reports exactly one
//! signature with both `GOODSIG` and `VALIDSIG`, and the signing key's
//! fingerprint (or its primary key's) equals the claimed fingerprint in full.

use crate::external::{DenialReason, ExternalVerifier, VerificationOutcome};
use covenant_canonical::Fingerprint;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on status output read from gpg.
pub const MAX_STATUS_BYTES: u64 = 64 * 1024;

const STATUS_PREFIX: &str = "[GNUPG:] ";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the gpg subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpgOptions {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the gpg arguments.
    pub extra_args: Vec<String>,
    /// Keyring directory passed as `--homedir`.
    pub homedir: Option<PathBuf>,
    /// Wall-clock limit for one verification, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GpgOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gpg"),
            extra_args: Vec::new(),
            homedir: None,
            timeout_ms: 10_000,
        }
    }
}

/// Verifies detached OpenPGP signatures by running gpg.
#[derive(Debug, Clone, Default)]
pub struct GpgVerifier {
    options: GpgOptions,
}

impl GpgVerifier {
    /// Creates a verifier with the given options.
    pub fn new(options: GpgOptions) -> Self {
        Self { options }
    }

    /// The options in use.
    pub fn options(&self) -> &GpgOptions {
        &self.options
    }

    fn command(&self, sig_path: &Path, data_path: &Path) -> Command {
        let mut cmd = Command::new(&self.options.program);
        cmd.args(&self.options.extra_args);
        if let Some(homedir) = &self.options.homedir {
            cmd.arg("--homedir").arg(homedir);
        }
        cmd.args(["--batch", "--no-tty", "--status-fd", "1", "--verify"])
            .arg(sig_path)
            .arg(data_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

impl ExternalVerifier for GpgVerifier {
    fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        fingerprint: &Fingerprint,
    ) -> VerificationOutcome {
        let workdir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "cannot create gpg work directory");
                return VerificationOutcome::Indeterminate(DenialReason::TrustAnchorUnavailable);
            }
        };
        let data_path = workdir.path().join("payload.json");
        let sig_path = workdir.path().join("payload.json.asc");
        if let Err(e) = std::fs::write(&data_path, payload)
            .and_then(|_| std::fs::write(&sig_path, signature.as_bytes()))
        {
            warn!(error = %e, "cannot stage gpg inputs");
            return VerificationOutcome::Indeterminate(DenialReason::TrustAnchorUnavailable);
        }

        debug!(
            program = %self.options.program.display(),
            fingerprint = fingerprint.short(),
            "running gpg --verify"
        );
        let timeout = Duration::from_millis(self.options.timeout_ms);
        match run_bounded(self.command(&sig_path, &data_path), timeout) {
            Ok(Run::Exited { success, stdout }) => {
                let status = parse_status(&String::from_utf8_lossy(&stdout));
                evaluate(success, &status, fingerprint)
            }
            Ok(Run::TimedOut) => {
                warn!(timeout_ms = self.options.timeout_ms, "gpg verification timed out");
                VerificationOutcome::Indeterminate(DenialReason::Timeout)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    program = %self.options.program.display(),
                    "gpg could not be run"
                );
                VerificationOutcome::Indeterminate(DenialReason::TrustAnchorUnavailable)
            }
        }
    }
}

enum Run {
    Exited { success: bool, stdout: Vec<u8> },
    TimedOut,
}

fn run_bounded(mut cmd: Command, timeout: Duration) -> io::Result<Run> {
    let deadline = Instant::now() + timeout;
    let mut child = cmd.spawn()?;
    let group = child.id();
    let Some(stdout) = child.stdout.take() else {
        kill_and_reap(&mut child);
        return Err(io::Error::new(io::ErrorKind::Other, "stdout not captured"));
    };

    let reader = thread::spawn(move || {
        let mut output = Vec::new();
        stdout
            .take(MAX_STATUS_BYTES)
            .read_to_end(&mut output)
            .map(|_| output)
    });

    let success = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.success(),
            Ok(None) => {}
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(e);
            }
        }
        if Instant::now() >= deadline {
            kill_and_reap(&mut child);
            drop(child);
            // The reader is abandoned if a descendant left the group and still holds the pipe.
            wait_finished(&reader, Instant::now() + REAP_TIMEOUT);
            return Ok(Run::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    };
    drop(child);

    if !wait_finished(&reader, deadline.max(Instant::now()) + REAP_TIMEOUT) {
        // gpg exited but something it started still holds stdout.
        kill_group(group);
        return Ok(Run::TimedOut);
    }
    match reader.join() {
        Ok(Ok(stdout)) => Ok(Run::Exited { success, stdout }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(io::ErrorKind::Other, "status reader panicked")),
    }
}

fn wait_finished<T>(handle: &thread::JoinHandle<T>, until: Instant) -> bool {
    loop {
        if handle.is_finished() {
            return true;
        }
        if Instant::now() >= until {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_and_reap(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let deadline = Instant::now() + REAP_TIMEOUT;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(None) => thread::sleep(POLL_INTERVAL),
            _ => return,
        }
    }
}

/// Sends SIGKILL to the process group led by `leader`.
#[cfg(unix)]
fn kill_group(leader: u32) {
    let Ok(pgid) = libc::pid_t::try_from(leader) else {
        return;
    };
    if pgid <= 1 {
        return;
    }
    // SAFETY: kill(2) takes no pointers. The negated id addresses only the
    // group created for this child by `process_group(0)`.
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        debug!(pgid, error = %io::Error::last_os_error(), "gpg process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_leader: u32) {}

/// A `VALIDSIG` status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSig {
    /// Fingerprint of the key that made the signature (may be a subkey).
    pub fingerprint: String,
    /// Signature creation time, if reported as epoch seconds.
    pub created: Option<u64>,
    /// Fingerprint of the primary key, when reported.
    pub primary_fingerprint: Option<String>,
}

/// Facts extracted from gpg's `--status-fd` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpgStatus {
    /// `NEWSIG` lines seen.
    pub new_sig: usize,
    /// Key ids reported by `GOODSIG`.
    pub good: Vec<String>,
    /// `VALIDSIG` lines.
    pub valid: Vec<ValidSig>,
    /// `BADSIG` lines seen.
    pub bad: usize,
    /// `ERRSIG` lines seen, other than for a missing key.
    pub errors: usize,
    /// `NO_PUBKEY`, or `ERRSIG` with return code 9.
    pub missing_key: bool,
    /// `EXPSIG`, `EXPKEYSIG` or `REVKEYSIG` lines seen.
    pub expired_or_revoked: usize,
}

impl GpgStatus {
    /// Number of signatures gpg looked at.
    pub fn signature_count(&self) -> usize {
        if self.new_sig > 0 {
            self.new_sig
        } else {
            self.good.len() + self.bad + self.errors + self.expired_or_revoked
                + usize::from(self.missing_key && self.errors == 0)
        }
    }
}

/// Parses `--status-fd` output. Lines without the status prefix are ignored.
pub fn parse_status(output: &str) -> GpgStatus {
    let mut status = GpgStatus::default();
    for line in output.lines() {
        let Some(rest) = line.strip_prefix(STATUS_PREFIX) else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let Some(keyword) = fields.next() else {
            continue;
        };
        let args: Vec<&str> = fields.collect();
        match keyword {
            "NEWSIG" => status.new_sig += 1,
            "GOODSIG" => status.good.push(args.first().copied().unwrap_or_default().to_string()),
            "BADSIG" => status.bad += 1,
            "EXPSIG" | "EXPKEYSIG" | "REVKEYSIG" => status.expired_or_revoked += 1,
            "NO_PUBKEY" => status.missing_key = true,
            "ERRSIG" => {
                if args.get(5) == Some(&"9") {
                    status.missing_key = true;
                } else {
                    status.errors += 1;
                }
            }
            "VALIDSIG" => {
                if let Some(fpr) = args.first() {
                    status.valid.push(ValidSig {
                        fingerprint: (*fpr).to_string(),
                        created: args.get(2).and_then(|t| t.parse().ok()),
                        primary_fingerprint: args.get(9).map(|p| (*p).to_string()),
                    });
                }
            }
            _ => {}
        }
    }
    status
}

/// Maps gpg's exit status and status lines to an outcome for `claimed`.
pub fn evaluate(exit_ok: bool, status: &GpgStatus, claimed: &Fingerprint) -> VerificationOutcome {
    use VerificationOutcome::{Denied, Indeterminate, Verified};

    if status.signature_count() > 1 {
        return Indeterminate(DenialReason::MalformedResponse);
    }
    if status.expired_or_revoked > 0 {
        return Denied(DenialReason::KeyRevokedOrExpired);
    }
    if status.bad > 0 {
        return Denied(DenialReason::SignatureInvalid);
    }
    if status.missing_key {
        return Denied(DenialReason::KeyNotFound);
    }
    if status.errors > 0 {
        return Denied(DenialReason::SignatureInvalid);
    }
    let (Some(key_id), Some(valid)) = (status.good.first(), status.valid.first()) else {
        return if exit_ok {
            Indeterminate(DenialReason::MalformedResponse)
        } else {
            Denied(DenialReason::SignatureInvalid)
        };
    };
    if !exit_ok || status.good.len() != 1 || status.valid.len() != 1 {
        return Indeterminate(DenialReason::MalformedResponse);
    }
    if !consistent_key_id(key_id, valid) {
        return Indeterminate(DenialReason::MalformedResponse);
    }

    let primary_matches = valid
        .primary_fingerprint
        .as_deref()
        .is_some_and(|p| claimed.matches(p));
    if claimed.matches(&valid.fingerprint) || primary_matches {
        Verified
    } else {
        Denied(DenialReason::FingerprintMismatch)
    }
}

fn consistent_key_id(key_id: &str, valid: &ValidSig) -> bool {
    let key_id = key_id.to_ascii_uppercase();
    if key_id.is_empty() {
        return false;
    }
    std::iter::once(valid.fingerprint.as_str())
        .chain(valid.primary_fingerprint.as_deref())
        .any(|fpr| fpr.to_ascii_uppercase().ends_with(&key_id))
}
