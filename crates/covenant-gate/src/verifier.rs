//! Structural and style checks over a staged file.
//!
//! Structural (hard) checks decide whether the file is well formed for its
//! type; style (soft) checks enforce formatting policy. Both must pass for a
//! `VERIFIED_CLEAN` stamp. Any crash or timeout fails closed.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use covenant_core::{obs, Attestable, CovenantConfig};
use tokio::process::Command;
use tracing::warn;

use crate::cas::digest_hex;
use crate::verdict::{reasons, VerificationVerdict};

/// Most findings listed in one verdict.
const MAX_DETAILS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct VerifierSettings {
    pub timeout: Duration,
    pub max_line_length: usize,
    pub allow_tabs: bool,
    pub require_final_newline: bool,
    /// Extension to argv; `{path}` is replaced with the staged file.
    pub external_checks: BTreeMap<String, Vec<String>>,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_line_length: 120,
            allow_tabs: false,
            require_final_newline: true,
            external_checks: BTreeMap::new(),
        }
    }
}

impl VerifierSettings {
    pub fn from_config(config: &CovenantConfig) -> Self {
        Self {
            timeout: config.verifier_timeout(),
            max_line_length: config.gate.max_line_length,
            allow_tabs: config.gate.allow_tabs,
            require_final_newline: config.gate.require_final_newline,
            external_checks: config.gate.external_checks.clone(),
        }
    }
}

/// Why a check did not produce a pass.
enum CheckFailure {
    Structural(Vec<String>),
    Style(Vec<String>),
    Error(String),
}

pub struct Verifier {
    settings: VerifierSettings,
}

impl Verifier {
    pub fn new(settings: VerifierSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Check the staged file. Never fails: errors become failing verdicts.
    pub async fn check(&self, staging_path: &Path) -> VerificationVerdict {
        let verdict = match tokio::time::timeout(self.settings.timeout, self.run(staging_path)).await
        {
            Ok(verdict) => verdict,
            Err(_) => VerificationVerdict::failed(
                staging_path,
                reasons::VERIFIER_TIMEOUT,
                vec![format!(
                    "verification exceeded {}ms",
                    self.settings.timeout.as_millis()
                )],
                None,
            ),
        };
        obs::emit_verdict(
            &staging_path.display().to_string(),
            verdict.passed,
            &verdict.reason,
        );
        verdict
    }

    async fn run(&self, staging_path: &Path) -> VerificationVerdict {
        let bytes = match tokio::fs::read(staging_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return VerificationVerdict::failed(
                    staging_path,
                    reasons::VERIFIER_ERROR,
                    vec![format!("cannot read {}: {e}", staging_path.display())],
                    None,
                )
            }
        };
        let digest = digest_hex(&bytes);
        let extension = staging_path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let settings = self.settings.clone();
        let ext = extension.clone();
        // Built-in checks run off the async runtime; a panic surfaces as a
        // JoinError and fails closed.
        let builtin = tokio::task::spawn_blocking(move || builtin_checks(&bytes, &ext, &settings)).await;

        // Every structural check runs before style findings are considered,
        // so a soft failure never masks a hard one.
        let outcome = match builtin {
            Ok(Ok(style)) => match self.external_check(staging_path, &extension).await {
                Ok(()) if style.is_empty() => Ok(()),
                Ok(()) => Err(CheckFailure::Style(style)),
                Err(failure) => Err(failure),
            },
            Ok(Err(failure)) => Err(failure),
            Err(e) => Err(CheckFailure::Error(format!("verifier crashed: {e}"))),
        };

        match outcome {
            Ok(()) => VerificationVerdict::clean(staging_path, digest),
            Err(CheckFailure::Structural(details)) => VerificationVerdict::failed(
                staging_path,
                reasons::STRUCTURAL_CHECK_FAILED,
                details,
                Some(digest),
            ),
            Err(CheckFailure::Style(details)) => VerificationVerdict::failed(
                staging_path,
                reasons::STYLE_CHECK_FAILED,
                details,
                Some(digest),
            ),
            Err(CheckFailure::Error(detail)) => {
                warn!(path = %staging_path.display(), error = %detail, "verifier error");
                VerificationVerdict::failed(
                    staging_path,
                    reasons::VERIFIER_ERROR,
                    vec![detail],
                    Some(digest),
                )
            }
        }
    }

    /// Run the configured external command for `extension`, if any. A
    /// non-zero exit is a structural failure.
    async fn external_check(&self, path: &Path, extension: &str) -> Result<(), CheckFailure> {
        let Some(argv) = self.settings.external_checks.get(extension) else {
            return Ok(());
        };
        let path_str = path.display().to_string();
        let argv: Vec<String> = argv.iter().map(|a| a.replace("{path}", &path_str)).collect();
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CheckFailure::Error(format!("failed to run {program}: {e}")))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = if stderr.trim().is_empty() { stdout } else { stderr };
        let mut details = vec![format!(
            "{program} exited with {}",
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string())
        )];
        details.extend(text.lines().take(MAX_DETAILS - 1).map(str::to_string));
        Err(CheckFailure::Structural(details))
    }
}

/// Built-in structural checks. On success, returns the style findings.
fn builtin_checks(
    bytes: &[u8],
    extension: &str,
    settings: &VerifierSettings,
) -> Result<Vec<String>, CheckFailure> {
    if bytes.contains(&0) {
        return Err(CheckFailure::Structural(vec!["file contains NUL bytes".to_string()]));
    }
    let text = std::str::from_utf8(bytes).map_err(|e| {
        CheckFailure::Structural(vec![format!("file is not valid UTF-8: {e}")])
    })?;

    match extension {
        "json" => {
            serde_json::from_str::<serde_json::Value>(text)
                .map_err(|e| CheckFailure::Structural(vec![format!("invalid JSON: {e}")]))?;
        }
        "toml" => {
            toml::from_str::<toml::Table>(text)
                .map_err(|e| CheckFailure::Structural(vec![format!("invalid TOML: {e}")]))?;
        }
        _ => {}
    }

    Ok(style_findings(text, settings))
}

fn style_findings(text: &str, settings: &VerifierSettings) -> Vec<String> {
    let mut findings = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let n = idx + 1;
        if line.ends_with(' ') || line.ends_with('\t') {
            findings.push(format!("line {n}: trailing whitespace"));
        }
        let width = line.chars().count();
        if width > settings.max_line_length {
            findings.push(format!(
                "line {n}: {width} characters exceeds limit of {}",
                settings.max_line_length
            ));
        }
        if !settings.allow_tabs && line.contains('\t') {
            findings.push(format!("line {n}: tab character"));
        }
        if line.ends_with('\r') {
            findings.push(format!("line {n}: carriage return"));
        }
    }
    if settings.require_final_newline && !text.is_empty() && !text.ends_with('\n') {
        findings.push("missing final newline".to_string());
    }
    findings.truncate(MAX_DETAILS);
    findings
}

impl Attestable for Verifier {
    fn component_id(&self) -> &str {
        "covenant.verifier"
    }

    fn commitments(&self) -> Vec<String> {
        let mut commitments = vec![
            "fails closed on error and timeout".to_string(),
            format!("timeout {}ms", self.settings.timeout.as_millis()),
            format!("max line length {}", self.settings.max_line_length),
        ];
        commitments.extend(
            self.settings
                .external_checks
                .keys()
                .map(|ext| format!("external check for .{ext}")),
        );
        commitments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::VERIFIED_CLEAN;

    async fn verify(name: &str, content: &[u8], settings: VerifierSettings) -> VerificationVerdict {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        Verifier::new(settings).check(&path).await
    }

    #[tokio::test]
    async fn clean_text_is_stamped() {
        let v = verify("notes.md", b"hello\nworld\n", VerifierSettings::default()).await;
        assert!(v.passed);
        assert_eq!(v.stamp.as_deref(), Some(VERIFIED_CLEAN));
        assert_eq!(v.content_digest.as_deref(), Some(digest_hex(b"hello\nworld\n").as_str()));
    }

    #[tokio::test]
    async fn invalid_json_is_structural_failure() {
        let v = verify("c.json", b"{\"a\": }\n", VerifierSettings::default()).await;
        assert!(!v.passed);
        assert_eq!(v.reason, reasons::STRUCTURAL_CHECK_FAILED);
        assert!(v.stamp.is_none());
    }

    #[tokio::test]
    async fn invalid_toml_is_structural_failure() {
        let v = verify("c.toml", b"key = \n", VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STRUCTURAL_CHECK_FAILED);
    }

    #[tokio::test]
    async fn nul_and_non_utf8_are_structural_failures() {
        let v = verify("a.txt", b"a\0b\n", VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STRUCTURAL_CHECK_FAILED);
        let v = verify("a.txt", &[0xff, 0xfe, b'\n'], VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STRUCTURAL_CHECK_FAILED);
    }

    #[tokio::test]
    async fn style_findings_fail_softly() {
        let v = verify("a.txt", b"trailing \n", VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STYLE_CHECK_FAILED);
        assert!(v.details[0].contains("trailing whitespace"));

        let v = verify("a.txt", b"no newline", VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STYLE_CHECK_FAILED);

        let long = format!("{}\n", "x".repeat(121));
        let v = verify("a.txt", long.as_bytes(), VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STYLE_CHECK_FAILED);
    }

    #[tokio::test]
    async fn tabs_follow_policy() {
        let v = verify("Makefile", b"all:\n\techo hi\n", VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STYLE_CHECK_FAILED);

        let settings = VerifierSettings {
            allow_tabs: true,
            ..VerifierSettings::default()
        };
        let v = verify("Makefile", b"all:\n\techo hi\n", settings).await;
        assert!(v.passed);
    }

    #[tokio::test]
    async fn missing_file_is_verifier_error() {
        let dir = tempfile::tempdir().unwrap();
        let v = Verifier::new(VerifierSettings::default())
            .check(&dir.path().join("gone.txt"))
            .await;
        assert!(!v.passed);
        assert_eq!(v.reason, reasons::VERIFIER_ERROR);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_check_failure_is_structural() {
        let mut checks = BTreeMap::new();
        checks.insert("sh".to_string(), vec!["sh".to_string(), "-n".to_string(), "{path}".to_string()]);
        let settings = VerifierSettings {
            external_checks: checks,
            ..VerifierSettings::default()
        };
        let v = verify("bad.sh", b"if then fi (\n", settings.clone()).await;
        assert_eq!(v.reason, reasons::STRUCTURAL_CHECK_FAILED);

        let v = verify("good.sh", b"echo ok\n", settings).await;
        assert!(v.passed, "{:?}", v.details);
    }

    #[tokio::test]
    async fn structural_failure_wins_over_style() {
        let v = verify("c.json", b"{\"a\": }  \n", VerifierSettings::default()).await;
        assert_eq!(v.reason, reasons::STRUCTURAL_CHECK_FAILED);
        assert!(v.details[0].contains("invalid JSON"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_failure_is_not_masked_by_style() {
        let mut checks = BTreeMap::new();
        checks.insert("sh".to_string(), vec!["sh".to_string(), "-n".to_string(), "{path}".to_string()]);
        let settings = VerifierSettings {
            external_checks: checks,
            ..VerifierSettings::default()
        };
        let v = verify("bad.sh", b"if then fi (  \n", settings.clone()).await;
        assert!(!v.passed);
        assert_eq!(v.reason, reasons::STRUCTURAL_CHECK_FAILED, "{:?}", v.details);
        assert!(v.details[0].starts_with("sh exited with"));

        // Style still fails a file that is structurally sound.
        let v = verify("ok.sh", b"echo ok  \n", settings).await;
        assert_eq!(v.reason, reasons::STYLE_CHECK_FAILED);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_external_check_times_out() {
        let mut checks = BTreeMap::new();
        checks.insert("txt".to_string(), vec!["sleep".to_string(), "5".to_string()]);
        let settings = VerifierSettings {
            timeout: Duration::from_millis(200),
            external_checks: checks,
            ..VerifierSettings::default()
        };
        let v = verify("a.txt", b"ok\n", settings).await;
        assert!(!v.passed);
        assert_eq!(v.reason, reasons::VERIFIER_TIMEOUT);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_external_program_is_verifier_error() {
        let mut checks = BTreeMap::new();
        checks.insert(
            "txt".to_string(),
            vec!["covenant-no-such-checker".to_string(), "{path}".to_string()],
        );
        let settings = VerifierSettings {
            external_checks: checks,
            ..VerifierSettings::default()
        };
        let v = verify("a.txt", b"ok\n", settings).await;
        assert_eq!(v.reason, reasons::VERIFIER_ERROR);
    }
}
