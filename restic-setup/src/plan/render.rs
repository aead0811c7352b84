//! Bash rendering of a [`Plan`].
//!
//! Output is a pure function of the plan and the generation timestamp, and the
//! timestamp only ever lands in the comment on line 2.

use super::{Arg, Marker, Ping, Plan, ResticOp, RunnerSettings, Step};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

/// Prefix of the only line that varies between two renders of the same plan
pub const GENERATED_COMMENT_PREFIX: &str = "# Generated by restic-setup at ";

const INDENT: &str = "    ";

pub fn render(plan: &Plan, generated_at: DateTime<Utc>) -> String {
    let settings = &plan.settings;
    let mut out = String::new();

    out.push_str("#!/bin/bash\n");
    out.push_str(GENERATED_COMMENT_PREFIX);
    out.push_str(&generated_at.to_rfc3339_opts(SecondsFormat::Secs, true));
    out.push_str(". Re-run restic-setup instead of editing.\n");
    out.push_str("set -uo pipefail\n\n");

    render_variables(&mut out, settings);

    out.push_str("# Repository\n");
    render_section(&mut out, &plan.header, settings);
    out.push_str("# Backup sources\n");
    render_section(&mut out, &plan.backups, settings);
    out.push_str("# Retention\n");
    render_section(&mut out, &plan.retentions, settings);
    out.push_str("# Result\n");
    render_section(&mut out, &plan.footer, settings);
    out.push_str("exit \"$FAILURE\"\n");

    out
}

fn render_variables(out: &mut String, settings: &RunnerSettings) {
    let _ = writeln!(out, "RESTIC={}", quote(&settings.restic_binary.to_string_lossy()));
    let _ = writeln!(out, "RESTIC_PASSWD={}", quote(&settings.password_file.to_string_lossy()));
    let _ = writeln!(out, "RESTIC_EXCLUDE_FILE={}", quote(&settings.exclude_file.to_string_lossy()));
    let _ = writeln!(out, "BACKUP_REPO={}", quote(&settings.repository));
    let _ = writeln!(out, "HOST_TAG={}", quote(&settings.hostname));
    if let Some(url) = &settings.healthcheck_url {
        let _ = writeln!(out, "HEALTHCHECK_URL={}", quote(url));
    }
    let _ = writeln!(out, "LOGFILE={}", quote(&settings.log_file.to_string_lossy()));
    out.push_str("FAILURE=0\n\n");

    out.push_str("exec >> \"$LOGFILE\" 2>&1\n\n");

    out.push_str("run_restic() {\n");
    out.push_str("    \"$RESTIC\" -p \"$RESTIC_PASSWD\" -r \"$BACKUP_REPO\" \"$@\"\n");
    out.push_str("}\n\n");
}

fn render_section(out: &mut String, steps: &[Step], settings: &RunnerSettings) {
    for step in steps {
        render_step(out, step, settings);
        out.push('\n');
    }
}

fn render_step(out: &mut String, step: &Step, settings: &RunnerSettings) {
    match step {
        Step::Marker(Marker::Started) => {
            out.push_str("echo \"=== Backup started: $(date) on $HOST_TAG ===\"\n");
        }
        Step::Marker(Marker::Finished) => {
            out.push_str("echo \"=== Backup finished: $(date) ===\"\n");
        }
        Step::Ping(Ping::Start) => {
            out.push_str("curl -fsS --retry 3 \"$HEALTHCHECK_URL/start\" >/dev/null 2>&1 || true\n");
        }
        Step::Ping(Ping::Success) => {
            out.push_str("if [ \"$FAILURE\" -eq 0 ]; then\n");
            out.push_str(INDENT);
            out.push_str("curl -fsS --retry 3 \"$HEALTHCHECK_URL\" >/dev/null 2>&1 || true\n");
            out.push_str("fi\n");
        }
        Step::EnsureRepository => {
            let _ = writeln!(out, "if ! {} >/dev/null 2>&1; then", invocation(&ResticOp::CatConfig));
            let _ = writeln!(out, "{INDENT}echo \"Initializing restic repository at $BACKUP_REPO\"");
            let _ = writeln!(out, "{INDENT}if ! {}; then", invocation(&ResticOp::Init));
            let _ = writeln!(out, "{INDENT}{INDENT}echo \"Repository initialization failed\"");
            let _ = writeln!(out, "{INDENT}{INDENT}echo \"=== Backup finished: $(date) ===\"");
            let _ = writeln!(out, "{INDENT}{INDENT}exit 1");
            let _ = writeln!(out, "{INDENT}fi");
            out.push_str("fi\n");
        }
        Step::ClearStaleLocks => {
            let _ = writeln!(out, "{} || true", invocation(&ResticOp::Unlock));
        }
        Step::Backup(source) => {
            let backup = ResticOp::Backup {
                tag: source.name.clone(),
                path: source.path.clone(),
            };
            let stats = ResticOp::Stats {
                tag: source.name.clone(),
            };
            let path = source.path.to_string_lossy();

            let _ = writeln!(out, "echo {}", quote(&format!("Backing up {}: {}", source.name, path)));
            let _ = writeln!(out, "if {}; then", invocation(&backup));
            let _ = writeln!(
                out,
                "{INDENT}echo {} \"$({} 2>&1 || true)\"",
                quote(&format!("{} backup complete:", source.name)),
                invocation(&stats)
            );
            out.push_str("else\n");
            let _ = writeln!(out, "{INDENT}echo {}", quote(&format!("{} backup FAILED", source.name)));
            let _ = writeln!(out, "{INDENT}FAILURE=1");
            out.push_str("fi\n");
        }
        Step::Retain(source) => {
            let forget = ResticOp::Forget {
                tag: source.name.clone(),
                policy: settings.retention,
            };
            let _ = writeln!(out, "{} || true", invocation(&forget));
        }
    }
}

fn invocation(op: &ResticOp) -> String {
    let mut line = String::from("run_restic");
    for arg in op.args() {
        line.push(' ');
        match arg {
            Arg::Literal(value) => line.push_str(&quote(&value)),
            Arg::Host => line.push_str("\"$HOST_TAG\""),
            Arg::ExcludeFile => line.push_str("\"$RESTIC_EXCLUDE_FILE\""),
        }
    }
    line
}

/// Quote a word for bash. Words made only of safe characters stay bare.
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
