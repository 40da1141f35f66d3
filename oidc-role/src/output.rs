// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::errors::ProvisionError;
use crate::models::{Arn, ProvisionOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The role ARN alone
    #[default]
    Text,
    /// Every identifier created by the run
    Json,
}

/// Writes the outcome for the caller. The role ARN is checked first so a
/// workflow never receives an empty or malformed value.
pub fn emit<W: Write>(
    writer: &mut W,
    outcome: &ProvisionOutcome,
    format: OutputFormat,
) -> Result<(), ProvisionError> {
    Arn::parse_role(&outcome.role_arn)?;

    match format {
        OutputFormat::Text => writeln!(writer, "{}", outcome.role_arn)?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, outcome)
                .map_err(|e| ProvisionError::Output(e.to_string()))?;
            writeln!(writer)?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Appends `role_arn=<arn>` to a GitHub Actions output file.
pub fn append_github_output(path: &Path, outcome: &ProvisionOutcome) -> Result<(), ProvisionError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ProvisionError::Output(format!("{}: {e}", path.display())))?;

    writeln!(file, "role_arn={}", outcome.role_arn)?;

    tracing::debug!("[oidc-role] wrote role_arn to {}", path.display());
    Ok(())
}
