// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use oidc_role::configuration::ProvisionOptions;
use oidc_role::errors::ProvisionError;
use oidc_role::iam::AwsIdentityApi;
use oidc_role::models::Step;
use oidc_role::output;
use oidc_role::provisioner::Provisioner;
use oidc_role::thumbprint::{CertificateSource, StaticCertificateSource, TlsCertificateSource};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        // stdout carries the role ARN only
        .with_writer(std::io::stderr)
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // ANSI color codes are unreadable in CI logs.
        .with_ansi(false)
        // the CI runner adds its own timestamps.
        .without_time()
        .with_target(false)
        .init();

    let options = ProvisionOptions::parse();

    tracing::info!("[oidc-role] {:?}", &options);

    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("[oidc-role] {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(options: ProvisionOptions) -> Result<(), ProvisionError> {
    let request = options.to_request()?;

    let certificates: Arc<dyn CertificateSource> = match request.thumbprint {
        Some(thumbprint) => Arc::new(StaticCertificateSource(thumbprint)),
        None => Arc::new(TlsCertificateSource::new()?),
    };

    let iam = AwsIdentityApi::load(&request.region, options.iam_endpoint.as_deref()).await;
    let provisioner = Provisioner::new(certificates, Arc::new(iam));

    if options.dry_run {
        tracing::warn!("[oidc-role] dry run, no IAM calls will be made");
        let plan = provisioner.plan(&request).await?;
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &plan)
            .map_err(|e| ProvisionError::Output(e.to_string()).at(Step::Emit))?;
        writeln!(stdout).map_err(|e| ProvisionError::from(e).at(Step::Emit))?;
        return Ok(());
    }

    let outcome = provisioner.run(&request).await?;

    output::emit(&mut std::io::stdout().lock(), &outcome, options.output)
        .map_err(|e| e.at(Step::Emit))?;

    if let Some(path) = options.github_output.as_deref() {
        output::append_github_output(path, &outcome).map_err(|e| e.at(Step::Emit))?;
    }

    Ok(())
}
