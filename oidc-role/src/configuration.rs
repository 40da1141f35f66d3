// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use validator::Validate;

use crate::constants::{
    DEFAULT_AUDIENCE, DEFAULT_ISSUER_URL, DEFAULT_REGION, DEFAULT_ROLE_NAME, POLICY_NAME_SUFFIX,
};
use crate::errors::ProvisionError;
use crate::models::ProvisionRequest;
use crate::output::OutputFormat;
use crate::policy;
use crate::thumbprint::{CertificateSelector, Fingerprint};

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ProvisionOptions {
    #[arg(long, default_value = DEFAULT_REGION, env("OIDC_ROLE_REGION"))]
    pub region: String,
    #[arg(long, default_value = DEFAULT_ISSUER_URL, env("OIDC_ROLE_ISSUER_URL"))]
    pub issuer_url: String,
    #[arg(long, default_value = DEFAULT_AUDIENCE, env("OIDC_ROLE_AUDIENCE"))]
    pub audience: String,
    /// Token subjects allowed to assume the role, e.g. `repo:acme/widget:*`
    #[arg(long, env("OIDC_ROLE_SUBJECT_PATTERN"))]
    pub subject_pattern: String,
    #[arg(long, default_value = DEFAULT_ROLE_NAME, env("OIDC_ROLE_ROLE_NAME"))]
    pub role_name: String,
    /// Defaults to `<role-name>-policy`
    #[arg(long, env("OIDC_ROLE_POLICY_NAME"))]
    pub policy_name: Option<String>,
    /// JSON permissions policy to attach to the role
    #[arg(long, env("OIDC_ROLE_PERMISSIONS_FILE"))]
    pub permissions_file: PathBuf,
    #[arg(long, value_enum, default_value = "leaf", env("OIDC_ROLE_CERTIFICATE"))]
    pub certificate: CertificateSelector,
    /// Use this thumbprint instead of fetching the issuer certificate
    #[arg(long, env("OIDC_ROLE_THUMBPRINT"))]
    pub thumbprint: Option<String>,
    #[arg(long, env("OIDC_ROLE_IAM_ENDPOINT"))]
    pub iam_endpoint: Option<String>,
    #[arg(long, value_enum, default_value = "text", env("OIDC_ROLE_OUTPUT"))]
    pub output: OutputFormat,
    #[arg(long, env("GITHUB_OUTPUT"))]
    pub github_output: Option<PathBuf>,
    #[arg(long, default_value = "false", env("OIDC_ROLE_DRY_RUN"), action = ArgAction::SetTrue)]
    pub dry_run: bool,
}

impl ProvisionOptions {
    /// Reads the permissions document and validates every input, the
    /// document included.
    pub fn to_request(&self) -> Result<ProvisionRequest, ProvisionError> {
        let permissions_document =
            std::fs::read_to_string(&self.permissions_file).map_err(|e| {
                ProvisionError::Configuration(format!(
                    "unable to read {}: {e}",
                    self.permissions_file.display()
                ))
            })?;

        let thumbprint = self
            .thumbprint
            .as_deref()
            .map(str::parse::<Fingerprint>)
            .transpose()?;

        let request = ProvisionRequest {
            region: self.region.clone(),
            issuer_url: self.issuer_url.clone(),
            audience: self.audience.clone(),
            subject_pattern: self.subject_pattern.clone(),
            role_name: self.role_name.clone(),
            policy_name: self
                .policy_name
                .clone()
                .unwrap_or_else(|| format!("{}{POLICY_NAME_SUFFIX}", self.role_name)),
            permissions_document,
            certificate: self.certificate,
            thumbprint,
        };

        request.validate()?;
        policy::parse_permissions(&request.permissions_document)?;

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Serializes tests that read or write the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Parses `args` with only `vars` set among the variables the options read.
    fn parse_with_env(
        vars: &[(&str, &str)],
        args: &[&str],
    ) -> Result<ProvisionOptions, clap::Error> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let ambient: Vec<String> = std::env::vars()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with("OIDC_ROLE_") || key == "GITHUB_OUTPUT")
            .collect();

        // SAFETY: every test touching these variables holds ENV_LOCK.
        unsafe {
            for key in &ambient {
                std::env::remove_var(key);
            }
            for (key, value) in vars {
                std::env::set_var(key, value);
            }
        }

        let argv = std::iter::once("oidc-role").chain(args.iter().copied());
        let result = ProvisionOptions::try_parse_from(argv);

        // SAFETY: as above.
        unsafe {
            for (key, _) in vars {
                std::env::remove_var(key);
            }
        }

        result
    }

    fn parse(args: &[&str]) -> Result<ProvisionOptions, clap::Error> {
        parse_with_env(&[], args)
    }

    fn write_permissions(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("permissions.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    const PERMISSIONS: &str = r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": "s3:GetObject", "Resource": "*"}]}"#;

    #[test]
    fn test_defaults() {
        let options = parse(&[
            "--subject-pattern",
            "repo:acme/widget:*",
            "--permissions-file",
            "permissions.json",
        ])
        .unwrap();

        assert_eq!(options.region, DEFAULT_REGION);
        assert_eq!(options.issuer_url, DEFAULT_ISSUER_URL);
        assert_eq!(options.audience, DEFAULT_AUDIENCE);
        assert_eq!(options.role_name, DEFAULT_ROLE_NAME);
        assert_eq!(options.certificate, CertificateSelector::Leaf);
        assert_eq!(options.output, OutputFormat::Text);
        assert!(options.github_output.is_none());
        assert!(!options.dry_run);
    }

    #[test]
    fn test_subject_pattern_required() {
        let result = parse(&["--permissions-file", "permissions.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_fallbacks() {
        let options = parse_with_env(
            &[
                ("OIDC_ROLE_SUBJECT_PATTERN", "repo:acme/widget:ref:refs/heads/main"),
                ("OIDC_ROLE_PERMISSIONS_FILE", "/etc/oidc-role/permissions.json"),
                ("OIDC_ROLE_REGION", "eu-west-2"),
                ("OIDC_ROLE_ROLE_NAME", "deployer"),
                ("OIDC_ROLE_CERTIFICATE", "top"),
                ("OIDC_ROLE_OUTPUT", "json"),
                ("GITHUB_OUTPUT", "/tmp/github_output"),
            ],
            &[],
        )
        .unwrap();

        assert_eq!(options.subject_pattern, "repo:acme/widget:ref:refs/heads/main");
        assert_eq!(
            options.permissions_file,
            PathBuf::from("/etc/oidc-role/permissions.json")
        );
        assert_eq!(options.region, "eu-west-2");
        assert_eq!(options.role_name, "deployer");
        assert_eq!(options.certificate, CertificateSelector::Top);
        assert_eq!(options.output, OutputFormat::Json);
        assert_eq!(
            options.github_output,
            Some(PathBuf::from("/tmp/github_output"))
        );
    }

    #[test]
    fn test_flags_override_environment() {
        let options = parse_with_env(
            &[("OIDC_ROLE_REGION", "eu-west-2")],
            &[
                "--subject-pattern",
                "repo:acme/widget:*",
                "--permissions-file",
                "permissions.json",
                "--region",
                "ap-southeast-2",
            ],
        )
        .unwrap();

        assert_eq!(options.region, "ap-southeast-2");
    }

    #[test]
    fn test_to_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_permissions(&dir, PERMISSIONS);
        let options = parse(&[
            "--subject-pattern",
            "repo:acme/widget:*",
            "--permissions-file",
            path.to_str().unwrap(),
            "--certificate",
            "top",
            "--dry-run",
        ])
        .unwrap();

        let request = options.to_request().unwrap();
        assert_eq!(request.policy_name, "git-actions-oidc-policy");
        assert_eq!(request.certificate, CertificateSelector::Top);
        assert!(request.permissions_document.contains("s3:GetObject"));
        assert!(request.thumbprint.is_none());
        assert!(options.dry_run);
    }

    #[test]
    fn test_to_request_with_thumbprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_permissions(&dir, PERMISSIONS);
        let options = parse(&[
            "--subject-pattern",
            "repo:acme/widget:*",
            "--permissions-file",
            path.to_str().unwrap(),
            "--thumbprint",
            "EB:53:86:05:D9:FD:C9:45:61:A8:E3:B0:52:59:D4:CA:27:1D:17:28",
        ])
        .unwrap();

        let request = options.to_request().unwrap();
        assert_eq!(
            request.thumbprint.unwrap().to_string(),
            "eb538605d9fdc94561a8e3b05259d4ca271d1728"
        );
    }

    #[test]
    fn test_to_request_missing_file() {
        let options = parse(&[
            "--subject-pattern",
            "repo:acme/widget:*",
            "--permissions-file",
            "/nonexistent/permissions.json",
        ])
        .unwrap();

        assert!(matches!(
            options.to_request(),
            Err(ProvisionError::Configuration(_))
        ));
    }

    #[test]
    fn test_to_request_malformed_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_permissions(&dir, "{not json");
        let options = parse(&[
            "--subject-pattern",
            "repo:acme/widget:*",
            "--permissions-file",
            path.to_str().unwrap(),
        ])
        .unwrap();

        assert!(matches!(
            options.to_request(),
            Err(ProvisionError::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_to_request_rejects_http_issuer() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_permissions(&dir, PERMISSIONS);
        let options = parse(&[
            "--subject-pattern",
            "repo:acme/widget:*",
            "--permissions-file",
            path.to_str().unwrap(),
            "--issuer-url",
            "http://token.actions.githubusercontent.com",
            "--thumbprint",
            "eb538605d9fdc94561a8e3b05259d4ca271d1728",
        ])
        .unwrap();

        assert!(matches!(
            options.to_request(),
            Err(ProvisionError::Configuration(_))
        ));
    }

    #[test]
    fn test_to_request_invalid_role_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_permissions(&dir, PERMISSIONS);
        let options = parse(&[
            "--subject-pattern",
            "repo:acme/widget:*",
            "--permissions-file",
            path.to_str().unwrap(),
            "--role-name",
            "no spaces allowed",
        ])
        .unwrap();

        assert!(matches!(
            options.to_request(),
            Err(ProvisionError::Configuration(_))
        ));
    }
}
