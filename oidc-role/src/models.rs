// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::constants::{
    MAX_AUDIENCE_LENGTH, MAX_ISSUER_URL_LENGTH, MAX_POLICY_NAME_LENGTH, MAX_REGION_LENGTH,
    MAX_ROLE_NAME_LENGTH, MAX_SUBJECT_PATTERN_LENGTH,
};
use crate::errors::ProvisionError;
use crate::policy::PolicyDocument;
use crate::thumbprint::{CertificateSelector, Fingerprint};

/// A step of the provisioning run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    FetchCertificate,
    RegisterProvider,
    BuildTrustPolicy,
    CreateRole,
    BuildPermissionPolicy,
    CreatePolicy,
    AttachPolicy,
    Emit,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::FetchCertificate,
        Step::RegisterProvider,
        Step::BuildTrustPolicy,
        Step::CreateRole,
        Step::BuildPermissionPolicy,
        Step::CreatePolicy,
        Step::AttachPolicy,
        Step::Emit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::FetchCertificate => "fetch-certificate",
            Step::RegisterProvider => "register-provider",
            Step::BuildTrustPolicy => "build-trust-policy",
            Step::CreateRole => "create-role",
            Step::BuildPermissionPolicy => "build-permission-policy",
            Step::CreatePolicy => "create-policy",
            Step::AttachPolicy => "attach-policy",
            Step::Emit => "emit",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An Amazon Resource Name.
///
/// `arn:<partition>:<service>:<region>:<account>:<resource>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    /// Parses a role ARN, rejecting anything that is not an IAM role.
    pub fn parse_role(value: &str) -> Result<Self, ProvisionError> {
        let arn: Arn = value.parse()?;
        if arn.service != "iam" || !arn.region.is_empty() {
            return Err(ProvisionError::Api(format!("not an IAM ARN: {value}")));
        }
        if arn.account.len() != 12 || !arn.account.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProvisionError::Api(format!(
                "invalid account id in ARN: {value}"
            )));
        }
        match arn.resource.strip_prefix("role/") {
            Some(name) if !name.is_empty() => Ok(arn),
            _ => Err(ProvisionError::Api(format!("not a role ARN: {value}"))),
        }
    }

    /// The last path segment of the resource, e.g. the role name.
    pub fn resource_name(&self) -> &str {
        self.resource
            .rsplit('/')
            .next()
            .unwrap_or(self.resource.as_str())
    }
}

impl FromStr for Arn {
    type Err = ProvisionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(6, ':');
        let invalid = || ProvisionError::Api(format!("malformed ARN: {value:?}"));

        if parts.next() != Some("arn") {
            return Err(invalid());
        }
        let partition = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let service = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let region = parts.next().ok_or_else(invalid)?;
        let account = parts.next().ok_or_else(invalid)?;
        let resource = parts.next().filter(|r| !r.is_empty()).ok_or_else(invalid)?;

        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

/// Validated inputs for one provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProvisionRequest {
    #[validate(length(min = 1, max = MAX_REGION_LENGTH))]
    #[validate(custom(function = "validate_aws_region"))]
    pub region: String,

    #[validate(length(min = 1, max = MAX_ISSUER_URL_LENGTH))]
    #[validate(custom(function = "validate_issuer_url"))]
    pub issuer_url: String,

    #[validate(length(min = 1, max = MAX_AUDIENCE_LENGTH))]
    pub audience: String,

    #[validate(length(min = 1, max = MAX_SUBJECT_PATTERN_LENGTH))]
    pub subject_pattern: String,

    #[validate(length(min = 1, max = MAX_ROLE_NAME_LENGTH))]
    #[validate(custom(function = "validate_iam_name"))]
    pub role_name: String,

    #[validate(length(min = 1, max = MAX_POLICY_NAME_LENGTH))]
    #[validate(custom(function = "validate_iam_name"))]
    pub policy_name: String,

    /// Raw permissions policy document, as supplied by the caller.
    pub permissions_document: String,

    pub certificate: CertificateSelector,

    /// Known thumbprint; skips the certificate fetch when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<Fingerprint>,
}

/// Validates AWS region format (e.g., "us-east-1", "eu-west-2")
/// Pattern: two lowercase letters, hyphen, lowercase letters, hyphen, digits
fn validate_aws_region(region: &str) -> Result<(), validator::ValidationError> {
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() < 3 {
        return Err(validator::ValidationError::new("invalid_aws_region"));
    }

    let first = parts[0];
    if first.len() != 2 || !first.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(validator::ValidationError::new("invalid_aws_region"));
    }

    // "gov" in us-gov-west-1 is also lowercase letters
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(validator::ValidationError::new("invalid_aws_region"));
        }
    }

    let last = parts[parts.len() - 1];
    if last.is_empty() || !last.chars().all(|c| c.is_ascii_digit()) {
        return Err(validator::ValidationError::new("invalid_aws_region"));
    }

    Ok(())
}

/// Issuer URLs must be `https://<host>`, the only form IAM accepts for an
/// OIDC provider.
fn validate_issuer_url(issuer_url: &str) -> Result<(), validator::ValidationError> {
    crate::policy::condition_host(issuer_url)
        .map(|_| ())
        .map_err(|_| validator::ValidationError::new("invalid_issuer_url"))
}

/// IAM role and policy names: alphanumerics and `+=,.@_-`
fn validate_iam_name(name: &str) -> Result<(), validator::ValidationError> {
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c))
    {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_iam_name"))
    }
}

/// The identifiers produced by a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    pub role_arn: String,
    pub role_name: String,
    pub provider_arn: String,
    pub policy_arn: String,
    pub thumbprint: Fingerprint,
}

/// What a run would create, without calling IAM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionPlan {
    pub issuer_url: String,
    pub audience: String,
    pub thumbprint: Fingerprint,
    pub role_name: String,
    pub policy_name: String,
    pub trust_policy: PolicyDocument,
    pub permissions_policy: PolicyDocument,
}
