// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The provisioning sequence.
//!
//! ```text
//! fetch-certificate -> register-provider -> build-trust-policy -> create-role
//!     -> build-permission-policy -> create-policy -> attach-policy -> emit
//! ```
//!
//! Every step consumes the identifier produced by the one before it, so the
//! steps run strictly in order. The issuer URL and the permissions document
//! are checked before the first IAM call, so bad input never leaves a provider
//! or role behind. After that the first failure aborts the run and is reported
//! with the [`Step`] it happened in; nothing created by earlier steps is rolled
//! back.

use std::sync::Arc;

use crate::errors::ProvisionError;
use crate::iam::IdentityApi;
use crate::models::{ProvisionOutcome, ProvisionPlan, ProvisionRequest, Step};
use crate::policy::{self, PolicyDocument};
use crate::thumbprint::{CertificateSource, Fingerprint};

/// Stands in for the account id in a dry-run trust policy.
pub const ACCOUNT_PLACEHOLDER: &str = "<account-id>";

pub struct Provisioner {
    certificates: Arc<dyn CertificateSource>,
    iam: Arc<dyn IdentityApi>,
}

impl Provisioner {
    pub fn new(certificates: Arc<dyn CertificateSource>, iam: Arc<dyn IdentityApi>) -> Self {
        Self { certificates, iam }
    }

    /// Runs every step up to, not including, emit.
    #[tracing::instrument(skip(self, request), fields(role = %request.role_name))]
    pub async fn run(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError> {
        check_documents(request)?;

        let thumbprint = self.fetch_certificate(request).await?;

        tracing::info!("[oidc-role] {}: {}", Step::RegisterProvider, request.issuer_url);
        let provider_arn = self
            .iam
            .create_open_id_connect_provider(
                &request.issuer_url,
                std::slice::from_ref(&request.audience),
                &[thumbprint],
            )
            .await
            .map_err(|e| e.at(Step::RegisterProvider))?;
        tracing::info!("[oidc-role] registered provider {}", provider_arn);

        let trust_policy = build_trust_policy(request, &provider_arn)?;

        tracing::info!("[oidc-role] {}: {}", Step::CreateRole, request.role_name);
        let role = self
            .iam
            .create_role(&request.role_name, &trust_policy)
            .await
            .map_err(|e| e.at(Step::CreateRole))?;
        tracing::info!("[oidc-role] created role {}", role.arn);

        let permissions = build_permissions_policy(request)?;

        tracing::info!("[oidc-role] {}: {}", Step::CreatePolicy, request.policy_name);
        let policy_arn = self
            .iam
            .create_policy(&request.policy_name, &permissions)
            .await
            .map_err(|e| e.at(Step::CreatePolicy))?;
        tracing::info!("[oidc-role] created policy {}", policy_arn);

        tracing::info!(
            "[oidc-role] {}: {} -> {}",
            Step::AttachPolicy,
            policy_arn,
            role.name
        );
        self.iam
            .attach_role_policy(&role.name, &policy_arn)
            .await
            .map_err(|e| e.at(Step::AttachPolicy))?;

        Ok(ProvisionOutcome {
            role_arn: role.arn,
            role_name: role.name,
            provider_arn,
            policy_arn,
            thumbprint,
        })
    }

    /// Fetches the thumbprint and builds both documents without calling IAM.
    #[tracing::instrument(skip(self, request), fields(role = %request.role_name))]
    pub async fn plan(&self, request: &ProvisionRequest) -> Result<ProvisionPlan, ProvisionError> {
        let thumbprint = self.fetch_certificate(request).await?;

        let host = policy::condition_host(&request.issuer_url)
            .map_err(|e| e.at(Step::BuildTrustPolicy))?;
        let provider_arn = format!("arn:aws:iam::{ACCOUNT_PLACEHOLDER}:oidc-provider/{host}");

        let trust_policy = build_trust_policy(request, &provider_arn)?;
        let permissions_policy = build_permissions_policy(request)?;

        Ok(ProvisionPlan {
            issuer_url: request.issuer_url.clone(),
            audience: request.audience.clone(),
            thumbprint,
            role_name: request.role_name.clone(),
            policy_name: request.policy_name.clone(),
            trust_policy,
            permissions_policy,
        })
    }

    async fn fetch_certificate(
        &self,
        request: &ProvisionRequest,
    ) -> Result<Fingerprint, ProvisionError> {
        tracing::info!("[oidc-role] {}: {}", Step::FetchCertificate, request.issuer_url);
        self.certificates
            .fingerprint(&request.issuer_url, request.certificate)
            .await
            .map_err(|e| e.at(Step::FetchCertificate))
    }
}

/// Fails on inputs that would stop the run after IAM resources exist.
fn check_documents(request: &ProvisionRequest) -> Result<(), ProvisionError> {
    policy::condition_host(&request.issuer_url).map_err(|e| e.at(Step::BuildTrustPolicy))?;
    policy::parse_permissions(&request.permissions_document)
        .map_err(|e| e.at(Step::BuildPermissionPolicy))?;
    Ok(())
}

fn build_trust_policy(
    request: &ProvisionRequest,
    provider_arn: &str,
) -> Result<PolicyDocument, ProvisionError> {
    let document = policy::trust_policy(
        &request.issuer_url,
        provider_arn,
        &request.audience,
        &request.subject_pattern,
    )
    .map_err(|e| e.at(Step::BuildTrustPolicy))?;

    tracing::debug!("[oidc-role] trust policy: {:?}", document.to_json());

    Ok(document)
}

fn build_permissions_policy(request: &ProvisionRequest) -> Result<PolicyDocument, ProvisionError> {
    let document = policy::permissions_policy(&request.permissions_document)
        .map_err(|e| e.at(Step::BuildPermissionPolicy))?;

    tracing::debug!("[oidc-role] permissions policy: {:?}", document.to_json());

    Ok(document)
}
