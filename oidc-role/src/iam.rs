// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! IAM operations used by a provisioning run.
//!
//! [`IdentityApi`] is the seam between the provisioning sequence and AWS.
//! [`AwsIdentityApi`] implements it with `aws-sdk-iam`; every SDK error is
//! classified through [`ProvisionError::from_sdk`] and never retried here
//! beyond what the SDK's own retry policy does.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_iam::config::Region;
use aws_sdk_iam::Client;

use crate::errors::ProvisionError;
use crate::models::Arn;
use crate::policy::PolicyDocument;
use crate::thumbprint::Fingerprint;

/// A role as returned by `CreateRole`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRole {
    pub name: String,
    pub arn: String,
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Registers an OIDC identity provider and returns its ARN.
    async fn create_open_id_connect_provider(
        &self,
        url: &str,
        client_ids: &[String],
        thumbprints: &[Fingerprint],
    ) -> Result<String, ProvisionError>;

    /// Creates a role whose trust policy is `trust_policy`.
    async fn create_role(
        &self,
        role_name: &str,
        trust_policy: &PolicyDocument,
    ) -> Result<CreatedRole, ProvisionError>;

    /// Creates a managed policy and returns its ARN.
    async fn create_policy(
        &self,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> Result<String, ProvisionError>;

    async fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), ProvisionError>;
}

pub struct AwsIdentityApi {
    client: Client,
}

impl AwsIdentityApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Loads credentials from the default provider chain.
    ///
    /// `endpoint` overrides the IAM endpoint, e.g. for a local emulator.
    pub async fn load(region: &str, endpoint: Option<&str>) -> Self {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_iam::config::Builder::from(&shared_config);
        if let Some(endpoint) = endpoint {
            tracing::info!("[oidc-role] using IAM endpoint {}", endpoint);
            builder = builder.endpoint_url(endpoint);
        }

        Self::new(Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl IdentityApi for AwsIdentityApi {
    #[tracing::instrument(skip(self, thumbprints))]
    async fn create_open_id_connect_provider(
        &self,
        url: &str,
        client_ids: &[String],
        thumbprints: &[Fingerprint],
    ) -> Result<String, ProvisionError> {
        let output = self
            .client
            .create_open_id_connect_provider()
            .url(url)
            .set_client_id_list(Some(client_ids.to_vec()))
            .set_thumbprint_list(Some(thumbprints.iter().map(|t| t.to_string()).collect()))
            .send()
            .await
            .map_err(|e| ProvisionError::from_sdk("CreateOpenIDConnectProvider", e))?;

        output
            .open_id_connect_provider_arn()
            .map(str::to_string)
            .ok_or_else(|| {
                ProvisionError::Api("CreateOpenIDConnectProvider returned no ARN".to_string())
            })
    }

    #[tracing::instrument(skip(self, trust_policy))]
    async fn create_role(
        &self,
        role_name: &str,
        trust_policy: &PolicyDocument,
    ) -> Result<CreatedRole, ProvisionError> {
        let output = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy.to_json()?)
            .send()
            .await
            .map_err(|e| ProvisionError::from_sdk("CreateRole", e))?;

        let role = output
            .role()
            .ok_or_else(|| ProvisionError::Api("CreateRole returned no role".to_string()))?;

        // fail here rather than hand a bad ARN to the workflow
        Arn::parse_role(role.arn())?;

        Ok(CreatedRole {
            name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        })
    }

    #[tracing::instrument(skip(self, document))]
    async fn create_policy(
        &self,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> Result<String, ProvisionError> {
        let output = self
            .client
            .create_policy()
            .policy_name(policy_name)
            .policy_document(document.to_json()?)
            .send()
            .await
            .map_err(|e| ProvisionError::from_sdk("CreatePolicy", e))?;

        output
            .policy()
            .and_then(|policy| policy.arn())
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::Api("CreatePolicy returned no ARN".to_string()))
    }

    #[tracing::instrument(skip(self))]
    async fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), ProvisionError> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| ProvisionError::from_sdk("AttachRolePolicy", e))?;

        Ok(())
    }
}
