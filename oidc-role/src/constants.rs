// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// GitHub Actions OIDC token issuer
pub const DEFAULT_ISSUER_URL: &str = "https://token.actions.githubusercontent.com";
pub const DEFAULT_AUDIENCE: &str = "sts.amazonaws.com";
pub const DEFAULT_ROLE_NAME: &str = "git-actions-oidc";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const POLICY_NAME_SUFFIX: &str = "-policy";

/// https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_policies_elements_version.html
pub const POLICY_VERSION: &str = "2012-10-17";
pub const LEGACY_POLICY_VERSION: &str = "2008-10-17";
pub const ASSUME_ROLE_ACTION: &str = "sts:AssumeRoleWithWebIdentity";
pub const AUDIENCE_CONDITION_SUFFIX: &str = ":aud";
pub const SUBJECT_CONDITION_SUFFIX: &str = ":sub";
pub const WILDCARD: &str = "*";

pub const HTTPS_PORT: u16 = 443;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

// Validation constants for ProvisionRequest
// https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_iam-quotas.html
pub const MAX_ROLE_NAME_LENGTH: u64 = 64;
pub const MAX_POLICY_NAME_LENGTH: u64 = 128;
pub const MAX_REGION_LENGTH: u64 = 64;
pub const MAX_AUDIENCE_LENGTH: u64 = 255;
pub const MAX_SUBJECT_PATTERN_LENGTH: u64 = 1024;
pub const MAX_ISSUER_URL_LENGTH: u64 = 255;
pub const MAX_POLICY_DOCUMENT_LENGTH: usize = 6144;
