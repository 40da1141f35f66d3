// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # oidc-role
//!
//! Provisions the AWS IAM objects that let GitHub Actions workflows assume a
//! role through OpenID Connect federation, without long-lived credentials.
//!
//! ## Sequence
//!
//! ```text
//! issuer (TLS) -> fingerprint -> OIDC provider -> trust policy -> role
//!                                                                  |
//!                       permissions policy -> policy -> attach <---+
//!                                                                  |
//!                                                       role ARN <-+
//! ```
//!
//! Every step depends on the output of the previous one; the first failure
//! aborts the run and names the step that failed.
//!
//! ## Modules
//!
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: Defaults and IAM limits
//! - [`errors`]: Error taxonomy and IAM error classification
//! - [`iam`]: IAM operations behind the [`iam::IdentityApi`] trait
//! - [`models`]: Requests, outcomes, steps and ARNs
//! - [`output`]: Exporting the role ARN to the caller
//! - [`policy`]: Trust and permissions policy documents
//! - [`provisioner`]: The provisioning sequence
//! - [`thumbprint`]: Issuer certificate fetching and SHA-1 fingerprints
//!
//! ## Usage
//!
//! ```bash
//! oidc-role --subject-pattern 'repo:acme/widget:*' --permissions-file permissions.json
//! ```
//!
//! ## Security Considerations
//!
//! - The subject pattern is the only thing deciding which workflows may assume
//!   the role; wildcard repositories are logged at `warn`
//! - The permissions policy is always supplied by the caller, never defaulted
//! - The issuer chain is verified against the webpki roots before it is
//!   fingerprinted

pub mod configuration;
pub mod constants;
pub mod errors;
pub mod iam;
pub mod models;
pub mod output;
pub mod policy;
pub mod provisioner;
pub mod thumbprint;
