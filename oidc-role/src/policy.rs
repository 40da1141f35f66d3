// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! IAM policy documents.
//!
//! Two documents are involved in a run:
//!
//! - the **trust policy** of the role, built by [`trust_policy`]. It lets the
//!   federated OIDC provider assume the role when the token audience matches
//!   exactly and the token subject matches the subject pattern;
//! - the **permissions policy**, supplied by the caller and checked by
//!   [`permissions_policy`] before anything is sent to IAM.
//!
//! # Security
//!
//! The subject pattern is the whole access-control boundary of the role. A
//! pattern such as `repo:acme/*` lets every repository of the organization
//! assume the role, so wildcards in the repository part are logged at `warn`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants::{
    ASSUME_ROLE_ACTION, AUDIENCE_CONDITION_SUFFIX, LEGACY_POLICY_VERSION,
    MAX_POLICY_DOCUMENT_LENGTH, POLICY_VERSION, SUBJECT_CONDITION_SUFFIX, WILDCARD,
};
use crate::errors::ProvisionError;

/// `{operator: {key: value}}`, e.g. `{"StringLike": {"host:sub": "repo:org/*"}}`
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Statement", deserialize_with = "one_or_many_statements")]
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Action", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OneOrMany>,
    #[serde(rename = "NotAction", default, skip_serializing_if = "Option::is_none")]
    pub not_action: Option<OneOrMany>,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(rename = "Resource", default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    #[serde(rename = "NotResource", default, skip_serializing_if = "Option::is_none")]
    pub not_resource: Option<OneOrMany>,
    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// IAM accepts either a single string or a list in most elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().all(str::is_empty)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.iter().any(|value| value == needle)
    }
}

/// `"*"` or `{"Federated": ..., "AWS": ..., "Service": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    Any(String),
    Typed(BTreeMap<String, OneOrMany>),
}

impl Principal {
    pub fn federated(provider_arn: &str) -> Self {
        Self::Typed(BTreeMap::from([(
            "Federated".to_string(),
            OneOrMany::One(provider_arn.to_string()),
        )]))
    }
}

fn one_or_many_statements<'de, D>(deserializer: D) -> Result<Vec<Statement>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Statements {
        One(Box<Statement>),
        Many(Vec<Statement>),
    }

    Ok(match Statements::deserialize(deserializer)? {
        Statements::One(statement) => vec![*statement],
        Statements::Many(statements) => statements,
    })
}

impl PolicyDocument {
    /// Compact JSON, the form sent to IAM.
    pub fn to_json(&self) -> Result<String, ProvisionError> {
        Ok(serde_json::to_string(self)?)
    }

    /// True when some `Allow` statement grants every action on every resource.
    pub fn is_unrestricted(&self) -> bool {
        self.statement.iter().any(|s| {
            s.effect == Effect::Allow
                && s.action.as_ref().is_some_and(|a| a.contains(WILDCARD))
                && s.resource.as_ref().is_some_and(|r| r.contains(WILDCARD))
        })
    }

    /// Structural checks IAM applies to identity-based (permissions) policies.
    pub fn validate_permissions(&self) -> Result<(), ProvisionError> {
        if self.version != POLICY_VERSION && self.version != LEGACY_POLICY_VERSION {
            return Err(ProvisionError::MalformedDocument(format!(
                "unsupported policy version: {}",
                self.version
            )));
        }

        if self.statement.is_empty() {
            return Err(ProvisionError::MalformedDocument(
                "policy has no statements".to_string(),
            ));
        }

        for (i, statement) in self.statement.iter().enumerate() {
            let name = statement
                .sid
                .clone()
                .unwrap_or_else(|| format!("#{i}"));

            if statement.principal.is_some() {
                return Err(ProvisionError::MalformedDocument(format!(
                    "statement {name}: permissions policies cannot name a Principal"
                )));
            }

            match (&statement.action, &statement.not_action) {
                (Some(action), None) | (None, Some(action)) if !action.is_empty() => {}
                (Some(_), Some(_)) => {
                    return Err(ProvisionError::MalformedDocument(format!(
                        "statement {name}: Action and NotAction are mutually exclusive"
                    )));
                }
                _ => {
                    return Err(ProvisionError::MalformedDocument(format!(
                        "statement {name}: missing Action"
                    )));
                }
            }

            match (&statement.resource, &statement.not_resource) {
                (Some(resource), None) | (None, Some(resource)) if !resource.is_empty() => {}
                (Some(_), Some(_)) => {
                    return Err(ProvisionError::MalformedDocument(format!(
                        "statement {name}: Resource and NotResource are mutually exclusive"
                    )));
                }
                _ => {
                    return Err(ProvisionError::MalformedDocument(format!(
                        "statement {name}: missing Resource"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Removes a leading `<scheme>://`.
///
/// Infallible and idempotent: a value without a scheme is returned as is.
pub fn strip_scheme(url: &str) -> &str {
    match url.split_once("://") {
        Some((scheme, rest)) if is_scheme(scheme) => rest,
        _ => url,
    }
}

/// RFC 3986: `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`
fn is_scheme(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// The prefix of the `aud`/`sub` condition keys for an issuer URL.
///
/// Unlike [`strip_scheme`] this insists on an `https://` URL, the only kind
/// IAM accepts for an OIDC provider.
pub fn condition_host(provider_url: &str) -> Result<String, ProvisionError> {
    let trimmed = provider_url.trim();
    let (scheme, _) = trimmed.split_once("://").ok_or_else(|| {
        ProvisionError::Configuration(format!("provider URL has no scheme: {provider_url:?}"))
    })?;

    if !scheme.eq_ignore_ascii_case("https") {
        return Err(ProvisionError::Configuration(format!(
            "provider URL must use https: {provider_url:?}"
        )));
    }

    let host = strip_scheme(trimmed).trim_end_matches('/');
    if host.is_empty() {
        return Err(ProvisionError::Configuration(format!(
            "provider URL has no host: {provider_url:?}"
        )));
    }

    Ok(host.to_string())
}

/// True when the repository part of a GitHub subject pattern is a wildcard,
/// i.e. more than one repository may assume the role.
pub fn is_broad_subject(subject_pattern: &str) -> bool {
    let Some(rest) = subject_pattern.strip_prefix("repo:") else {
        return subject_pattern.contains(['*', '?']);
    };
    let repository = rest.split(':').next().unwrap_or(rest);
    repository.is_empty() || repository.contains(['*', '?'])
}

/// Builds the role trust policy for a federated OIDC provider.
pub fn trust_policy(
    provider_url: &str,
    provider_arn: &str,
    audience: &str,
    subject_pattern: &str,
) -> Result<PolicyDocument, ProvisionError> {
    let host = condition_host(provider_url)?;

    if audience.is_empty() {
        return Err(ProvisionError::Configuration("audience is empty".to_string()));
    }
    if subject_pattern.is_empty() {
        return Err(ProvisionError::Configuration(
            "subject pattern is empty".to_string(),
        ));
    }
    if is_broad_subject(subject_pattern) {
        tracing::warn!(
            "[oidc-role] subject pattern {:?} matches more than one repository",
            subject_pattern
        );
    }

    let condition = ConditionBlock::from([
        (
            "StringEquals".to_string(),
            BTreeMap::from([(
                format!("{host}{AUDIENCE_CONDITION_SUFFIX}"),
                Value::String(audience.to_string()),
            )]),
        ),
        (
            "StringLike".to_string(),
            BTreeMap::from([(
                format!("{host}{SUBJECT_CONDITION_SUFFIX}"),
                Value::String(subject_pattern.to_string()),
            )]),
        ),
    ]);

    Ok(PolicyDocument {
        version: POLICY_VERSION.to_string(),
        id: None,
        statement: vec![Statement {
            sid: None,
            effect: Effect::Allow,
            action: Some(OneOrMany::One(ASSUME_ROLE_ACTION.to_string())),
            not_action: None,
            principal: Some(Principal::federated(provider_arn)),
            resource: None,
            not_resource: None,
            condition: Some(condition),
        }],
    })
}

/// Parses and checks a caller-supplied permissions policy without logging.
///
/// The size limit applies to the compact form sent to IAM, so indentation in
/// the caller's file does not count against it.
pub fn parse_permissions(document: &str) -> Result<PolicyDocument, ProvisionError> {
    let policy: PolicyDocument = serde_json::from_str(document)?;
    policy.validate_permissions()?;

    let compact = policy.to_json()?;
    if compact.len() > MAX_POLICY_DOCUMENT_LENGTH {
        return Err(ProvisionError::MalformedDocument(format!(
            "policy is {} characters without whitespace, the limit is {}",
            compact.len(),
            MAX_POLICY_DOCUMENT_LENGTH
        )));
    }

    Ok(policy)
}

/// Parses and checks a caller-supplied permissions policy.
pub fn permissions_policy(document: &str) -> Result<PolicyDocument, ProvisionError> {
    let policy = parse_permissions(document)?;

    if policy.is_unrestricted() {
        tracing::warn!("[oidc-role] permissions policy allows every action on every resource");
    }

    Ok(policy)
}
