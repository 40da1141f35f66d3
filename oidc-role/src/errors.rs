// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::models::Step;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unable to fetch certificate: {0}")]
    CertificateFetch(String),
    #[error("malformed policy document: {0}")]
    MalformedDocument(String),
    #[error("entity already exists: {0}")]
    Conflict(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("IAM error: {0}")]
    Api(String),
    #[error("unable to write output: {0}")]
    Output(String),
    #[error("the provisioning run failed at step {step}: {source}")]
    StepFailed {
        step: Step,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// Wraps the error with the step it was raised in. Already wrapped errors
    /// keep their original step.
    pub fn at(self, step: Step) -> Self {
        match self {
            Self::StepFailed { .. } => self,
            other => Self::StepFailed {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The step that failed, if known.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Classifies an IAM SDK error by its service error code.
    ///
    /// The service message is kept verbatim so the operator sees what IAM said.
    pub fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        let (code, message) = match &err {
            SdkError::ServiceError(context) => (
                context.err().code().map(str::to_string),
                context
                    .err()
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| context.err().to_string()),
            ),
            other => (None, DisplayErrorContext(other).to_string()),
        };

        classify(operation, code.as_deref(), &message)
    }
}

/// Maps an IAM error code onto the error taxonomy.
pub(crate) fn classify(operation: &str, code: Option<&str>, message: &str) -> ProvisionError {
    let detail = match code {
        Some(code) => format!("{operation} failed ({code}): {message}"),
        None => format!("{operation} failed: {message}"),
    };

    match code {
        Some("EntityAlreadyExists") => ProvisionError::Conflict(detail),
        Some("MalformedPolicyDocument") => ProvisionError::MalformedDocument(detail),
        Some(
            "AccessDenied"
            | "AccessDeniedException"
            | "InvalidClientTokenId"
            | "ExpiredToken"
            | "UnrecognizedClientException"
            | "SignatureDoesNotMatch",
        ) => ProvisionError::Unauthorized(detail),
        _ => ProvisionError::Api(detail),
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(source: serde_json::Error) -> Self {
        tracing::error!("{:?}", source);
        ProvisionError::MalformedDocument(source.to_string())
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(source: std::io::Error) -> Self {
        tracing::error!("{:?}", source);
        ProvisionError::Output(source.to_string())
    }
}

impl From<validator::ValidationErrors> for ProvisionError {
    fn from(source: validator::ValidationErrors) -> Self {
        ProvisionError::Configuration(source.to_string())
    }
}
