//! AWS error classification
//!
//! Control-plane failures are sorted by their error-metadata code into the
//! few categories reconciliation cares about: absence is a normal branch of
//! every lookup, propagation delays are retried, and everything else aborts
//! the invocation.

use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use thiserror::Error;

/// What a failed control-plane call means for reconciliation
#[derive(Debug, Clone, Error)]
pub enum AwsError {
    /// The resource does not exist
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// A create raced another creator
    #[error("Resource already exists")]
    AlreadyExists,

    /// A freshly created role is not yet assumable by Lambda
    #[error("IAM role not yet assumable (eventual consistency)")]
    IamPropagationDelay,

    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource is still referenced by another resource
    #[error("Resource has dependent objects")]
    DependencyViolation,

    /// KMS key is already scheduled for deletion
    #[error("Key is pending deletion")]
    PendingDeletion,

    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    NotFound,
    AlreadyExists,
    Throttled,
    Dependency,
    /// Only classified when the message says the key is pending deletion
    KeyState,
    /// Known code without a category of its own; listed for its hint
    Other,
}

/// Codes this crate knows how to interpret, with an operator hint where one helps
const CODES: &[(&str, Category, Option<&str>)] = &[
    ("NoSuchEntity", Category::NotFound, None),
    ("NotFound", Category::NotFound, None),
    ("NotFoundException", Category::NotFound, None),
    ("NoSuchKey", Category::NotFound, None),
    ("NoSuchBucket", Category::NotFound, None),
    ("NoSuchConfigRuleException", Category::NotFound, None),
    ("ResourceNotFoundException", Category::NotFound, None),
    ("ResourceNotFound", Category::NotFound, None),
    ("ParameterNotFound", Category::NotFound, None),
    ("EntityAlreadyExists", Category::AlreadyExists, None),
    ("AlreadyExistsException", Category::AlreadyExists, None),
    ("ResourceConflictException", Category::AlreadyExists, None),
    ("ResourceInUseException", Category::AlreadyExists, None),
    ("ConflictException", Category::AlreadyExists, None),
    ("Throttling", Category::Throttled, Some(RETRY_HINT)),
    ("ThrottlingException", Category::Throttled, Some(RETRY_HINT)),
    ("TooManyRequestsException", Category::Throttled, Some(RETRY_HINT)),
    ("RequestLimitExceeded", Category::Throttled, Some(RETRY_HINT)),
    ("DeleteConflict", Category::Dependency, None),
    ("DependencyViolation", Category::Dependency, None),
    ("KMSInvalidStateException", Category::KeyState, None),
    ("AccessDenied", Category::Other, Some(ROLE_HINT)),
    ("AccessDeniedException", Category::Other, Some(ROLE_HINT)),
    (
        "NoAvailableConfigurationRecorderException",
        Category::Other,
        Some("Enable an AWS Config recorder in the target account and region before deploying rules."),
    ),
    (
        "InsufficientDeliveryPolicyException",
        Category::Other,
        Some("Enable an AWS Config delivery channel in the target account and region."),
    ),
    ("LimitExceeded", Category::Other, Some("Request a service limit increase in Service Quotas.")),
];

const RETRY_HINT: &str = "AWS API rate limit hit. Re-run the request; completed steps are skipped.";
const ROLE_HINT: &str =
    "Check that the execution role exists in the target account and trusts the management account.";

fn lookup(code: &str) -> Option<&'static (&'static str, Category, Option<&'static str>)> {
    CODES.iter().find(|(c, _, _)| *c == code)
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Worth another attempt after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AwsError::IamPropagationDelay | AwsError::Throttled | AwsError::DependencyViolation
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }

    /// A delete may treat this as "already gone"
    pub fn is_absent(&self) -> bool {
        matches!(self, AwsError::NotFound { .. } | AwsError::PendingDeletion)
    }

    /// Operator hint for the failure, when one is known
    pub fn suggestion(&self) -> Option<String> {
        let code = match self {
            AwsError::Throttled => "Throttling",
            AwsError::Sdk { code: Some(code), .. } => code.as_str(),
            _ => return None,
        };
        lookup(code).and_then(|(_, _, hint)| hint.map(str::to_string))
    }
}

/// Classify a failure from its error code and message
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();
    let category = code.and_then(lookup).map(|(_, category, _)| *category);

    match (code, category) {
        (_, Some(Category::NotFound)) => AwsError::NotFound { message },
        (_, Some(Category::AlreadyExists)) => AwsError::AlreadyExists,
        (_, Some(Category::Throttled)) => AwsError::Throttled,
        (_, Some(Category::Dependency)) => AwsError::DependencyViolation,
        (_, Some(Category::KeyState)) if message.contains("pending deletion") => AwsError::PendingDeletion,
        (Some("InvalidParameterValueException"), _) if message.contains("cannot be assumed") => {
            AwsError::IamPropagationDelay
        }
        _ => AwsError::Sdk {
            code: code.map(str::to_string),
            message,
        },
    }
}

/// Classify any SDK error (or operation error) through its error metadata
pub fn classify_sdk_error<E: ProvideErrorMetadata>(error: &E) -> AwsError {
    classify_aws_error(error.code(), error.message())
}

/// Turn a "not found" SDK failure into `Ok(None)`.
///
/// Existence checks use this so that absence is an ordinary branch rather
/// than an error, while every other failure still propagates.
pub fn ignore_not_found<T, E>(result: Result<T, E>) -> Result<Option<T>, E>
where
    E: ProvideErrorMetadata,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if classify_sdk_error(&e).is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Turn an "already gone" SDK failure into `Ok(false)` for delete calls
pub fn ignore_absent<T, E>(result: Result<T, E>) -> Result<bool, E>
where
    E: ProvideErrorMetadata,
{
    match result {
        Ok(_) => Ok(true),
        Err(e) if classify_sdk_error(&e).is_absent() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Attach a classified [`AwsError`] to SDK failures on their way into `anyhow`
pub trait AwsResultExt<T> {
    /// Like `anyhow::Context::context`, with the classification kept in the
    /// chain for [`classify_anyhow_error`]
    fn aws_context<C>(self, context: C) -> anyhow::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;
}

impl<T, E> AwsResultExt<T> for Result<T, E>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    fn aws_context<C>(self, context: C) -> anyhow::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| {
            let classified = classify_sdk_error(&e);
            anyhow::Error::new(e).context(classified).context(context)
        })
    }
}

/// Classification of an error that already went through `anyhow`.
///
/// Failures that never carried AWS error metadata come back as an
/// uncoded [`AwsError::Sdk`].
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    match error.downcast_ref::<AwsError>() {
        Some(classified) => classified.clone(),
        None => AwsError::Sdk {
            code: None,
            message: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use aws_smithy_types::error::ErrorMetadata;

    #[test]
    fn test_categories() {
        assert!(classify_aws_error(Some("NoSuchEntity"), Some("role x")).is_not_found());
        assert!(classify_aws_error(Some("ResourceNotFoundException"), None).is_not_found());
        assert!(classify_aws_error(Some("EntityAlreadyExists"), None).is_already_exists());
        assert!(matches!(
            classify_aws_error(Some("TooManyRequestsException"), None),
            AwsError::Throttled
        ));
        assert!(classify_aws_error(Some("DeleteConflict"), None).is_retryable());
        assert!(matches!(
            classify_aws_error(Some("SomeNewError"), Some("details")),
            AwsError::Sdk { code: Some(_), .. }
        ));
        assert!(matches!(
            classify_aws_error(None, Some("something failed")),
            AwsError::Sdk { code: None, .. }
        ));
    }

    #[test]
    fn test_every_listed_code_classifies() {
        for (code, category, _) in CODES {
            let err = classify_aws_error(Some(*code), Some("key is pending deletion"));
            let expected_sdk = *category == Category::Other;
            assert_eq!(matches!(err, AwsError::Sdk { .. }), expected_sdk, "{code}");
        }
    }

    #[test]
    fn test_role_propagation_delay() {
        let err = classify_aws_error(
            Some("InvalidParameterValueException"),
            Some("The role defined for the function cannot be assumed by Lambda."),
        );
        assert!(matches!(err, AwsError::IamPropagationDelay));
        assert!(err.is_retryable());

        let other = classify_aws_error(Some("InvalidParameterValueException"), Some("bad runtime"));
        assert!(matches!(other, AwsError::Sdk { .. }));
    }

    #[test]
    fn test_pending_deletion_is_absent() {
        let err = classify_aws_error(
            Some("KMSInvalidStateException"),
            Some("arn:aws:kms:us-east-1:111111111111:key/abc is pending deletion."),
        );
        assert!(err.is_absent());
        assert!(!err.is_not_found());

        let disabled = classify_aws_error(Some("KMSInvalidStateException"), Some("key is disabled"));
        assert!(!disabled.is_absent());
    }

    #[test]
    fn test_ignore_not_found() {
        let missing: Result<u8, ErrorMetadata> = Err(ErrorMetadata::builder().code("NotFoundException").build());
        assert_eq!(ignore_not_found(missing).unwrap(), None);

        let denied: Result<u8, ErrorMetadata> = Err(ErrorMetadata::builder().code("AccessDenied").build());
        assert!(ignore_not_found(denied).is_err());

        let found: Result<u8, ErrorMetadata> = Ok(7);
        assert_eq!(ignore_not_found(found).unwrap(), Some(7));
    }

    #[test]
    fn test_ignore_absent() {
        let gone: Result<(), ErrorMetadata> = Err(ErrorMetadata::builder().code("ResourceNotFoundException").build());
        assert!(!ignore_absent(gone).unwrap());

        let deleted: Result<(), ErrorMetadata> = Ok(());
        assert!(ignore_absent(deleted).unwrap());
    }

    #[test]
    fn test_hints() {
        let denied: Result<(), ErrorMetadata> = Err(ErrorMetadata::builder()
            .code("AccessDeniedException")
            .message("not authorized to perform lambda:CreateFunction")
            .build());
        let err = denied.aws_context("Failed to create Lambda function").unwrap_err();
        let hint = classify_anyhow_error(&err).suggestion().unwrap();
        assert!(hint.contains("execution role"));
        assert!(err.to_string().starts_with("Failed to create Lambda function"));

        let throttled: anyhow::Error = AwsError::Throttled.into();
        assert!(classify_anyhow_error(&throttled).suggestion().is_some());

        assert!(classify_anyhow_error(&anyhow::anyhow!("connection refused")).suggestion().is_none());
        assert!(classify_aws_error(Some("NoSuchEntity"), None).suggestion().is_none());
    }

    #[test]
    fn test_classification_survives_outer_context() {
        let missing: Result<(), ErrorMetadata> = Err(ErrorMetadata::builder().code("NoSuchEntity").build());
        let err = missing
            .aws_context("Failed to get IAM role")
            .context("Failed to reconcile sharing role")
            .unwrap_err();
        assert!(classify_anyhow_error(&err).is_not_found());

        // a message that merely mentions a code is not classified by it
        let text = anyhow::anyhow!("code: Some(\"AccessDeniedException\")");
        assert!(matches!(classify_anyhow_error(&text), AwsError::Sdk { code: None, .. }));
    }
}
