//! AWS backend error types

use convoy_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("aws CLI not found. Please install: https://aws.amazon.com/cli/")]
    CliNotFound,

    #[error("AWS authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("aws command failed: {0}")]
    CommandFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No updates are to be performed")]
    NoUpdates,

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected aws output: {0}")]
    UnexpectedOutput(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AwsError {
    /// Classify a failed command from its stderr
    pub fn from_stderr(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        if message.contains("No updates are to be performed") {
            AwsError::NoUpdates
        } else if message.contains("Throttling")
            || message.contains("Rate exceeded")
            || message.contains("TooManyRequestsException")
            || message.contains("RequestLimitExceeded")
        {
            AwsError::Throttled(message)
        } else if message.contains("Could not connect to the endpoint URL")
            || message.contains("Connect timeout on endpoint URL")
            || message.contains("Read timeout on endpoint URL")
            || message.contains("RequestTimeout")
            || message.contains("ServiceUnavailable")
        {
            AwsError::Unreachable(message)
        } else if message.contains("does not exist")
            || message.contains("NotFoundException")
            || message.contains("NoSuchBucket")
            || message.contains("NoSuchEntity")
        {
            AwsError::NotFound(message)
        } else if message.contains("AlreadyExistsException")
            || message.contains("ResourceExistsException")
        {
            AwsError::AlreadyExists(message)
        } else if message.contains("ExpiredToken")
            || message.contains("InvalidClientTokenId")
            || message.contains("Unable to locate credentials")
            || message.contains("AccessDenied")
        {
            AwsError::AuthenticationFailed(message)
        } else if message.contains("ValidationError") || message.contains("InvalidParameter") {
            AwsError::Validation(message)
        } else {
            AwsError::CommandFailed(message)
        }
    }

    /// Attach the stack name when converting stack-scoped errors
    pub fn into_stack_error(self, stack: &str) -> CloudError {
        match self {
            AwsError::Validation(reason) | AwsError::AuthenticationFailed(reason) => {
                CloudError::BackendRejected {
                    stack: stack.to_string(),
                    reason,
                }
            }
            AwsError::NoUpdates => CloudError::NoChanges(stack.to_string()),
            AwsError::NotFound(_) => CloudError::StackNotFound(stack.to_string()),
            other => other.into(),
        }
    }
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::Throttled(message) | AwsError::Unreachable(message) => {
                CloudError::Transient(message)
            }
            AwsError::CliNotFound => CloudError::precondition(
                "aws CLI not found",
                "Install the AWS CLI v2 and make sure `aws` is on PATH",
            ),
            AwsError::AuthenticationFailed(message) => CloudError::precondition(
                format!("AWS authentication failed: {}", message),
                "Run `aws configure` or pass --profile",
            ),
            AwsError::NoUpdates => CloudError::NoChanges(String::new()),
            AwsError::NotFound(message) => CloudError::RecordNotFound(message),
            AwsError::AlreadyExists(message) => CloudError::RecordAlreadyExists(message),
            AwsError::Validation(message) | AwsError::CommandFailed(message) => {
                CloudError::CommandFailed(message)
            }
            AwsError::UnexpectedOutput(message) => CloudError::CommandFailed(message),
            AwsError::JsonError(e) => CloudError::Json(e),
            AwsError::IoError(e) => CloudError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_stderr() {
        assert!(matches!(
            AwsError::from_stderr(
                "An error occurred (ValidationError) when calling the UpdateStack operation: No updates are to be performed."
            ),
            AwsError::NoUpdates
        ));
        assert!(matches!(
            AwsError::from_stderr(
                "An error occurred (ValidationError) when calling the DescribeStacks operation: Stack with id my-app-test does not exist"
            ),
            AwsError::NotFound(_)
        ));
        assert!(matches!(
            AwsError::from_stderr("An error occurred (Throttling) when calling the DescribeStackEvents operation: Rate exceeded"),
            AwsError::Throttled(_)
        ));
        assert!(matches!(
            AwsError::from_stderr(
                "An error occurred (ValidationError) when calling the CreateStack operation: Template format error"
            ),
            AwsError::Validation(_)
        ));
    }

    #[test]
    fn test_stack_errors_carry_stack_name() {
        let err = AwsError::Validation("Template format error".into()).into_stack_error("my-app-test");
        assert!(matches!(err, CloudError::BackendRejected { ref stack, .. } if stack == "my-app-test"));

        let err = AwsError::NoUpdates.into_stack_error("my-app-test");
        assert!(matches!(err, CloudError::NoChanges(ref stack) if stack == "my-app-test"));

        let err: CloudError = AwsError::Throttled("Rate exceeded".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_only_throttling_and_network_errors_are_retried() {
        let timeout: CloudError = AwsError::from_stderr(
            "Read timeout on endpoint URL: \"https://cloudformation.us-east-1.amazonaws.com/\"",
        )
        .into();
        assert!(timeout.is_retryable());

        let offline: CloudError =
            AwsError::from_stderr("Could not connect to the endpoint URL: \"https://ecs.us-east-1.amazonaws.com/\"")
                .into();
        assert!(offline.is_retryable());

        let denied: CloudError = AwsError::from_stderr(
            "An error occurred (AccessDeniedException) when calling the RunTask operation: not authorized",
        )
        .into();
        assert!(!denied.is_retryable());

        let invalid: CloudError = AwsError::from_stderr(
            "An error occurred (InvalidParameterException) when calling the RunTask operation: bad subnet",
        )
        .into();
        assert!(!invalid.is_retryable());

        let unknown: CloudError = AwsError::from_stderr("something else went wrong").into();
        assert!(!unknown.is_retryable());
    }
}
