//! Service account email to IAM resource path.
//!
//! The project id is taken as the first domain label after the `@`. This is not
//! an email parser: `svc@my-project.iam.gserviceaccount.com` maps to
//! `projects/my-project/serviceAccounts/svc@my-project.iam.gserviceaccount.com`.

use crate::errors::KeywrapError;
use regex::Regex;
use std::sync::OnceLock;

static PROJECT_LABEL_REGEX: OnceLock<Regex> = OnceLock::new();

fn project_label_regex() -> &'static Regex {
    PROJECT_LABEL_REGEX.get_or_init(|| Regex::new(r"@(.*?)\.").unwrap())
}

/// Extract the project id (first label after `@`) from a service account email.
pub fn project_from_email(email: &str) -> Result<&str, KeywrapError> {
    let at_count = email.matches('@').count();
    if at_count != 1 {
        return Err(KeywrapError::UnparseableIdentifier(format!(
            "expected exactly one '@', found {} (value: {})",
            at_count, email
        )));
    }

    let captures = project_label_regex().captures(email).ok_or_else(|| {
        KeywrapError::UnparseableIdentifier(format!("no dotted domain after '@' (value: {})", email))
    })?;

    let project = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    if project.is_empty() {
        return Err(KeywrapError::UnparseableIdentifier(format!(
            "empty project label (value: {})",
            email
        )));
    }
    Ok(project)
}

/// Build the fully-qualified resource path the IAM keys API expects.
pub fn service_account_resource_path(email: &str) -> Result<String, KeywrapError> {
    let project = project_from_email(email)?;
    Ok(format!("projects/{}/serviceAccounts/{}", project, email))
}
