use crate::{ApiError, ApiResult};

pub(crate) const USERNAME_MIN: usize = 3;
pub(crate) const USERNAME_MAX: usize = 30;

pub(crate) fn char_len(value: &str) -> usize {
    value.chars().count()
}

pub(crate) fn require_length(field: &str, value: &str, min: usize, max: usize) -> ApiResult<()> {
    let len = char_len(value);
    if len < min {
        return Err(ApiError::validation(format!(
            "{field} must be at least {min} characters"
        )));
    }
    if len > max {
        return Err(ApiError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

pub(crate) fn max_length(field: &str, value: Option<&str>, max: usize) -> ApiResult<()> {
    match value {
        Some(value) if char_len(value) > max => Err(ApiError::validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn require_non_blank(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(())
}

pub(crate) fn one_of(field: &str, value: &str, allowed: &[&str]) -> ApiResult<()> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(ApiError::validation(format!(
        "{field} must be one of: {}",
        allowed.join(", ")
    )))
}

pub(crate) fn is_valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
            .unwrap_or(false)
}

pub(crate) fn validate_email(value: &str) -> ApiResult<()> {
    if is_valid_email(value) {
        Ok(())
    } else {
        Err(ApiError::validation("email must be a valid email address"))
    }
}

pub(crate) fn validate_username(value: &str) -> ApiResult<()> {
    require_length("username", value, USERNAME_MIN, USERNAME_MAX)?;
    if !value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(ApiError::validation(
            "username may contain only letters, numbers and underscores",
        ));
    }
    Ok(())
}

pub(crate) fn is_http_url(value: &str) -> bool {
    reqwest::Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

pub(crate) fn validate_url(field: &str, value: &str) -> ApiResult<()> {
    if is_http_url(value) {
        Ok(())
    } else {
        Err(ApiError::validation(format!("{field} must be a valid URL")))
    }
}

/// Trims and drops blank strings.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
