use anyhow::Result;
use libc::{getpwuid, uid_t};
use std::ffi::CStr;

/// Subject to act on when none is given: the invoking user under sudo,
/// otherwise the effective user's login name.
pub fn default_subject() -> Result<String> {
    if let Ok(sudo_user) = std::env::var("SUDO_USER") {
        return Ok(sudo_user);
    }
    unsafe {
        let uid = libc::geteuid();
        let pwd = getpwuid(uid as uid_t);
        if pwd.is_null() {
            return Err(anyhow::anyhow!("failed to resolve current user"));
        }
        let name = CStr::from_ptr((*pwd).pw_name);
        Ok(name.to_string_lossy().into_owned())
    }
}

/// Subject ids name a directory in the profile store, so they are limited
/// to ASCII letters, digits, `-` and `_`.
pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        anyhow::bail!("subject id cannot be empty");
    }
    if !subject
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        anyhow::bail!("invalid subject id '{subject}': use ASCII letters, numbers, '-' or '_' only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_rfid_and_login_names() {
        assert!(validate_subject("0006435835").is_ok());
        assert!(validate_subject("jane_doe-2").is_ok());
    }

    #[test]
    fn rejects_paths_and_blanks() {
        assert!(validate_subject("").is_err());
        assert!(validate_subject("../root").is_err());
        assert!(validate_subject("a b").is_err());
    }
}
