use commitstreak_types::{Identity, RemoteCommit};

/// Why a commit was attributed to the tracked identity, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorMatch {
    PlatformIdentity,
    VerifiedEmail,
    NoReplyEmail,
}

/// Attributes `commit` to `identity`, or returns `None`.
///
/// A matching author *name* alone is never enough.
pub fn match_author(
    identity: &Identity,
    commit: &RemoteCommit,
    noreply_domain: &str,
) -> Option<AuthorMatch> {
    if commit.author_id == Some(identity.id) {
        return Some(AuthorMatch::PlatformIdentity);
    }

    let email = commit.author_email.as_deref()?.trim();
    if email.is_empty() {
        return None;
    }

    if let Some(ref verified) = identity.email {
        if email.eq_ignore_ascii_case(verified.trim()) {
            return Some(AuthorMatch::VerifiedEmail);
        }
    }

    if is_noreply_for(email, identity, noreply_domain) {
        return Some(AuthorMatch::NoReplyEmail);
    }

    None
}

/// `<login>@<domain>` or `<id>+<login>@<domain>`.
fn is_noreply_for(email: &str, identity: &Identity, noreply_domain: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if !domain.eq_ignore_ascii_case(noreply_domain) {
        return false;
    }

    let login = match local.split_once('+') {
        Some((id, login)) => {
            if id != identity.id.to_string() {
                return false;
            }
            login
        }
        None => local,
    };
    login.eq_ignore_ascii_case(&identity.login)
}
