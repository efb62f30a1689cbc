//! SSH session setup shared by the SFTP and SCP backends.

use crate::backend::{Credentials, LocalAccess};
use crate::error::{ErrorKind, Result};
use ssh2::{ErrorCode, Session};
use std::net::TcpStream;
use std::time::Duration;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// libssh2 session error for rejected credentials.
const AUTHENTICATION_FAILED: i32 = -18;
const PUBLICKEY_UNVERIFIED: i32 = -19;

/// Open a TCP connection and an authenticated SSH session on it.
pub(crate) fn connect(credentials: &Credentials) -> Result<Session> {
    let address = credentials.address();
    let tcp = TcpStream::connect(address.as_str()).map_err(|e| LocalAccess::map_io_error(e, &address))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT)).map_err(|e| LocalAccess::map_io_error(e, &address))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT)).map_err(|e| LocalAccess::map_io_error(e, &address))?;

    let mut session = Session::new().map_err(|e| map_ssh_error(&e, &address))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| map_ssh_error(&e, &address))?;
    session
        .userauth_password(credentials.username.as_str(), credentials.password.as_str())
        .map_err(|e| map_ssh_error(&e, &address))?;
    if !session.authenticated() {
        exn::bail!(ErrorKind::BadAuthentication(address));
    }
    Ok(session)
}

pub(crate) fn disconnect(session: &Session) {
    if let Err(e) = session.disconnect(None, "chainbak session closed", None) {
        tracing::debug!(error = %e, "SSH disconnect failed; dropping connection");
    }
}

pub(crate) fn map_ssh_error(error: &ssh2::Error, path: &str) -> ErrorKind {
    classify_code(error.code(), path).unwrap_or_else(|| ErrorKind::Unknown(format!("{path}: {error}")))
}

/// Map well-known libssh2 and SFTP status codes onto the taxonomy.
pub(crate) fn classify_code(code: ErrorCode, path: &str) -> Option<ErrorKind> {
    let path = path.to_string();
    Some(match code {
        ErrorCode::SFTP(2 | 10) => ErrorKind::FileNotFound(path),
        ErrorCode::SFTP(3 | 12) => ErrorKind::Permissions(path),
        ErrorCode::SFTP(11) => ErrorKind::FileAlreadyExists(path),
        ErrorCode::SFTP(19) => ErrorKind::NotDirectory(path),
        ErrorCode::Session(AUTHENTICATION_FAILED | PUBLICKEY_UNVERIFIED) => ErrorKind::BadAuthentication(path),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorCode::SFTP(2), "file-not-found")]
    #[case(ErrorCode::SFTP(10), "file-not-found")]
    #[case(ErrorCode::SFTP(3), "permission")]
    #[case(ErrorCode::SFTP(11), "exists")]
    #[case(ErrorCode::SFTP(19), "not-directory")]
    #[case(ErrorCode::Session(-18), "auth")]
    #[case(ErrorCode::SFTP(4), "unknown")]
    #[case(ErrorCode::Session(-7), "unknown")]
    fn test_classify_code(#[case] code: ErrorCode, #[case] expected: &str) {
        let actual = match classify_code(code, "/x") {
            Some(ErrorKind::FileNotFound(_)) => "file-not-found",
            Some(ErrorKind::Permissions(_)) => "permission",
            Some(ErrorKind::FileAlreadyExists(_)) => "exists",
            Some(ErrorKind::NotDirectory(_)) => "not-directory",
            Some(ErrorKind::BadAuthentication(_)) => "auth",
            None => "unknown",
            Some(other) => panic!("unexpected {other:?}"),
        };
        assert_eq!(actual, expected);
    }
}
