//! Command-line validation.
//!
//! The supervisor launches the worker as `meshcore-core <toAngelFd>
//! <fromAngelFd>`. Anything else means somebody started it by hand.

use std::os::fd::RawFd;

use meshcore_core::FatalError;

/// Descriptors handed over by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptors {
    /// Worker writes, supervisor reads
    pub to_angel: RawFd,
    /// Supervisor writes, worker reads
    pub from_angel: RawFd,
}

fn parse_fd(text: &str) -> Result<RawFd, FatalError> {
    // `str::parse` would also accept a leading '+'.
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FatalError::InvalidInvocation(
            format!("'{text}' is not a descriptor number").into(),
        ));
    }
    match text.parse::<RawFd>() {
        Ok(0) => Err(FatalError::InvalidInvocation("descriptor 0 is not allowed".into())),
        Ok(fd) => Ok(fd),
        Err(e) => Err(FatalError::InvalidInvocation(
            format!("'{text}': {e}").into(),
        )),
    }
}

/// Validate the positional arguments.
pub fn descriptors(args: &[String]) -> Result<Descriptors, FatalError> {
    match args {
        [to, from] => Ok(Descriptors {
            to_angel: parse_fd(to)?,
            from_angel: parse_fd(from)?,
        }),
        _ => Err(FatalError::InvalidInvocation(
            format!("expected 2 descriptors, got {}", args.len()).into(),
        )),
    }
}
