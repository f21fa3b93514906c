//! Unified error handling for solanumd.
//!
//! Command handlers return `Result<(), HandlerError>`. The dispatch loop in
//! `network::connection` is the single place that interprets the terminal
//! variants: `Exit` tears the connection down, everything else becomes at
//! most one numeric reply and processing continues.

use solanum_proto::{MsgBuf, Numeric};
use thiserror::Error;

/// Errors produced while handling one inbound command.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not enough parameters")]
    NeedMoreParams,

    #[error("not registered")]
    NotRegistered,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("input line too long")]
    InputTooLong,

    #[error("no privileges")]
    NoPrivileges,

    #[error("missing oper privilege: {0}")]
    NoPrivs(String),

    /// Rate limiter rejected an expensive command.
    #[error("rate limited")]
    Limited,

    /// Reply already sent; nothing more to do.
    #[error("handled")]
    Handled,

    /// Terminal: close the connection with the given quit reason.
    #[error("exiting client: {0}")]
    Exit(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Static code for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams => "need_more_params",
            Self::NotRegistered => "not_registered",
            Self::AlreadyRegistered => "already_registered",
            Self::UnknownCommand(_) => "unknown_command",
            Self::InputTooLong => "input_too_long",
            Self::NoPrivileges => "no_privileges",
            Self::NoPrivs(_) => "no_privs",
            Self::Limited => "rate_limited",
            Self::Handled => "handled",
            Self::Exit(_) => "exit",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to a numeric reply, if this error warrants one.
    ///
    /// `nick` is the recipient's current nick (`*` before registration);
    /// `cmd` is the command that failed.
    pub fn to_numeric(&self, server_name: &str, nick: &str, cmd: &str) -> Option<MsgBuf> {
        let reply = |num: Numeric, params: Vec<String>| {
            let mut msg = MsgBuf::new(num.token()).with_source(server_name);
            msg.params.push(nick.to_string());
            msg.params.extend(params);
            Some(msg)
        };

        match self {
            Self::NeedMoreParams => reply(
                Numeric::ERR_NEEDMOREPARAMS,
                vec![cmd.to_string(), "Not enough parameters".to_string()],
            ),
            Self::NotRegistered => reply(
                Numeric::ERR_NOTREGISTERED,
                vec!["You have not registered".to_string()],
            ),
            Self::AlreadyRegistered => reply(
                Numeric::ERR_ALREADYREGISTERED,
                vec!["You may not reregister".to_string()],
            ),
            Self::UnknownCommand(bad) => reply(
                Numeric::ERR_UNKNOWNCOMMAND,
                vec![bad.clone(), "Unknown command".to_string()],
            ),
            Self::InputTooLong => reply(
                Numeric::ERR_INPUTTOOLONG,
                vec!["Input line was too long".to_string()],
            ),
            Self::NoPrivileges => reply(
                Numeric::ERR_NOPRIVILEGES,
                vec!["Permission Denied - You're not an IRC operator".to_string()],
            ),
            Self::NoPrivs(priv_name) => reply(
                Numeric::ERR_NOPRIVS,
                vec![priv_name.clone(), "Insufficient oper privs".to_string()],
            ),
            Self::Limited => reply(
                Numeric::RPL_LOAD2HI,
                vec![
                    cmd.to_string(),
                    "This command could not be completed because it has been used recently, and is rate-limited".to_string(),
                ],
            ),
            Self::Handled | Self::Exit(_) | Self::Internal(_) => None,
        }
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(HandlerError::NeedMoreParams.error_code(), "need_more_params");
        assert_eq!(HandlerError::Exit("Excess Flood".into()).error_code(), "exit");
    }

    #[test]
    fn test_needmoreparams_reply_shape() {
        let msg = HandlerError::NeedMoreParams
            .to_numeric("irc.test", "alice", "KLINE")
            .unwrap();
        assert_eq!(msg.command, "461");
        assert_eq!(msg.params[0], "alice");
        assert_eq!(msg.params[1], "KLINE");
    }

    #[test]
    fn test_terminal_errors_have_no_reply() {
        assert!(HandlerError::Exit("x".into()).to_numeric("s", "n", "c").is_none());
        assert!(HandlerError::Handled.to_numeric("s", "n", "c").is_none());
    }
}
