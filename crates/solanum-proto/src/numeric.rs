//! Numeric replies used by the daemon.
//!
//! Only the numerics the core actually sends are listed; the wire rendering
//! is always the zero-padded three-digit code.

/// IRC numeric replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Numeric {
    RPL_WELCOME,
    RPL_YOURHOST,
    RPL_CREATED,
    RPL_MYINFO,
    RPL_ISUPPORT,
    RPL_SNOMASK,
    RPL_STATSCOMMANDS,
    RPL_STATSILINE,
    RPL_STATSKLINE,
    RPL_STATSQLINE,
    RPL_ENDOFSTATS,
    RPL_UMODEIS,
    RPL_STATSUPTIME,
    RPL_STATSOLINE,
    RPL_STATSDLINE,
    RPL_STATSXLINE,
    RPL_STATSYLINE,
    RPL_LUSERCLIENT,
    RPL_LUSEROP,
    RPL_LUSERUNKNOWN,
    RPL_LUSERCHANNELS,
    RPL_LUSERME,
    RPL_LOAD2HI,
    RPL_AWAY,
    RPL_UNAWAY,
    RPL_NOWAWAY,
    RPL_WHOISUSER,
    RPL_WHOISSERVER,
    RPL_WHOISOPERATOR,
    RPL_ENDOFWHOIS,
    RPL_WHOISCHANNELS,
    RPL_WHOISACCOUNT,
    RPL_WHOISSECURE,
    RPL_NAMREPLY,
    RPL_ENDOFNAMES,
    RPL_MOTD,
    RPL_MOTDSTART,
    RPL_ENDOFMOTD,
    RPL_YOUREOPER,
    RPL_REHASHING,
    RPL_HOSTHIDDEN,
    RPL_TESTLINE,
    RPL_NOTESTLINE,
    RPL_TESTMASKGECOS,
    ERR_NOSUCHNICK,
    ERR_NOSUCHSERVER,
    ERR_NOSUCHCHANNEL,
    ERR_CANNOTSENDTOCHAN,
    ERR_TOOMANYCHANNELS,
    ERR_NOTEXTTOSEND,
    ERR_INPUTTOOLONG,
    ERR_UNKNOWNCOMMAND,
    ERR_NOMOTD,
    ERR_NONICKNAMEGIVEN,
    ERR_ERRONEUSNICKNAME,
    ERR_NICKNAMEINUSE,
    ERR_UNAVAILRESOURCE,
    ERR_NOTONCHANNEL,
    ERR_NOTREGISTERED,
    ERR_NEEDMOREPARAMS,
    ERR_ALREADYREGISTERED,
    ERR_PASSWDMISMATCH,
    ERR_YOUREBANNEDCREEP,
    ERR_CHANNELISFULL,
    ERR_INVITEONLYCHAN,
    ERR_BANNEDFROMCHAN,
    ERR_BADCHANNELKEY,
    ERR_NEEDREGGEDNICK,
    ERR_THROTTLE,
    ERR_NOPRIVILEGES,
    ERR_CHANOPRIVSNEEDED,
    ERR_INVALIDCAPCMD,
    ERR_OPERONLY,
    ERR_NOOPERHOST,
    ERR_NOPRIVS,
}

impl Numeric {
    /// Wire code for this numeric.
    pub fn code(self) -> u16 {
        use Numeric::*;
        match self {
            RPL_WELCOME => 1,
            RPL_YOURHOST => 2,
            RPL_CREATED => 3,
            RPL_MYINFO => 4,
            RPL_ISUPPORT => 5,
            RPL_SNOMASK => 8,
            RPL_STATSCOMMANDS => 212,
            RPL_STATSILINE => 215,
            RPL_STATSKLINE => 216,
            RPL_STATSQLINE => 217,
            RPL_ENDOFSTATS => 219,
            RPL_UMODEIS => 221,
            RPL_STATSUPTIME => 242,
            RPL_STATSOLINE => 243,
            RPL_STATSDLINE => 225,
            RPL_STATSXLINE => 247,
            RPL_STATSYLINE => 218,
            RPL_LUSERCLIENT => 251,
            RPL_LUSEROP => 252,
            RPL_LUSERUNKNOWN => 253,
            RPL_LUSERCHANNELS => 254,
            RPL_LUSERME => 255,
            RPL_LOAD2HI => 263,
            RPL_AWAY => 301,
            RPL_UNAWAY => 305,
            RPL_NOWAWAY => 306,
            RPL_WHOISUSER => 311,
            RPL_WHOISSERVER => 312,
            RPL_WHOISOPERATOR => 313,
            RPL_ENDOFWHOIS => 318,
            RPL_WHOISCHANNELS => 319,
            RPL_WHOISACCOUNT => 330,
            RPL_WHOISSECURE => 671,
            RPL_NAMREPLY => 353,
            RPL_ENDOFNAMES => 366,
            RPL_MOTD => 372,
            RPL_MOTDSTART => 375,
            RPL_ENDOFMOTD => 376,
            RPL_YOUREOPER => 381,
            RPL_REHASHING => 382,
            RPL_HOSTHIDDEN => 396,
            RPL_TESTLINE => 725,
            RPL_NOTESTLINE => 726,
            RPL_TESTMASKGECOS => 727,
            ERR_NOSUCHNICK => 401,
            ERR_NOSUCHSERVER => 402,
            ERR_NOSUCHCHANNEL => 403,
            ERR_CANNOTSENDTOCHAN => 404,
            ERR_TOOMANYCHANNELS => 405,
            ERR_NOTEXTTOSEND => 412,
            ERR_INPUTTOOLONG => 417,
            ERR_UNKNOWNCOMMAND => 421,
            ERR_NOMOTD => 422,
            ERR_NONICKNAMEGIVEN => 431,
            ERR_ERRONEUSNICKNAME => 432,
            ERR_NICKNAMEINUSE => 433,
            ERR_UNAVAILRESOURCE => 437,
            ERR_NOTONCHANNEL => 442,
            ERR_NOTREGISTERED => 451,
            ERR_NEEDMOREPARAMS => 461,
            ERR_ALREADYREGISTERED => 462,
            ERR_PASSWDMISMATCH => 464,
            ERR_YOUREBANNEDCREEP => 465,
            ERR_CHANNELISFULL => 471,
            ERR_INVITEONLYCHAN => 473,
            ERR_BANNEDFROMCHAN => 474,
            ERR_BADCHANNELKEY => 475,
            ERR_NEEDREGGEDNICK => 477,
            ERR_THROTTLE => 480,
            ERR_NOPRIVILEGES => 481,
            ERR_CHANOPRIVSNEEDED => 482,
            ERR_INVALIDCAPCMD => 410,
            ERR_OPERONLY => 520,
            ERR_NOOPERHOST => 491,
            ERR_NOPRIVS => 723,
        }
    }

    /// The zero-padded wire token, e.g. `"001"`.
    pub fn token(self) -> String {
        format!("{:03}", self.code())
    }
}

impl std::fmt::Display for Numeric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_padding() {
        assert_eq!(Numeric::RPL_WELCOME.token(), "001");
        assert_eq!(Numeric::ERR_NEEDMOREPARAMS.token(), "461");
    }
}
