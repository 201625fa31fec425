//! Message type codes. Each code is a two character mnemonic read as a
//! big-endian `u16`; codes this build does not know map to
//! [`MsgCode::Unknown`] instead of being rejected.

/// Player ids at the top of the `u8` range are reserved.
pub const NO_PLAYER: u8 = 255;
pub const ALL_PLAYERS: u8 = 254;
pub const SERVER_PLAYER: u8 = 253;
pub const ADMIN_PLAYERS: u8 = 252;
/// Team pseudo-ids count down from here.
pub const FIRST_TEAM: u8 = 251;

const fn mnemonic(code: &[u8; 2]) -> u16 {
    ((code[0] as u16) << 8) | code[1] as u16
}

macro_rules! msg_codes {
    ($($name:ident = $code:expr,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MsgCode {
            $($name,)*
            Unknown(u16),
        }

        impl MsgCode {
            pub const ALL: &'static [MsgCode] = &[$(MsgCode::$name,)*];

            pub const fn as_u16(self) -> u16 {
                match self {
                    $(MsgCode::$name => $code,)*
                    MsgCode::Unknown(raw) => raw,
                }
            }

            pub const fn from_u16(raw: u16) -> Self {
                $(if raw == $code {
                    return MsgCode::$name;
                })*
                MsgCode::Unknown(raw)
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(MsgCode::$name => concat!("Msg", stringify!($name)),)*
                    MsgCode::Unknown(_) => "MsgUnknown",
                }
            }
        }
    };
}

msg_codes! {
    Null = 0x0000,
    Accept = mnemonic(b"ac"),
    AdminInfo = mnemonic(b"ai"),
    Alive = mnemonic(b"al"),
    AddPlayer = mnemonic(b"ap"),
    AutoPilot = mnemonic(b"au"),
    CaptureFlag = mnemonic(b"cf"),
    CustomSound = mnemonic(b"cs"),
    CacheUrl = mnemonic(b"cu"),
    DropFlag = mnemonic(b"df"),
    Enter = mnemonic(b"en"),
    Exit = mnemonic(b"ex"),
    FlagType = mnemonic(b"ft"),
    FlagUpdate = mnemonic(b"fu"),
    FetchResources = mnemonic(b"fr"),
    GrabFlag = mnemonic(b"gf"),
    GmUpdate = mnemonic(b"gm"),
    GetWorld = mnemonic(b"gw"),
    GameSettings = mnemonic(b"gs"),
    GameTime = mnemonic(b"gt"),
    Handicap = mnemonic(b"hc"),
    Killed = mnemonic(b"kl"),
    LagState = mnemonic(b"ls"),
    Message = mnemonic(b"mg"),
    NearFlag = mnemonic(b"Nf"),
    NewRabbit = mnemonic(b"nR"),
    NegotiateFlags = mnemonic(b"nf"),
    Pause = mnemonic(b"pa"),
    PlayerInfo = mnemonic(b"pb"),
    PlayerUpdate = mnemonic(b"pu"),
    PlayerUpdateSmall = mnemonic(b"ps"),
    QueryGame = mnemonic(b"qg"),
    QueryPlayers = mnemonic(b"qp"),
    Reject = mnemonic(b"rj"),
    RemovePlayer = mnemonic(b"rp"),
    ReplayReset = mnemonic(b"rr"),
    ShotBegin = mnemonic(b"sb"),
    Score = mnemonic(b"sc"),
    ScoreOver = mnemonic(b"so"),
    ShotEnd = mnemonic(b"se"),
    SuperKill = mnemonic(b"sk"),
    SetVar = mnemonic(b"sv"),
    TimeUpdate = mnemonic(b"to"),
    Teleport = mnemonic(b"tp"),
    TransferFlag = mnemonic(b"tf"),
    TeamUpdate = mnemonic(b"tu"),
    WantWHash = mnemonic(b"wh"),
    WantSettings = mnemonic(b"ws"),
    PortalAdd = mnemonic(b"Pa"),
    PortalRemove = mnemonic(b"Pr"),
    PortalUpdate = mnemonic(b"Pu"),
    LagPing = mnemonic(b"pi"),
    EchoRequest = mnemonic(b"et"),
    EchoResponse = mnemonic(b"eR"),
    PlayerData = mnemonic(b"pd"),
    PingCodeReply = 0x0303,
    PingCodeRequest = 0x0404,
    UdpLinkRequest = mnemonic(b"of"),
    UdpLinkEstablished = mnemonic(b"og"),
}

impl MsgCode {
    /// High-frequency, loss-tolerant messages allowed on the UDP fast path.
    pub const fn is_udp_eligible(self) -> bool {
        matches!(
            self,
            MsgCode::PlayerUpdate
                | MsgCode::PlayerUpdateSmall
                | MsgCode::ShotBegin
                | MsgCode::ShotEnd
                | MsgCode::GmUpdate
                | MsgCode::UdpLinkRequest
                | MsgCode::UdpLinkEstablished
        )
    }

    pub const fn is_known(self) -> bool {
        !matches!(self, MsgCode::Unknown(_))
    }
}

impl From<u16> for MsgCode {
    fn from(raw: u16) -> Self {
        MsgCode::from_u16(raw)
    }
}

impl From<MsgCode> for u16 {
    fn from(code: MsgCode) -> Self {
        code.as_u16()
    }
}

impl std::fmt::Display for MsgCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgCode::Unknown(raw) => write!(f, "MsgUnknown(0x{raw:04x})"),
            known => f.write_str(known.name()),
        }
    }
}
