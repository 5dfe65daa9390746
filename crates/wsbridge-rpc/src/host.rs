//! The host seam: typed operations and the trait that executes them.

use crate::errors::HostError;

/// One host operation with its validated parameters.
///
/// Numeric `kind`/`duration` fields carry the request's `type`/`duration`
/// values unchanged. Optional free-text parameters that the host expects as
/// a string are already defaulted to `""`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum HostCall {
    SendMessage {
        kind: i64,
        group: Option<String>,
        qq: Option<String>,
        content: String,
    },
    WithdrawMessage {
        group: String,
        msgid: String,
    },
    GetFriendList {
        cache: bool,
    },
    AddFriend {
        qq: String,
        message: String,
    },
    DeleteFriend {
        qq: String,
    },
    GetGroupList {
        cache: bool,
    },
    GetGroupMemberList {
        group: String,
        cache: bool,
    },
    AddGroup {
        group: String,
        message: String,
    },
    QuitGroup {
        group: String,
    },
    GetGroupCard {
        group: String,
        qq: String,
    },
    UploadImage {
        kind: i64,
        object: String,
        data: String,
    },
    GetQqInfo {
        qq: String,
    },
    GetGroupInfo {
        group: String,
    },
    InviteIntoGroup {
        qq: String,
        group: String,
    },
    SetGroupCard {
        qq: String,
        group: String,
        name: String,
    },
    GetLoginAccount,
    SetSignature {
        content: String,
    },
    GetNickname {
        qq: String,
    },
    SetNickname {
        name: String,
    },
    GetPraiseCount {
        qq: String,
    },
    GivePraise {
        qq: String,
    },
    HandleFriendRequest {
        qq: String,
        kind: i64,
        message: String,
    },
    SetState {
        kind: i64,
    },
    HandleGroupRequest {
        group: String,
        qq: String,
        seq: String,
        kind: i64,
        message: String,
    },
    KickGroupMember {
        group: String,
        qq: String,
    },
    Silence {
        group: String,
        qq: String,
        duration: i64,
    },
    GlobalSilence {
        group: String,
        enable: bool,
    },
    GetCookies,
    GetBkn {
        cookies: Option<String>,
    },
    GetBknLong {
        cookies: Option<String>,
    },
}

/// How a host's raw output becomes the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultShape {
    /// Output ignored; reply is `{"id"}`.
    Accept,
    /// Output parsed as JSON; `null` if it does not parse.
    Json,
    /// Output returned as a JSON string.
    Text,
    /// GUID extracted from `[QQ:pic=<GUID>]`, or `""`.
    ImageGuid,
}

impl HostCall {
    /// Wire name of the method.
    pub fn method(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "sendMessage",
            Self::WithdrawMessage { .. } => "withdrawMessage",
            Self::GetFriendList { .. } => "getFriendList",
            Self::AddFriend { .. } => "addFriend",
            Self::DeleteFriend { .. } => "deleteFriend",
            Self::GetGroupList { .. } => "getGroupList",
            Self::GetGroupMemberList { .. } => "getGroupMemberList",
            Self::AddGroup { .. } => "addGroup",
            Self::QuitGroup { .. } => "quitGroup",
            Self::GetGroupCard { .. } => "getGroupCard",
            Self::UploadImage { .. } => "uploadImage",
            Self::GetQqInfo { .. } => "getQQInfo",
            Self::GetGroupInfo { .. } => "getGroupInfo",
            Self::InviteIntoGroup { .. } => "inviteIntoGroup",
            Self::SetGroupCard { .. } => "setGroupCard",
            Self::GetLoginAccount => "getLoginAccount",
            Self::SetSignature { .. } => "setSignature",
            Self::GetNickname { .. } => "getNickname",
            Self::SetNickname { .. } => "setNickname",
            Self::GetPraiseCount { .. } => "getPraiseCount",
            Self::GivePraise { .. } => "givePraise",
            Self::HandleFriendRequest { .. } => "handleFriendRequest",
            Self::SetState { .. } => "setState",
            Self::HandleGroupRequest { .. } => "handleGroupRequest",
            Self::KickGroupMember { .. } => "kickGroupMember",
            Self::Silence { .. } => "silence",
            Self::GlobalSilence { .. } => "globalSilence",
            Self::GetCookies => "getCookies",
            Self::GetBkn { .. } => "getBkn",
            Self::GetBknLong { .. } => "getBknLong",
        }
    }

    /// Reply shape for this operation.
    pub fn result_shape(&self) -> ResultShape {
        match self {
            Self::GetFriendList { .. }
            | Self::GetGroupList { .. }
            | Self::GetGroupMemberList { .. }
            | Self::GetQqInfo { .. }
            | Self::GetGroupInfo { .. } => ResultShape::Json,
            Self::GetGroupCard { .. }
            | Self::GetLoginAccount
            | Self::GetNickname { .. }
            | Self::GetPraiseCount { .. }
            | Self::GetCookies
            | Self::GetBkn { .. }
            | Self::GetBknLong { .. } => ResultShape::Text,
            Self::UploadImage { .. } => ResultShape::ImageGuid,
            _ => ResultShape::Accept,
        }
    }
}

/// The chat host the dispatcher drives.
///
/// Strings crossing this boundary are UTF-8; converting to and from the
/// host's native encoding is the implementor's job. Calls are made from the
/// session task of the requesting connection, so implementations should
/// return promptly.
pub trait Host: Send + Sync {
    /// Run one operation. The returned string is the host's raw output;
    /// action methods may return anything.
    fn execute(&self, call: &HostCall) -> Result<String, HostError>;
}
