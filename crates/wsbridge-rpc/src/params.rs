//! Method-name lookup and parameter validation.
//!
//! Parameters are read from the request's `params` object by name. A value
//! with the wrong JSON type counts as absent. `type` and `duration` are
//! numbers, `enable` and `cache` are booleans, everything else is a string.

use serde_json::Value;

use crate::errors::RpcError;
use crate::host::HostCall;

/// Typed view over an optional `params` object.
#[derive(Clone, Copy)]
struct Params<'a> {
    map: Option<&'a serde_json::Map<String, Value>>,
}

impl<'a> Params<'a> {
    fn new(params: Option<&'a Value>) -> Self {
        Self {
            map: params.and_then(Value::as_object),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(key))
    }

    fn string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_str).map(str::to_owned)
    }

    fn number(&self, key: &str) -> Option<i64> {
        let value = self.get(key)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    fn req_string(&self, key: &str) -> Result<String, RpcError> {
        self.string(key).ok_or(RpcError::InvalidParams)
    }

    fn req_number(&self, key: &str) -> Result<i64, RpcError> {
        self.number(key).ok_or(RpcError::InvalidParams)
    }

    fn req_flag(&self, key: &str) -> Result<bool, RpcError> {
        self.flag(key).ok_or(RpcError::InvalidParams)
    }

    fn text_or_empty(&self, key: &str) -> String {
        self.string(key).unwrap_or_default()
    }

    fn cache(&self) -> bool {
        self.flag("cache").unwrap_or(false)
    }
}

/// Build the [`HostCall`] for `method` from its `params`.
///
/// Unknown names give [`RpcError::UnknownMethod`] whatever the params are;
/// known names with a missing or mistyped required parameter give
/// [`RpcError::InvalidParams`].
pub fn parse_call(method: &str, params: Option<&Value>) -> Result<HostCall, RpcError> {
    let p = Params::new(params);
    let call = match method {
        "sendMessage" => {
            let kind = p.req_number("type")?;
            let content = p.req_string("content")?;
            let group = p.string("group");
            let qq = p.string("qq");
            if group.is_none() && qq.is_none() {
                return Err(RpcError::InvalidParams);
            }
            HostCall::SendMessage {
                kind,
                group,
                qq,
                content,
            }
        }
        "withdrawMessage" => HostCall::WithdrawMessage {
            group: p.req_string("group")?,
            msgid: p.req_string("msgid")?,
        },
        "getFriendList" => HostCall::GetFriendList { cache: p.cache() },
        "addFriend" => HostCall::AddFriend {
            qq: p.req_string("qq")?,
            message: p.text_or_empty("message"),
        },
        "deleteFriend" => HostCall::DeleteFriend {
            qq: p.req_string("qq")?,
        },
        "getGroupList" => HostCall::GetGroupList { cache: p.cache() },
        "getGroupMemberList" => HostCall::GetGroupMemberList {
            group: p.req_string("group")?,
            cache: p.cache(),
        },
        "addGroup" => HostCall::AddGroup {
            group: p.req_string("group")?,
            message: p.text_or_empty("message"),
        },
        "quitGroup" => HostCall::QuitGroup {
            group: p.req_string("group")?,
        },
        "getGroupCard" => HostCall::GetGroupCard {
            group: p.req_string("group")?,
            qq: p.req_string("qq")?,
        },
        "uploadImage" => HostCall::UploadImage {
            kind: p.req_number("type")?,
            object: p.req_string("object")?,
            data: p.req_string("data")?,
        },
        "getQQInfo" => HostCall::GetQqInfo {
            qq: p.req_string("qq")?,
        },
        "getGroupInfo" => HostCall::GetGroupInfo {
            group: p.req_string("group")?,
        },
        "inviteIntoGroup" => HostCall::InviteIntoGroup {
            qq: p.req_string("qq")?,
            group: p.req_string("group")?,
        },
        "setGroupCard" => HostCall::SetGroupCard {
            qq: p.req_string("qq")?,
            group: p.req_string("group")?,
            name: p.req_string("name")?,
        },
        "getLoginAccount" => HostCall::GetLoginAccount,
        "setSignature" => HostCall::SetSignature {
            content: p.req_string("content")?,
        },
        "getNickname" => HostCall::GetNickname {
            qq: p.req_string("qq")?,
        },
        "setNickname" => HostCall::SetNickname {
            name: p.req_string("name")?,
        },
        "getPraiseCount" => HostCall::GetPraiseCount {
            qq: p.req_string("qq")?,
        },
        "givePraise" => HostCall::GivePraise {
            qq: p.req_string("qq")?,
        },
        "handleFriendRequest" => HostCall::HandleFriendRequest {
            qq: p.req_string("qq")?,
            kind: p.req_number("type")?,
            message: p.text_or_empty("message"),
        },
        "setState" => HostCall::SetState {
            kind: p.req_number("type")?,
        },
        "handleGroupRequest" => HostCall::HandleGroupRequest {
            group: p.req_string("group")?,
            qq: p.req_string("qq")?,
            seq: p.req_string("seq")?,
            kind: p.req_number("type")?,
            message: p.text_or_empty("message"),
        },
        "kickGroupMember" => HostCall::KickGroupMember {
            group: p.req_string("group")?,
            qq: p.req_string("qq")?,
        },
        "silence" => HostCall::Silence {
            group: p.req_string("group")?,
            qq: p.req_string("qq")?,
            duration: p.req_number("duration")?,
        },
        "globalSilence" => HostCall::GlobalSilence {
            group: p.req_string("group")?,
            enable: p.req_flag("enable")?,
        },
        "getCookies" => HostCall::GetCookies,
        "getBkn" => HostCall::GetBkn {
            cookies: p.string("cookies"),
        },
        "getBknLong" => HostCall::GetBknLong {
            cookies: p.string("cookies"),
        },
        _ => return Err(RpcError::UnknownMethod),
    };
    Ok(call)
}
