//! Message type constants.
//!
//! One numbering scheme: request codes `1..=20`, response codes are
//! `request + 1000`, the generic error response is `1999`, pushes live
//! in `2001..=2008`, and the account-kicked control frame is `2999`.

// Requests.
pub const MSG_REGISTER: u16 = 1;
pub const MSG_CHANGE_PASSWORD: u16 = 2;
pub const MSG_CHANGE_DISPLAY_NAME: u16 = 3;
pub const MSG_LOGIN: u16 = 4;
pub const MSG_LOGOUT: u16 = 5;
pub const MSG_FETCH_ACTIVE_ROOMS: u16 = 6;
pub const MSG_FETCH_INACTIVE_ROOMS: u16 = 7;
pub const MSG_CREATE_ROOM: u16 = 9;
pub const MSG_DELETE_ROOM: u16 = 10;
pub const MSG_SET_ROOM_NAME: u16 = 11;
pub const MSG_SET_ROOM_DESCRIPTION: u16 = 12;
pub const MSG_SET_ROOM_MAX_USERS: u16 = 13;
pub const MSG_SET_ROOM_STATUS: u16 = 14;
pub const MSG_SEND_MESSAGE: u16 = 15;
pub const MSG_GET_MESSAGE_HISTORY: u16 = 16;
pub const MSG_JOIN_ROOM: u16 = 17;
pub const MSG_LEAVE_ROOM: u16 = 18;
pub const MSG_GET_USER_INFO: u16 = 20;

/// Offset from a request code to its response code.
pub const RESPONSE_OFFSET: u16 = 1000;

// Responses.
pub const MSG_REGISTER_RESPONSE: u16 = 1001;
pub const MSG_CHANGE_PASSWORD_RESPONSE: u16 = 1002;
pub const MSG_CHANGE_DISPLAY_NAME_RESPONSE: u16 = 1003;
pub const MSG_LOGIN_RESPONSE: u16 = 1004;
pub const MSG_LOGOUT_RESPONSE: u16 = 1005;
pub const MSG_FETCH_ACTIVE_ROOMS_RESPONSE: u16 = 1006;
pub const MSG_FETCH_INACTIVE_ROOMS_RESPONSE: u16 = 1007;
pub const MSG_CREATE_ROOM_RESPONSE: u16 = 1009;
pub const MSG_DELETE_ROOM_RESPONSE: u16 = 1010;
pub const MSG_SET_ROOM_NAME_RESPONSE: u16 = 1011;
pub const MSG_SET_ROOM_DESCRIPTION_RESPONSE: u16 = 1012;
pub const MSG_SET_ROOM_MAX_USERS_RESPONSE: u16 = 1013;
pub const MSG_SET_ROOM_STATUS_RESPONSE: u16 = 1014;
pub const MSG_SEND_MESSAGE_RESPONSE: u16 = 1015;
pub const MSG_GET_MESSAGE_HISTORY_RESPONSE: u16 = 1016;
pub const MSG_JOIN_ROOM_RESPONSE: u16 = 1017;
pub const MSG_LEAVE_ROOM_RESPONSE: u16 = 1018;
pub const MSG_GET_USER_INFO_RESPONSE: u16 = 1020;

/// Catch-all error response for unroutable requests.
pub const MSG_ERROR_RESPONSE: u16 = 1999;

// Pushes.
pub const MSG_CHAT_MESSAGE_PUSH: u16 = 2001;
pub const MSG_USER_JOIN_PUSH: u16 = 2002;
pub const MSG_USER_LEAVE_PUSH: u16 = 2003;
pub const MSG_SYSTEM_MESSAGE_PUSH: u16 = 2004;
pub const MSG_ROOM_NAME_UPDATE_PUSH: u16 = 2005;
pub const MSG_ROOM_DESCRIPTION_UPDATE_PUSH: u16 = 2006;
pub const MSG_ROOM_MAX_USERS_UPDATE_PUSH: u16 = 2007;
pub const MSG_ROOM_STATUS_CHANGE_PUSH: u16 = 2008;

/// Zero-length control frame sent to an older session when its user
/// logs in again elsewhere.
pub const MSG_ACCOUNT_KICKED: u16 = 2999;

/// Response code for a request code, `MSG_ERROR_RESPONSE` for codes
/// outside the routing table.
pub fn response_for(request: u16) -> u16 {
    match request {
        MSG_REGISTER
        | MSG_CHANGE_PASSWORD
        | MSG_CHANGE_DISPLAY_NAME
        | MSG_LOGIN
        | MSG_LOGOUT
        | MSG_FETCH_ACTIVE_ROOMS
        | MSG_FETCH_INACTIVE_ROOMS
        | MSG_CREATE_ROOM
        | MSG_DELETE_ROOM
        | MSG_SET_ROOM_NAME
        | MSG_SET_ROOM_DESCRIPTION
        | MSG_SET_ROOM_MAX_USERS
        | MSG_SET_ROOM_STATUS
        | MSG_SEND_MESSAGE
        | MSG_GET_MESSAGE_HISTORY
        | MSG_JOIN_ROOM
        | MSG_LEAVE_ROOM
        | MSG_GET_USER_INFO => request + RESPONSE_OFFSET,
        _ => MSG_ERROR_RESPONSE,
    }
}
