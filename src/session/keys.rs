//! Storage keys shared by every backend

pub const ACCESS_TOKEN: &str = "accessToken";
pub const REFRESH_TOKEN: &str = "refreshToken";
pub const IS_LOGGED_IN: &str = "isLoggedIn";
pub const KEEP_LOGIN: &str = "keepLoginSetting";
pub const USER_ID: &str = "userId";
pub const USER_EMAIL: &str = "userEmail";
pub const USER_NAME: &str = "userName";
pub const TOKEN_EXPIRES_AT: &str = "tokenExpiresAt";

/// Keys that carry the session itself (everything except the preference)
pub const SESSION_KEYS: [&str; 7] = [
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    IS_LOGGED_IN,
    USER_ID,
    USER_EMAIL,
    USER_NAME,
    TOKEN_EXPIRES_AT,
];

/// Every key the session store owns
pub const ALL_KEYS: [&str; 8] = [
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    IS_LOGGED_IN,
    KEEP_LOGIN,
    USER_ID,
    USER_EMAIL,
    USER_NAME,
    TOKEN_EXPIRES_AT,
];
